use crate::registers::CELL_VOLTS_PER_LSB;
use crate::soc::SocTable;
use crate::stats::PackStats;
use crate::units::{ElectricCurrent, ElectricPotential};
use uom::si::electric_current::ampere;
use uom::si::electric_potential::volt;

/// Represents the measured cell voltages, cell 1 first.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CellVoltages<const N: usize> {
    pub voltages: [ElectricPotential; N],
}

impl<const N: usize> Default for CellVoltages<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CellVoltages<N> {
    /// Header byte, two bytes per cell, two CRC bytes.
    pub const RESPONSE_LEN: usize = 1 + 2 * N + 2;

    pub fn new() -> Self {
        Self {
            voltages: [ElectricPotential::new::<volt>(0.0); N],
        }
    }

    /// Decodes a cell voltage response.
    ///
    /// The monitor sends the highest cell first, big-endian, after one header byte.
    /// Returns `None` if `response` is too short to hold `N` cells.
    pub fn from_response(response: &[u8]) -> Option<Self> {
        let data = response.get(1..1 + 2 * N)?;
        let mut cells = Self::new();
        for (k, chunk) in data.chunks_exact(2).enumerate() {
            let raw = u16::from_be_bytes([chunk[0], chunk[1]]);
            cells.voltages[N - 1 - k] =
                ElectricPotential::new::<volt>(raw as f32 * CELL_VOLTS_PER_LSB);
        }
        Some(cells)
    }

    /// Converts every cell voltage to SOC through `table`.
    pub fn to_soc(&self, table: &SocTable<'_>) -> SocSamples<N> {
        let mut samples = SocSamples::new();
        for (soc, voltage) in samples.values.iter_mut().zip(self.voltages.iter()) {
            *soc = table.voltage_to_soc(*voltage);
        }
        samples
    }
}

/// Per-cell state of charge in percent, cell 1 first. Every value lies in 0..=100.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocSamples<const N: usize> {
    pub values: [f32; N],
}

impl<const N: usize> Default for SocSamples<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SocSamples<N> {
    pub fn new() -> Self {
        Self { values: [0.0; N] }
    }
}

/// Pack-wide fault flags collected during one measurement cycle.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultFlags {
    /// At least one cell above the overvoltage threshold.
    pub overvoltage: bool,
    /// At least one cell below the undervoltage threshold.
    pub undervoltage: bool,
    /// Pack current above the overcurrent threshold.
    pub overcurrent: bool,
}

impl FaultFlags {
    pub fn any(&self) -> bool {
        self.overvoltage || self.undervoltage || self.overcurrent
    }
}

/// Everything one measurement cycle produced. Rewritten in place every cycle.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CycleContext<const N: usize> {
    pub voltages: CellVoltages<N>,
    pub soc: SocSamples<N>,
    pub stats: PackStats,
    /// `None` until the pack relay has been closed.
    pub pack_current: Option<ElectricCurrent>,
    pub faults: FaultFlags,
}

impl<const N: usize> Default for CycleContext<N> {
    fn default() -> Self {
        Self {
            voltages: CellVoltages::new(),
            soc: SocSamples::new(),
            stats: PackStats::default(),
            pack_current: None,
            faults: FaultFlags::default(),
        }
    }
}

impl<const N: usize> CycleContext<N> {
    /// Pack current in amps, for logging.
    pub fn pack_current_amps(&self) -> Option<f32> {
        self.pack_current.map(|i| i.get::<ampere>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn decodes_highest_cell_first() {
        let response = [
            0x0B, 0xB7, 0x71, 0xCB, 0xD2, 0xC6, 0xBA, 0xBE, 0x10, 0xB2, 0x58, 0xA8, 0x27, 0x27,
            0x22,
        ];
        let cells = CellVoltages::<6>::from_response(&response).unwrap();
        let expected = [3.3, 3.5, 3.73, 3.9, 4.0, 3.6];
        for (v, e) in cells.voltages.iter().zip(expected) {
            assert_relative_eq!(v.get::<volt>(), e, epsilon = 1e-3);
        }
    }

    #[test]
    fn short_response_is_rejected() {
        assert!(CellVoltages::<6>::from_response(&[0x0B, 0x00, 0x01]).is_none());
        assert_eq!(CellVoltages::<6>::RESPONSE_LEN, 15);
    }

    #[test]
    fn no_faults_by_default() {
        assert!(!FaultFlags::default().any());
        let flags = FaultFlags {
            overcurrent: true,
            ..Default::default()
        };
        assert!(flags.any());
    }
}
