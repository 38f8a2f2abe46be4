use crate::soc::SocTable;
use crate::units::{ElectricCurrent, ElectricPotential, ElectricalResistance};
use uom::si::electric_current::ampere;
use uom::si::electric_potential::volt;
use uom::si::electrical_resistance::milliohm;

/// Analog front end between a shunt and a 12-bit ADC input.
///
/// `current = (raw / full_scale * reference / amplifier_gain) / shunt`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentSenseConfig {
    /// ADC counts at the reference voltage (4096 for 12 bit).
    pub full_scale: u16,
    /// ADC reference voltage.
    pub reference: ElectricPotential,
    /// Current sense amplifier gain in V/V.
    pub amplifier_gain: f32,
    pub shunt: ElectricalResistance,
}

impl CurrentSenseConfig {
    /// Flyback output sense: 20 V/V amplifier across a 5 mΩ shunt.
    pub fn flyback() -> Self {
        Self {
            full_scale: 4096,
            reference: ElectricPotential::new::<volt>(3.3),
            amplifier_gain: 20.0,
            shunt: ElectricalResistance::new::<milliohm>(5.0),
        }
    }

    /// Pack current sense: 0.5 V per amp overall.
    pub fn pack() -> Self {
        Self {
            full_scale: 4096,
            reference: ElectricPotential::new::<volt>(3.3),
            amplifier_gain: 20.0,
            shunt: ElectricalResistance::new::<milliohm>(25.0),
        }
    }

    /// Voltage at the ADC pin for a raw sample.
    pub fn sense_voltage(&self, raw: u16) -> ElectricPotential {
        self.reference * (raw as f32 / self.full_scale as f32)
    }

    /// Shunt current for a raw sample.
    pub fn current_from_raw(&self, raw: u16) -> ElectricCurrent {
        (self.sense_voltage(raw) / self.amplifier_gain) / self.shunt
    }
}

/// Acceptable balancing current range. Inside `[low, high]` the regulator holds its duty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentBand {
    pub low: ElectricCurrent,
    pub high: ElectricCurrent,
}

impl CurrentBand {
    pub fn new(low: ElectricCurrent, high: ElectricCurrent) -> Self {
        Self { low, high }
    }

    pub fn midpoint(&self) -> ElectricCurrent {
        (self.low + self.high) / 2.0
    }
}

/// Balancing current presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BalanceCurrent {
    #[default]
    OneAmp,
    FourAmp,
}

impl BalanceCurrent {
    pub fn regulator_config(self) -> RegulatorConfig {
        match self {
            BalanceCurrent::OneAmp => RegulatorConfig::one_amp(),
            BalanceCurrent::FourAmp => RegulatorConfig::four_amp(),
        }
    }
}

/// One flyback regulator session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulatorConfig {
    pub band: CurrentBand,
    /// Duty cycle in percent applied before the converter starts.
    pub initial_duty: u8,
    /// Number of feedback iterations.
    pub iterations: u8,
    /// Wait after starting the converter before the first reading.
    pub settle_ms: u32,
    /// Wait after each duty adjustment.
    pub iteration_ms: u32,
    /// Wait after stopping the converter.
    pub stop_settle_ms: u32,
    /// Lower duty bound in percent.
    pub min_duty: u8,
    /// Upper duty bound in percent.
    pub max_duty: u8,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self::one_amp()
    }
}

impl RegulatorConfig {
    /// 0.95 - 1.05 A, starting at 28 % duty, 5 iterations.
    pub fn one_amp() -> Self {
        Self {
            band: CurrentBand::new(
                ElectricCurrent::new::<ampere>(0.95),
                ElectricCurrent::new::<ampere>(1.05),
            ),
            initial_duty: 28,
            iterations: 5,
            settle_ms: 1000,
            iteration_ms: 1000,
            stop_settle_ms: 500,
            min_duty: 0,
            max_duty: 90,
        }
    }

    /// 3.8 - 4.2 A, starting at 76 % duty, 10 iterations.
    pub fn four_amp() -> Self {
        Self {
            band: CurrentBand::new(
                ElectricCurrent::new::<ampere>(3.8),
                ElectricCurrent::new::<ampere>(4.2),
            ),
            initial_duty: 76,
            iterations: 10,
            ..Self::one_amp()
        }
    }

    /// Bounds `duty` to `min_duty..=max_duty` and to 100 %. With inverted bounds
    /// the upper one wins.
    pub fn clamp_duty(&self, duty: i16) -> u8 {
        duty.max(self.min_duty as i16)
            .min(self.max_duty as i16)
            .clamp(0, 100) as u8
    }
}

/// Thresholds and tunables of the measurement and balancing cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackConfig {
    /// Balancing triggers when the SOC standard deviation exceeds this, in percent.
    pub std_dev_threshold: f32,
    pub cell_overvoltage: ElectricPotential,
    pub cell_undervoltage: ElectricPotential,
    pub pack_overcurrent: ElectricCurrent,
    pub soc_table: SocTable<'static>,
    pub pack_sense: CurrentSenseConfig,
    /// Deadline for a monitor response.
    pub response_timeout_ms: u32,
    pub balance_current: BalanceCurrent,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            std_dev_threshold: 5.0,
            cell_overvoltage: ElectricPotential::new::<volt>(4.2),
            cell_undervoltage: ElectricPotential::new::<volt>(2.5),
            pack_overcurrent: ElectricCurrent::new::<ampere>(1.0),
            soc_table: SocTable::default(),
            pack_sense: CurrentSenseConfig::pack(),
            response_timeout_ms: 50,
            balance_current: BalanceCurrent::OneAmp,
        }
    }
}
