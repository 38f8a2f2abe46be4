//! Open-circuit-voltage to state-of-charge lookup.

use uom::si::electric_potential::volt;

use crate::units::ElectricPotential;

/// One anchor of a voltage → SOC curve.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltageSocPoint {
    /// Cell voltage in volts.
    pub voltage: f32,
    /// State of charge in percent.
    pub soc: u8,
}

const fn point(voltage: f32, soc: u8) -> VoltageSocPoint {
    VoltageSocPoint { voltage, soc }
}

/// OCV curve of the Molicel P45B cell.
///
/// Anchors characterised at 0.8 % and 8.5 % are stored as whole percents (0 and 8).
pub const MOLICEL_P45B: [VoltageSocPoint; 23] = [
    point(2.6, 0),
    point(2.8, 0),
    point(3.0, 3),
    point(3.2, 8),
    point(3.25, 10),
    point(3.3, 13),
    point(3.4, 18),
    point(3.42, 20),
    point(3.5, 25),
    point(3.54, 30),
    point(3.6, 35),
    point(3.63, 40),
    point(3.73, 50),
    point(3.8, 58),
    point(3.81, 60),
    point(3.86, 65),
    point(3.92, 70),
    point(3.96, 75),
    point(4.01, 80),
    point(4.06, 85),
    point(4.09, 90),
    point(4.11, 95),
    point(4.19, 100),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocTableError {
    Empty,
    /// Anchor `index` does not have a higher voltage than the one before it.
    NotIncreasing { index: usize },
    /// Anchor `index` has an SOC above 100 %.
    SocOutOfRange { index: usize },
}

/// A validated, voltage-sorted lookup table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SocTable<'a> {
    points: &'a [VoltageSocPoint],
}

impl Default for SocTable<'static> {
    fn default() -> Self {
        Self {
            points: &MOLICEL_P45B,
        }
    }
}

impl<'a> SocTable<'a> {
    /// Wraps `points` after checking that voltages are strictly increasing and
    /// every SOC lies in 0..=100.
    pub fn new(points: &'a [VoltageSocPoint]) -> Result<Self, SocTableError> {
        if points.is_empty() {
            return Err(SocTableError::Empty);
        }
        if let Some(index) = points.iter().position(|p| p.soc > 100) {
            return Err(SocTableError::SocOutOfRange { index });
        }
        for (i, pair) in points.windows(2).enumerate() {
            if pair[1].voltage <= pair[0].voltage {
                return Err(SocTableError::NotIncreasing { index: i + 1 });
            }
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &'a [VoltageSocPoint] {
        self.points
    }

    /// SOC in percent for a cell voltage in volts.
    ///
    /// Clamps to the first/last anchor outside the table; inside, interpolates
    /// linearly between the first bracketing pair and truncates to a whole percent.
    pub fn soc_at(&self, voltage: f32) -> f32 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];

        if voltage <= first.voltage {
            return first.soc as f32;
        }
        if voltage >= last.voltage {
            return last.soc as f32;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if voltage >= lo.voltage && voltage <= hi.voltage {
                let fraction = (voltage - lo.voltage) / (hi.voltage - lo.voltage);
                let step = (fraction * (hi.soc as f32 - lo.soc as f32)) as i32;
                return (lo.soc as i32 + step) as f32;
            }
        }

        // NaN is the only input that falls through every comparison.
        first.soc as f32
    }

    /// SOC in percent for a measured cell voltage.
    pub fn voltage_to_soc(&self, voltage: ElectricPotential) -> f32 {
        self.soc_at(voltage.get::<volt>())
    }
}
