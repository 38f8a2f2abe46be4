//! Pack-level SOC statistics and imbalance detection.

/// Mean and population standard deviation of the per-cell SOC, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PackStats {
    pub mean: f32,
    pub std_dev: f32,
}

/// Computes [`PackStats`] over one cycle's SOC samples. Divisor is N, not N-1.
pub fn compute_stats(samples: &[f32]) -> PackStats {
    if samples.is_empty() {
        return PackStats::default();
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let sum_sq: f32 = samples.iter().map(|s| (s - mean) * (s - mean)).sum();

    PackStats {
        mean,
        std_dev: libm::sqrtf(sum_sq / n),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Classification {
    Overcharged,
    Undercharged,
}

/// The cell a balancing cycle acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BalanceTarget {
    /// Zero-based position in the SOC sample array (cell 1 first).
    pub index: usize,
    pub classification: Classification,
}

impl BalanceTarget {
    /// One-based cell number as used by the switch matrix.
    pub fn cell_number(&self) -> u8 {
        (self.index + 1) as u8
    }
}

/// Finds the cell deviating most from `mean`.
///
/// Ties keep the lowest index. A cell exactly at the mean classifies as undercharged.
pub fn detect_imbalance(samples: &[f32], mean: f32) -> BalanceTarget {
    let mut index = 0;
    let mut max_deviation = 0.0f32;

    for (i, &sample) in samples.iter().enumerate() {
        let deviation = libm::fabsf(sample - mean);
        if deviation > max_deviation {
            max_deviation = deviation;
            index = i;
        }
    }

    let classification = match samples.get(index) {
        Some(&sample) if sample > mean => Classification::Overcharged,
        _ => Classification::Undercharged,
    };

    BalanceTarget {
        index,
        classification,
    }
}
