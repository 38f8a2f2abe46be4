//! MOSFET lines that connect one cell at a time to the flyback converter.

#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;

use embedded_hal::digital::{Error as _, OutputPin};
use heapless::Vec;

use crate::errors::Error;
use crate::registers::MAX_CELLS;

/// Line mask with bit `k - 1` set for every line `k` in `lines` (lines are 1-based).
pub const fn line_mask<const K: usize>(lines: [u8; K]) -> u16 {
    let mut mask = 0;
    let mut i = 0;
    while i < K {
        mask |= 1 << (lines[i] - 1);
        i += 1;
    }
    mask
}

/// Lines asserted for cells 1 to 6 of the reference board (11 lines).
pub const REFERENCE_PATHS: [u16; 6] = [
    line_mask([2, 4, 10, 11]),
    line_mask([1, 3, 9, 10]),
    line_mask([2, 4, 8, 9]),
    line_mask([1, 3, 7, 8]),
    line_mask([2, 4, 6, 7]),
    line_mask([1, 3, 5, 6]),
];

/// Number of switch lines on the reference board.
pub const REFERENCE_LINES: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchMatrixConfig {
    /// Entry `c - 1` is the line mask for cell `c`.
    pub paths: Vec<u16, MAX_CELLS>,
    /// Wait after enabling a path and before resetting the matrix.
    pub settle_ms: u32,
}

impl Default for SwitchMatrixConfig {
    fn default() -> Self {
        Self {
            paths: Vec::from_slice(&REFERENCE_PATHS).unwrap_or_default(),
            settle_ms: 500,
        }
    }
}

impl SwitchMatrixConfig {
    /// Returns `None` if `paths` holds more than [`MAX_CELLS`] entries.
    pub fn new(paths: &[u16], settle_ms: u32) -> Option<Self> {
        Some(Self {
            paths: Vec::from_slice(paths).ok()?,
            settle_ms,
        })
    }
}

/// Drives `L` switch lines. At most one cell path is asserted at a time.
pub struct SwitchMatrix<P, const L: usize> {
    lines: [P; L],
    config: SwitchMatrixConfig,
    active: Option<u8>,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "SwitchMatrix",),
    async(feature = "async", keep_self)
)]
impl<P, const L: usize> SwitchMatrix<P, L>
where
    P: OutputPin,
{
    /// Takes ownership of the lines, line 1 first. Mask bits beyond `L` are ignored.
    pub fn new(lines: [P; L], config: SwitchMatrixConfig) -> Self {
        Self {
            lines,
            config,
            active: None,
        }
    }

    /// Number of cells with a configured path.
    pub fn cells(&self) -> usize {
        self.config.paths.len()
    }

    /// Cell whose path is currently asserted.
    pub fn active_path(&self) -> Option<u8> {
        self.active
    }

    pub fn config(&self) -> &SwitchMatrixConfig {
        &self.config
    }

    /// Releases the line pins.
    pub fn release(self) -> [P; L] {
        self.lines
    }

    /// Asserts the path of `cell` (1-based) and waits for the switches to settle.
    ///
    /// Fails with [`Error::PathBusy`] while another path is active; call
    /// [`Self::reset_all`] first.
    pub async fn enable_path<E: PartialEq, D: DelayNs>(
        &mut self,
        cell: u8,
        delay: &mut D,
    ) -> Result<(), Error<E>> {
        let mask = cell
            .checked_sub(1)
            .and_then(|i| self.config.paths.get(i as usize).copied())
            .ok_or(Error::<E>::InvalidCell(cell))?;
        if let Some(active) = self.active {
            return Err(Error::PathBusy { active });
        }

        // Marked before driving: a partially asserted path still needs a reset.
        self.active = Some(cell);
        for (k, line) in self.lines.iter_mut().enumerate() {
            if k < u16::BITS as usize && mask & (1 << k) != 0 {
                line.set_high().map_err(|e| Error::<E>::Pin(e.kind()))?;
            }
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("Switch path for cell {} enabled (mask {:#06x})", cell, mask);

        delay.delay_ms(self.config.settle_ms).await;
        Ok(())
    }

    /// Waits for the converter to wind down, then deasserts every line.
    pub async fn reset_all<E: PartialEq, D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<(), Error<E>> {
        delay.delay_ms(self.config.settle_ms).await;

        let mut result = Ok(());
        for line in self.lines.iter_mut() {
            if let Err(e) = line.set_low() {
                if result.is_ok() {
                    result = Err(Error::Pin(e.kind()));
                }
            }
        }

        if result.is_ok() {
            #[cfg(feature = "defmt")]
            defmt::debug!("Switch matrix reset");
            self.active = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_masks() {
        assert_eq!(REFERENCE_PATHS[0], 0b110_0000_1010);
        assert_eq!(REFERENCE_PATHS[1], 0b011_0000_0101);
        assert_eq!(REFERENCE_PATHS[5], 0b000_0011_0101);
        for mask in REFERENCE_PATHS {
            assert_eq!(mask.count_ones(), 4);
            assert_eq!(mask >> REFERENCE_LINES, 0);
        }
    }

    #[test]
    fn default_config_is_reference_board() {
        let config = SwitchMatrixConfig::default();
        assert_eq!(&config.paths[..], &REFERENCE_PATHS[..]);
        assert_eq!(config.settle_ms, 500);
    }

    #[test]
    fn oversized_table_rejected() {
        assert!(SwitchMatrixConfig::new(&[1; MAX_CELLS + 1], 500).is_none());
        assert!(SwitchMatrixConfig::new(&[1; 3], 10).is_some());
    }
}
