//! Balancing orchestrator: picks the cell to act on and sequences switch-matrix
//! paths and flyback sessions for it.
//!
//! An undercharged cell gets one session charging it from the bus. An overcharged
//! cell is drained indirectly: every other cell is charged in turn, in ascending
//! order, because the converter only moves charge between one cell and the bus.

#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;

use embedded_hal::digital::OutputPin;
use heapless::Vec;

use crate::config::BalanceCurrent;
use crate::errors::Error;
use crate::flyback::{CurrentSense, FlybackPwm, FlybackRegulator, RegulatorState};
use crate::registers::MAX_CELLS;
use crate::stats::{detect_imbalance, BalanceTarget, Classification, PackStats};
use crate::switch_matrix::SwitchMatrix;

/// One completed flyback session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceSession {
    /// Cell the converter was connected to (1-based).
    pub cell: u8,
    /// Regulator state when the session ended.
    pub regulator: RegulatorState,
}

/// What one balancing cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceOutcome {
    pub target: BalanceTarget,
    /// Sessions in execution order.
    pub sessions: Vec<BalanceSession, MAX_CELLS>,
}

impl BalanceOutcome {
    /// Cells that received a session, in execution order.
    pub fn cells(&self) -> impl Iterator<Item = u8> + '_ {
        self.sessions.iter().map(|s| s.cell)
    }
}

/// Owns the switch matrix and the flyback regulator. No path is ever left
/// asserted once a call returns.
pub struct Balancer<P, PWM, ADC, const L: usize> {
    matrix: SwitchMatrix<P, L>,
    regulator: FlybackRegulator<PWM, ADC>,
    current: BalanceCurrent,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Balancer",),
    async(feature = "async", keep_self)
)]
impl<P, PWM, ADC, const L: usize> Balancer<P, PWM, ADC, L>
where
    P: OutputPin,
    PWM: FlybackPwm,
    ADC: CurrentSense,
{
    pub fn new(matrix: SwitchMatrix<P, L>, regulator: FlybackRegulator<PWM, ADC>) -> Self {
        Self {
            matrix,
            regulator,
            current: BalanceCurrent::default(),
        }
    }

    /// Selects the balancing current preset used for every session.
    pub fn with_current(mut self, current: BalanceCurrent) -> Self {
        self.current = current;
        self
    }

    pub fn matrix(&self) -> &SwitchMatrix<P, L> {
        &self.matrix
    }

    pub fn release(self) -> (SwitchMatrix<P, L>, FlybackRegulator<PWM, ADC>) {
        (self.matrix, self.regulator)
    }

    /// Runs the balancing decision for one cycle.
    ///
    /// Does nothing unless the SOC standard deviation is strictly above `threshold`.
    pub async fn assess<E: PartialEq, D: DelayNs>(
        &mut self,
        samples: &[f32],
        stats: &PackStats,
        threshold: f32,
        delay: &mut D,
    ) -> Result<Option<BalanceOutcome>, Error<E>> {
        if stats.std_dev.is_nan() || stats.std_dev <= threshold {
            #[cfg(feature = "defmt")]
            defmt::info!(
                "SOC spread {}% within {}%, no balancing",
                stats.std_dev,
                threshold
            );
            return Ok(None);
        }

        let target = detect_imbalance(samples, stats.mean);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "SOC spread {}% above {}%, cell {} is {}",
            stats.std_dev,
            threshold,
            target.cell_number(),
            target.classification
        );

        self.balance(target, samples.len(), delay).await.map(Some)
    }

    /// Executes the session sequence for `target` in a pack of `cell_count` cells.
    pub async fn balance<E: PartialEq, D: DelayNs>(
        &mut self,
        target: BalanceTarget,
        cell_count: usize,
        delay: &mut D,
    ) -> Result<BalanceOutcome, Error<E>> {
        let cell_count = cell_count.min(MAX_CELLS);
        let target_cell = target.cell_number();
        if target.index >= cell_count {
            return Err(Error::InvalidCell(target_cell));
        }

        let mut outcome = BalanceOutcome {
            target,
            sessions: Vec::new(),
        };

        match target.classification {
            Classification::Undercharged => {
                let regulator = self.session::<E, D>(target_cell, delay).await?;
                let _ = outcome.sessions.push(BalanceSession {
                    cell: target_cell,
                    regulator,
                });
            }
            Classification::Overcharged => {
                for cell in (1..=cell_count as u8).filter(|&c| c != target_cell) {
                    let regulator = self.session::<E, D>(cell, delay).await?;
                    // Capacity is MAX_CELLS and cell_count is capped to it.
                    let _ = outcome.sessions.push(BalanceSession { cell, regulator });
                }
            }
        }

        Ok(outcome)
    }

    /// Enable path, regulate, stop converter, reset matrix. The converter is stopped
    /// and the matrix reset even if a step fails; the first error is returned.
    async fn session<E: PartialEq, D: DelayNs>(
        &mut self,
        cell: u8,
        delay: &mut D,
    ) -> Result<RegulatorState, Error<E>> {
        let config = self.current.regulator_config();

        if let Err(e) = self.matrix.enable_path::<E, D>(cell, delay).await {
            if self.matrix.active_path().is_some() {
                let _reset = self.matrix.reset_all::<E, D>(delay).await;
                #[cfg(feature = "defmt")]
                if _reset.is_err() {
                    defmt::error!(
                        "Switch matrix reset after failed enable of cell {} failed",
                        cell
                    );
                }
            }
            return Err(e);
        }

        #[cfg(feature = "defmt")]
        defmt::info!("Balancing cell {}", cell);

        let regulated = self.regulator.run_session::<E, D>(&config, delay).await;
        let stopped = self
            .regulator
            .terminate::<E, D>(config.stop_settle_ms, delay)
            .await;
        let reset = self.matrix.reset_all::<E, D>(delay).await;

        #[cfg(feature = "defmt")]
        if regulated.is_err() || stopped.is_err() || reset.is_err() {
            defmt::error!("Balancing session for cell {} failed", cell);
        }

        let state = regulated?;
        stopped?;
        reset?;
        Ok(state)
    }
}
