//! The measurement and balancing cycle.

#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;

use core::fmt::Debug;

use embedded_hal::digital::{Error as _, OutputPin};

use crate::balancing::{BalanceOutcome, Balancer};
use crate::config::PackConfig;
use crate::data_types::{CycleContext, FaultFlags};
use crate::errors::Error;
use crate::flyback::{CurrentSense, FlybackPwm};
use crate::signal::PackEnableSignal;
use crate::stats::compute_stats;
use crate::units::ElectricCurrent;
use crate::{Pl455, SerialLink};

/// Wait between waking the monitor and configuring it.
const WAKE_SETTLE_MS: u32 = 100;
/// Wait after configuration before the first conversion.
const INIT_SETTLE_MS: u32 = 1000;
/// Wait after discarding the first reading.
const DISCARD_SETTLE_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerState {
    Running,
    /// A fault halted the controller. Only an external reset leaves this state.
    Halted,
}

/// Result of one [`BmsController::run_cycle`].
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome<const N: usize> {
    /// The reading was discarded; nothing was evaluated.
    Skipped,
    /// Cells evaluated, no balancing needed.
    Monitored(CycleContext<N>),
    /// Cells evaluated and a balancing cycle ran.
    Balanced(CycleContext<N>, BalanceOutcome),
    /// The controller is halted. Carries the faults that halted it.
    Halted(FaultFlags),
}

/// Runs the pack: monitor readout, SOC statistics, fault handling and balancing.
///
/// `N` is the number of series cells, `Q` the response queue size and `LINES`
/// the number of switch matrix lines.
pub struct BmsController<
    'q,
    L,
    P,
    PWM,
    ADC,
    PS,
    R,
    const Q: usize,
    const LINES: usize,
    const N: usize,
> {
    monitor: Pl455<'q, L, Q>,
    balancer: Balancer<P, PWM, ADC, LINES>,
    pack_sense: PS,
    relay: R,
    config: PackConfig,
    state: ControllerState,
    first_reading: bool,
    pack_enabled: bool,
    /// Set once the relay has been opened after a fault.
    relay_open: bool,
    context: CycleContext<N>,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "BmsController",),
    async(feature = "async", keep_self)
)]
impl<'q, L, E, P, PWM, ADC, PS, R, const Q: usize, const LINES: usize, const N: usize>
    BmsController<'q, L, P, PWM, ADC, PS, R, Q, LINES, N>
where
    L: SerialLink<Error = E>,
    E: PartialEq + Debug,
    P: OutputPin,
    PWM: FlybackPwm,
    ADC: CurrentSense,
    PS: CurrentSense,
    R: OutputPin,
{
    /// Creates a controller. The monitor response timeout and the balancing current
    /// preset are taken from `config`.
    ///
    /// # Arguments
    ///
    /// * `monitor` - The PL455 driver.
    /// * `balancer` - Switch matrix and flyback regulator.
    /// * `pack_sense` - Pack current ADC channel.
    /// * `relay` - Pack enable relay output; high closes the relay.
    /// * `config` - Thresholds and tunables.
    pub fn new(
        monitor: Pl455<'q, L, Q>,
        balancer: Balancer<P, PWM, ADC, LINES>,
        pack_sense: PS,
        relay: R,
        config: PackConfig,
    ) -> Self {
        Self {
            monitor: monitor.with_timeout_ms(config.response_timeout_ms),
            balancer: balancer.with_current(config.balance_current),
            pack_sense,
            relay,
            config,
            state: ControllerState::Running,
            first_reading: true,
            pack_enabled: false,
            relay_open: false,
            context: CycleContext::default(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Results of the last evaluated cycle.
    pub fn context(&self) -> &CycleContext<N> {
        &self.context
    }

    pub fn is_pack_enabled(&self) -> bool {
        self.pack_enabled
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    pub fn balancer(&self) -> &Balancer<P, PWM, ADC, LINES> {
        &self.balancer
    }

    pub fn release(self) -> (Pl455<'q, L, Q>, Balancer<P, PWM, ADC, LINES>, PS, R) {
        (self.monitor, self.balancer, self.pack_sense, self.relay)
    }

    /// Soft-resets and configures the monitor. The next reading is discarded.
    pub async fn bring_up<W: OutputPin, D: DelayNs>(
        &mut self,
        wake_pin: &mut W,
        delay: &mut D,
    ) -> Result<(), Error<E>> {
        if self.state == ControllerState::Halted {
            return Err(Error::Halted);
        }

        self.monitor.power_down(delay).await?;
        self.monitor.wake(wake_pin, delay).await?;
        delay.delay_ms(WAKE_SETTLE_MS).await;
        self.monitor.init(N, delay).await?;
        delay.delay_ms(INIT_SETTLE_MS).await;

        self.first_reading = true;
        #[cfg(feature = "defmt")]
        defmt::info!("Monitor up, {} cells", N);
        Ok(())
    }

    /// Runs one cycle.
    ///
    /// A raised `enable` signal closes the pack relay first. Faults are collected
    /// over all cells and the pack current before any of them is acted on; any
    /// fault opens the relay and halts the controller.
    pub async fn run_cycle<D: DelayNs>(
        &mut self,
        enable: &PackEnableSignal,
        delay: &mut D,
    ) -> Result<CycleOutcome<N>, Error<E>> {
        if self.state == ControllerState::Halted {
            if !self.relay_open {
                self.open_relay()?;
            }
            return Ok(CycleOutcome::Halted(self.context.faults));
        }

        if enable.take() {
            self.relay
                .set_high()
                .map_err(|e| Error::<E>::Pin(e.kind()))?;
            self.pack_enabled = true;
            #[cfg(feature = "defmt")]
            defmt::info!("Pack relay closed");
        }

        let voltages = self.monitor.read_cell_voltages::<N, D>(delay).await?;

        if self.first_reading {
            self.first_reading = false;
            #[cfg(feature = "defmt")]
            defmt::info!("Discarding first reading");
            delay.delay_ms(DISCARD_SETTLE_MS).await;
            return Ok(CycleOutcome::Skipped);
        }

        self.context.voltages = voltages;
        self.context.faults = FaultFlags::default();
        self.evaluate_cells();

        self.context.stats = compute_stats(&self.context.soc.values);
        #[cfg(feature = "defmt")]
        defmt::info!(
            "SOC mean {}%, std dev {}%",
            self.context.stats.mean,
            self.context.stats.std_dev
        );

        if self.pack_enabled {
            let current = self.read_pack_current().await?;
            self.context.pack_current = Some(current);
            if current > self.config.pack_overcurrent {
                #[cfg(feature = "defmt")]
                defmt::warn!(
                    "Pack overcurrent: {} A",
                    current.get::<uom::si::electric_current::ampere>()
                );
                self.context.faults.overcurrent = true;
            }
        }

        if self.context.faults.any() {
            self.halt()?;
            return Ok(CycleOutcome::Halted(self.context.faults));
        }

        let outcome = self
            .balancer
            .assess::<E, D>(
                &self.context.soc.values,
                &self.context.stats,
                self.config.std_dev_threshold,
                delay,
            )
            .await?;

        Ok(match outcome {
            Some(outcome) => CycleOutcome::Balanced(self.context, outcome),
            None => CycleOutcome::Monitored(self.context),
        })
    }

    /// Converts voltages to SOC and flags cells outside the voltage window.
    fn evaluate_cells(&mut self) {
        let ctx = &mut self.context;
        ctx.soc = ctx.voltages.to_soc(&self.config.soc_table);

        for (_i, voltage) in ctx.voltages.voltages.iter().enumerate() {
            #[cfg(feature = "defmt")]
            defmt::debug!(
                "Cell {}: {} V, SOC {}%",
                _i + 1,
                voltage.get::<uom::si::electric_potential::volt>(),
                ctx.soc.values[_i]
            );

            if *voltage > self.config.cell_overvoltage {
                #[cfg(feature = "defmt")]
                defmt::warn!("Cell {} overvoltage", _i + 1);
                ctx.faults.overvoltage = true;
            } else if *voltage < self.config.cell_undervoltage {
                #[cfg(feature = "defmt")]
                defmt::warn!("Cell {} undervoltage", _i + 1);
                ctx.faults.undervoltage = true;
            }
        }
    }

    async fn read_pack_current(&mut self) -> Result<ElectricCurrent, Error<E>> {
        let raw = self
            .pack_sense
            .read_raw()
            .await
            .map_err(|_| Error::<E>::CurrentSense)?;
        Ok(self.config.pack_sense.current_from_raw(raw))
    }

    /// Latches [`ControllerState::Halted`] and opens the pack relay. If the relay
    /// fails to open, later cycles retry it.
    fn halt(&mut self) -> Result<(), Error<E>> {
        self.state = ControllerState::Halted;
        self.pack_enabled = false;
        #[cfg(feature = "defmt")]
        defmt::error!(
            "Critical fault {}, opening pack relay and halting",
            self.context.faults
        );
        self.open_relay()
    }

    fn open_relay(&mut self) -> Result<(), Error<E>> {
        self.relay.set_low().map_err(|e| {
            #[cfg(feature = "defmt")]
            defmt::error!("Pack relay failed to open");
            Error::<E>::Pin(e.kind())
        })?;
        self.relay_open = true;
        Ok(())
    }
}
