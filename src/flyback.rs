//! Flyback converter current regulation.
//!
//! A bounded-step regulator: each iteration moves the PWM duty by at most one
//! percent toward the target band and holds it inside the band.

use core::fmt::Debug;

#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;

use embedded_hal::pwm::{Error as _, SetDutyCycle};

use crate::config::{CurrentBand, CurrentSenseConfig, RegulatorConfig};
use crate::errors::Error;
use crate::units::ElectricCurrent;

/// PWM channel driving the flyback converter.
pub trait FlybackPwm: SetDutyCycle {
    /// Enables the PWM output.
    fn start(&mut self) -> Result<(), Self::Error>;
    /// Disables the PWM output.
    fn stop(&mut self) -> Result<(), Self::Error>;
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "CurrentSense",),
    async(feature = "async", keep_self)
)]
#[allow(async_fn_in_trait)]
/// A 12-bit ADC channel behind a current sense amplifier.
pub trait CurrentSense {
    type Error: Debug;

    async fn read_raw(&mut self) -> Result<u16, Self::Error>;
}

/// Regulator state for the duration of one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulatorState {
    pub band: CurrentBand,
    /// Duty cycle in percent.
    pub duty: u8,
    /// Feedback iterations completed.
    pub iteration: u8,
}

impl RegulatorState {
    pub fn new(band: CurrentBand, duty: u8) -> Self {
        Self {
            band,
            duty,
            iteration: 0,
        }
    }

    /// Moves the duty one step toward the band, within the limits of `config`.
    ///
    /// Returns `true` if the duty changed.
    pub fn adjust(&mut self, current: ElectricCurrent, config: &RegulatorConfig) -> bool {
        let step = if current < self.band.low {
            1
        } else if current > self.band.high {
            -1
        } else {
            0
        };
        let duty = config.clamp_duty(self.duty as i16 + step);
        let changed = duty != self.duty;
        self.duty = duty;
        changed
    }
}

/// Flyback converter with its output current sense.
pub struct FlybackRegulator<PWM, ADC> {
    pwm: PWM,
    sense: ADC,
    sense_config: CurrentSenseConfig,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "FlybackRegulator",),
    async(feature = "async", keep_self)
)]
impl<PWM, ADC> FlybackRegulator<PWM, ADC>
where
    PWM: FlybackPwm,
    ADC: CurrentSense,
{
    pub fn new(pwm: PWM, sense: ADC, sense_config: CurrentSenseConfig) -> Self {
        Self {
            pwm,
            sense,
            sense_config,
        }
    }

    pub fn release(self) -> (PWM, ADC) {
        (self.pwm, self.sense)
    }

    /// Reads the converter output current.
    pub async fn read_current<E: PartialEq>(&mut self) -> Result<ElectricCurrent, Error<E>> {
        let raw = self.sense.read_raw().await.map_err(|_e| {
            #[cfg(feature = "defmt")]
            defmt::error!("Flyback current sense read failed");
            Error::<E>::CurrentSense
        })?;
        Ok(self.sense_config.current_from_raw(raw))
    }

    fn set_duty<E: PartialEq>(&mut self, percent: u8) -> Result<(), Error<E>> {
        self.pwm
            .set_duty_cycle_percent(percent)
            .map_err(|e| Error::Pwm(e.kind()))
    }

    /// Starts the converter at the initial duty and regulates for the configured
    /// number of iterations. The converter keeps running; see [`Self::terminate`].
    pub async fn run_session<E: PartialEq, D: DelayNs>(
        &mut self,
        config: &RegulatorConfig,
        delay: &mut D,
    ) -> Result<RegulatorState, Error<E>> {
        let mut state = RegulatorState::new(
            config.band,
            config.clamp_duty(config.initial_duty as i16),
        );

        self.set_duty::<E>(state.duty)?;
        self.pwm.start().map_err(|e| Error::<E>::Pwm(e.kind()))?;
        delay.delay_ms(config.settle_ms).await;

        while state.iteration < config.iterations {
            let current = self.read_current::<E>().await?;
            if state.adjust(current, config) {
                self.set_duty::<E>(state.duty)?;
            }
            state.iteration += 1;

            #[cfg(feature = "defmt")]
            defmt::debug!(
                "Flyback iteration {}: {} A, duty {}%",
                state.iteration,
                current.get::<uom::si::electric_current::ampere>(),
                state.duty
            );

            delay.delay_ms(config.iteration_ms).await;
        }

        Ok(state)
    }

    /// Stops the converter and waits `settle_ms`.
    pub async fn terminate<E: PartialEq, D: DelayNs>(
        &mut self,
        settle_ms: u32,
        delay: &mut D,
    ) -> Result<(), Error<E>> {
        self.pwm.stop().map_err(|e| Error::<E>::Pwm(e.kind()))?;
        delay.delay_ms(settle_ms).await;
        Ok(())
    }
}
