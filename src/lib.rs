#![no_std]

#[macro_use]
extern crate uom;

#[cfg(feature = "defmt")]
extern crate defmt;

use core::fmt::Debug;

#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;

use embedded_hal::digital::OutputPin;

pub mod registers;
use registers::*;

pub mod balancing;
pub mod config;
pub mod controller;
pub mod crc;
pub mod data_types;
pub mod errors;
pub mod flyback;
pub mod frame;
pub mod signal;
pub mod soc;
pub mod stats;
pub mod switch_matrix;
pub mod units;

pub use balancing::{BalanceOutcome, BalanceSession, Balancer};
pub use config::{BalanceCurrent, CurrentBand, CurrentSenseConfig, PackConfig, RegulatorConfig};
pub use controller::{BmsController, ControllerState, CycleOutcome};
pub use data_types::{CellVoltages, CycleContext, FaultFlags, SocSamples};
pub use errors::Error;
pub use flyback::{CurrentSense, FlybackPwm, FlybackRegulator, RegulatorState};
pub use frame::{encode_frame, AddressMode, FrameError, ProtocolFrame};
pub use signal::{PackEnableSignal, ResponseConsumer, ResponseFrame, ResponseProducer, ResponseQueue};
pub use soc::{SocTable, VoltageSocPoint};
pub use stats::{compute_stats, detect_imbalance, BalanceTarget, Classification, PackStats};
pub use switch_matrix::{SwitchMatrix, SwitchMatrixConfig};

/// Wait after the last register write before shutting the monitor down.
const POWER_DOWN_SETTLE_MS: u32 = 2000;
/// Width of the wake pulse.
const WAKE_PULSE_US: u32 = 10;
/// Response queue polling interval.
const POLL_INTERVAL_MS: u32 = 1;

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "SerialLink",),
    async(feature = "async", keep_self)
)]
#[allow(async_fn_in_trait)]
/// Byte transport to the monitor.
///
/// Received frames are not returned by the link. Its completion interrupt pushes
/// them into the [`ResponseQueue`] whose consumer the driver owns.
pub trait SerialLink {
    type Error: PartialEq + Debug;

    /// Queues a complete frame for transmission.
    async fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Arms reception of the next `len` bytes. Must not block.
    async fn arm_receive(&mut self, len: usize) -> Result<(), Self::Error>;
}

/// PL455 driver: register channel plus the monitor operations built on it.
pub struct Pl455<'q, L, const Q: usize> {
    link: L,
    responses: ResponseConsumer<'q, Q>,
    board_id: u8,
    timeout_ms: u32,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Pl455",),
    async(feature = "async", keep_self)
)]
impl<'q, L, E, const Q: usize> Pl455<'q, L, Q>
where
    L: SerialLink<Error = E>,
    E: PartialEq + Debug,
{
    /// Creates a new driver.
    ///
    /// # Arguments
    ///
    /// * `link` - The serial transport.
    /// * `responses` - Consumer side of the queue the link's receive interrupt fills.
    /// * `board_id` - Address of the monitor in the daisy chain.
    pub fn new(link: L, responses: ResponseConsumer<'q, Q>, board_id: u8) -> Self {
        Self {
            link,
            responses,
            board_id,
            timeout_ms: 50,
        }
    }

    /// Sets the deadline for [`Self::await_response`].
    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn board_id(&self) -> u8 {
        self.board_id
    }

    /// Returns the link and queue consumer.
    pub fn release(self) -> (L, ResponseConsumer<'q, Q>) {
        (self.link, self.responses)
    }

    /// Encodes and sends one frame. Nothing is sent if encoding fails.
    pub async fn write_frame(
        &mut self,
        board_id: u8,
        address: u16,
        write_type: WriteType,
        payload: &[u8],
    ) -> Result<(), Error<E>> {
        let frame = frame::encode_frame(board_id, address, write_type, payload)?;
        #[cfg(feature = "defmt")]
        defmt::debug!("TX {=[u8]:x}", &frame[..]);
        self.link.send(&frame).await.map_err(Error::Transport)
    }

    /// Writes the low `byte_len` bytes of `value`, most significant byte first.
    ///
    /// `byte_len` outside 1..=8 fails with [`Error::InvalidByteLength`] and sends nothing.
    pub async fn write_register(
        &mut self,
        board_id: u8,
        address: u16,
        value: u64,
        byte_len: u8,
        write_type: WriteType,
    ) -> Result<(), Error<E>> {
        let payload =
            frame::pack_be(value, byte_len).ok_or(Error::<E>::InvalidByteLength(byte_len))?;
        self.write_frame(board_id, address, write_type, &payload)
            .await
    }

    /// [`Self::write_register`] to this driver's board.
    pub async fn write(
        &mut self,
        reg: Register,
        value: u64,
        byte_len: u8,
        write_type: WriteType,
    ) -> Result<(), Error<E>> {
        self.write_register(self.board_id, reg.addr(), value, byte_len, write_type)
            .await
    }

    /// Arms the link for a `len` byte response. Frames left over from earlier
    /// requests are dropped first.
    pub async fn request_read(&mut self, len: usize) -> Result<(), Error<E>> {
        while self.responses.dequeue().is_some() {}
        self.link.arm_receive(len).await.map_err(Error::Transport)
    }

    /// Waits for the response armed by [`Self::request_read`] and checks its length and CRC.
    pub async fn await_response<D: DelayNs>(
        &mut self,
        expected: usize,
        delay: &mut D,
    ) -> Result<ResponseFrame, Error<E>> {
        let mut waited_ms = 0;
        let response = loop {
            if let Some(response) = self.responses.dequeue() {
                break response;
            }
            if waited_ms >= self.timeout_ms {
                #[cfg(feature = "defmt")]
                defmt::error!("No response after {} ms", waited_ms);
                return Err(Error::Timeout);
            }
            delay.delay_ms(POLL_INTERVAL_MS).await;
            waited_ms += POLL_INTERVAL_MS;
        };

        if response.len() < expected {
            #[cfg(feature = "defmt")]
            defmt::error!(
                "Short response: expected {} bytes, got {}",
                expected,
                response.len()
            );
            return Err(Error::ShortResponse {
                expected,
                actual: response.len(),
            });
        }

        if !crc::check_trailing_crc(&response[..expected]) {
            #[cfg(feature = "defmt")]
            defmt::error!("Response CRC mismatch: {=[u8]:x}", &response[..expected]);
            return Err(Error::Crc);
        }

        Ok(response)
    }

    /// Puts the monitor into shutdown.
    pub async fn power_down<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Error<E>> {
        delay.delay_ms(POWER_DOWN_SETTLE_MS).await;
        self.write(
            Register::DevCtrl,
            DEV_CTRL_SHUTDOWN as u64,
            1,
            WriteType::SingleNoResponse,
        )
        .await
    }

    /// Pulses the wake line low.
    pub async fn wake<P: OutputPin, D: DelayNs>(
        &mut self,
        wake_pin: &mut P,
        delay: &mut D,
    ) -> Result<(), Error<E>> {
        use embedded_hal::digital::Error as _;

        wake_pin.set_low().map_err(|e| Error::<E>::Pin(e.kind()))?;
        delay.delay_us(WAKE_PULSE_US).await;
        wake_pin.set_high().map_err(|e| Error::Pin(e.kind()))
    }

    /// Configures a woken monitor to sample `cells` cells.
    pub async fn init<D: DelayNs>(&mut self, cells: usize, delay: &mut D) -> Result<(), Error<E>> {
        if cells == 0 || cells > MAX_CELLS {
            return Err(Error::InvalidCell(cells as u8));
        }

        for step in init_sequence(cells) {
            self.write(step.register, step.value as u64, step.len, step.write_type)
                .await?;
            if step.settle_ms > 0 {
                delay.delay_ms(step.settle_ms).await;
            }
        }

        #[cfg(feature = "defmt")]
        defmt::info!("PL455 configured for {} cells", cells);
        Ok(())
    }

    /// Triggers a conversion and reads back all `N` cell voltages, cell 1 first.
    pub async fn read_cell_voltages<const N: usize, D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<CellVoltages<N>, Error<E>> {
        let expected = CellVoltages::<N>::RESPONSE_LEN;

        self.write(
            Register::Command,
            CMD_SAMPLE_AND_SEND as u64,
            1,
            WriteType::SingleResponse,
        )
        .await?;
        self.request_read(expected).await?;
        let response = self.await_response(expected, delay).await?;

        let voltages = CellVoltages::from_response(&response).ok_or(Error::<E>::ShortResponse {
            expected,
            actual: response.len(),
        })?;

        #[cfg(feature = "defmt")]
        for (i, v) in voltages.voltages.iter().enumerate() {
            defmt::debug!(
                "Cell {}: {} V",
                i + 1,
                v.get::<uom::si::electric_potential::volt>()
            );
        }

        Ok(voltages)
    }
}
