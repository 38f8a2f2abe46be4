#[cfg(feature = "defmt")]
use defmt::Format;

use crate::frame::FrameError;

/// Represents potential errors when talking to the monitor or driving the balancing hardware.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Error<E: PartialEq> {
    /// An error occurred on the serial link to the monitor.
    Transport(E),
    /// The frame could not be built; nothing was sent.
    Frame(FrameError),
    /// Register values are 1 to 8 bytes wide.
    InvalidByteLength(u8),
    /// No response arrived before the deadline.
    Timeout,
    /// A response arrived but was shorter than requested.
    ShortResponse {
        /// Bytes the request asked for.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },
    /// Response CRC validation failed.
    Crc,
    /// A digital output (switch line, wake line or relay) failed.
    Pin(embedded_hal::digital::ErrorKind),
    /// The flyback PWM channel failed.
    Pwm(embedded_hal::pwm::ErrorKind),
    /// The current sense ADC failed.
    CurrentSense,
    /// Cell number outside the configured switch matrix.
    InvalidCell(u8),
    /// A switch path is still active; the matrix must be reset first.
    PathBusy {
        /// Cell whose path is currently enabled.
        active: u8,
    },
    /// The controller latched a fatal fault and no longer drives hardware.
    Halted,
}

impl<E: PartialEq> From<FrameError> for Error<E> {
    fn from(err: FrameError) -> Self {
        Error::Frame(err)
    }
}
