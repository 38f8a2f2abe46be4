//! Command frame construction for the PL455 serial protocol.
//!
//! ```text
//! | header | board id (0-1) | register (1-2, BE) | payload (0-8) | crc16 (2, LE) |
//! ```

use heapless::Vec;

use crate::crc::crc16;
use crate::registers::{WriteType, FRAME_ADDR16, FRAME_START};

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 8;
/// Header + board id + 16-bit address + payload + CRC.
pub const MAX_FRAME_LEN: usize = 1 + 1 + 2 + MAX_PAYLOAD_LEN + 2;

pub type EncodedFrame = Vec<u8, MAX_FRAME_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload lengths of 7 and above 8 are reserved by the protocol.
    InvalidPayloadLength(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressMode {
    Bits8,
    Bits16,
}

impl AddressMode {
    pub fn for_register(address: u16) -> Self {
        if address > 0xFF {
            AddressMode::Bits16
        } else {
            AddressMode::Bits8
        }
    }
}

/// A command frame before serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolFrame<'a> {
    pub board_id: u8,
    pub address: u16,
    pub write_type: WriteType,
    /// Value bytes, most significant first.
    pub payload: &'a [u8],
}

impl<'a> ProtocolFrame<'a> {
    pub fn new(board_id: u8, address: u16, write_type: WriteType, payload: &'a [u8]) -> Self {
        Self {
            board_id,
            address,
            write_type,
            payload,
        }
    }

    pub fn address_mode(&self) -> AddressMode {
        AddressMode::for_register(self.address)
    }

    /// Serializes the frame and appends its checksum.
    pub fn encode(&self) -> Result<EncodedFrame, FrameError> {
        let len = self.payload.len();
        if len == 7 || len > MAX_PAYLOAD_LEN {
            return Err(FrameError::InvalidPayloadLength(len));
        }

        let mut header = FRAME_START | self.write_type.bits() | len as u8;
        if self.address_mode() == AddressMode::Bits16 {
            header |= FRAME_ADDR16;
        }

        // Capacity is MAX_FRAME_LEN, so none of the pushes below can overflow.
        let mut frame = EncodedFrame::new();
        let _ = frame.push(header);
        if self.write_type.has_board_id() {
            let _ = frame.push(self.board_id);
        }
        match self.address_mode() {
            AddressMode::Bits16 => {
                let _ = frame.extend_from_slice(&self.address.to_be_bytes());
            }
            AddressMode::Bits8 => {
                let _ = frame.push(self.address as u8);
            }
        }
        let _ = frame.extend_from_slice(self.payload);

        let crc = crc16(&frame);
        let _ = frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Builds a complete command frame. See [`ProtocolFrame::encode`].
pub fn encode_frame(
    board_id: u8,
    address: u16,
    write_type: WriteType,
    payload: &[u8],
) -> Result<EncodedFrame, FrameError> {
    ProtocolFrame::new(board_id, address, write_type, payload).encode()
}

/// Packs the low `len` bytes of `value` big-endian, most significant byte first.
///
/// Returns `None` unless `1 <= len <= 8`.
pub fn pack_be(value: u64, len: u8) -> Option<Vec<u8, MAX_PAYLOAD_LEN>> {
    if len == 0 || len as usize > MAX_PAYLOAD_LEN {
        return None;
    }
    let bytes = value.to_be_bytes();
    Vec::from_slice(&bytes[MAX_PAYLOAD_LEN - len as usize..]).ok()
}
