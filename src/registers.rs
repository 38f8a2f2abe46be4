/// PL455 registers used by the balancing controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Register {
    /// Command Register (sample and send)
    Command = 2,
    /// Channel Select Register (4 bytes, cells in bits 16..31)
    Channels = 3,
    /// Oversampling Register
    Oversample = 7,
    /// Device Control Register (auto-address, shutdown)
    DevCtrl = 12,
    /// Number of Cells Register
    NumChannels = 13,
    /// Device Configuration Register
    DevConfig = 14,
    /// Communication Configuration Register
    CommConfig = 16,
    /// Mux Delay Register
    MuxDelay = 60,
    /// Initial Sampling Delay Register
    SampleDelay = 61,
    /// Cell Sampling Period Register
    CellSamplePeriod = 62,
    /// System Status Register
    Status = 81,
    /// Fault Summary Register
    FaultSummary = 82,
    /// Device Fault Mask Register
    FaultMask = 107,
    /// Cell Undervoltage Threshold Register
    CellUv = 142,
    /// Cell Overvoltage Threshold Register
    CellOv = 144,
}

impl Register {
    pub const fn addr(self) -> u16 {
        self as u16
    }
}

/// Write type field of the frame header.
///
/// Selects the addressing scope (single device, group, broadcast) and whether the
/// device answers the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WriteType {
    /// Single device write with response
    SingleResponse = 0x00,
    /// Single device write without response
    SingleNoResponse = 0x10,
    /// Group write with response
    GroupResponse = 0x20,
    /// Group write without response
    GroupNoResponse = 0x30,
    /// Broadcast write with response
    BroadcastResponse = 0x60,
    /// Broadcast write without response
    BroadcastNoResponse = 0x70,
}

impl WriteType {
    /// Raw header bits.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Single and group frames carry a board id byte, broadcasts don't.
    pub const fn has_board_id(self) -> bool {
        !matches!(
            self,
            WriteType::BroadcastResponse | WriteType::BroadcastNoResponse
        )
    }

    /// Whether the addressed device(s) send a response frame.
    pub const fn expects_response(self) -> bool {
        matches!(
            self,
            WriteType::SingleResponse | WriteType::GroupResponse | WriteType::BroadcastResponse
        )
    }
}

// Frame header bit masks
pub const FRAME_START: u8 = 1 << 7;
pub const FRAME_ADDR16: u8 = 1 << 3;
pub const FRAME_LEN_MASK: u8 = 0b0000_0111;

// Command register values
pub const CMD_SAMPLE_AND_SEND: u8 = 0x01;

// DevCtrl register values
pub const DEV_CTRL_AUTO_ADDRESS: u8 = 0x08;
pub const DEV_CTRL_SHUTDOWN: u8 = 0x40;

// DevConfig: auto-address mode, internal regulator NPN disabled
pub const DEV_CONFIG_AUTO_ADDRESS: u8 = 0x38;

// CommConfig: single-ended communication at 250 kBaud
pub const COMM_CONFIG_SINGLE_ENDED: u16 = 0x1080;

// FaultMask: mask chip FAULT
pub const FAULT_MASK_CHIP: u16 = 0x8000;

// FaultSummary: clear all summary flags
pub const FAULT_SUMMARY_CLEAR: u16 = 0xFFC0;

// Status: clear system status fault flags
pub const STATUS_CLEAR: u8 = 0x38;

// CellSamplePeriod: 99.92us
pub const CELL_SAMPLE_PERIOD_100US: u8 = 0xCC;

// Hardware cell thresholds (4.1 V / 1.9 V); the controller evaluates its own, tighter limits.
pub const CELL_OV_4V1: u16 = 0xD1EC;
pub const CELL_UV_1V9: u16 = 0x6148;

/// Volts per LSB of a cell voltage reading.
pub const CELL_VOLTS_PER_LSB: f32 = 0.000_076_66;

/// Baud rate of the monitor link.
pub const BAUD_RATE: u32 = 250_000;

/// Maximum number of cells one device can sample.
pub const MAX_CELLS: usize = 16;

/// Channel-select value sampling the lowest `cells` cell inputs.
///
/// `cells` above [`MAX_CELLS`] selects all cell inputs.
pub const fn cell_channel_mask(cells: usize) -> u32 {
    let cells = if cells > MAX_CELLS { MAX_CELLS } else { cells };
    ((1u32 << cells) - 1) << 16
}

/// One register write of the bring-up sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitWrite {
    pub register: Register,
    pub value: u32,
    pub len: u8,
    pub write_type: WriteType,
    /// Wait after the write before the next one.
    pub settle_ms: u32,
}

const fn write(register: Register, value: u32, len: u8, write_type: WriteType) -> InitWrite {
    InitWrite {
        register,
        value,
        len,
        write_type,
        settle_ms: 0,
    }
}

/// Register writes that configure a freshly woken monitor to sample `cells` cells,
/// at most [`MAX_CELLS`].
pub const fn init_sequence(cells: usize) -> [InitWrite; 17] {
    use WriteType::{BroadcastNoResponse as ALL, SingleNoResponse as SGL};
    let cells = if cells > MAX_CELLS { MAX_CELLS } else { cells };

    let mut comm = write(Register::CommConfig, COMM_CONFIG_SINGLE_ENDED as u32, 2, SGL);
    comm.settle_ms = 10;

    [
        write(Register::FaultMask, FAULT_MASK_CHIP as u32, 2, SGL),
        write(Register::FaultSummary, FAULT_SUMMARY_CLEAR as u32, 2, SGL),
        write(Register::Status, STATUS_CLEAR as u32, 1, SGL),
        write(Register::CellOv, CELL_OV_4V1 as u32, 2, SGL),
        write(Register::CellUv, CELL_UV_1V9 as u32, 2, SGL),
        write(Register::DevConfig, DEV_CONFIG_AUTO_ADDRESS as u32, 1, ALL),
        write(Register::DevCtrl, DEV_CTRL_AUTO_ADDRESS as u32, 1, ALL),
        comm,
        write(Register::MuxDelay, 0x00, 1, SGL),
        write(Register::SampleDelay, 0x00, 1, SGL),
        write(Register::CellSamplePeriod, CELL_SAMPLE_PERIOD_100US as u32, 1, SGL),
        write(Register::Oversample, 0x00, 1, SGL),
        write(Register::NumChannels, cells as u32, 1, SGL),
        write(Register::Channels, cell_channel_mask(cells), 4, SGL),
        write(Register::FaultMask, FAULT_MASK_CHIP as u32, 2, SGL),
        write(Register::FaultSummary, FAULT_SUMMARY_CLEAR as u32, 2, ALL),
        write(Register::Status, STATUS_CLEAR as u32, 1, ALL),
    ]
}
