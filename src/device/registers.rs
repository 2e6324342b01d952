//! DMA register block layout, control word codec and remote pointer encoding.
//!
//! # Local Address Map
//!
//! Every tile sees the same local address map:
//! ```text
//! 0x0000 - 0x0FFF   data memory (1024 x 32-bit words)
//! 0x1000            DMA local_address
//! 0x1004            DMA remote_address
//! 0x1008            DMA length_bytes
//! 0x100C            DMA control
//! ```
//!
//! # Control Word
//!
//! ```text
//! [31:16] write_back_address
//! [15:8]  reserved
//! [7:4]   tag (match id)
//! [3]     reserved
//! [2]     push_not_pull
//! [1]     reserved
//! [0]     go
//! ```
//!
//! # Remote Pointer
//!
//! ```text
//! [31:30] = 0b01 (remote marker)
//! [29:24] = y
//! [23:18] = x
//! [17:0]  = local byte offset in the target tile
//! ```

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::TileCoord;

/// Base address of the DMA register block in every tile's local address space.
pub const DMA_REG_BASE: u32 = 0x1000;

/// Number of 32-bit registers in the DMA block.
pub const DMA_REG_COUNT: usize = 4;

/// One past the last byte of the DMA register block.
pub const DMA_REG_END: u32 = DMA_REG_BASE + (DMA_REG_COUNT as u32) * 4;

/// Value the DMA engine stores to the write-back word on completion.
pub const WRITEBACK_DONE: u32 = 1;

const WB_SHIFT: u32 = 16;
const TAG_SHIFT: u32 = 4;
const TAG_MASK: u32 = 0xF;
const PUSH_BIT: u32 = 1 << 2;
const GO_BIT: u32 = 1 << 0;

/// Bits [15:8], [3] and [1].
const RESERVED_MASK: u32 = 0x0000_FF0A;

/// Largest tag that fits the 4-bit field.
pub const MAX_TAG: u8 = TAG_MASK as u8;

/// A register in the DMA block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaRegister {
    /// Byte offset in local memory to read from
    LocalAddress,
    /// Encoded destination (tile + offset)
    RemoteAddress,
    /// Number of bytes to move
    LengthBytes,
    /// Packed control word; writing it with `go` set arms the transfer
    Control,
}

impl DmaRegister {
    /// All registers in programming order.
    pub const ALL: [DmaRegister; DMA_REG_COUNT] = [
        DmaRegister::LocalAddress,
        DmaRegister::RemoteAddress,
        DmaRegister::LengthBytes,
        DmaRegister::Control,
    ];

    /// Word index within the block.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            DmaRegister::LocalAddress => 0,
            DmaRegister::RemoteAddress => 1,
            DmaRegister::LengthBytes => 2,
            DmaRegister::Control => 3,
        }
    }

    /// Local byte address of this register.
    #[inline]
    pub fn address(self) -> u32 {
        DMA_REG_BASE + (self.index() as u32) * 4
    }

    /// Decode a local byte address into a register.
    ///
    /// Returns `None` for addresses outside the block or not word aligned.
    pub fn from_address(addr: u32) -> Option<Self> {
        if !(DMA_REG_BASE..DMA_REG_END).contains(&addr) || addr % 4 != 0 {
            return None;
        }
        Some(Self::ALL[((addr - DMA_REG_BASE) / 4) as usize])
    }

    /// Register name as it appears in dumps.
    pub fn name(self) -> &'static str {
        match self {
            DmaRegister::LocalAddress => "DMA_LOCAL_ADDR",
            DmaRegister::RemoteAddress => "DMA_REMOTE_ADDR",
            DmaRegister::LengthBytes => "DMA_LENGTH",
            DmaRegister::Control => "DMA_CONTROL",
        }
    }
}

impl fmt::Display for DmaRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ 0x{:04X}", self.name(), self.address())
    }
}

/// Byte-exact image of the DMA register block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct RegisterImage {
    pub local_address: u32,
    pub remote_address: u32,
    pub length_bytes: u32,
    pub control: u32,
}

impl RegisterImage {
    /// Value held for a given register.
    pub fn get(&self, reg: DmaRegister) -> u32 {
        match reg {
            DmaRegister::LocalAddress => self.local_address,
            DmaRegister::RemoteAddress => self.remote_address,
            DmaRegister::LengthBytes => self.length_bytes,
            DmaRegister::Control => self.control,
        }
    }

    /// Decoded control word.
    pub fn control_word(&self) -> ControlWord {
        ControlWord::decode(self.control)
    }

    /// Register block in bus byte order, one space-separated group per register.
    pub fn raw_hex(&self) -> String {
        self.as_bytes()
            .chunks(4)
            .map(|reg| reg.iter().map(|b| format!("{:02X}", b)).collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Register dump: one line per named register, then the raw block.
    pub fn dump_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = DmaRegister::ALL
            .iter()
            .map(|&reg| format!("0x{:04X} {:<14} = 0x{:08X}", reg.address(), reg.name(), self.get(reg)))
            .collect();
        lines.push(format!("raw {}", self.raw_hex()));
        lines
    }
}

/// Decoded DMA control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlWord {
    /// Local byte address the engine writes `WRITEBACK_DONE` to on completion
    pub write_back_address: u16,
    /// Correlation id (4 bits)
    pub tag: u8,
    /// true = push (local -> remote), false = pull
    pub push_not_pull: bool,
    /// Trigger bit; arms the transfer when written
    pub go: bool,
}

impl ControlWord {
    /// Control word that arms a push transfer.
    pub fn push(write_back_address: u16, tag: u8) -> Self {
        Self {
            write_back_address,
            tag,
            push_not_pull: true,
            go: true,
        }
    }

    /// Pack into the 32-bit register value.
    ///
    /// The tag is truncated to its 4-bit field.
    pub fn encode(&self) -> u32 {
        ((self.write_back_address as u32) << WB_SHIFT)
            | (((self.tag as u32) & TAG_MASK) << TAG_SHIFT)
            | if self.push_not_pull { PUSH_BIT } else { 0 }
            | if self.go { GO_BIT } else { 0 }
    }

    /// Unpack a 32-bit register value. Reserved bits are ignored.
    pub fn decode(raw: u32) -> Self {
        Self {
            write_back_address: (raw >> WB_SHIFT) as u16,
            tag: ((raw >> TAG_SHIFT) & TAG_MASK) as u8,
            push_not_pull: raw & PUSH_BIT != 0,
            go: raw & GO_BIT != 0,
        }
    }

    /// Reserved bits set in a raw control value.
    #[inline]
    pub fn reserved_bits(raw: u32) -> u32 {
        raw & RESERVED_MASK
    }

    /// Whether a raw control value has the go bit set.
    #[inline]
    pub fn is_armed(raw: u32) -> bool {
        raw & GO_BIT != 0
    }

    /// Raw control value with the go bit cleared.
    #[inline]
    pub fn disarmed(raw: u32) -> u32 {
        raw & !GO_BIT
    }
}

impl fmt::Display for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wb=0x{:04X} tag=0x{:X} {} go={}",
            self.write_back_address,
            self.tag,
            if self.push_not_pull { "push" } else { "pull" },
            self.go as u8
        )
    }
}

const REMOTE_MARKER: u32 = 0b01 << 30;
const REMOTE_MARKER_MASK: u32 = 0b11 << 30;
const REMOTE_Y_SHIFT: u32 = 24;
const REMOTE_X_SHIFT: u32 = 18;
const REMOTE_COORD_MASK: u32 = 0x3F;

/// Mask for the local offset carried by a remote pointer.
pub const REMOTE_OFFSET_MASK: u32 = (1 << REMOTE_X_SHIFT) - 1;

/// Largest coordinate component a remote pointer can carry.
pub const MAX_REMOTE_COORD: u8 = REMOTE_COORD_MASK as u8;

/// Remote pointer: a tile coordinate plus a byte offset in that tile's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemotePtr {
    pub coord: TileCoord,
    pub offset: u32,
}

impl RemotePtr {
    /// Build a remote pointer.
    ///
    /// Returns `None` if a coordinate or the offset does not fit its field.
    pub fn new(coord: TileCoord, offset: u32) -> Option<Self> {
        if coord.x > MAX_REMOTE_COORD || coord.y > MAX_REMOTE_COORD || offset > REMOTE_OFFSET_MASK {
            return None;
        }
        Some(Self { coord, offset })
    }

    /// Pack into the 32-bit wire encoding.
    pub fn encode(&self) -> u32 {
        REMOTE_MARKER
            | ((self.coord.y as u32) << REMOTE_Y_SHIFT)
            | ((self.coord.x as u32) << REMOTE_X_SHIFT)
            | (self.offset & REMOTE_OFFSET_MASK)
    }

    /// Unpack a 32-bit value. Returns `None` without the remote marker.
    pub fn decode(raw: u32) -> Option<Self> {
        if raw & REMOTE_MARKER_MASK != REMOTE_MARKER {
            return None;
        }
        Some(Self {
            coord: TileCoord {
                x: ((raw >> REMOTE_X_SHIFT) & REMOTE_COORD_MASK) as u8,
                y: ((raw >> REMOTE_Y_SHIFT) & REMOTE_COORD_MASK) as u8,
            },
            offset: raw & REMOTE_OFFSET_MASK,
        })
    }
}

impl fmt::Display for RemotePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ 0x{:05X}", self.coord, self.offset)
    }
}

/// Register write sink for DMA programming.
///
/// # Precondition
///
/// Callers write `LocalAddress`, `RemoteAddress` and `LengthBytes` before
/// `Control`. The hardware latches the other three registers when it sees
/// `go`, so a control write that is not last arms a stale request. Nothing
/// here can enforce the order.
pub trait DmaRegisterSink {
    /// Store one word to a DMA register.
    fn write_register(&self, reg: DmaRegister, value: u32);
}
