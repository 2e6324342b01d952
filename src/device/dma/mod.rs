//! DMA push engine subsystem.
//!
//! Each tile has one DMA engine with a single channel. Software arms it by
//! writing the four registers of the tile's DMA block, control last with the
//! `go` bit set. The engine then:
//!
//! 1. latches the register block and clears `go`
//! 2. validates the request (push only, in-range addresses, word lengths)
//! 3. waits the configured start latency
//! 4. copies `DMA_BYTES_PER_CYCLE` bytes per step into the remote tile
//! 5. stores `WRITEBACK_DONE` to the initiator's write-back word
//!
//! ```text
//!   initiator tile                          target tile
//! ┌───────────────────────┐              ┌───────────────────┐
//! │ data memory           │   push       │ data memory       │
//! │  [local_address ..] ──┼──────────────┼─▶ [offset ..]     │
//! │  [wb_address] ◀─ 1 ───┼── complete   │                   │
//! │ DMA block @ 0x1000    │              │                   │
//! └───────────────────────┘              └───────────────────┘
//! ```
//!
//! There is no request queue: arming a busy channel is rejected. A rejected
//! request never writes the write-back word; software polling it will wait
//! forever unless it uses a deadline.

pub mod engine;

pub use engine::{DmaEngine, EngineStats};

use thiserror::Error;

use super::registers::{ControlWord, RegisterImage, RemotePtr};
use super::{TileCoord, TileGrid};

/// Bytes moved per engine step.
pub const DMA_BYTES_PER_CYCLE: u32 = 4;

/// State of a DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No transfer armed
    #[default]
    Idle,
    /// Transfer in progress
    Active,
    /// Last transfer completed and wrote its write-back word
    Complete,
    /// Last request was rejected
    Error,
}

/// Result of one engine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmaResult {
    /// Nothing to do
    Idle,
    /// Transfer in progress (more steps needed)
    InProgress,
    /// Transfer finished on this step
    Complete,
    /// A request was rejected on this step
    Error(DmaError),
}

impl DmaResult {
    /// Whether the engine still has work after this step.
    #[inline]
    pub fn is_busy(&self) -> bool {
        matches!(self, DmaResult::InProgress)
    }
}

/// Reasons the engine rejects an armed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("pull transfers are not supported")]
    PullUnsupported,

    #[error("remote address 0x{0:08X} does not name a tile in the grid")]
    InvalidRemoteAddress(u32),

    #[error("transfer length is zero")]
    ZeroLength,

    #[error("transfer length {0} is not a multiple of 4 bytes")]
    UnalignedLength(u32),

    #[error("source range 0x{address:04X} + {length} bytes is outside local memory")]
    SourceOutOfBounds { address: u32, length: u32 },

    #[error("destination range {ptr} + {length} bytes is outside target memory")]
    DestinationOutOfBounds { ptr: RemotePtr, length: u32 },

    #[error("write-back address 0x{0:04X} is unaligned or outside local memory")]
    WriteBackOutOfBounds(u16),

    #[error("write-back address 0x{0:04X} lies inside the transferred range")]
    WriteBackOverlapsPayload(u16),

    #[error("reserved control bits set: 0x{0:08X}")]
    ReservedBitsSet(u32),

    #[error("channel busy, armed request dropped (tag 0x{tag:X})")]
    ChannelBusy { tag: u8 },
}

/// A validated push request latched from the register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushRequest {
    /// Tile whose memory is read and whose write-back word is set
    pub source: TileCoord,
    /// Byte offset in source memory
    pub local_address: u32,
    /// Destination tile and offset
    pub dest: RemotePtr,
    /// Number of bytes to move
    pub length_bytes: u32,
    /// Decoded control word
    pub control: ControlWord,
}

impl PushRequest {
    /// Validate a latched register image issued by the tile at `source`.
    pub fn decode(image: &RegisterImage, source: TileCoord, grid: &TileGrid) -> Result<Self, DmaError> {
        let reserved = ControlWord::reserved_bits(image.control);
        if reserved != 0 {
            return Err(DmaError::ReservedBitsSet(reserved));
        }

        let control = image.control_word();
        if !control.push_not_pull {
            return Err(DmaError::PullUnsupported);
        }

        let length = image.length_bytes;
        if length == 0 {
            return Err(DmaError::ZeroLength);
        }
        if length % DMA_BYTES_PER_CYCLE != 0 {
            return Err(DmaError::UnalignedLength(length));
        }

        let source_tile = grid
            .get(source)
            .ok_or(DmaError::InvalidRemoteAddress(image.remote_address))?;
        let source_mem = source_tile.memory();
        if image.local_address % 4 != 0
            || !source_mem.contains_range(image.local_address as usize, length as usize)
        {
            return Err(DmaError::SourceOutOfBounds {
                address: image.local_address,
                length,
            });
        }

        let dest = RemotePtr::decode(image.remote_address)
            .ok_or(DmaError::InvalidRemoteAddress(image.remote_address))?;
        let dest_tile = grid
            .resolve(dest)
            .ok_or(DmaError::InvalidRemoteAddress(image.remote_address))?;
        if dest.offset % 4 != 0 || !dest_tile.memory().contains_range(dest.offset as usize, length as usize) {
            return Err(DmaError::DestinationOutOfBounds { ptr: dest, length });
        }

        let wb = control.write_back_address;
        if wb % 4 != 0 || !source_mem.contains_range(wb as usize, 4) {
            return Err(DmaError::WriteBackOutOfBounds(wb));
        }
        let wb_overlaps = |start: u32| (wb as u32) >= start && (wb as u64) < start as u64 + length as u64;
        if wb_overlaps(image.local_address) || (dest.coord == source && wb_overlaps(dest.offset)) {
            return Err(DmaError::WriteBackOverlapsPayload(wb));
        }

        Ok(Self {
            source,
            local_address: image.local_address,
            dest,
            length_bytes: length,
            control,
        })
    }

    /// Number of 32-bit words moved.
    #[inline]
    pub fn word_count(&self) -> u32 {
        self.length_bytes / 4
    }
}
