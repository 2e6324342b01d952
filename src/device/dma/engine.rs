//! DMA engine implementation.
//!
//! One engine per tile. The engine is stepped by whoever clocks the fabric;
//! each step either latches a newly armed request, waits out the start
//! latency, or moves one word.
//!
//! # Usage
//!
//! ```
//! use tile_push_emu::device::{DmaEngine, DmaRegister, DmaRegisterSink, GridArch, TileCoord, TileGrid};
//!
//! let grid = TileGrid::new(GridArch::new(2, 1));
//! let src = grid.get(TileCoord::new(1, 0)).unwrap();
//! src.write_register(DmaRegister::LocalAddress, 0);
//! src.write_register(DmaRegister::RemoteAddress, 0x4000_0000);
//! src.write_register(DmaRegister::LengthBytes, 16);
//! src.write_register(DmaRegister::Control, 0x0ABC_00A5);
//!
//! let mut engine = DmaEngine::new(TileCoord::new(1, 0));
//! while engine.step(&grid).is_busy() {}
//! assert_eq!(src.memory().read_word(0xABC), Some(1));
//! ```

use super::{ChannelState, DmaError, DmaResult, PushRequest, DMA_BYTES_PER_CYCLE};
use crate::device::registers::WRITEBACK_DONE;
use crate::device::{TileCoord, TileGrid};

/// Statistics for a DMA engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Transfers that wrote their write-back word
    pub transfers_completed: u64,
    /// Total bytes moved
    pub bytes_transferred: u64,
    /// Steps spent with a transfer in flight
    pub busy_cycles: u64,
    /// Armed requests that were rejected
    pub rejected_requests: u64,
}

impl EngineStats {
    /// Accumulate another engine's statistics.
    pub fn merge(&mut self, other: &EngineStats) {
        self.transfers_completed += other.transfers_completed;
        self.bytes_transferred += other.bytes_transferred;
        self.busy_cycles += other.busy_cycles;
        self.rejected_requests += other.rejected_requests;
    }
}

/// Transfer in flight.
#[derive(Debug, Clone, Copy)]
struct ActiveTransfer {
    request: PushRequest,
    bytes_done: u32,
    latency_left: u32,
}

/// DMA engine for a single tile.
#[derive(Debug)]
pub struct DmaEngine {
    /// Tile this engine belongs to
    pub coord: TileCoord,

    state: ChannelState,

    active: Option<ActiveTransfer>,

    /// Steps to wait after latching a request before the first word moves
    start_latency: u32,

    last_error: Option<DmaError>,

    stats: EngineStats,
}

impl DmaEngine {
    /// Create an idle engine with no start latency.
    pub fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            state: ChannelState::Idle,
            active: None,
            start_latency: 0,
            last_error: None,
            stats: EngineStats::default(),
        }
    }

    /// Set the start latency in steps.
    pub fn with_start_latency(mut self, cycles: u32) -> Self {
        self.start_latency = cycles;
        self
    }

    /// Current channel state.
    #[inline]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether a transfer is in flight.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Most recent rejection, if any.
    pub fn last_error(&self) -> Option<&DmaError> {
        self.last_error.as_ref()
    }

    /// Engine statistics.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Advance the engine by one step.
    pub fn step(&mut self, grid: &TileGrid) -> DmaResult {
        let Some(tile) = grid.get(self.coord) else {
            return DmaResult::Idle;
        };

        let Some(mut xfer) = self.active.take() else {
            let Some(image) = tile.dma_registers().take_armed() else {
                return DmaResult::Idle;
            };
            return match PushRequest::decode(&image, self.coord, grid) {
                Ok(request) => {
                    log::info!(
                        "{}: DMA push armed -> {} ({} bytes, {})",
                        self.coord,
                        request.dest,
                        request.length_bytes,
                        request.control
                    );
                    self.active = Some(ActiveTransfer {
                        request,
                        bytes_done: 0,
                        latency_left: self.start_latency,
                    });
                    self.state = ChannelState::Active;
                    self.stats.busy_cycles += 1;
                    DmaResult::InProgress
                }
                Err(e) => self.reject(e),
            };
        };

        // No queue: a second arming while busy is dropped.
        if let Some(image) = tile.dma_registers().take_armed() {
            let tag = image.control_word().tag;
            self.active = Some(xfer);
            self.stats.busy_cycles += 1;
            return self.reject(DmaError::ChannelBusy { tag });
        }

        self.stats.busy_cycles += 1;

        if xfer.latency_left > 0 {
            xfer.latency_left -= 1;
            self.active = Some(xfer);
            return DmaResult::InProgress;
        }

        let req = xfer.request;
        let src_offset = (req.local_address + xfer.bytes_done) as usize;
        let dst_offset = (req.dest.offset + xfer.bytes_done) as usize;

        let Some(word) = tile.memory().read_word(src_offset) else {
            return self.reject(DmaError::SourceOutOfBounds {
                address: req.local_address,
                length: req.length_bytes,
            });
        };
        let written = grid
            .resolve(req.dest)
            .is_some_and(|dest| dest.memory().write_word(dst_offset, word));
        if !written {
            return self.reject(DmaError::DestinationOutOfBounds {
                ptr: req.dest,
                length: req.length_bytes,
            });
        }

        xfer.bytes_done += DMA_BYTES_PER_CYCLE;
        self.stats.bytes_transferred += DMA_BYTES_PER_CYCLE as u64;

        if xfer.bytes_done < req.length_bytes {
            self.active = Some(xfer);
            return DmaResult::InProgress;
        }

        // Every payload word is stored before the write-back word; the
        // write-back store releases them to the poller.
        tile.memory()
            .write_word(req.control.write_back_address as usize, WRITEBACK_DONE);
        self.stats.transfers_completed += 1;
        self.state = ChannelState::Complete;
        log::info!(
            "{}: DMA push complete, {} bytes, write-back 0x{:04X} set",
            self.coord,
            req.length_bytes,
            req.control.write_back_address
        );
        DmaResult::Complete
    }

    fn reject(&mut self, error: DmaError) -> DmaResult {
        log::error!("{}: DMA request rejected: {}", self.coord, error);
        self.stats.rejected_requests += 1;
        if self.active.is_none() {
            self.state = ChannelState::Error;
        }
        self.last_error = Some(error.clone());
        DmaResult::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::registers::{ControlWord, DmaRegister, DmaRegisterSink};
    use crate::device::{GridArch, Tile};

    const SRC: TileCoord = TileCoord::new(1, 0);
    const DST: TileCoord = TileCoord::new(0, 0);

    fn setup(length: u32) -> TileGrid {
        let grid = TileGrid::new(GridArch::new(2, 2));
        let src = grid.get(SRC).unwrap();
        for i in 0..1024u32 {
            src.memory().write_word(i as usize * 4, i);
        }
        src.memory().write_word(0xABC, 0);
        arm(src, length, ControlWord::push(0xABC, 0xA));
        grid
    }

    fn arm(tile: &Tile, length: u32, control: ControlWord) {
        tile.write_register(DmaRegister::LocalAddress, 0);
        tile.write_register(DmaRegister::RemoteAddress, 0x4000_0000);
        tile.write_register(DmaRegister::LengthBytes, length);
        tile.write_register(DmaRegister::Control, control.encode());
    }

    fn run_to_completion(engine: &mut DmaEngine, grid: &TileGrid) -> DmaResult {
        loop {
            let result = engine.step(grid);
            if !result.is_busy() {
                return result;
            }
        }
    }

    #[test]
    fn test_idle_engine_does_nothing() {
        let grid = TileGrid::new(GridArch::new(2, 2));
        let mut engine = DmaEngine::new(SRC);
        assert_eq!(engine.step(&grid), DmaResult::Idle);
        assert_eq!(engine.state(), ChannelState::Idle);
        assert_eq!(engine.stats().busy_cycles, 0);
    }

    #[test]
    fn test_push_moves_payload_and_sets_write_back() {
        let grid = setup(128);
        let mut engine = DmaEngine::new(SRC);

        assert_eq!(run_to_completion(&mut engine, &grid), DmaResult::Complete);
        assert_eq!(engine.state(), ChannelState::Complete);

        let dest = grid.get(DST).unwrap().memory();
        let expected: Vec<u32> = (0..32).collect();
        assert_eq!(dest.read_words(0, 32), Some(expected));
        // Nothing past the requested length
        assert_eq!(dest.read_word(128), Some(0));

        assert_eq!(grid.get(SRC).unwrap().memory().read_word(0xABC), Some(WRITEBACK_DONE));

        let stats = engine.stats();
        assert_eq!(stats.transfers_completed, 1);
        assert_eq!(stats.bytes_transferred, 128);
        assert_eq!(stats.rejected_requests, 0);
    }

    #[test]
    fn test_write_back_only_after_last_word() {
        let grid = setup(16);
        let mut engine = DmaEngine::new(SRC);
        let src = grid.get(SRC).unwrap();

        // latch + 3 words without completion
        for _ in 0..4 {
            assert_eq!(engine.step(&grid), DmaResult::InProgress);
            assert_eq!(src.memory().read_word(0xABC), Some(0));
        }
        assert_eq!(engine.step(&grid), DmaResult::Complete);
        assert_eq!(src.memory().read_word(0xABC), Some(1));
    }

    #[test]
    fn test_start_latency() {
        let grid = setup(4);
        let mut engine = DmaEngine::new(SRC).with_start_latency(3);

        // latch, then three latency steps
        for _ in 0..4 {
            assert_eq!(engine.step(&grid), DmaResult::InProgress);
        }
        assert_eq!(engine.stats().bytes_transferred, 0);
        assert_eq!(engine.step(&grid), DmaResult::Complete);
        assert_eq!(engine.stats().busy_cycles, 5);
    }

    #[test]
    fn test_pull_rejected_without_write_back() {
        let grid = TileGrid::new(GridArch::new(2, 2));
        let src = grid.get(SRC).unwrap();
        let pull = ControlWord { push_not_pull: false, ..ControlWord::push(0xABC, 0xA) };
        arm(src, 128, pull);

        let mut engine = DmaEngine::new(SRC);
        assert_eq!(engine.step(&grid), DmaResult::Error(DmaError::PullUnsupported));
        assert_eq!(engine.state(), ChannelState::Error);
        assert_eq!(engine.last_error(), Some(&DmaError::PullUnsupported));
        assert_eq!(src.memory().read_word(0xABC), Some(0));

        // Request was consumed; the engine goes quiet
        assert_eq!(engine.step(&grid), DmaResult::Idle);
    }

    #[test]
    fn test_arming_busy_channel_is_rejected() {
        let grid = setup(8);
        let src = grid.get(SRC).unwrap();
        let mut engine = DmaEngine::new(SRC).with_start_latency(10);

        assert_eq!(engine.step(&grid), DmaResult::InProgress);
        arm(src, 8, ControlWord::push(0xAB0, 0x3));
        assert_eq!(engine.step(&grid), DmaResult::Error(DmaError::ChannelBusy { tag: 0x3 }));
        assert_eq!(engine.state(), ChannelState::Active);

        assert_eq!(run_to_completion(&mut engine, &grid), DmaResult::Complete);
        assert_eq!(engine.stats().rejected_requests, 1);
        assert_eq!(engine.stats().transfers_completed, 1);
        // Only the first request's write-back word is set
        assert_eq!(src.memory().read_word(0xABC), Some(1));
        assert_eq!(src.memory().read_word(0xAB0), Some(0xAB0 / 4));
    }

    #[test]
    fn test_stats_merge() {
        let mut total = EngineStats::default();
        let one = EngineStats {
            transfers_completed: 1,
            bytes_transferred: 128,
            busy_cycles: 33,
            rejected_requests: 0,
        };
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.transfers_completed, 2);
        assert_eq!(total.bytes_transferred, 256);
        assert_eq!(total.busy_cycles, 66);
    }
}
