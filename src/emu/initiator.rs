//! Transfer-initiator role.
//!
//! The initiator runs one push transfer from its own memory into a remote
//! tile and ends the run:
//!
//! ```text
//! InitMem ──▶ ProgramRegs ──▶ WaitCompletion ──▶ Terminated
//!    │             │                 │               ▲
//!    └─────────────┴── error ────────┴───────────────┘
//! ```
//!
//! 1. write word `i` = `i` over local memory
//! 2. resolve the destination remote pointer
//! 3. zero the write-back word
//! 4. program `local_address`, `remote_address`, `length_bytes`, then `control`
//! 5. spin on the write-back word until it reads `WRITEBACK_DONE`
//! 6. raise grid termination

use std::time::Duration;

use thiserror::Error;

use crate::device::memory::DATA_MEMORY_WORDS;
use crate::device::registers::{ControlWord, DmaRegister, DmaRegisterSink, RemotePtr, MAX_TAG, WRITEBACK_DONE};
use crate::device::{Tile, TileCoord, TileGrid, TileMemory};
use crate::sync::{poll_until_equal, poll_until_equal_within, PollTimeout, TerminationCause, TerminationSignal};

/// Number of words the initiator fills with the index pattern.
pub const PATTERN_WORDS: usize = DATA_MEMORY_WORDS;

/// Parameters of one push transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushTransfer {
    /// Byte offset of the source in the initiator's memory
    pub local_address: u32,
    /// Destination tile
    pub dest: TileCoord,
    /// Byte offset in the destination tile's memory
    pub dest_offset: u32,
    /// Bytes to move
    pub length_bytes: u32,
    /// Local byte address of the completion word
    pub write_back_address: u16,
    /// Correlation id placed in the control word
    pub tag: u8,
}

impl Default for PushTransfer {
    fn default() -> Self {
        Self {
            local_address: 0,
            dest: TileCoord::new(0, 0),
            dest_offset: 0,
            length_bytes: 128,
            write_back_address: 0xABC,
            tag: 0xA,
        }
    }
}

impl PushTransfer {
    /// Control word that arms this transfer.
    pub fn control_word(&self) -> ControlWord {
        ControlWord::push(self.write_back_address, self.tag)
    }
}

/// Initiator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InitiatorPhase {
    InitMem,
    ProgramRegs,
    WaitCompletion,
    Terminated,
}

/// Initiator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitiatorError {
    #[error("tag 0x{0:X} does not fit the 4-bit tag field")]
    TagOutOfRange(u8),

    #[error("transfer length is zero")]
    ZeroLength,

    #[error("transfer length {0} is not a multiple of 4 bytes")]
    UnalignedLength(u32),

    #[error("source range 0x{address:04X} + {length} bytes is outside local memory")]
    SourceOutOfBounds { address: u32, length: u32 },

    #[error("write-back address 0x{0:04X} is unaligned or outside local memory")]
    WriteBackOutOfBounds(u16),

    #[error("write-back address 0x{0:04X} lies inside the transferred range")]
    WriteBackOverlapsPayload(u16),

    #[error("destination {0} is outside the grid")]
    DestinationOutsideGrid(TileCoord),

    #[error("destination range {coord} @ 0x{offset:04X} + {length} bytes is out of bounds")]
    DestinationOutOfBounds { coord: TileCoord, offset: u32, length: u32 },

    #[error("transfer did not complete: {0}")]
    CompletionTimeout(#[source] PollTimeout),

    #[error("initiator already ran")]
    AlreadyRun,
}

impl InitiatorError {
    /// Termination cause to report for this failure.
    pub fn termination_cause(&self) -> TerminationCause {
        match self {
            InitiatorError::CompletionTimeout(_) => TerminationCause::CompletionTimeout,
            _ => TerminationCause::InitiatorFault,
        }
    }
}

/// What a successful initiator run observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiatorReport {
    /// Destination the transfer was aimed at
    pub remote: RemotePtr,
    /// Control word that armed the transfer
    pub control: ControlWord,
    /// Poll iterations before the write-back word read `WRITEBACK_DONE`
    pub poll_spins: u64,
}

/// Runs one push transfer.
#[derive(Debug)]
pub struct TransferInitiator {
    transfer: PushTransfer,
    completion_timeout: Option<Duration>,
    phase: InitiatorPhase,
}

impl TransferInitiator {
    /// Create an initiator with an unbounded completion wait.
    pub fn new(transfer: PushTransfer) -> Self {
        Self {
            transfer,
            completion_timeout: None,
            phase: InitiatorPhase::InitMem,
        }
    }

    /// Bound the completion wait. `None` waits forever.
    pub fn with_completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> InitiatorPhase {
        self.phase
    }

    /// Transfer parameters.
    #[inline]
    pub fn transfer(&self) -> &PushTransfer {
        &self.transfer
    }

    fn enter(&mut self, next: InitiatorPhase) {
        debug_assert!(next > self.phase, "initiator cannot go from {:?} to {:?}", self.phase, next);
        log::debug!("initiator: {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Check the transfer against the grid and resolve its destination.
    ///
    /// `source` is the initiator's own tile. The write-back word must lie
    /// outside the source range, and outside the destination range when the
    /// push targets `source` itself.
    pub fn validate(&self, grid: &TileGrid, source: &Tile) -> Result<RemotePtr, InitiatorError> {
        let t = &self.transfer;
        let local = source.memory();
        if t.tag > MAX_TAG {
            return Err(InitiatorError::TagOutOfRange(t.tag));
        }
        if t.length_bytes == 0 {
            return Err(InitiatorError::ZeroLength);
        }
        if t.length_bytes % 4 != 0 {
            return Err(InitiatorError::UnalignedLength(t.length_bytes));
        }
        if t.local_address % 4 != 0 || !local.contains_range(t.local_address as usize, t.length_bytes as usize) {
            return Err(InitiatorError::SourceOutOfBounds {
                address: t.local_address,
                length: t.length_bytes,
            });
        }
        if t.write_back_address % 4 != 0 || !local.contains_range(t.write_back_address as usize, 4) {
            return Err(InitiatorError::WriteBackOutOfBounds(t.write_back_address));
        }
        let wb = t.write_back_address as u32;
        if word_in_range(wb, t.local_address, t.length_bytes)
            || (t.dest == source.coord && word_in_range(wb, t.dest_offset, t.length_bytes))
        {
            return Err(InitiatorError::WriteBackOverlapsPayload(t.write_back_address));
        }

        let dest_tile = grid
            .get(t.dest)
            .ok_or(InitiatorError::DestinationOutsideGrid(t.dest))?;
        let out_of_bounds = InitiatorError::DestinationOutOfBounds {
            coord: t.dest,
            offset: t.dest_offset,
            length: t.length_bytes,
        };
        if t.dest_offset % 4 != 0
            || !dest_tile.memory().contains_range(t.dest_offset as usize, t.length_bytes as usize)
        {
            return Err(out_of_bounds);
        }
        grid.make_remote_pointer(t.dest, t.dest_offset).ok_or(out_of_bounds)
    }

    /// Fill local memory with the index pattern: word `i` holds `i`.
    pub fn prepare_memory(&self, memory: &TileMemory) {
        for i in 0..PATTERN_WORDS.min(memory.len_words()) {
            memory.write_word(i * 4, i as u32);
        }
    }

    /// Reset the write-back word and program the DMA registers.
    ///
    /// `control` is written last; it is the write that arms the transfer.
    pub fn program<R: DmaRegisterSink + ?Sized>(
        &mut self,
        regs: &R,
        memory: &TileMemory,
        remote: RemotePtr,
    ) -> Result<ControlWord, InitiatorError> {
        let t = self.transfer;
        if !memory.write_word(t.write_back_address as usize, 0) {
            return Err(InitiatorError::WriteBackOutOfBounds(t.write_back_address));
        }

        let control = t.control_word();
        regs.write_register(DmaRegister::LocalAddress, t.local_address);
        regs.write_register(DmaRegister::RemoteAddress, remote.encode());
        regs.write_register(DmaRegister::LengthBytes, t.length_bytes);
        regs.write_register(DmaRegister::Control, control.encode());

        self.enter(InitiatorPhase::WaitCompletion);
        Ok(control)
    }

    /// Spin on the write-back word until the engine reports completion.
    pub fn wait_for_completion(&mut self, memory: &TileMemory) -> Result<u64, InitiatorError> {
        let wb = self.transfer.write_back_address;
        let word = memory
            .word(wb as usize)
            .ok_or(InitiatorError::WriteBackOutOfBounds(wb))?;

        match self.completion_timeout {
            None => Ok(poll_until_equal(word, WRITEBACK_DONE)),
            Some(timeout) => {
                poll_until_equal_within(word, WRITEBACK_DONE, timeout).map_err(InitiatorError::CompletionTimeout)
            }
        }
    }

    /// Run the whole role on `tile` and raise termination when done.
    ///
    /// Termination is raised on failure too, so the rest of the grid is
    /// never left waiting. An initiator runs once; later calls return
    /// `AlreadyRun` and leave termination alone.
    pub fn run(
        &mut self,
        tile: &Tile,
        grid: &TileGrid,
        termination: &TerminationSignal,
    ) -> Result<InitiatorReport, InitiatorError> {
        if self.phase != InitiatorPhase::InitMem {
            return Err(InitiatorError::AlreadyRun);
        }
        let result = self.execute(tile, grid);
        let cause = match &result {
            Ok(report) => {
                log::info!(
                    "core {}: transfer to {} complete after {} polls",
                    tile.id,
                    report.remote,
                    report.poll_spins
                );
                TerminationCause::Completed
            }
            Err(e) => {
                log::error!("core {}: transfer failed: {}", tile.id, e);
                e.termination_cause()
            }
        };
        self.enter(InitiatorPhase::Terminated);
        termination.raise(tile.id, cause);
        result
    }

    fn execute(&mut self, tile: &Tile, grid: &TileGrid) -> Result<InitiatorReport, InitiatorError> {
        let memory = tile.memory();
        let remote = self.validate(grid, tile)?;

        self.prepare_memory(memory);
        self.enter(InitiatorPhase::ProgramRegs);

        let control = self.program(tile, memory, remote)?;
        let poll_spins = self.wait_for_completion(memory)?;

        Ok(InitiatorReport {
            remote,
            control,
            poll_spins,
        })
    }
}

/// Whether the word at `addr` lies inside `[start, start + len)`.
fn word_in_range(addr: u32, start: u32, len: u32) -> bool {
    addr >= start && (addr as u64) < start as u64 + len as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DmaEngine, GridArch};
    use std::cell::RefCell;
    use std::thread;

    /// Register double that records every write and the write-back word
    /// value visible at the moment of each write.
    struct RecordingRegisters<'a> {
        memory: &'a TileMemory,
        wb: usize,
        writes: RefCell<Vec<(DmaRegister, u32, Option<u32>)>>,
    }

    impl<'a> RecordingRegisters<'a> {
        fn new(memory: &'a TileMemory, wb: u16) -> Self {
            Self {
                memory,
                wb: wb as usize,
                writes: RefCell::new(Vec::new()),
            }
        }
    }

    impl DmaRegisterSink for RecordingRegisters<'_> {
        fn write_register(&self, reg: DmaRegister, value: u32) {
            let wb_value = self.memory.read_word(self.wb);
            self.writes.borrow_mut().push((reg, value, wb_value));
        }
    }

    fn grid() -> TileGrid {
        TileGrid::new(GridArch::new(2, 2))
    }

    #[test]
    fn test_default_transfer() {
        let t = PushTransfer::default();
        assert_eq!(t.local_address, 0);
        assert_eq!(t.dest, TileCoord::new(0, 0));
        assert_eq!(t.length_bytes, 128);
        assert_eq!(t.write_back_address, 0xABC);
        assert_eq!(t.tag, 0xA);
        assert_eq!(t.control_word().encode(), 0x0ABC_00A5);
    }

    #[test]
    fn test_pattern_invariant() {
        let memory = TileMemory::new();
        let initiator = TransferInitiator::new(PushTransfer::default());
        initiator.prepare_memory(&memory);

        for i in 0..PATTERN_WORDS {
            assert_eq!(memory.read_word(i * 4), Some(i as u32), "word {}", i);
        }
    }

    #[test]
    fn test_register_write_order() {
        let memory = TileMemory::new();
        let regs = RecordingRegisters::new(&memory, 0xABC);
        let remote = RemotePtr::new(TileCoord::new(0, 0), 0).unwrap();

        let mut initiator = TransferInitiator::new(PushTransfer::default());
        initiator.enter(InitiatorPhase::ProgramRegs);
        let control = initiator.program(&regs, &memory, remote).unwrap();

        let writes = regs.writes.borrow();
        let order: Vec<DmaRegister> = writes.iter().map(|w| w.0).collect();
        assert_eq!(order, DmaRegister::ALL.to_vec());
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0].1, 0);
        assert_eq!(writes[1].1, remote.encode());
        assert_eq!(writes[2].1, 128);
        assert_eq!(writes[3].1, control.encode());
        assert_eq!(initiator.phase(), InitiatorPhase::WaitCompletion);
    }

    #[test]
    fn test_write_back_zero_before_go() {
        let memory = TileMemory::new();
        // Stale completion value from an earlier run
        memory.write_word(0xABC, WRITEBACK_DONE);

        let regs = RecordingRegisters::new(&memory, 0xABC);
        let remote = RemotePtr::new(TileCoord::new(0, 0), 0).unwrap();
        let mut initiator = TransferInitiator::new(PushTransfer::default());
        initiator.enter(InitiatorPhase::ProgramRegs);
        initiator.program(&regs, &memory, remote).unwrap();

        let writes = regs.writes.borrow();
        let (reg, value, wb_at_go) = writes[3];
        assert_eq!(reg, DmaRegister::Control);
        assert!(ControlWord::is_armed(value));
        assert_eq!(wb_at_go, Some(0));
    }

    #[test]
    fn test_validate_resolves_destination() {
        let grid = grid();
        let initiator = TransferInitiator::new(PushTransfer::default());
        let remote = initiator.validate(&grid, grid.by_id(1).unwrap()).unwrap();
        assert_eq!(remote.encode(), 0x4000_0000);
    }

    #[test]
    fn test_validate_rejects_bad_transfers() {
        let grid = grid();
        let local = grid.by_id(1).unwrap();
        let check = |t: PushTransfer| TransferInitiator::new(t).validate(&grid, local).unwrap_err();
        let base = PushTransfer::default();

        assert_eq!(check(PushTransfer { tag: 0x10, ..base }), InitiatorError::TagOutOfRange(0x10));
        assert_eq!(check(PushTransfer { length_bytes: 0, ..base }), InitiatorError::ZeroLength);
        assert_eq!(check(PushTransfer { length_bytes: 130, ..base }), InitiatorError::UnalignedLength(130));
        assert!(matches!(
            check(PushTransfer { local_address: 4000, ..base }),
            InitiatorError::SourceOutOfBounds { .. }
        ));
        assert_eq!(
            check(PushTransfer { write_back_address: 0xABD, ..base }),
            InitiatorError::WriteBackOutOfBounds(0xABD)
        );
        assert_eq!(
            check(PushTransfer { dest: TileCoord::new(5, 0), ..base }),
            InitiatorError::DestinationOutsideGrid(TileCoord::new(5, 0))
        );
        assert!(matches!(
            check(PushTransfer { dest_offset: 4064, ..base }),
            InitiatorError::DestinationOutOfBounds { .. }
        ));
        // Completion word inside the pushed source words
        assert_eq!(
            check(PushTransfer { write_back_address: 0x40, ..base }),
            InitiatorError::WriteBackOverlapsPayload(0x40)
        );
        // Self-push whose destination covers the completion word
        assert_eq!(
            check(PushTransfer {
                dest: TileCoord::new(1, 0),
                dest_offset: 0xA80,
                ..base
            }),
            InitiatorError::WriteBackOverlapsPayload(0xABC)
        );
    }

    #[test]
    fn test_validate_allows_adjacent_write_back() {
        let grid = grid();
        let local = grid.by_id(1).unwrap();
        // Last source word is 0x7C; 0x80 is the first word past it
        let t = PushTransfer { write_back_address: 0x80, ..Default::default() };
        assert!(TransferInitiator::new(t).validate(&grid, local).is_ok());
        // Same offsets on another tile do not collide
        let t = PushTransfer { dest_offset: 0xA80, ..Default::default() };
        assert!(TransferInitiator::new(t).validate(&grid, local).is_ok());
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let grid = grid();
        let termination = TerminationSignal::new();
        let tile = grid.get(TileCoord::new(1, 0)).unwrap();

        let mut initiator = TransferInitiator::new(PushTransfer { length_bytes: 0, ..Default::default() });
        assert_eq!(initiator.run(tile, &grid, &termination), Err(InitiatorError::ZeroLength));
        assert_eq!(initiator.run(tile, &grid, &termination), Err(InitiatorError::AlreadyRun));
        assert_eq!(initiator.phase(), InitiatorPhase::Terminated);
        assert_eq!(termination.termination().unwrap().cause, TerminationCause::InitiatorFault);
    }

    #[test]
    fn test_invalid_transfer_writes_no_registers() {
        let grid = grid();
        let termination = TerminationSignal::new();
        let tile = grid.get(TileCoord::new(1, 0)).unwrap();

        let mut initiator = TransferInitiator::new(PushTransfer { length_bytes: 0, ..Default::default() });
        let err = initiator.run(tile, &grid, &termination).unwrap_err();

        assert_eq!(err, InitiatorError::ZeroLength);
        assert_eq!(initiator.phase(), InitiatorPhase::Terminated);
        assert_eq!(tile.dma_registers().snapshot().control, 0);
        let t = termination.termination().unwrap();
        assert_eq!(t.raised_by, 1);
        assert_eq!(t.cause, TerminationCause::InitiatorFault);
    }

    #[test]
    fn test_completion_timeout_without_engine() {
        let grid = grid();
        let termination = TerminationSignal::new();
        let tile = grid.get(TileCoord::new(1, 0)).unwrap();

        let mut initiator = TransferInitiator::new(PushTransfer::default())
            .with_completion_timeout(Some(Duration::from_millis(20)));
        let err = initiator.run(tile, &grid, &termination).unwrap_err();

        assert!(matches!(err, InitiatorError::CompletionTimeout(_)));
        assert_eq!(termination.termination().unwrap().cause, TerminationCause::CompletionTimeout);
        // Registers were programmed; nothing serviced them
        assert!(ControlWord::is_armed(tile.dma_registers().snapshot().control));
    }

    #[test]
    fn test_run_against_engine() {
        let grid = grid();
        let termination = TerminationSignal::new();
        let tile = grid.get(TileCoord::new(1, 0)).unwrap();

        let report = thread::scope(|s| {
            s.spawn(|| {
                let mut engine = DmaEngine::new(TileCoord::new(1, 0));
                while !termination.is_raised() {
                    engine.step(&grid);
                    thread::yield_now();
                }
            });
            TransferInitiator::new(PushTransfer::default())
                .with_completion_timeout(Some(Duration::from_secs(10)))
                .run(tile, &grid, &termination)
        })
        .unwrap();

        assert_eq!(report.control, ControlWord::push(0xABC, 0xA));
        assert_eq!(tile.memory().read_word(0xABC), Some(WRITEBACK_DONE));
        assert_eq!(termination.termination().unwrap().cause, TerminationCause::Completed);

        let dest = grid.get(TileCoord::new(0, 0)).unwrap().memory();
        assert_eq!(dest.read_words(0, 32), Some((0..32).collect()));
    }
}
