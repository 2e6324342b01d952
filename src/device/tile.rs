//! Tile state: data memory plus the memory-mapped DMA register block.
//!
//! A tile is shared between its core thread (program stores and loads) and
//! the fabric thread (DMA engine). All state is atomic, so a tile is handed
//! around as `Arc<Tile>` and accessed through `&self`.
//!
//! # Local Bus
//!
//! `store_word` / `load_word` route by address the way the hardware bus does:
//! - `0x0000-0x0FFF`: data memory
//! - `0x1000-0x100F`: DMA register block
//! - anything else: ignored store, load returns `None`

use std::sync::atomic::{AtomicU32, Ordering};

use super::memory::TileMemory;
use super::registers::{
    ControlWord, DmaRegister, DmaRegisterSink, RegisterImage, DMA_REG_COUNT,
};
use super::{CoreId, TileCoord};

/// DMA register block of one tile.
///
/// The control register is stored with release ordering and loaded with
/// acquire ordering, so the three registers written before it are visible to
/// whoever observes the `go` bit.
#[derive(Debug, Default)]
pub struct DmaRegisterBlock {
    regs: [AtomicU32; DMA_REG_COUNT],
}

impl DmaRegisterBlock {
    /// Create a zeroed register block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a register.
    pub fn write(&self, reg: DmaRegister, value: u32) {
        let ordering = match reg {
            DmaRegister::Control => Ordering::Release,
            _ => Ordering::Relaxed,
        };
        self.regs[reg.index()].store(value, ordering);
    }

    /// Load a register.
    pub fn read(&self, reg: DmaRegister) -> u32 {
        self.regs[reg.index()].load(Ordering::Acquire)
    }

    /// Snapshot all four registers.
    pub fn snapshot(&self) -> RegisterImage {
        RegisterImage {
            local_address: self.read(DmaRegister::LocalAddress),
            remote_address: self.read(DmaRegister::RemoteAddress),
            length_bytes: self.read(DmaRegister::LengthBytes),
            control: self.read(DmaRegister::Control),
        }
    }

    /// Latch an armed request and clear its `go` bit.
    ///
    /// Returns `None` when `go` is not set. The go bit is self-clearing, so a
    /// given arming is latched at most once.
    pub fn take_armed(&self) -> Option<RegisterImage> {
        let control = &self.regs[DmaRegister::Control.index()];
        let raw = control.load(Ordering::Acquire);
        if !ControlWord::is_armed(raw) {
            return None;
        }
        // The core may not rewrite control while a request is armed, but a
        // failed exchange just means we pick it up next step.
        control
            .compare_exchange(raw, ControlWord::disarmed(raw), Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        Some(RegisterImage {
            local_address: self.read(DmaRegister::LocalAddress),
            remote_address: self.read(DmaRegister::RemoteAddress),
            length_bytes: self.read(DmaRegister::LengthBytes),
            control: raw,
        })
    }

    /// Zero all registers.
    pub fn reset(&self) {
        for reg in &self.regs {
            reg.store(0, Ordering::Relaxed);
        }
    }
}

/// One core of the grid.
#[derive(Debug)]
pub struct Tile {
    /// Grid coordinate
    pub coord: TileCoord,

    /// Linear identity derived from the coordinate
    pub id: CoreId,

    /// Private data memory
    memory: TileMemory,

    /// DMA control registers
    dma_regs: DmaRegisterBlock,
}

impl Tile {
    /// Create a tile with zeroed memory and registers.
    pub fn new(coord: TileCoord, id: CoreId) -> Self {
        Self {
            coord,
            id,
            memory: TileMemory::new(),
            dma_regs: DmaRegisterBlock::new(),
        }
    }

    /// Data memory.
    #[inline]
    pub fn memory(&self) -> &TileMemory {
        &self.memory
    }

    /// DMA register block.
    #[inline]
    pub fn dma_registers(&self) -> &DmaRegisterBlock {
        &self.dma_regs
    }

    /// Store a word through the local bus.
    ///
    /// Returns false if the address is unaligned or unmapped.
    pub fn store_word(&self, addr: u32, value: u32) -> bool {
        if let Some(reg) = DmaRegister::from_address(addr) {
            log::debug!("{}: {} <- 0x{:08X}", self.coord, reg.name(), value);
            self.dma_regs.write(reg, value);
            return true;
        }
        if self.memory.write_word(addr as usize, value) {
            return true;
        }
        log::warn!("{}: ignored store to unmapped address 0x{:08X}", self.coord, addr);
        false
    }

    /// Load a word through the local bus.
    pub fn load_word(&self, addr: u32) -> Option<u32> {
        if let Some(reg) = DmaRegister::from_address(addr) {
            return Some(self.dma_regs.read(reg));
        }
        self.memory.read_word(addr as usize)
    }

    /// Zero memory and registers.
    pub fn reset(&self) {
        self.memory.clear();
        self.dma_regs.reset();
    }
}

impl DmaRegisterSink for Tile {
    fn write_register(&self, reg: DmaRegister, value: u32) {
        self.store_word(reg.address(), value);
    }
}
