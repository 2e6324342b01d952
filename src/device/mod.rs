//! Emulated manycore grid.
//!
//! This module provides:
//! - Grid dimensions and coordinate/identity translation
//! - Tile state (data memory and DMA register block)
//! - The DMA push engine that moves data between tiles
//! - Register layouts (control word, remote pointer)
//!
//! # Grid Layout
//!
//! Cores are numbered row by row, `id = y * cols + x`:
//!
//! ```text
//!          x=0     x=1     x=2     x=3
//!        +-------+-------+-------+-------+
//!   y=0  | id 0  | id 1  | id 2  | id 3  |
//!        +-------+-------+-------+-------+
//!   y=1  | id 4  | id 5  | id 6  | id 7  |
//!        +-------+-------+-------+-------+
//! ```
//!
//! # Example
//!
//! ```
//! use tile_push_emu::device::{GridArch, TileCoord, TileGrid};
//!
//! let grid = TileGrid::new(GridArch::new(4, 2));
//! assert_eq!(grid.coordinate_to_identity(TileCoord::new(1, 0)), 1);
//!
//! let tile = grid.get(TileCoord::new(2, 1)).unwrap();
//! tile.store_word(0x100, 0xDEADBEEF);
//! assert_eq!(tile.load_word(0x100), Some(0xDEADBEEF));
//! ```

pub mod dma;
pub mod grid;
pub mod memory;
pub mod registers;
pub mod tile;

pub use dma::{ChannelState, DmaEngine, DmaError, DmaResult, EngineStats, PushRequest};
pub use grid::TileGrid;
pub use memory::{TileMemory, DATA_MEMORY_SIZE, DATA_MEMORY_WORDS};
pub use registers::{
    ControlWord, DmaRegister, DmaRegisterSink, RegisterImage, RemotePtr, DMA_REG_BASE,
    WRITEBACK_DONE,
};
pub use tile::{DmaRegisterBlock, Tile};

use std::fmt;

/// Linear core identity.
pub type CoreId = u32;

/// 2-D tile coordinate (`x` = column, `y` = row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileCoord {
    pub x: u8,
    pub y: u8,
}

impl TileCoord {
    /// Create a coordinate.
    #[inline]
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile({},{})", self.x, self.y)
    }
}

/// Grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridArch {
    cols: u8,
    rows: u8,
}

impl GridArch {
    /// Create grid dimensions. Zero dimensions are raised to 1.
    pub fn new(cols: u8, rows: u8) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> u8 {
        self.cols
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> u8 {
        self.rows
    }

    /// Total number of cores.
    #[inline]
    pub fn core_count(&self) -> u32 {
        self.cols as u32 * self.rows as u32
    }

    /// Check if a coordinate is inside the grid.
    #[inline]
    pub fn contains(&self, coord: TileCoord) -> bool {
        coord.x < self.cols && coord.y < self.rows
    }

    /// Identity of a coordinate: `y * cols + x`.
    #[inline]
    pub fn coordinate_to_identity(&self, coord: TileCoord) -> CoreId {
        coord.y as u32 * self.cols as u32 + coord.x as u32
    }

    /// Coordinate of an identity. Inverse of `coordinate_to_identity`.
    #[inline]
    pub fn identity_to_coordinate(&self, id: CoreId) -> TileCoord {
        TileCoord {
            x: (id % self.cols as u32) as u8,
            y: (id / self.cols as u32) as u8,
        }
    }
}

impl Default for GridArch {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl fmt::Display for GridArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} ({} cores)", self.cols, self.rows, self.core_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_dimensions() {
        let arch = GridArch::new(4, 4);
        assert_eq!(arch.cols(), 4);
        assert_eq!(arch.rows(), 4);
        assert_eq!(arch.core_count(), 16);
        assert_eq!(GridArch::new(0, 0).core_count(), 1);
    }

    #[test]
    fn test_coordinate_to_identity() {
        let arch = GridArch::new(4, 3);
        assert_eq!(arch.coordinate_to_identity(TileCoord::new(0, 0)), 0);
        assert_eq!(arch.coordinate_to_identity(TileCoord::new(1, 0)), 1);
        assert_eq!(arch.coordinate_to_identity(TileCoord::new(0, 1)), 4);
        assert_eq!(arch.coordinate_to_identity(TileCoord::new(3, 2)), 11);
    }

    #[test]
    fn test_identity_round_trip() {
        let arch = GridArch::new(5, 3);
        for id in 0..arch.core_count() {
            let coord = arch.identity_to_coordinate(id);
            assert!(arch.contains(coord));
            assert_eq!(arch.coordinate_to_identity(coord), id);
        }
    }

    #[test]
    fn test_contains() {
        let arch = GridArch::new(2, 2);
        assert!(arch.contains(TileCoord::new(1, 1)));
        assert!(!arch.contains(TileCoord::new(2, 0)));
        assert!(!arch.contains(TileCoord::new(0, 2)));
    }
}
