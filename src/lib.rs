//! tile-push-emu library
//!
//! Tile-to-tile DMA push experiment on an emulated manycore grid.

pub mod config;
pub mod device;
pub mod emu;
pub mod sync;
pub mod testing;
