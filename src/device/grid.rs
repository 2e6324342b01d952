//! Tile grid: the complete emulated device.
//!
//! Tiles are stored in a flat `Vec` indexed by core identity
//! (`y * cols + x`), so identity and storage order agree.
//!
//! The grid also provides the addressing collaborators every core relies on:
//! coordinate to identity translation and remote pointer formation.

use std::sync::Arc;

use super::registers::{RegisterImage, RemotePtr};
use super::tile::Tile;
use super::{CoreId, GridArch, TileCoord};

/// The grid of tiles.
#[derive(Debug)]
pub struct TileGrid {
    arch: GridArch,
    tiles: Vec<Arc<Tile>>,
}

impl TileGrid {
    /// Create a grid with zeroed tiles.
    pub fn new(arch: GridArch) -> Self {
        let tiles = (0..arch.core_count())
            .map(|id| {
                let coord = arch.identity_to_coordinate(id);
                Arc::new(Tile::new(coord, id))
            })
            .collect();

        Self { arch, tiles }
    }

    /// Grid dimensions.
    #[inline]
    pub fn arch(&self) -> GridArch {
        self.arch
    }

    /// Number of cores.
    #[inline]
    pub fn core_count(&self) -> u32 {
        self.arch.core_count()
    }

    /// Identity of the core at a coordinate.
    #[inline]
    pub fn coordinate_to_identity(&self, coord: TileCoord) -> CoreId {
        self.arch.coordinate_to_identity(coord)
    }

    /// Remote pointer to `offset` in the memory of the tile at `coord`.
    ///
    /// Returns `None` for a coordinate outside the grid or an offset that
    /// does not fit the encoding.
    pub fn make_remote_pointer(&self, coord: TileCoord, offset: u32) -> Option<RemotePtr> {
        if !self.arch.contains(coord) {
            return None;
        }
        RemotePtr::new(coord, offset)
    }

    /// Resolve a remote pointer to its tile.
    pub fn resolve(&self, ptr: RemotePtr) -> Option<&Arc<Tile>> {
        self.get(ptr.coord)
    }

    /// Tile at a coordinate.
    #[inline]
    pub fn get(&self, coord: TileCoord) -> Option<&Arc<Tile>> {
        if self.arch.contains(coord) {
            self.tiles.get(self.arch.coordinate_to_identity(coord) as usize)
        } else {
            None
        }
    }

    /// Tile by identity.
    #[inline]
    pub fn by_id(&self, id: CoreId) -> Option<&Arc<Tile>> {
        self.tiles.get(id as usize)
    }

    /// Iterate over all tiles in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tile>> {
        self.tiles.iter()
    }

    /// Zero every tile.
    pub fn reset(&self) {
        for tile in &self.tiles {
            tile.reset();
        }
    }

    /// Summary lines for every tile with non-zero memory or DMA registers.
    ///
    /// Each listed tile gets one header line followed by its full register
    /// block.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Grid: {}", self.arch)];
        for tile in &self.tiles {
            let mem = tile.memory();
            let nonzero = (0..mem.len_words())
                .filter(|w| mem.read_word(w * 4).unwrap_or(0) != 0)
                .count();
            let regs = tile.dma_registers().snapshot();
            if nonzero == 0 && regs == RegisterImage::default() {
                continue;
            }
            lines.push(format!(
                "  core {:2} {}: {:4} non-zero words, control: {}",
                tile.id,
                tile.coord,
                nonzero,
                regs.control_word()
            ));
            lines.extend(regs.dump_lines().into_iter().map(|l| format!("    {}", l)));
        }
        lines
    }

    /// Print a summary of non-empty tiles.
    pub fn print_summary(&self) {
        for line in self.summary_lines() {
            println!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::registers::DmaRegister;

    #[test]
    fn test_grid_creation() {
        let grid = TileGrid::new(GridArch::new(4, 3));
        assert_eq!(grid.core_count(), 12);
        for (i, tile) in grid.iter().enumerate() {
            assert_eq!(tile.id, i as u32);
            assert_eq!(grid.coordinate_to_identity(tile.coord), tile.id);
        }
    }

    #[test]
    fn test_tile_lookup() {
        let grid = TileGrid::new(GridArch::new(4, 3));
        let tile = grid.get(TileCoord::new(1, 0)).unwrap();
        assert_eq!(tile.id, 1);
        assert_eq!(grid.by_id(5).unwrap().coord, TileCoord::new(1, 1));
        assert!(grid.get(TileCoord::new(4, 0)).is_none());
        assert!(grid.by_id(12).is_none());
    }

    #[test]
    fn test_make_remote_pointer() {
        let grid = TileGrid::new(GridArch::new(2, 2));
        let ptr = grid.make_remote_pointer(TileCoord::new(0, 0), 0).unwrap();
        assert_eq!(ptr.encode(), 0x4000_0000);
        assert_eq!(grid.resolve(ptr).unwrap().id, 0);

        assert!(grid.make_remote_pointer(TileCoord::new(2, 0), 0).is_none());
    }

    #[test]
    fn test_tiles_are_private() {
        let grid = TileGrid::new(GridArch::new(2, 1));
        grid.by_id(0).unwrap().store_word(0x10, 42);
        assert_eq!(grid.by_id(1).unwrap().load_word(0x10), Some(0));

        grid.reset();
        assert_eq!(grid.by_id(0).unwrap().load_word(0x10), Some(0));
    }

    #[test]
    fn test_summary_dumps_register_block() {
        let grid = TileGrid::new(GridArch::new(2, 2));
        assert_eq!(grid.summary_lines(), vec!["Grid: 2x2 (4 cores)".to_string()]);

        let tile = grid.by_id(1).unwrap();
        tile.dma_registers().write(DmaRegister::LocalAddress, 0x80);

        let lines = grid.summary_lines();
        assert_eq!(lines.len(), 1 + 1 + 5);
        assert!(lines[1].starts_with("  core  1 tile(1,0):    0 non-zero words"));
        assert_eq!(lines[2].trim(), "0x1000 DMA_LOCAL_ADDR = 0x00000080");
        assert!(lines[6].trim().starts_with("raw 80000000 "));
    }
}
