//! Word-addressed tile data memory.
//!
//! Each word is an `AtomicU32` so the owning core, the DMA engine (clocked on
//! the fabric thread) and the harness can touch the same memory without a
//! lock. Stores use release ordering and loads use acquire ordering, which
//! gives every load a fresh value and orders prior stores before a store
//! another thread polls on.

use std::sync::atomic::{AtomicU32, Ordering};

/// Size of tile data memory in bytes (1024 words).
pub const DATA_MEMORY_SIZE: usize = 4096;

/// Number of 32-bit words in tile data memory.
pub const DATA_MEMORY_WORDS: usize = DATA_MEMORY_SIZE / 4;

/// Private data memory of one tile.
#[derive(Debug)]
pub struct TileMemory {
    words: Box<[AtomicU32]>,
}

impl TileMemory {
    /// Create a zeroed memory of `DATA_MEMORY_SIZE` bytes.
    pub fn new() -> Self {
        Self::with_size(DATA_MEMORY_SIZE)
    }

    /// Create a zeroed memory of `size` bytes (rounded down to whole words).
    pub fn with_size(size: usize) -> Self {
        let words = (0..size / 4).map(|_| AtomicU32::new(0)).collect();
        Self { words }
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.words.len() * 4
    }

    /// Number of words.
    #[inline]
    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    /// Whether `[offset, offset + len)` lies inside memory.
    #[inline]
    pub fn contains_range(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).is_some_and(|end| end <= self.size())
    }

    /// Borrow the atomic cell behind a word-aligned byte offset.
    ///
    /// Used by pollers that need to re-fetch the same word.
    #[inline]
    pub fn word(&self, offset: usize) -> Option<&AtomicU32> {
        if offset % 4 != 0 {
            return None;
        }
        self.words.get(offset / 4)
    }

    /// Read the word at a word-aligned byte offset.
    #[inline]
    pub fn read_word(&self, offset: usize) -> Option<u32> {
        self.word(offset).map(|w| w.load(Ordering::Acquire))
    }

    /// Write the word at a word-aligned byte offset.
    /// Returns false if the offset is unaligned or out of bounds.
    #[inline]
    pub fn write_word(&self, offset: usize, value: u32) -> bool {
        match self.word(offset) {
            Some(w) => {
                w.store(value, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Read `count` words starting at a word-aligned byte offset.
    pub fn read_words(&self, offset: usize, count: usize) -> Option<Vec<u32>> {
        if offset % 4 != 0 || !self.contains_range(offset, count * 4) {
            return None;
        }
        let first = offset / 4;
        Some(
            self.words[first..first + count]
                .iter()
                .map(|w| w.load(Ordering::Acquire))
                .collect(),
        )
    }

    /// Zero all of memory.
    pub fn clear(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TileMemory {
    fn default() -> Self {
        Self::new()
    }
}
