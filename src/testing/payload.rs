//! Post-run payload check.
//!
//! Compares the destination region of a push against the initiator's source
//! region word by word, and reads back the completion flag.

use thiserror::Error;

use crate::device::registers::WRITEBACK_DONE;
use crate::device::{TileCoord, TileGrid};
use crate::emu::{PushTransfer, INITIATOR_ID};

/// Verification could not read one of the regions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("grid has no initiator core")]
    NoInitiator,

    #[error("destination {0} is outside the grid")]
    UnknownTile(TileCoord),

    #[error("{region} range 0x{offset:04X} + {length} bytes is out of bounds")]
    OutOfRange {
        region: &'static str,
        offset: u32,
        length: u32,
    },
}

/// A destination word that does not match its source word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordMismatch {
    /// Word index within the transfer
    pub index: usize,
    pub expected: u32,
    pub actual: u32,
}

/// Result of comparing one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadReport {
    pub words_checked: usize,
    pub mismatches: Vec<WordMismatch>,
    /// Value of the initiator's write-back word
    pub write_back: u32,
}

impl PayloadReport {
    /// True if every word matched and the completion flag reads exactly 1.
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty() && self.write_back == WRITEBACK_DONE
    }

    /// First mismatched word, if any.
    pub fn first_mismatch(&self) -> Option<&WordMismatch> {
        self.mismatches.first()
    }
}

/// Compare the destination of `transfer` against the initiator's source words.
pub fn verify_payload(grid: &TileGrid, transfer: &PushTransfer) -> Result<PayloadReport, VerifyError> {
    let source = grid.by_id(INITIATOR_ID).ok_or(VerifyError::NoInitiator)?;
    let dest = grid
        .get(transfer.dest)
        .ok_or(VerifyError::UnknownTile(transfer.dest))?;

    let words = (transfer.length_bytes / 4) as usize;
    let expected = source
        .memory()
        .read_words(transfer.local_address as usize, words)
        .ok_or(VerifyError::OutOfRange {
            region: "source",
            offset: transfer.local_address,
            length: transfer.length_bytes,
        })?;
    let actual = dest
        .memory()
        .read_words(transfer.dest_offset as usize, words)
        .ok_or(VerifyError::OutOfRange {
            region: "destination",
            offset: transfer.dest_offset,
            length: transfer.length_bytes,
        })?;
    let write_back = source
        .memory()
        .read_word(transfer.write_back_address as usize)
        .ok_or(VerifyError::OutOfRange {
            region: "write-back",
            offset: transfer.write_back_address as u32,
            length: 4,
        })?;

    let mismatches: Vec<WordMismatch> = expected
        .iter()
        .zip(&actual)
        .enumerate()
        .filter(|(_, (e, a))| e != a)
        .map(|(index, (&expected, &actual))| WordMismatch {
            index,
            expected,
            actual,
        })
        .collect();

    if !mismatches.is_empty() {
        log::warn!("{} of {} payload words differ", mismatches.len(), words);
    }

    Ok(PayloadReport {
        words_checked: words,
        mismatches,
        write_back,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GridArch;

    fn seeded_grid() -> TileGrid {
        let grid = TileGrid::new(GridArch::new(2, 2));
        let src = grid.by_id(INITIATOR_ID).unwrap().memory();
        for i in 0..32 {
            src.write_word(i * 4, i as u32);
        }
        grid
    }

    #[test]
    fn test_matching_payload_passes() {
        let grid = seeded_grid();
        let dest = grid.get(TileCoord::new(0, 0)).unwrap().memory();
        for i in 0..32 {
            dest.write_word(i * 4, i as u32);
        }
        grid.by_id(1).unwrap().memory().write_word(0xABC, 1);

        let report = verify_payload(&grid, &PushTransfer::default()).unwrap();
        assert_eq!(report.words_checked, 32);
        assert!(report.passed());
    }

    #[test]
    fn test_mismatches_listed() {
        let grid = seeded_grid();
        let dest = grid.get(TileCoord::new(0, 0)).unwrap().memory();
        for i in 0..32 {
            dest.write_word(i * 4, i as u32);
        }
        dest.write_word(5 * 4, 99);
        grid.by_id(1).unwrap().memory().write_word(0xABC, 1);

        let report = verify_payload(&grid, &PushTransfer::default()).unwrap();
        assert!(!report.passed());
        assert_eq!(
            report.first_mismatch(),
            Some(&WordMismatch {
                index: 5,
                expected: 5,
                actual: 99
            })
        );
        assert_eq!(report.mismatches.len(), 1);
    }

    #[test]
    fn test_write_back_must_be_exactly_one() {
        let grid = seeded_grid();
        let dest = grid.get(TileCoord::new(0, 0)).unwrap().memory();
        for i in 0..32 {
            dest.write_word(i * 4, i as u32);
        }
        grid.by_id(1).unwrap().memory().write_word(0xABC, 2);

        let report = verify_payload(&grid, &PushTransfer::default()).unwrap();
        assert!(report.mismatches.is_empty());
        assert!(!report.passed());
    }

    #[test]
    fn test_unknown_destination() {
        let grid = seeded_grid();
        let transfer = PushTransfer {
            dest: TileCoord::new(3, 3),
            ..Default::default()
        };
        assert_eq!(
            verify_payload(&grid, &transfer),
            Err(VerifyError::UnknownTile(TileCoord::new(3, 3)))
        );
    }
}
