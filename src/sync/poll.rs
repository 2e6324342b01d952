//! Busy-poll primitives for hardware-written words.
//!
//! A polled word is written by another agent (the DMA engine) without any
//! notification, so every iteration must re-fetch it from memory. `PolledWord`
//! captures that contract: `fetch` is an acquire load that the compiler can
//! neither cache nor hoist out of the loop.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//! use tile_push_emu::sync::{poll_until_equal, poll_until_equal_within};
//!
//! let flag = AtomicU32::new(0);
//! assert!(poll_until_equal_within(&flag, 1, Duration::from_millis(5)).is_err());
//!
//! flag.store(1, Ordering::Release);
//! poll_until_equal(&flag, 1);
//! ```

use std::hint;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

/// How many spins between clock reads in the deadline poll.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// A word that must be re-read from memory every time it is observed.
pub trait PolledWord {
    /// Fetch the current value.
    fn fetch(&self) -> u32;
}

impl PolledWord for AtomicU32 {
    #[inline]
    fn fetch(&self) -> u32 {
        self.load(Ordering::Acquire)
    }
}

impl<T: PolledWord + ?Sized> PolledWord for &T {
    #[inline]
    fn fetch(&self) -> u32 {
        (**self).fetch()
    }
}

/// Deadline poll gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("word still 0x{last_value:08X} (waiting for 0x{expected:08X}) after {waited:?}")]
pub struct PollTimeout {
    /// Value being waited for
    pub expected: u32,
    /// Last value observed
    pub last_value: u32,
    /// Time spent polling
    pub waited: Duration,
}

/// Spin until `word` equals `expected`.
///
/// Pure spin: no yield, no backoff, no timeout. Returns the number of
/// iterations that observed a different value.
pub fn poll_until_equal<W: PolledWord + ?Sized>(word: &W, expected: u32) -> u64 {
    let mut spins = 0u64;
    while word.fetch() != expected {
        spins += 1;
        hint::spin_loop();
    }
    spins
}

/// Spin until `word` equals `expected` or `timeout` elapses.
///
/// Returns the number of non-matching iterations on success.
pub fn poll_until_equal_within<W: PolledWord + ?Sized>(
    word: &W,
    expected: u32,
    timeout: Duration,
) -> Result<u64, PollTimeout> {
    let start = Instant::now();
    let mut spins = 0u64;
    loop {
        let value = word.fetch();
        if value == expected {
            return Ok(spins);
        }
        spins += 1;
        if spins % DEADLINE_CHECK_INTERVAL == 0 {
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(PollTimeout {
                    expected,
                    last_value: value,
                    waited,
                });
            }
        }
        hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::thread;

    /// Word that changes after a fixed number of reads.
    struct CountdownWord {
        reads: Cell<u32>,
        flip_after: u32,
    }

    impl PolledWord for CountdownWord {
        fn fetch(&self) -> u32 {
            let n = self.reads.get();
            self.reads.set(n + 1);
            if n >= self.flip_after { 1 } else { 0 }
        }
    }

    #[test]
    fn test_poll_returns_immediately_when_equal() {
        let word = AtomicU32::new(7);
        assert_eq!(poll_until_equal(&word, 7), 0);
    }

    #[test]
    fn test_poll_refetches_every_iteration() {
        let word = CountdownWord { reads: Cell::new(0), flip_after: 5 };
        assert_eq!(poll_until_equal(&word, 1), 5);
        assert_eq!(word.reads.get(), 6);
    }

    #[test]
    fn test_poll_observes_other_thread() {
        let word = AtomicU32::new(0);
        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(5));
                word.store(1, Ordering::Release);
            });
            let result = poll_until_equal_within(&word, 1, Duration::from_secs(10));
            assert!(result.is_ok());
        });
    }

    #[test]
    fn test_poll_deadline_expires() {
        let word = AtomicU32::new(0);
        let err = poll_until_equal_within(&word, 1, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.expected, 1);
        assert_eq!(err.last_value, 0);
        assert!(err.waited >= Duration::from_millis(10));
    }

    #[test]
    fn test_poll_ignores_other_values() {
        let word = CountdownWord { reads: Cell::new(0), flip_after: 3 };
        // Waiting for 2 never matches; the deadline poll must give up
        assert!(poll_until_equal_within(&word, 2, Duration::from_millis(5)).is_err());
    }
}
