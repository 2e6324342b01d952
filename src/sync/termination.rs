//! Whole-grid termination signal.
//!
//! One shared flag per run. Any core may raise it; every core blocks on it at
//! the end of its role. Raising is one-shot: the first raise is recorded and
//! wakes all waiters, later raises are ignored.
//!
//! Visibility: `raise` publishes under the mutex and with a release store to
//! the fast-path flag, so a thread that sees `is_raised() == true` also sees
//! the recorded `Termination`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::device::CoreId;

/// Identity recorded when the host harness, not a core, raises termination.
pub const HOST_ID: CoreId = CoreId::MAX;

/// Why the grid was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// The transfer completed normally
    Completed,
    /// The initiator gave up waiting for completion
    CompletionTimeout,
    /// The initiator could not program the transfer
    InitiatorFault,
    /// A core or the fabric died; raised by the host harness
    Aborted,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::Completed => write!(f, "completed"),
            TerminationCause::CompletionTimeout => write!(f, "completion timeout"),
            TerminationCause::InitiatorFault => write!(f, "initiator fault"),
            TerminationCause::Aborted => write!(f, "aborted"),
        }
    }
}

/// Record of the raise that ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// Core that raised the signal
    pub raised_by: CoreId,
    /// Reason
    pub cause: TerminationCause,
}

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    record: Mutex<Option<Termination>>,
    cvar: Condvar,
}

/// Shared termination flag. Clones refer to the same signal.
#[derive(Debug, Clone, Default)]
pub struct TerminationSignal {
    inner: Arc<Inner>,
}

impl TerminationSignal {
    /// Create a signal that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self) -> MutexGuard<'_, Option<Termination>> {
        // A panicking holder cannot leave the Option half-written.
        self.inner.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raise the signal.
    ///
    /// Returns true if this call raised it, false if it was already raised.
    pub fn raise(&self, raised_by: CoreId, cause: TerminationCause) -> bool {
        let mut record = self.record();
        if let Some(first) = *record {
            log::warn!(
                "core {}: termination ({}) ignored, already raised by core {} ({})",
                raised_by,
                cause,
                first.raised_by,
                first.cause
            );
            return false;
        }
        *record = Some(Termination { raised_by, cause });
        self.inner.raised.store(true, Ordering::Release);
        self.inner.cvar.notify_all();
        log::info!("core {}: grid termination raised ({})", raised_by, cause);
        true
    }

    /// Whether the signal has been raised.
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// The termination record, if raised.
    pub fn termination(&self) -> Option<Termination> {
        *self.record()
    }

    /// Block until the signal is raised.
    pub fn wait(&self) -> Termination {
        let mut record = self.record();
        loop {
            if let Some(t) = *record {
                return t;
            }
            record = self
                .inner
                .cvar
                .wait(record)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until the signal is raised or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Termination> {
        let record = self.record();
        let (record, _) = self
            .inner
            .cvar
            .wait_timeout_while(record, timeout, |r| r.is_none())
            .unwrap_or_else(|e| e.into_inner());
        *record
    }
}
