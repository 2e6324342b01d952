//! Synchronization between cores.
//!
//! Cores share no scheduler. They coordinate only through:
//! - hardware-written words polled with a forced re-fetch (`poll`)
//! - the one-shot grid termination signal (`termination`)

pub mod poll;
pub mod termination;

pub use poll::{poll_until_equal, poll_until_equal_within, PollTimeout, PolledWord};
pub use termination::{Termination, TerminationCause, TerminationSignal, HOST_ID};
