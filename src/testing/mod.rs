//! Result checking for push runs.
//!
//! This module provides:
//! - Word-by-word comparison of a transfer's destination against its source
//! - The completion-flag check that goes with it

pub mod payload;

pub use payload::{verify_payload, PayloadReport, VerifyError, WordMismatch};
