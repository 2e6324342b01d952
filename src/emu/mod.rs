//! Emulation of the push experiment.
//!
//! Every core in the grid runs the same program, and the core's identity
//! selects its role. Core 1 programs its DMA engine to push a block of local
//! memory into a remote tile, then spins on the write-back word. The other
//! cores wait for the grid termination it raises once the engine reports
//! completion.
//!
//! # Architecture
//!
//! Cores run concurrently, one OS thread each, with no global clock.
//! A fabric thread steps every tile's DMA engine. The only cross-core
//! synchronization is the write-back word and the termination signal.
//!
//! # Example
//!
//! ```no_run
//! use tile_push_emu::device::{GridArch, TileGrid};
//! use tile_push_emu::emu::{Harness, HarnessOptions};
//!
//! let harness = Harness::new(TileGrid::new(GridArch::new(4, 4)), HarnessOptions::default());
//! let report = harness.run().unwrap();
//! assert!(report.is_success());
//! ```

pub mod core;
pub mod engine;
pub mod initiator;

pub use self::core::{CoreExecutor, CoreReport, Role, RoleOutcome, INITIATOR_ID, NOOP_ID};
pub use engine::{FabricReport, Harness, HarnessError, HarnessOptions, RunReport};
pub use initiator::{InitiatorError, InitiatorPhase, InitiatorReport, PushTransfer, TransferInitiator, PATTERN_WORDS};
