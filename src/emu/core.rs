//! Per-core executor.
//!
//! Every tile runs the same program. What a core does is decided only by its
//! identity:
//!
//! | identity | role      | behaviour                                   |
//! |----------|-----------|---------------------------------------------|
//! | 0        | NoOp      | nothing, then wait for termination          |
//! | 1        | Initiator | run the push transfer, raise termination    |
//! | other    | Idle      | wait for termination                        |
//!
//! Every role ends in the termination wait, so a core thread only returns
//! once the whole grid has been released.

use std::fmt;
use std::time::Duration;

use super::initiator::{InitiatorError, InitiatorReport, PushTransfer, TransferInitiator};
use crate::device::{CoreId, Tile, TileCoord, TileGrid};
use crate::sync::{Termination, TerminationSignal};

/// Identity of the core that runs no role.
pub const NOOP_ID: CoreId = 0;

/// Identity of the core that initiates the transfer.
pub const INITIATOR_ID: CoreId = 1;

/// Role selected from core identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Wait for termination
    Idle,
    /// Explicitly empty role
    NoOp,
    /// Push-transfer initiator
    Initiator,
}

impl Role {
    /// Role for a core identity.
    pub fn for_identity(id: CoreId) -> Self {
        match id {
            NOOP_ID => Role::NoOp,
            INITIATOR_ID => Role::Initiator,
            _ => Role::Idle,
        }
    }

    /// Short name.
    pub fn name(self) -> &'static str {
        match self {
            Role::Idle => "idle",
            Role::NoOp => "no-op",
            Role::Initiator => "initiator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a core's role produced before it entered the termination wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOutcome {
    Idle,
    NoOp,
    Transferred(InitiatorReport),
    Failed(InitiatorError),
}

impl RoleOutcome {
    /// True unless the role failed.
    pub fn is_ok(&self) -> bool {
        !matches!(self, RoleOutcome::Failed(_))
    }
}

/// Result of one core's run.
#[derive(Debug, Clone)]
pub struct CoreReport {
    pub id: CoreId,
    pub coord: TileCoord,
    pub role: Role,
    pub outcome: RoleOutcome,
    /// Termination this core was released by
    pub released_by: Termination,
}

/// Runs one core's program.
pub struct CoreExecutor<'a> {
    tile: &'a Tile,
    grid: &'a TileGrid,
    termination: &'a TerminationSignal,
    transfer: PushTransfer,
    completion_timeout: Option<Duration>,
}

impl<'a> CoreExecutor<'a> {
    /// Create an executor for `tile`.
    pub fn new(
        tile: &'a Tile,
        grid: &'a TileGrid,
        termination: &'a TerminationSignal,
        transfer: PushTransfer,
    ) -> Self {
        Self {
            tile,
            grid,
            termination,
            transfer,
            completion_timeout: None,
        }
    }

    /// Bound the initiator's completion wait.
    pub fn with_completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Role this core will run.
    pub fn role(&self) -> Role {
        Role::for_identity(self.tile.id)
    }

    /// Run the role, then block until the grid is terminated.
    pub fn run(self) -> CoreReport {
        let role = self.role();
        log::debug!("core {} at {}: role {}", self.tile.id, self.tile.coord, role);

        let outcome = match role {
            Role::Idle => RoleOutcome::Idle,
            Role::NoOp => RoleOutcome::NoOp,
            Role::Initiator => {
                let mut initiator =
                    TransferInitiator::new(self.transfer).with_completion_timeout(self.completion_timeout);
                match initiator.run(self.tile, self.grid, self.termination) {
                    Ok(report) => RoleOutcome::Transferred(report),
                    Err(e) => RoleOutcome::Failed(e),
                }
            }
        };

        let released_by = self.termination.wait();
        log::trace!("core {}: released by core {}", self.tile.id, released_by.raised_by);

        CoreReport {
            id: self.tile.id,
            coord: self.tile.coord,
            role,
            outcome,
            released_by,
        }
    }
}
