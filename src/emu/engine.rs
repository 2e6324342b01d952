//! Grid harness.
//!
//! The harness runs one push experiment on a whole grid:
//! - one thread per core, each running its role through [`CoreExecutor`]
//! - one fabric thread that clocks every tile's DMA engine until the grid
//!   is terminated
//!
//! All threads are scoped to [`Harness::run`], so the grid is borrowed, never
//! shared past the run. A core or fabric thread that panics raises
//! termination on its way out, which releases the idle cores. The initiator
//! only watches its write-back word, so if the fabric dies mid-transfer the
//! run ends only when a completion timeout is set.
//!
//! # Usage
//!
//! ```no_run
//! use tile_push_emu::device::{GridArch, TileGrid};
//! use tile_push_emu::emu::{Harness, HarnessOptions};
//!
//! let harness = Harness::new(TileGrid::new(GridArch::default()), HarnessOptions::default());
//! let report = harness.run().unwrap();
//! report.print_summary();
//! ```

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::core::{CoreExecutor, CoreReport, RoleOutcome, INITIATOR_ID};
use super::initiator::{InitiatorError, InitiatorReport, PushTransfer};
use crate::device::{CoreId, DmaEngine, DmaError, EngineStats, GridArch, TileCoord, TileGrid};
use crate::sync::{Termination, TerminationCause, TerminationSignal, HOST_ID};

/// Harness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HarnessOptions {
    /// Transfer the initiator runs
    pub transfer: PushTransfer,
    /// Bound on the initiator's completion wait (`None` = spin forever)
    pub completion_timeout: Option<Duration>,
    /// Fabric steps between a DMA request being latched and its first word
    pub dma_latency_cycles: u32,
}

/// Harness failures.
///
/// Transfer failures are not errors at this level; they are reported in
/// [`RunReport`] through the initiator's outcome.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("core {0} panicked")]
    CorePanicked(CoreId),

    #[error("fabric thread panicked")]
    FabricPanicked,

    #[error("grid {0} has no core 1 to initiate the transfer")]
    NoInitiator(GridArch),
}

/// What the fabric thread saw.
#[derive(Debug, Clone, Default)]
pub struct FabricReport {
    /// Passes over all engines
    pub steps: u64,
    /// Engine counters summed over the grid
    pub stats: EngineStats,
    /// Last rejection per engine, if any
    pub errors: Vec<(TileCoord, DmaError)>,
}

/// Result of one harness run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub arch: GridArch,
    /// One entry per core, in identity order
    pub cores: Vec<CoreReport>,
    /// The raise that ended the run
    pub termination: Termination,
    pub fabric: FabricReport,
    pub elapsed: Duration,
}

impl RunReport {
    /// The initiator core's report.
    pub fn initiator(&self) -> Option<&CoreReport> {
        self.cores.iter().find(|c| c.id == INITIATOR_ID)
    }

    /// The initiator's transfer report, if the transfer completed.
    pub fn transfer(&self) -> Option<&InitiatorReport> {
        match self.initiator().map(|c| &c.outcome) {
            Some(RoleOutcome::Transferred(report)) => Some(report),
            _ => None,
        }
    }

    /// The initiator's failure, if it failed.
    pub fn failure(&self) -> Option<&InitiatorError> {
        match self.initiator().map(|c| &c.outcome) {
            Some(RoleOutcome::Failed(e)) => Some(e),
            _ => None,
        }
    }

    /// Whether the run ended with a completed transfer.
    pub fn is_success(&self) -> bool {
        self.termination.cause == TerminationCause::Completed && self.transfer().is_some()
    }

    /// Run summary, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Grid: {}", self.arch),
            format!(
                "Termination: {} (raised by core {})",
                self.termination.cause, self.termination.raised_by
            ),
            format!("Elapsed: {:?}", self.elapsed),
        ];

        lines.push(match (self.transfer(), self.failure()) {
            (Some(t), _) => format!("Transfer: {} control={} polls={}", t.remote, t.control, t.poll_spins),
            (None, Some(e)) => format!("Transfer: FAILED: {}", e),
            (None, None) => "Transfer: none".to_string(),
        });

        lines.push(format!(
            "Fabric: {} steps, {} transfers, {} bytes, {} busy cycles, {} rejected",
            self.fabric.steps,
            self.fabric.stats.transfers_completed,
            self.fabric.stats.bytes_transferred,
            self.fabric.stats.busy_cycles,
            self.fabric.stats.rejected_requests
        ));
        for (coord, err) in &self.fabric.errors {
            lines.push(format!("  DMA {}: {}", coord, err));
        }

        lines.push(String::new());
        lines.push("Cores:".to_string());
        for core in &self.cores {
            let outcome = match &core.outcome {
                RoleOutcome::Idle | RoleOutcome::NoOp => "ok",
                RoleOutcome::Transferred(_) => "transferred",
                RoleOutcome::Failed(_) => "failed",
            };
            lines.push(format!("  {:>3} {} {:<9} {}", core.id, core.coord, core.role, outcome));
        }
        lines
    }

    /// Print a run summary.
    pub fn print_summary(&self) {
        for line in self.summary_lines() {
            println!("{}", line);
        }
    }
}

/// Raises termination if dropped while its thread is panicking.
struct AbortOnPanic<'a> {
    termination: &'a TerminationSignal,
    raised_by: CoreId,
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.termination.raise(self.raised_by, TerminationCause::Aborted);
        }
    }
}

/// Runs push experiments on a grid.
pub struct Harness {
    grid: TileGrid,
    options: HarnessOptions,
}

impl Harness {
    /// Create a harness over `grid`.
    ///
    /// The grid is used as-is; call [`TileGrid::reset`] between runs.
    pub fn new(grid: TileGrid, options: HarnessOptions) -> Self {
        Self { grid, options }
    }

    /// The grid, for inspection after a run.
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Harness settings.
    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    /// Run every core and the fabric until the grid is terminated.
    pub fn run(&self) -> Result<RunReport, HarnessError> {
        let grid = &self.grid;
        let options = self.options;
        if grid.by_id(INITIATOR_ID).is_none() {
            return Err(HarnessError::NoInitiator(grid.arch()));
        }
        let termination = TerminationSignal::new();
        let start = Instant::now();

        log::info!(
            "starting run on {} grid: {} bytes -> {} @ 0x{:04X}",
            grid.arch(),
            options.transfer.length_bytes,
            options.transfer.dest,
            options.transfer.dest_offset
        );

        let (cores, fabric) = thread::scope(|s| -> Result<_, HarnessError> {
            let fabric = thread::Builder::new()
                .name("fabric".into())
                .spawn_scoped(s, || run_fabric(grid, &termination, options.dma_latency_cycles))
                .map_err(|source| HarnessError::Spawn {
                    name: "fabric".into(),
                    source,
                })?;

            let mut handles = Vec::with_capacity(grid.core_count() as usize);
            for tile in grid.iter() {
                let name = format!("core-{}", tile.id);
                let termination = &termination;
                let spawned = thread::Builder::new().name(name.clone()).spawn_scoped(s, move || {
                    let _guard = AbortOnPanic {
                        termination,
                        raised_by: tile.id,
                    };
                    CoreExecutor::new(tile, grid, termination, options.transfer)
                        .with_completion_timeout(options.completion_timeout)
                        .run()
                });
                match spawned {
                    Ok(handle) => handles.push((tile.id, handle)),
                    Err(source) => {
                        // Release everything already running before bailing out
                        termination.raise(HOST_ID, TerminationCause::Aborted);
                        return Err(HarnessError::Spawn { name, source });
                    }
                }
            }

            let mut cores = Vec::with_capacity(handles.len());
            let mut panicked = None;
            for (id, handle) in handles {
                match handle.join() {
                    Ok(report) => cores.push(report),
                    Err(_) => {
                        log::error!("core {} panicked", id);
                        panicked.get_or_insert(id);
                    }
                }
            }
            let fabric = fabric.join().map_err(|_| HarnessError::FabricPanicked)?;
            if let Some(id) = panicked {
                return Err(HarnessError::CorePanicked(id));
            }
            Ok((cores, fabric))
        })?;

        // Every core returned from its termination wait, so the signal is set
        let termination = termination.termination().unwrap_or(Termination {
            raised_by: HOST_ID,
            cause: TerminationCause::Aborted,
        });

        let report = RunReport {
            arch: grid.arch(),
            cores,
            termination,
            fabric,
            elapsed: start.elapsed(),
        };
        log::info!(
            "run finished: {} by core {} in {:?}",
            report.termination.cause,
            report.termination.raised_by,
            report.elapsed
        );
        Ok(report)
    }
}

/// Clock every DMA engine until termination is raised.
fn run_fabric(grid: &TileGrid, termination: &TerminationSignal, latency: u32) -> FabricReport {
    let _guard = AbortOnPanic {
        termination,
        raised_by: HOST_ID,
    };
    let mut engines: Vec<DmaEngine> = grid
        .iter()
        .map(|tile| DmaEngine::new(tile.coord).with_start_latency(latency))
        .collect();

    let mut steps = 0u64;
    while !termination.is_raised() {
        let mut busy = false;
        for engine in &mut engines {
            if engine.step(grid).is_busy() {
                busy = true;
            }
        }
        steps += 1;
        if !busy {
            thread::yield_now();
        }
    }

    let mut stats = EngineStats::default();
    for engine in &engines {
        stats.merge(engine.stats());
    }
    let errors = engines
        .iter()
        .filter_map(|e| e.last_error().map(|err| (e.coord, err.clone())))
        .collect();

    log::debug!("fabric stopped after {} steps", steps);
    FabricReport { steps, stats, errors }
}
