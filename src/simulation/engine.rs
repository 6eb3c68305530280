//! Batch execution of many independent paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{LifeverseError, LifeverseResult, ValidationError};
use crate::rng::{derive_lane_seed, Mulberry32};

use super::aggregate::{aggregate, BatchOutcome};
use super::config::MultiverseConfig;
use super::propagator::{ImpulseSchedule, PathPropagator};
use super::result::{MultiverseRunResult, Path};
use super::scoring::StateScoring;

/// Completed runs between progress reports.
pub const PROGRESS_INTERVAL: usize = 200;

/// Observer and cancellation hooks for a running batch.
///
/// Both methods are polled between runs, never inside one.
pub trait SimulationHooks: Sync {
    /// Called with `(completed, total)` periodically and once at the end.
    fn on_progress(&self, _completed: usize, _total: usize) {}

    /// Returning true stops the batch before the next run.
    fn should_cancel(&self) -> bool {
        false
    }
}

/// Hooks that observe nothing and never cancel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SimulationHooks for NoHooks {}

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, uncancelled flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`CancelFlag::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl SimulationHooks for CancelFlag {
    fn should_cancel(&self) -> bool {
        self.is_cancelled()
    }
}

/// Run a batch sequentially against one RNG stream seeded from `config.seed`.
///
/// Path `k` sees whatever state the previous `k - 1` paths left the stream
/// in, so the whole result is reproducible from the seed alone. Only
/// malformed configuration fails; cancellation returns the paths completed
/// so far.
pub fn run_multiverse<S>(
    config: &MultiverseConfig,
    scoring: &S,
    hooks: &dyn SimulationHooks,
) -> LifeverseResult<MultiverseRunResult>
where
    S: StateScoring + ?Sized,
{
    config.validate()?;
    debug!(
        runs = config.runs,
        horizon = config.horizon_days,
        seed = config.seed,
        scoring = scoring.name(),
        "multiverse batch started"
    );

    let schedule = ImpulseSchedule::new(&config.impulses);
    let mut rng = Mulberry32::new(config.seed);
    let mut paths: Vec<Path> = Vec::with_capacity(config.runs);
    let mut cancelled = false;

    for run in 0..config.runs {
        if hooks.should_cancel() {
            cancelled = true;
            break;
        }
        if run % PROGRESS_INTERVAL == 0 {
            hooks.on_progress(run, config.runs);
        }
        let propagator = PathPropagator::new(config, scoring, &schedule, &mut rng);
        paths.push(propagator.run(&mut rng));
    }

    finish(config, scoring, hooks, paths, cancelled, 1)
}

/// Split a batch across `lanes` rayon workers.
///
/// Lane `i` owns a stream seeded by `derive_lane_seed(config.seed, i)` and
/// runs a fixed share of the paths; lane outputs are collected in lane
/// order. The result depends on `(config, lanes)` only, not on scheduling or
/// core count. It differs from [`run_multiverse`] even with one lane.
pub fn run_multiverse_laned<S>(
    config: &MultiverseConfig,
    scoring: &S,
    hooks: &dyn SimulationHooks,
    lanes: usize,
) -> LifeverseResult<MultiverseRunResult>
where
    S: StateScoring + ?Sized,
{
    if lanes == 0 {
        return Err(ValidationError::ZeroLanes.into());
    }
    config.validate()?;
    let lanes = lanes.min(config.runs);
    debug!(runs = config.runs, lanes, seed = config.seed, "laned multiverse batch started");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(lanes)
        .thread_name(|lane| format!("lifeverse-lane-{lane}"))
        .build()
        .map_err(|e| LifeverseError::internal(format!("failed to build lane pool: {e}")))?;

    let schedule = ImpulseSchedule::new(&config.impulses);
    let completed = AtomicUsize::new(0);
    hooks.on_progress(0, config.runs);

    let lane_outputs: Vec<LaneOutput> = pool.install(|| {
        (0..lanes)
            .into_par_iter()
            .map(|lane| run_lane(config, scoring, hooks, &schedule, &completed, lanes, lane))
            .collect()
    });

    let cancelled = lane_outputs.iter().any(|out| out.cancelled);
    let paths: Vec<Path> = lane_outputs.into_iter().flat_map(|out| out.paths).collect();
    finish(config, scoring, hooks, paths, cancelled, lanes)
}

struct LaneOutput {
    paths: Vec<Path>,
    cancelled: bool,
}

fn run_lane<S: StateScoring + ?Sized>(
    config: &MultiverseConfig,
    scoring: &S,
    hooks: &dyn SimulationHooks,
    schedule: &ImpulseSchedule,
    completed: &AtomicUsize,
    lanes: usize,
    lane: usize,
) -> LaneOutput {
    let share = lane_share(config.runs, lanes, lane);
    let mut rng = Mulberry32::new(derive_lane_seed(config.seed, lane));
    let mut paths: Vec<Path> = Vec::with_capacity(share);
    for _ in 0..share {
        if hooks.should_cancel() {
            return LaneOutput { paths, cancelled: true };
        }
        let propagator = PathPropagator::new(config, scoring, schedule, &mut rng);
        paths.push(propagator.run(&mut rng));
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % PROGRESS_INTERVAL == 0 {
            hooks.on_progress(done, config.runs);
        }
    }
    LaneOutput { paths, cancelled: false }
}

/// Runs assigned to `lane`: an even split, earlier lanes taking the remainder.
#[must_use]
pub fn lane_share(runs: usize, lanes: usize, lane: usize) -> usize {
    if lanes == 0 {
        return 0;
    }
    runs / lanes + usize::from(lane < runs % lanes)
}

fn finish<S: StateScoring + ?Sized>(
    config: &MultiverseConfig,
    scoring: &S,
    hooks: &dyn SimulationHooks,
    paths: Vec<Path>,
    cancelled: bool,
    lanes: usize,
) -> LifeverseResult<MultiverseRunResult> {
    hooks.on_progress(paths.len(), config.runs);
    if cancelled {
        info!(
            completed = paths.len(),
            requested = config.runs,
            "multiverse batch cancelled, aggregating partial result"
        );
    }
    let result = aggregate(
        config,
        scoring,
        paths,
        BatchOutcome {
            runs_requested: config.runs,
            cancelled,
            lanes,
        },
    );
    debug!(run_id = %result.run_id, completed = result.audit.runs_completed, "multiverse batch finished");
    Ok(result)
}
