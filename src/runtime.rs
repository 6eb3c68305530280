//! Background worker runtime for simulation and training.
//!
//! Batches are CPU-bound, so callers hand them to a small, bounded pool of
//! named threads and get a handle back. A simulation job streams progress
//! events followed by exactly one terminal event; a training job replies once.
//! Each job carries its own immutable inputs, so no state is shared between
//! jobs.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::warn;

use crate::checkin::CheckinRecord;
use crate::error::{ExecutionError, LifeverseError, LifeverseResult};
use crate::metric::MetricId;
use crate::simulation::{
    run_multiverse, CancelFlag, MultiverseConfig, MultiverseRunResult, ReferenceScoring, SimulationHooks,
    StateScoring,
};
use crate::training::{train_learned_matrix, LearnedMatrix, TrainerOptions};

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued jobs.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
        }
    }
}

/// Message streamed from a running simulation job.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    /// Periodic progress, `completed` of `total` runs.
    Progress { completed: usize, total: usize },
    /// Terminal: the aggregated result (possibly partial after cancel).
    Finished(Box<MultiverseRunResult>),
    /// Terminal: the job could not run.
    Failed(LifeverseError),
}

impl SimulationEvent {
    /// Returns true for `Finished` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

enum Job {
    Simulate {
        config: Box<MultiverseConfig>,
        cancel: CancelFlag,
        events: Sender<SimulationEvent>,
    },
    Train {
        checkins: Vec<CheckinRecord>,
        metrics: Vec<MetricId>,
        options: TrainerOptions,
        reply: Sender<LifeverseResult<LearnedMatrix>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

/// Forwards engine hooks onto a job's event channel.
struct ChannelHooks<'a> {
    events: &'a Sender<SimulationEvent>,
    cancel: &'a CancelFlag,
}

impl SimulationHooks for ChannelHooks<'_> {
    fn on_progress(&self, completed: usize, total: usize) {
        // A caller that dropped its handle no longer wants progress.
        let _ = self.events.send(SimulationEvent::Progress { completed, total });
    }

    fn should_cancel(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn execute(job: Job, scoring: &dyn StateScoring) {
    match job {
        Job::Simulate { config, cancel, events } => {
            let hooks = ChannelHooks {
                events: &events,
                cancel: &cancel,
            };
            let event = match run_multiverse(&config, scoring, &hooks) {
                Ok(result) => SimulationEvent::Finished(Box::new(result)),
                Err(err) => SimulationEvent::Failed(err),
            };
            if events.send(event).is_err() {
                warn!(seed = config.seed, "simulation handle dropped before the result was delivered");
            }
        }
        Job::Train {
            checkins,
            metrics,
            options,
            reply,
        } => {
            let result = train_learned_matrix(&checkins, &metrics, &options).map_err(LifeverseError::from);
            if reply.send(result).is_err() {
                warn!(checkins = checkins.len(), "training handle dropped before the result was delivered");
            }
        }

        #[cfg(test)]
        Job::Sleep { duration, reply } => {
            thread::sleep(duration);
            let _ = reply.send(());
        }
    }
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(workers: usize, queue_capacity: usize, scoring: Arc<dyn StateScoring>) -> Self {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let scoring = Arc::clone(&scoring);
            let handle = thread::Builder::new()
                .name(format!("lifeverse-worker-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        execute(job, scoring.as_ref());
                    }
                })
                .expect("failed to spawn lifeverse worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
            queue_capacity,
        }
    }

    fn idle() -> Self {
        Self {
            tx: bounded::<Job>(1).0,
            workers: Vec::new(),
            queue_capacity: 1,
        }
    }

    fn try_submit(&self, job: Job) -> Result<(), LifeverseError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    fn shutdown(self) {
        // Close the channel: workers drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

fn timeout_error(timeout: Duration) -> LifeverseError {
    ExecutionError::Timeout {
        duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
    .into()
}

/// Handle to a queued or running simulation.
#[derive(Debug)]
pub struct SimulationHandle {
    events: Receiver<SimulationEvent>,
    cancel: CancelFlag,
}

impl SimulationHandle {
    /// Ask the batch to stop before its next run. The job still delivers a
    /// (partial) result.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Flag shared with the running job.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Event stream, for callers that want progress as it happens.
    #[must_use]
    pub fn events(&self) -> &Receiver<SimulationEvent> {
        &self.events
    }

    /// Wait for the terminal event, discarding progress.
    pub fn join(self) -> LifeverseResult<MultiverseRunResult> {
        loop {
            let event = self
                .events
                .recv()
                .map_err(|_| LifeverseError::from(ExecutionError::Disconnected))?;
            if let Some(result) = Self::terminal(event) {
                return result;
            }
        }
    }

    /// Wait for the terminal event for at most `timeout`.
    pub fn join_timeout(self, timeout: Duration) -> LifeverseResult<MultiverseRunResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self.events.recv_timeout(remaining).map_err(|err| match err {
                RecvTimeoutError::Timeout => timeout_error(timeout),
                RecvTimeoutError::Disconnected => ExecutionError::Disconnected.into(),
            })?;
            if let Some(result) = Self::terminal(event) {
                return result;
            }
        }
    }

    fn terminal(event: SimulationEvent) -> Option<LifeverseResult<MultiverseRunResult>> {
        match event {
            SimulationEvent::Progress { .. } => None,
            SimulationEvent::Finished(result) => Some(Ok(*result)),
            SimulationEvent::Failed(err) => Some(Err(err)),
        }
    }
}

/// Handle to a queued or running training job.
pub struct TrainingHandle {
    rx: Receiver<LifeverseResult<LearnedMatrix>>,
}

impl TrainingHandle {
    /// Waits for the training to complete.
    pub fn join(self) -> LifeverseResult<LearnedMatrix> {
        self.rx
            .recv()
            .map_err(|_| LifeverseError::from(ExecutionError::Disconnected))?
    }

    /// Waits for the training to complete with a timeout.
    pub fn join_timeout(self, timeout: Duration) -> LifeverseResult<LearnedMatrix> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => timeout_error(timeout),
            RecvTimeoutError::Disconnected => LifeverseError::from(ExecutionError::Disconnected),
        })?
    }
}

/// Bounded worker pool that runs simulation and training jobs off the
/// caller's thread.
pub struct SimulationRuntime {
    scoring: Arc<dyn StateScoring>,
    pool: WorkerPool,
}

impl SimulationRuntime {
    /// Create a runtime using [`ReferenceScoring`].
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_scoring(ReferenceScoring, config)
    }

    /// Create a runtime with a custom scoring collaborator.
    pub fn with_scoring(scoring: impl StateScoring + 'static, config: RuntimeConfig) -> Self {
        let scoring: Arc<dyn StateScoring> = Arc::new(scoring);
        let pool = WorkerPool::start(config.workers, config.queue_capacity, Arc::clone(&scoring));
        Self { scoring, pool }
    }

    /// Queue a simulation batch.
    ///
    /// The configuration is validated here, before anything is queued.
    pub fn submit_simulation(&self, config: MultiverseConfig) -> LifeverseResult<SimulationHandle> {
        config.validate()?;
        let (tx, rx) = unbounded::<SimulationEvent>();
        let cancel = CancelFlag::new();
        self.pool.try_submit(Job::Simulate {
            config: Box::new(config),
            cancel: cancel.clone(),
            events: tx,
        })?;
        Ok(SimulationHandle { events: rx, cancel })
    }

    /// Run a simulation batch on the pool and wait for it.
    pub fn simulate(&self, config: MultiverseConfig) -> LifeverseResult<MultiverseRunResult> {
        self.submit_simulation(config)?.join()
    }

    /// Queue a training job.
    pub fn submit_training(
        &self,
        checkins: Vec<CheckinRecord>,
        metrics: Vec<MetricId>,
        options: TrainerOptions,
    ) -> LifeverseResult<TrainingHandle> {
        options.validate()?;
        let (tx, rx) = bounded::<LifeverseResult<LearnedMatrix>>(1);
        self.pool.try_submit(Job::Train {
            checkins,
            metrics,
            options,
            reply: tx,
        })?;
        Ok(TrainingHandle { rx })
    }

    /// Train on the pool and wait for the result.
    pub fn train(
        &self,
        checkins: Vec<CheckinRecord>,
        metrics: Vec<MetricId>,
        options: TrainerOptions,
    ) -> LifeverseResult<LearnedMatrix> {
        self.submit_training(checkins, metrics, options)?.join()
    }

    /// Scoring collaborator shared by all workers.
    #[must_use]
    pub fn scoring(&self) -> &dyn StateScoring {
        self.scoring.as_ref()
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> Result<Receiver<()>, LifeverseError> {
        let (tx, rx) = bounded::<()>(1);
        self.pool.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for SimulationRuntime {
    fn drop(&mut self) {
        // Workers block on `recv()`; closing the queue lets them finish
        // queued jobs and exit.
        std::mem::replace(&mut self.pool, WorkerPool::idle()).shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use crate::influence::InfluenceMatrix;
    use crate::metric::MetricVector;

    fn config() -> MultiverseConfig {
        MultiverseConfig::new(MetricVector::default(), InfluenceMatrix::zeros())
            .runs(300)
            .horizon_days(3)
    }

    fn single_worker() -> SimulationRuntime {
        SimulationRuntime::new(RuntimeConfig {
            workers: 1,
            queue_capacity: 1,
        })
    }

    #[test]
    fn invalid_config_fails_before_queueing() {
        let runtime = SimulationRuntime::new(RuntimeConfig::default());
        let err = runtime.submit_simulation(config().runs(0)).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn queue_full_is_retryable() {
        let runtime = single_worker();
        let busy = runtime.submit_sleep(Duration::from_millis(200)).unwrap();
        // Give the worker time to pick up the first job so the queue slot frees.
        thread::sleep(Duration::from_millis(50));
        let _queued = runtime.submit_sleep(Duration::from_millis(1)).unwrap();
        let err = runtime.submit_simulation(config()).err().unwrap();
        assert!(matches!(
            err,
            LifeverseError::Execution(ExecutionError::QueueFull { capacity: 1 })
        ));
        assert!(err.is_retryable());
        busy.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn simulation_streams_progress_then_result() {
        let runtime = SimulationRuntime::new(RuntimeConfig::default());
        let handle = runtime.submit_simulation(config()).unwrap();
        let mut progress = Vec::new();
        let result = loop {
            match handle.events().recv_timeout(Duration::from_secs(10)).unwrap() {
                SimulationEvent::Progress { completed, .. } => progress.push(completed),
                SimulationEvent::Finished(result) => break result,
                SimulationEvent::Failed(err) => panic!("unexpected failure: {err}"),
            }
        };
        assert_eq!(progress, vec![0, 200, 300]);
        assert_eq!(result.audit.runs_completed, 300);
    }

    #[test]
    fn join_timeout_reports_timeout_while_busy() {
        let runtime = single_worker();
        let busy = runtime.submit_sleep(Duration::from_millis(300)).unwrap();
        thread::sleep(Duration::from_millis(20));
        let handle = runtime.submit_simulation(config()).unwrap();
        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, LifeverseError::Execution(ExecutionError::Timeout { .. })));
        busy.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn join_reports_disconnected_when_sender_dropped() {
        let (tx, rx) = unbounded::<SimulationEvent>();
        drop(tx);
        let handle = SimulationHandle {
            events: rx,
            cancel: CancelFlag::new(),
        };
        let err = handle.join().unwrap_err();
        assert_eq!(err, LifeverseError::Execution(ExecutionError::Disconnected));

        let (tx, rx) = bounded::<LifeverseResult<LearnedMatrix>>(1);
        drop(tx);
        let err = TrainingHandle { rx }
            .join_timeout(Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err, LifeverseError::Execution(ExecutionError::Disconnected));
    }

    #[test]
    fn training_runs_on_the_pool() {
        let runtime = SimulationRuntime::new(RuntimeConfig::default());
        let options = TrainerOptions::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let learned = runtime.train(Vec::new(), MetricId::ALL.to_vec(), options).unwrap();
        assert!(learned.meta.insufficient_data);

        let err = runtime
            .train(Vec::new(), Vec::new(), TrainerOptions::new(Utc::now()))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn scoring_is_exposed() {
        let runtime = SimulationRuntime::new(RuntimeConfig::default());
        assert_eq!(runtime.scoring().name(), "reference");
    }
}
