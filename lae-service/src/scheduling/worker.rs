// Worker
// A long-lived thread fed through a single-slot handoff that tracks its own fatigue

use crate::scheduling::{SchedulerError, SchedulerResult};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Unit of work as seen by a worker thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Content of the single handoff slot
enum Handoff {
    Run { job: Job, on_idle: Option<Job> },
    Terminate,
}

/// Counters shared between a worker handle and its thread
#[derive(Debug)]
pub(crate) struct WorkerStats {
    fatigue_factor: f64,
    alive: AtomicBool,
    busy: AtomicBool,
    /// Nanoseconds spent executing tasks
    time_used: AtomicU64,
    /// Nanoseconds spent waiting for a task
    time_idle: AtomicU64,
}

impl WorkerStats {
    pub(crate) fn fatigue(&self) -> f64 {
        self.fatigue_factor * self.time_used.load(Ordering::Acquire) as f64
    }
}

/// Point-in-time view of one worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub id: usize,
    pub busy: bool,
    pub alive: bool,
    pub time_used: Duration,
    pub time_idle: Duration,
    pub fatigue_factor: f64,
    pub fatigue: f64,
}

impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker {} busy={} worked={:?} rested={:?} fatigue={:.1} (x{:.2})",
            self.id, self.busy, self.time_used, self.time_idle, self.fatigue, self.fatigue_factor
        )
    }
}

/// A long-lived execution thread.
///
/// States run `Idle -> Busy -> Idle -> ... -> Terminated`. Tasks arrive
/// through a bounded channel of capacity one; termination goes through the
/// same slot and never displaces a pending task.
pub struct Worker {
    id: usize,
    stats: Arc<WorkerStats>,
    handoff: Sender<Handoff>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Start a worker thread
    pub fn spawn(id: usize, fatigue_factor: f64) -> SchedulerResult<Self> {
        let (tx, rx) = bounded(1);
        let stats = Arc::new(WorkerStats {
            fatigue_factor,
            alive: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            time_used: AtomicU64::new(0),
            time_idle: AtomicU64::new(0),
        });

        let thread_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name(format!("lae-worker-{}", id))
            .spawn(move || work(id, rx, thread_stats))
            .map_err(|e| SchedulerError::Spawn {
                id,
                message: e.to_string(),
            })?;

        tracing::debug!(worker = id, fatigue_factor, "worker started");

        Ok(Self {
            id,
            stats,
            handoff: tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn fatigue_factor(&self) -> f64 {
        self.stats.fatigue_factor
    }

    /// Fatigue multiplier times cumulative busy nanoseconds
    pub fn fatigue(&self) -> f64 {
        self.stats.fatigue()
    }

    pub fn is_busy(&self) -> bool {
        self.stats.busy.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.stats.alive.load(Ordering::Acquire)
    }

    pub fn time_used(&self) -> Duration {
        Duration::from_nanos(self.stats.time_used.load(Ordering::Acquire))
    }

    pub fn time_idle(&self) -> Duration {
        Duration::from_nanos(self.stats.time_idle.load(Ordering::Acquire))
    }

    /// Hand a task to this worker without blocking.
    ///
    /// Fails with [`SchedulerError::WorkerBusy`] if the worker is executing
    /// or its slot is already occupied.
    pub fn assign(&self, job: Job) -> SchedulerResult<()> {
        self.deliver(Handoff::Run { job, on_idle: None })
    }

    /// Like [`Worker::assign`], running `on_idle` once the worker has marked
    /// itself idle again.
    pub(crate) fn assign_then(&self, job: Job, on_idle: Job) -> SchedulerResult<()> {
        self.deliver(Handoff::Run {
            job,
            on_idle: Some(on_idle),
        })
    }

    /// Ask the worker to exit once its current task (if any) is done.
    ///
    /// The sentinel goes through the handoff slot; an occupied slot is left
    /// untouched and reported as busy.
    pub fn request_shutdown(&self) -> SchedulerResult<()> {
        match self.handoff.try_send(Handoff::Terminate) {
            Ok(()) => {
                self.stats.alive.store(false, Ordering::Release);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(SchedulerError::WorkerBusy(self.id)),
            Err(TrySendError::Disconnected(_)) => {
                self.stats.alive.store(false, Ordering::Release);
                Ok(())
            }
        }
    }

    /// Wait for the thread to exit
    pub(crate) fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::warn!(worker = self.id, "worker thread panicked");
            }
        }
    }

    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            id: self.id,
            busy: self.is_busy(),
            alive: self.is_alive(),
            time_used: self.time_used(),
            time_idle: self.time_idle(),
            fatigue_factor: self.fatigue_factor(),
            fatigue: self.fatigue(),
        }
    }

    pub(crate) fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    fn deliver(&self, handoff: Handoff) -> SchedulerResult<()> {
        if self.is_busy() {
            return Err(SchedulerError::WorkerBusy(self.id));
        }
        match self.handoff.try_send(handoff) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SchedulerError::WorkerBusy(self.id)),
            Err(TrySendError::Disconnected(_)) => Err(SchedulerError::WorkerGone(self.id)),
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Workers order by ascending fatigue, ties broken by ascending id
impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Worker {}

impl PartialOrd for Worker {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Worker {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.fatigue()
            .total_cmp(&other.fatigue())
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Thread body: wait on the slot, run, account time, repeat
fn work(id: usize, handoff: Receiver<Handoff>, stats: Arc<WorkerStats>) {
    let mut idle_since = Instant::now();

    while let Ok(message) = handoff.recv() {
        stats
            .time_idle
            .fetch_add(elapsed_nanos(idle_since), Ordering::AcqRel);

        let (job, on_idle) = match message {
            Handoff::Terminate => break,
            Handoff::Run { job, on_idle } => (job, on_idle),
        };

        stats.busy.store(true, Ordering::Release);
        let started = Instant::now();
        job();
        // At least one tick per task so fatigue strictly grows with work
        let spent = elapsed_nanos(started).max(1);
        stats.time_used.fetch_add(spent, Ordering::AcqRel);
        stats.busy.store(false, Ordering::Release);
        idle_since = Instant::now();

        if let Some(on_idle) = on_idle {
            on_idle();
        }
    }

    stats.alive.store(false, Ordering::Release);
    tracing::debug!(worker = id, "worker stopped");
}

fn elapsed_nanos(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
