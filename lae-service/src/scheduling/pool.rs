// Worker Pool
// Least-fatigue worker selection with a fork-join submission barrier

use crate::scheduling::worker::{Job, Worker, WorkerReport};
use crate::scheduling::{SchedulerError, SchedulerResult};

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error returned by a failing task
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Unit of work submitted to the pool
pub type Task = Box<dyn FnOnce() -> Result<(), TaskError> + Send + 'static>;

/// Box a closure as a [`Task`]
pub fn task<F>(f: F) -> Task
where
    F: FnOnce() -> Result<(), TaskError> + Send + 'static,
{
    Box::new(f)
}

/// Range fatigue multipliers are drawn from when none are given
const FATIGUE_FACTOR_RANGE: std::ops::Range<f64> = 0.5..1.5;

/// Draw one fatigue multiplier per worker, reproducibly when seeded
pub fn random_fatigue_factors(count: usize, seed: Option<u64>) -> Vec<f64> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    (0..count)
        .map(|_| rng.gen_range(FATIGUE_FACTOR_RANGE))
        .collect()
}

/// Idle worker keyed by the fatigue it had when it went idle
#[derive(Debug, Clone, Copy)]
struct IdleEntry {
    fatigue: f64,
    id: usize,
}

impl PartialEq for IdleEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for IdleEntry {}

impl PartialOrd for IdleEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdleEntry {
    // Reversed so the max-heap pops the least fatigued, lowest id first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .fatigue
            .total_cmp(&self.fatigue)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug, Default)]
struct IdleQueue {
    heap: BinaryHeap<IdleEntry>,
    closed: bool,
}

/// State shared between the pool and the completion hooks running on workers
#[derive(Debug, Default)]
struct PoolState {
    idle: Mutex<IdleQueue>,
    worker_available: Condvar,
    in_flight: Mutex<usize>,
    drained: Condvar,
    failures: Mutex<Vec<String>>,
}

impl PoolState {
    /// Block until an idle worker exists and take the least fatigued one
    fn take_idle(&self) -> SchedulerResult<usize> {
        let mut idle = self.idle.lock();
        loop {
            if idle.closed {
                return Err(SchedulerError::Closed);
            }
            if let Some(entry) = idle.heap.pop() {
                return Ok(entry.id);
            }
            self.worker_available.wait(&mut idle);
        }
    }

    fn release(&self, id: usize, fatigue: f64) {
        self.idle.lock().heap.push(IdleEntry { fatigue, id });
        self.worker_available.notify_one();
    }

    fn close(&self) {
        self.idle.lock().closed = true;
        self.worker_available.notify_all();
    }

    fn begin(&self) {
        *self.in_flight.lock() += 1;
    }

    fn finish(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.drained.notify_all();
        }
    }

    fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    fn wait_drained(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            self.drained.wait(&mut in_flight);
        }
    }

    fn record_failure(&self, message: String) {
        self.failures.lock().push(message);
    }

    fn take_failures(&self) -> Vec<String> {
        std::mem::take(&mut *self.failures.lock())
    }
}

/// Fixed set of workers handed tasks in least-fatigue order.
///
/// The worker count is fixed for the pool's lifetime. `submit_all` is the
/// only barrier: it returns once every task of the batch has finished.
/// Failed or panicking tasks are collected and reported by the next
/// `submit_all` after its barrier, never swallowed.
pub struct Pool {
    workers: Vec<Worker>,
    state: Arc<PoolState>,
    shut_down: AtomicBool,
}

impl Pool {
    /// Start `size` workers with random fatigue multipliers
    pub fn new(size: usize) -> SchedulerResult<Self> {
        if size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "pool needs at least one worker".to_string(),
            ));
        }
        Self::with_fatigue_factors(random_fatigue_factors(size, None))
    }

    /// Start one worker per multiplier
    pub fn with_fatigue_factors(factors: Vec<f64>) -> SchedulerResult<Self> {
        if factors.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "pool needs at least one worker".to_string(),
            ));
        }
        if let Some(bad) = factors.iter().find(|f| !f.is_finite() || **f <= 0.0) {
            return Err(SchedulerError::InvalidConfig(format!(
                "fatigue factor must be positive and finite, got {}",
                bad
            )));
        }

        let state = Arc::new(PoolState::default());
        let mut workers = Vec::with_capacity(factors.len());
        for (id, factor) in factors.into_iter().enumerate() {
            workers.push(Worker::spawn(id, factor)?);
            state.release(id, 0.0);
        }

        tracing::info!(workers = workers.len(), "worker pool started");

        Ok(Self {
            workers,
            state,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Tasks submitted but not yet finished
    pub fn in_flight(&self) -> usize {
        self.state.in_flight()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Hand one task to the least fatigued idle worker, waiting for one if
    /// all are busy.
    pub fn submit(&self, task: Task) -> SchedulerResult<()> {
        if self.is_shut_down() {
            return Err(SchedulerError::Closed);
        }

        self.state.begin();
        let id = match self.state.take_idle() {
            Ok(id) => id,
            Err(e) => {
                self.state.finish();
                return Err(e);
            }
        };
        let Some(worker) = self.workers.get(id) else {
            self.state.finish();
            return Err(SchedulerError::WorkerGone(id));
        };

        let task_state = Arc::clone(&self.state);
        let job: Job = Box::new(move || run_task(task, &task_state));

        let hook_state = Arc::clone(&self.state);
        let stats = worker.stats();
        let on_idle: Job = Box::new(move || {
            hook_state.release(id, stats.fatigue());
            hook_state.finish();
        });

        if let Err(e) = worker.assign_then(job, on_idle) {
            // A worker taken from the idle queue must accept work
            tracing::error!(worker = id, error = %e, "task assignment rejected");
            self.state.finish();
            return Err(e);
        }

        tracing::trace!(worker = id, "task assigned");
        Ok(())
    }

    /// Submit a batch and block until every task of it has completed.
    ///
    /// Tasks of one batch run in no particular order. If any task failed or
    /// panicked, the error is returned after the barrier.
    pub fn submit_all<I>(&self, tasks: I) -> SchedulerResult<()>
    where
        I: IntoIterator<Item = Task>,
    {
        let mut submitted = 0usize;
        for task in tasks {
            if let Err(e) = self.submit(task) {
                self.state.wait_drained();
                self.state.take_failures();
                return Err(e);
            }
            submitted += 1;
        }

        self.state.wait_drained();
        tracing::debug!(tasks = submitted, "batch drained");

        let failures = self.state.take_failures();
        match failures.first() {
            Some(first) => Err(SchedulerError::TaskFailed {
                failed: failures.len(),
                first: first.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Stop every worker. Only valid while the pool is fully idle.
    ///
    /// If any worker is busy nothing is changed and an error is returned.
    pub fn shutdown(&self) -> SchedulerResult<()> {
        if self.is_shut_down() {
            return Ok(());
        }
        if let Some(worker) = self.workers.iter().find(|w| w.is_busy()) {
            return Err(SchedulerError::ShutdownWhileBusy(worker.id()));
        }
        let in_flight = self.state.in_flight();
        if in_flight > 0 {
            return Err(SchedulerError::ShutdownWithTasksInFlight(in_flight));
        }

        self.shut_down.store(true, Ordering::Release);
        self.state.close();
        for worker in &self.workers {
            worker.request_shutdown()?;
        }
        for worker in &self.workers {
            worker.join();
        }

        tracing::info!(workers = self.workers.len(), "worker pool shut down");
        Ok(())
    }

    /// Snapshot of every worker
    pub fn report(&self) -> Vec<WorkerReport> {
        self.workers.iter().map(Worker::report).collect()
    }

    /// Human-readable snapshot, one line per worker
    pub fn worker_report(&self) -> String {
        let mut report = String::new();
        for worker in self.report() {
            let _ = writeln!(report, "{}", worker);
        }
        report
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "pool dropped while still working");
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("workers", &self.workers)
            .field("in_flight", &self.in_flight())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn run_task(task: Task, state: &PoolState) {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => state.record_failure(e.to_string()),
        Err(payload) => state.record_failure(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn counting_tasks(counters: &Arc<Vec<AtomicUsize>>) -> Vec<Task> {
        (0..counters.len())
            .map(|i| {
                let counters = Arc::clone(counters);
                task(move || {
                    counters[i].fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect()
    }

    #[test]
    fn test_rejects_empty_pool() {
        assert!(matches!(
            Pool::new(0),
            Err(SchedulerError::InvalidConfig(_))
        ));
        assert!(matches!(
            Pool::with_fatigue_factors(vec![1.0, f64::NAN]),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_random_factors_in_range_and_seeded() {
        let factors = random_fatigue_factors(16, Some(7));
        assert_eq!(factors.len(), 16);
        assert!(factors.iter().all(|f| (0.5..1.5).contains(f)));
        assert_eq!(factors, random_fatigue_factors(16, Some(7)));
    }

    #[test]
    fn test_each_task_runs_exactly_once() {
        let pool = Pool::new(4).unwrap();
        let counters: Arc<Vec<AtomicUsize>> =
            Arc::new((0..200).map(|_| AtomicUsize::new(0)).collect());

        pool.submit_all(counting_tasks(&counters)).unwrap();

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_submit_all_waits_for_slow_tasks() {
        let pool = Pool::new(3).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task> = (0..6)
            .map(|_| {
                let done = Arc::clone(&done);
                task(move || {
                    thread::sleep(Duration::from_millis(10));
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        pool.submit_all(tasks).unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert!(pool.report().iter().all(|w| !w.busy));
    }

    #[test]
    fn test_least_fatigued_worker_goes_first() {
        let pool = Pool::with_fatigue_factors(vec![1.0, 1.0, 1.0]).unwrap();
        let (tx, rx) = unbounded();

        for _ in 0..3 {
            let tx = tx.clone();
            let probe = task(move || {
                thread::sleep(Duration::from_millis(1));
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
                Ok(())
            });
            pool.submit_all(vec![probe]).unwrap();
        }

        let names: Vec<_> = rx.try_iter().flatten().collect();
        assert_eq!(names, vec!["lae-worker-0", "lae-worker-1", "lae-worker-2"]);
    }

    #[test]
    fn test_fatigue_never_decreases() {
        let pool = Pool::new(2).unwrap();
        let counters: Arc<Vec<AtomicUsize>> =
            Arc::new((0..20).map(|_| AtomicUsize::new(0)).collect());

        let before = pool.report();
        pool.submit_all(counting_tasks(&counters)).unwrap();
        let after = pool.report();

        for (old, new) in before.iter().zip(&after) {
            assert!(new.fatigue >= old.fatigue);
            assert!(new.time_used >= old.time_used);
        }
        let total_before: f64 = before.iter().map(|w| w.fatigue).sum();
        let total_after: f64 = after.iter().map(|w| w.fatigue).sum();
        assert!(total_after > total_before);
    }

    #[test]
    fn test_failures_surface_after_barrier() {
        let pool = Pool::new(2).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let mut tasks: Vec<Task> = Vec::new();
        tasks.push(task(|| Err("row 3 failed".into())));
        tasks.push(task(|| panic!("boom")));
        for _ in 0..4 {
            let ran = Arc::clone(&ran);
            tasks.push(task(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        match pool.submit_all(tasks) {
            Err(SchedulerError::TaskFailed { failed, .. }) => assert_eq!(failed, 2),
            other => panic!("expected task failure, got {:?}", other),
        }
        assert_eq!(ran.load(Ordering::SeqCst), 4);

        // The pool keeps working after a failed batch
        let counters: Arc<Vec<AtomicUsize>> =
            Arc::new((0..4).map(|_| AtomicUsize::new(0)).collect());
        pool.submit_all(counting_tasks(&counters)).unwrap();
    }

    #[test]
    fn test_shutdown_while_busy_changes_nothing() {
        let pool = Pool::new(2).unwrap();
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();

        pool.submit(task(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            Ok(())
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(matches!(
            pool.shutdown(),
            Err(SchedulerError::ShutdownWhileBusy(_))
        ));
        assert!(!pool.is_shut_down());
        assert!(pool.report().iter().all(|w| w.alive));

        release_tx.send(()).unwrap();
        pool.submit_all(Vec::<Task>::new()).unwrap();

        pool.shutdown().unwrap();
        assert!(pool.is_shut_down());
        assert!(pool.report().iter().all(|w| !w.alive));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = Pool::new(1).unwrap();
        pool.shutdown().unwrap();
        // Second shutdown is a no-op
        pool.shutdown().unwrap();

        assert_eq!(
            pool.submit(task(|| Ok(()))),
            Err(SchedulerError::Closed)
        );
    }

    #[test]
    fn test_worker_report_lists_every_worker() {
        let pool = Pool::new(3).unwrap();
        let report = pool.worker_report();
        assert_eq!(report.lines().count(), 3);
        assert!(report.contains("worker 0"));
        assert!(report.contains("worker 2"));
    }
}
