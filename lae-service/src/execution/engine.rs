// Linear Algebra Engine
// Reduces an expression tree one resolvable node at a time, fanning each
// operation out into per-row tasks on the worker pool

use crate::execution::config::{ConfigError, EngineConfig};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::node::{ComputationNode, Operator};
use crate::memory::{Matrix, MatrixData, MemoryError, Orientation};
use crate::scheduling::{task, Pool, SchedulerError, Task, WorkerReport};

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors raised while reducing an expression tree
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Shape mismatch for {operator}: {}x{} and {}x{}", .left.0, .left.1, .right.0, .right.1)]
    ShapeMismatch {
        operator: Operator,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("Orientation mismatch for {operator}: {left} and {right}")]
    OrientationMismatch {
        operator: Operator,
        left: Orientation,
        right: Orientation,
    },

    #[error("Operator {operator} takes {expected} operand(s), found {found}")]
    Arity {
        operator: Operator,
        expected: usize,
        found: usize,
    },

    #[error("No resolvable node left in a tree that is not a matrix")]
    NotResolvable,
}

/// Result type for engine operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Engine owning two staging matrices and a worker pool
pub struct Engine {
    left: Arc<Matrix>,
    right: Arc<Matrix>,
    pool: Pool,
    config: EngineConfig,
    event_tx: Option<ProgressSender>,
    steps: usize,
}

impl Engine {
    /// Create an engine with `workers` threads and random fatigue multipliers
    pub fn new(workers: usize) -> ExecutionResult<Self> {
        Self::with_config(EngineConfig::with_workers(workers))
    }

    pub fn with_config(config: EngineConfig) -> ExecutionResult<Self> {
        config.validate()?;
        let pool = Pool::with_fatigue_factors(config.resolve_fatigue_factors())?;
        tracing::debug!(workers = pool.size(), "engine created");
        Ok(Self {
            left: Arc::new(Matrix::new()),
            right: Arc::new(Matrix::new()),
            pool,
            config,
            event_tx: None,
            steps: 0,
        })
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of reduction steps performed so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Reduce `root` until it is a concrete matrix.
    ///
    /// When `shutdown_after_run` is set the pool is shut down afterwards,
    /// whether or not the reduction succeeded. A reduction error takes
    /// precedence over a shutdown error.
    pub fn run(&mut self, mut root: ComputationNode) -> ExecutionResult<ComputationNode> {
        let started = Instant::now();
        let first_step = self.steps;
        let operations = root.count_operations();
        tracing::info!(operations, workers = self.pool.size(), "run started");
        self.event_tx
            .send_event(ExecutionEvent::run_started(operations, self.pool.size()));

        let mut outcome = self.reduce(&mut root);
        if self.config.shutdown_after_run {
            let shutdown = self.pool.shutdown().map_err(ExecutionError::from);
            outcome = outcome.and(shutdown);
        }

        let steps = self.steps - first_step;
        let duration = started.elapsed();
        self.event_tx.send_event(ExecutionEvent::run_completed(
            steps,
            outcome.is_ok(),
            duration,
        ));

        match outcome {
            Ok(()) => {
                tracing::info!(steps, ?duration, "run completed");
                Ok(root)
            }
            Err(e) => {
                tracing::warn!(steps, error = %e, "run failed");
                Err(e)
            }
        }
    }

    fn reduce(&mut self, root: &mut ComputationNode) -> ExecutionResult<()> {
        while !root.is_matrix() {
            self.steps += 1;
            let step = self.steps;
            if let Err(e) = self.load_and_compute(step, root) {
                self.event_tx
                    .send_event(ExecutionEvent::error(e.to_string(), Some(step)));
                return Err(e);
            }
        }
        Ok(())
    }

    /// One reduction step: resolve the first resolvable node of `root`
    fn load_and_compute(&self, step: usize, root: &mut ComputationNode) -> ExecutionResult<()> {
        root.associative_nesting();
        let node = root.find_resolvable().ok_or(ExecutionError::NotResolvable)?;
        let ComputationNode::Operation { operator, operands } = &*node else {
            return Err(ExecutionError::NotResolvable);
        };
        let operator = *operator;
        if operands.len() != operator.arity() {
            return Err(ExecutionError::Arity {
                operator,
                expected: operator.arity(),
                found: operands.len(),
            });
        }
        let inputs: Vec<&MatrixData> = operands
            .iter()
            .filter_map(ComputationNode::as_matrix)
            .collect();

        let started = Instant::now();
        let tasks = self.stage(operator, &inputs)?;
        tracing::debug!(step, %operator, tasks = tasks.len(), "step staged");
        self.event_tx
            .send_event(ExecutionEvent::step_started(step, operator, tasks.len()));

        self.pool.submit_all(tasks)?;

        let result = self.left.read_row_major()?;
        let (rows, cols) = (result.len(), result.first().map_or(0, Vec::len));
        self.event_tx.send_event(ExecutionEvent::step_completed(
            step,
            operator,
            rows,
            cols,
            started.elapsed(),
        ));
        node.resolve(result);
        Ok(())
    }

    /// Load operands in the orientation `operator` needs, validate them, and
    /// build one task per output row. Nothing is submitted on error.
    fn stage(&self, operator: Operator, inputs: &[&MatrixData]) -> ExecutionResult<Vec<Task>> {
        match (operator, inputs) {
            (Operator::Add, [a, b]) => {
                self.left.load_row_major(a)?;
                self.right.load_row_major(b)?;
                self.check_add()?;
                Ok(self.row_tasks(|i, left, right| {
                    let addend = right.get(i)?;
                    left.get(i)?.add(&addend)?;
                    Ok(())
                }))
            }
            (Operator::Multiply, [a, b]) => {
                self.left.load_row_major(a)?;
                self.right.load_column_major(b)?;
                self.check_multiply()?;
                Ok(self.row_tasks(|i, left, right| {
                    left.get(i)?.multiply_by_matrix(right)?;
                    Ok(())
                }))
            }
            (Operator::Negate, [a]) => {
                self.left.load_row_major(a)?;
                Ok(self.row_tasks(|i, left, _| {
                    left.get(i)?.negate();
                    Ok(())
                }))
            }
            (Operator::Transpose, [a]) => {
                self.left.load_row_major(a)?;
                Ok(self.row_tasks(|i, left, _| {
                    left.get(i)?.transpose();
                    Ok(())
                }))
            }
            _ => Err(ExecutionError::Arity {
                operator,
                expected: operator.arity(),
                found: inputs.len(),
            }),
        }
    }

    fn row_tasks(
        &self,
        op: fn(usize, &Matrix, &Matrix) -> Result<(), MemoryError>,
    ) -> Vec<Task> {
        (0..self.left.length())
            .map(|i| {
                let left = Arc::clone(&self.left);
                let right = Arc::clone(&self.right);
                task(move || op(i, &left, &right).map_err(Into::into))
            })
            .collect()
    }

    fn check_add(&self) -> ExecutionResult<()> {
        let left = shape(&self.left)?;
        let right = shape(&self.right)?;
        if left != right {
            return Err(ExecutionError::ShapeMismatch {
                operator: Operator::Add,
                left,
                right,
            });
        }
        Ok(())
    }

    /// Empty operands first, then orientation, then inner dimensions
    fn check_multiply(&self) -> ExecutionResult<()> {
        if self.left.is_empty() || self.right.is_empty() {
            return Err(MemoryError::EmptyMatrix.into());
        }
        let (left_orientation, right_orientation) =
            (self.left.orientation()?, self.right.orientation()?);
        if left_orientation != Orientation::Row || right_orientation != Orientation::Column {
            return Err(ExecutionError::OrientationMismatch {
                operator: Operator::Multiply,
                left: left_orientation,
                right: right_orientation,
            });
        }
        let left = shape(&self.left)?;
        let right = shape(&self.right)?;
        if left.1 != right.0 {
            return Err(ExecutionError::ShapeMismatch {
                operator: Operator::Multiply,
                left,
                right,
            });
        }
        Ok(())
    }

    /// Per-worker report, one line per worker
    pub fn report(&self) -> String {
        self.pool.worker_report()
    }

    pub fn worker_reports(&self) -> Vec<WorkerReport> {
        self.pool.report()
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.is_shut_down()
    }

    /// Shut the pool down explicitly; see [`Pool::shutdown`]
    pub fn shutdown(&self) -> ExecutionResult<()> {
        Ok(self.pool.shutdown()?)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .field("steps", &self.steps)
            .finish()
    }
}

/// (rows, cols) of a loaded matrix, whatever its storage orientation
fn shape(matrix: &Matrix) -> ExecutionResult<(usize, usize)> {
    let stored = matrix.length();
    let inner = matrix.get(0)?.length();
    Ok(match matrix.orientation()? {
        Orientation::Row => (stored, inner),
        Orientation::Column => (inner, stored),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(rows: &[&[f64]]) -> ComputationNode {
        ComputationNode::matrix(rows.iter().map(|row| row.to_vec()).collect())
    }

    fn a() -> ComputationNode {
        m(&[&[1.0, 2.0], &[3.0, 4.0]])
    }

    fn b() -> ComputationNode {
        m(&[&[5.0, 6.0], &[7.0, 8.0]])
    }

    fn engine() -> Engine {
        Engine::with_config(EngineConfig {
            workers: 3,
            seed: Some(7),
            ..EngineConfig::default()
        })
        .unwrap()
    }

    fn run(tree: ComputationNode) -> ExecutionResult<MatrixData> {
        let result = engine().run(tree)?;
        Ok(result.into_matrix().unwrap())
    }

    #[test]
    fn test_add() {
        let result = run(ComputationNode::add(a(), b())).unwrap();
        assert_eq!(result, vec![vec![6.0, 8.0], vec![10.0, 12.0]]);
    }

    #[test]
    fn test_multiply() {
        let result = run(ComputationNode::multiply(a(), b())).unwrap();
        assert_eq!(result, vec![vec![19.0, 22.0], vec![43.0, 50.0]]);
    }

    #[test]
    fn test_multiply_non_square() {
        let left = m(&[&[1.0, 2.0, 3.0]]);
        let right = m(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]);
        let result = run(ComputationNode::multiply(left, right)).unwrap();
        assert_eq!(result, vec![vec![4.0, 5.0]]);
    }

    #[test]
    fn test_negate() {
        let result = run(ComputationNode::negate(a())).unwrap();
        assert_eq!(result, vec![vec![-1.0, -2.0], vec![-3.0, -4.0]]);
    }

    #[test]
    fn test_transpose() {
        let result = run(ComputationNode::transpose(a())).unwrap();
        assert_eq!(result, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);

        let wide = m(&[&[1.0, 2.0, 3.0]]);
        let result = run(ComputationNode::transpose(wide)).unwrap();
        assert_eq!(result, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_mismatched_add_is_rejected() {
        let tall = m(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        let err = run(ComputationNode::add(a(), tall)).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::ShapeMismatch {
                operator: Operator::Add,
                left: (2, 2),
                right: (3, 2),
            }
        ));
    }

    #[test]
    fn test_add_checks_columns_too() {
        let wide = m(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        assert!(matches!(
            run(ComputationNode::add(a(), wide)),
            Err(ExecutionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_mismatched_multiply_is_rejected() {
        let tall = m(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        let err = run(ComputationNode::multiply(a(), tall)).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::ShapeMismatch {
                operator: Operator::Multiply,
                left: (2, 2),
                right: (3, 2),
            }
        ));
    }

    #[test]
    fn test_rejected_step_leaves_tree_untouched() {
        let tall = m(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        let mut tree = ComputationNode::add(a(), tall);
        let before = tree.clone();

        let engine = engine();
        assert!(engine.load_and_compute(1, &mut tree).is_err());
        assert_eq!(tree, before);
        for report in engine.worker_reports() {
            assert_eq!(report.time_used, std::time::Duration::ZERO);
        }
    }

    #[test]
    fn test_multiply_empty_operand_reported_before_shape() {
        let empty = ComputationNode::matrix(vec![]);
        let tall = m(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);

        let err = run(ComputationNode::multiply(empty.clone(), tall.clone())).unwrap_err();
        assert!(matches!(err, ExecutionError::Memory(MemoryError::EmptyMatrix)));

        let err = run(ComputationNode::multiply(tall, empty)).unwrap_err();
        assert!(matches!(err, ExecutionError::Memory(MemoryError::EmptyMatrix)));
    }

    #[test]
    fn test_multiply_empty_rows_are_empty() {
        let blank = ComputationNode::matrix(vec![vec![], vec![]]);
        let err = run(ComputationNode::multiply(a(), blank)).unwrap_err();
        assert!(matches!(err, ExecutionError::Memory(MemoryError::EmptyMatrix)));
    }

    #[test]
    fn test_nested_tree() {
        // -(A + B) * T(A)
        let tree = ComputationNode::multiply(
            ComputationNode::negate(ComputationNode::add(a(), b())),
            ComputationNode::transpose(a()),
        );
        let result = run(tree).unwrap();
        // [[-6,-8],[-10,-12]] * [[1,3],[2,4]]
        assert_eq!(result, vec![vec![-22.0, -50.0], vec![-34.0, -78.0]]);
    }

    #[test]
    fn test_nary_chain() {
        let tree = ComputationNode::operation(Operator::Add, vec![a(), b(), a(), b()]);
        let mut engine = engine();
        let result = engine.run(tree).unwrap();
        assert_eq!(
            result.into_matrix().unwrap(),
            vec![vec![12.0, 16.0], vec![20.0, 24.0]]
        );
        assert_eq!(engine.steps(), 3);
    }

    #[test]
    fn test_arity_is_checked() {
        let tree = ComputationNode::operation(Operator::Negate, vec![a(), b()]);
        assert!(matches!(
            run(tree),
            Err(ExecutionError::Arity {
                operator: Operator::Negate,
                expected: 1,
                found: 2,
            })
        ));

        let tree = ComputationNode::operation(Operator::Multiply, vec![a()]);
        assert!(matches!(run(tree), Err(ExecutionError::Arity { .. })));
    }

    #[test]
    fn test_matrix_root_is_returned_as_is() {
        let mut engine = engine();
        let result = engine.run(a()).unwrap();
        assert_eq!(result, a());
        assert_eq!(engine.steps(), 0);
    }

    #[test]
    fn test_run_shuts_pool_down() {
        let mut engine = engine();
        engine.run(ComputationNode::negate(a())).unwrap();
        assert!(engine.is_shut_down());

        let err = engine.run(ComputationNode::negate(a())).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Scheduler(SchedulerError::Closed)
        ));
    }

    #[test]
    fn test_engine_is_reusable_without_shutdown() {
        let mut engine = Engine::with_config(EngineConfig {
            workers: 2,
            shutdown_after_run: false,
            ..EngineConfig::default()
        })
        .unwrap();

        engine.run(ComputationNode::negate(a())).unwrap();
        let result = engine.run(ComputationNode::add(a(), b())).unwrap();
        assert_eq!(result, m(&[&[6.0, 8.0], &[10.0, 12.0]]));
        assert!(!engine.is_shut_down());
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_report_lists_every_worker() {
        let mut engine = engine();
        engine.run(ComputationNode::multiply(a(), b())).unwrap();

        let report = engine.report();
        assert_eq!(report.lines().count(), 3);
        assert!(report.contains("worker 0"));
        assert!(engine
            .worker_reports()
            .iter()
            .any(|w| w.time_used > std::time::Duration::ZERO));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Engine::new(0),
            Err(ExecutionError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_progress_events() {
        let (tx, mut rx) = crate::execution::events::progress_channel();
        let mut engine = engine().with_progress(tx);
        engine.run(ComputationNode::add(a(), b())).unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(
            events.first(),
            Some(ExecutionEvent::RunStarted { operations: 1, workers: 3 })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::StepCompleted { rows: 2, cols: 2, .. }
        )));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::RunCompleted { steps: 1, success: true, .. })
        ));
    }

    #[test]
    fn test_failed_step_emits_error_event() {
        let (tx, mut rx) = crate::execution::events::progress_channel();
        let mut engine = engine().with_progress(tx);
        let tall = m(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        assert!(engine.run(ComputationNode::add(a(), tall)).is_err());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::Error { step: Some(1), .. })));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::RunCompleted { success: false, .. })
        ));
    }
}
