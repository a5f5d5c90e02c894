// Execution Events
// Progress reporting for engine runs

use crate::execution::node::Operator;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while an expression tree is reduced
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// Reduction of a tree started
    RunStarted { operations: usize, workers: usize },

    /// A resolvable node was staged and its row tasks are about to be submitted
    StepStarted {
        step: usize,
        operator: Operator,
        tasks: usize,
    },

    /// A node was resolved into a concrete matrix
    StepCompleted {
        step: usize,
        operator: Operator,
        rows: usize,
        cols: usize,
        duration: Duration,
    },

    /// Reduction finished, successfully or not
    RunCompleted {
        steps: usize,
        success: bool,
        duration: Duration,
    },

    /// A step failed
    Error {
        message: String,
        step: Option<usize>,
    },
}

impl ExecutionEvent {
    /// Create a run started event
    pub fn run_started(operations: usize, workers: usize) -> Self {
        Self::RunStarted {
            operations,
            workers,
        }
    }

    /// Create a step started event
    pub fn step_started(step: usize, operator: Operator, tasks: usize) -> Self {
        Self::StepStarted {
            step,
            operator,
            tasks,
        }
    }

    /// Create a step completed event
    pub fn step_completed(
        step: usize,
        operator: Operator,
        rows: usize,
        cols: usize,
        duration: Duration,
    ) -> Self {
        Self::StepCompleted {
            step,
            operator,
            rows,
            cols,
            duration,
        }
    }

    /// Create a run completed event
    pub fn run_completed(steps: usize, success: bool, duration: Duration) -> Self {
        Self::RunCompleted {
            steps,
            success,
            duration,
        }
    }

    /// Create an error event
    pub fn error(message: impl Into<String>, step: Option<usize>) -> Self {
        Self::Error {
            message: message.into(),
            step,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
