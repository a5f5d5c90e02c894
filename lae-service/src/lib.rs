// Linear Algebra Engine Service Library
// Matrix expression evaluation on a fatigue-weighted worker pool

pub mod error;
pub mod execution;
pub mod io;
pub mod memory;
pub mod scheduling;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export execution types
pub use execution::{
    progress_channel, ComputationNode, ConfigError, Engine, EngineConfig, ExecutionError,
    ExecutionEvent, ExecutionResult, NodeType, Operator, ProgressReceiver, ProgressSender,
};

// Re-export io types
pub use io::{InputError, InputParser, OutputWriter};

// Re-export memory and scheduling types
pub use memory::{Matrix, MatrixData, MemoryError, Orientation, Vector};
pub use scheduling::{Pool, SchedulerError, Task, WorkerReport};
