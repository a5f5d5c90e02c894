// Execution Module
// Expression tree, engine orchestration, progress events and configuration

pub mod config;
pub mod engine;
pub mod events;
pub mod node;

// Re-export key types
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, ExecutionError, ExecutionResult};
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use node::{ComputationNode, NodeType, Operator};
