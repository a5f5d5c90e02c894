// Input/Output Module
// JSON expression input and result/error output documents

pub mod error;
pub mod input;
pub mod output;

// Re-export key types
pub use error::{InputError, InputResult};
pub use input::InputParser;
pub use output::OutputWriter;
