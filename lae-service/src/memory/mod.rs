// Shared Memory Module
// Row/column vectors and matrices with per-vector reader/writer locking

pub mod matrix;
pub mod vector;

use thiserror::Error;

// Re-export key types
pub use matrix::{Matrix, MatrixData};
pub use vector::{Orientation, Vector};

/// Errors raised by vector and matrix operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MemoryError {
    #[error("Matrix input can't be empty")]
    EmptyMatrix,

    #[error("Row {row} has {found} values, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("Orientation mismatch for {operation}: {left} and {right}")]
    OrientationMismatch {
        operation: &'static str,
        left: Orientation,
        right: Orientation,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;
