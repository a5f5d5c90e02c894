// Shared Vector
// A single matrix row or column guarded by its own reader/writer lock

use crate::memory::matrix::Matrix;
use crate::memory::{MemoryError, MemoryResult};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of process-unique vector ids. Ids are the global lock order.
static NEXT_VECTOR_ID: AtomicU64 = AtomicU64::new(0);

/// Whether a vector's values represent a matrix row or a matrix column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Row,
    Column,
}

impl Orientation {
    /// The other orientation
    pub fn flipped(self) -> Self {
        match self {
            Orientation::Row => Orientation::Column,
            Orientation::Column => Orientation::Row,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Row => write!(f, "row"),
            Orientation::Column => write!(f, "column"),
        }
    }
}

/// Lock-protected contents of a vector
#[derive(Debug)]
pub(crate) struct VectorState {
    pub(crate) values: Vec<f64>,
    pub(crate) orientation: Orientation,
}

/// A row or column of `f64` values behind a reader/writer lock.
///
/// Every read or write of the values or the orientation happens under the
/// vector's own lock. Operations that need a second vector acquire both
/// locks in ascending [`Vector::id`] order, so two operations touching the
/// same pair from opposite sides can never deadlock.
#[derive(Debug)]
pub struct Vector {
    id: u64,
    state: RwLock<VectorState>,
}

impl Vector {
    /// Create a vector with a fresh id
    pub fn new(values: Vec<f64>, orientation: Orientation) -> Self {
        Self {
            id: NEXT_VECTOR_ID.fetch_add(1, Ordering::Relaxed),
            state: RwLock::new(VectorState {
                values,
                orientation,
            }),
        }
    }

    /// Create a row-oriented vector
    pub fn row(values: Vec<f64>) -> Self {
        Self::new(values, Orientation::Row)
    }

    /// Create a column-oriented vector
    pub fn column(values: Vec<f64>) -> Self {
        Self::new(values, Orientation::Column)
    }

    /// Stable identity, also used as the lock-ordering key
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> MemoryResult<f64> {
        let state = self.state.read();
        state
            .values
            .get(index)
            .copied()
            .ok_or(MemoryError::IndexOutOfBounds {
                index,
                length: state.values.len(),
            })
    }

    pub fn length(&self) -> usize {
        self.state.read().values.len()
    }

    pub fn orientation(&self) -> Orientation {
        self.state.read().orientation
    }

    /// Copy of the current values
    pub fn to_vec(&self) -> Vec<f64> {
        self.state.read().values.clone()
    }

    /// Flip row/column orientation without touching the values
    pub fn transpose(&self) {
        let mut state = self.state.write();
        state.orientation = state.orientation.flipped();
    }

    /// Elementwise sign flip in place
    pub fn negate(&self) {
        let mut state = self.state.write();
        for value in state.values.iter_mut() {
            *value = -*value;
        }
    }

    /// Add `other` into `self` elementwise.
    ///
    /// Both vectors must have the same length and orientation.
    pub fn add(&self, other: &Vector) -> MemoryResult<()> {
        if std::ptr::eq(self, other) {
            let mut state = self.state.write();
            for value in state.values.iter_mut() {
                *value += *value;
            }
            return Ok(());
        }

        let (mut mine, theirs) = self.lock_with(other);

        if mine.values.len() != theirs.values.len() {
            return Err(MemoryError::LengthMismatch {
                left: mine.values.len(),
                right: theirs.values.len(),
            });
        }
        if mine.orientation != theirs.orientation {
            return Err(MemoryError::OrientationMismatch {
                operation: "add",
                left: mine.orientation,
                right: theirs.orientation,
            });
        }

        for (value, addend) in mine.values.iter_mut().zip(&theirs.values) {
            *value += addend;
        }
        Ok(())
    }

    /// Dot product of a row and a column (or a column and a row).
    ///
    /// The vectors must have equal length and opposite orientation.
    pub fn dot(&self, other: &Vector) -> MemoryResult<f64> {
        if std::ptr::eq(self, other) {
            let orientation = self.orientation();
            return Err(MemoryError::OrientationMismatch {
                operation: "dot",
                left: orientation,
                right: orientation,
            });
        }

        let (first, second) = if self.id < other.id {
            (self.state.read(), other.state.read())
        } else {
            let second = other.state.read();
            (self.state.read(), second)
        };
        dot_checked(&first, &second)
    }

    /// Replace this row with `self × matrix`.
    ///
    /// `self` must be row-oriented, every vector of `matrix` must be
    /// column-oriented and as long as `self`. The result has one entry per
    /// column of `matrix`.
    pub fn multiply_by_matrix(&self, matrix: &Matrix) -> MemoryResult<()> {
        let columns = matrix.vectors();
        if columns.is_empty() {
            return Err(MemoryError::EmptyMatrix);
        }
        if columns.iter().any(|column| std::ptr::eq(column.as_ref(), self)) {
            return Err(MemoryError::InvalidArgument(
                "vector cannot be multiplied by a matrix that contains it".to_string(),
            ));
        }

        // Columns of one load carry ascending ids, so splitting at our own id
        // keeps every acquisition in global order.
        let split = columns.partition_point(|column| column.id < self.id);
        let lower: Vec<_> = columns[..split].iter().map(|c| c.state.read()).collect();
        let mut mine = self.state.write();
        let upper: Vec<_> = columns[split..].iter().map(|c| c.state.read()).collect();

        if mine.orientation != Orientation::Row {
            return Err(MemoryError::OrientationMismatch {
                operation: "multiply",
                left: mine.orientation,
                right: Orientation::Column,
            });
        }

        let mut product = Vec::with_capacity(columns.len());
        for column in lower.iter().chain(upper.iter()) {
            if column.orientation != Orientation::Column {
                return Err(MemoryError::OrientationMismatch {
                    operation: "multiply",
                    left: mine.orientation,
                    right: column.orientation,
                });
            }
            product.push(dot_checked(&mine, column)?);
        }

        mine.values = product;
        drop(upper);
        drop(mine);
        drop(lower);
        Ok(())
    }

    /// Shared lock on the contents, for matrix-wide sweeps
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, VectorState> {
        self.state.read()
    }

    /// Exclusive lock on the contents, for matrix-wide sweeps
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, VectorState> {
        self.state.write()
    }

    /// Exclusive lock on self plus a shared lock on `other`, in id order
    fn lock_with<'a>(
        &'a self,
        other: &'a Vector,
    ) -> (
        RwLockWriteGuard<'a, VectorState>,
        RwLockReadGuard<'a, VectorState>,
    ) {
        if self.id < other.id {
            let mine = self.state.write();
            (mine, other.state.read())
        } else {
            let theirs = other.state.read();
            (self.state.write(), theirs)
        }
    }
}

fn dot_checked(left: &VectorState, right: &VectorState) -> MemoryResult<f64> {
    if left.values.len() != right.values.len() {
        return Err(MemoryError::LengthMismatch {
            left: left.values.len(),
            right: right.values.len(),
        });
    }
    if left.orientation == right.orientation {
        return Err(MemoryError::OrientationMismatch {
            operation: "dot",
            left: left.orientation,
            right: right.orientation,
        });
    }
    Ok(left
        .values
        .iter()
        .zip(&right.values)
        .map(|(a, b)| a * b)
        .sum())
}
