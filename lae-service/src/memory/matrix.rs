// Shared Matrix
// A uniformly oriented set of vectors behind a single swappable reference

use crate::memory::vector::{Orientation, Vector, VectorState};
use crate::memory::{MemoryError, MemoryResult};

use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

/// Plain row-major matrix payload
pub type MatrixData = Vec<Vec<f64>>;

/// Immutable snapshot of a matrix's vector set
pub type VectorSet = Arc<[Arc<Vector>]>;

/// A matrix stored as row vectors (row-major) or column vectors (column-major).
///
/// The vector set is published as one unit: a reload builds the new vectors
/// off to the side and swaps them in, so a reader that captures the set once
/// always sees one coherent matrix.
#[derive(Debug)]
pub struct Matrix {
    vectors: RwLock<VectorSet>,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::new()
    }
}

impl Matrix {
    /// Create an empty matrix
    pub fn new() -> Self {
        Self {
            vectors: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Create a matrix loaded row-major from `data`
    pub fn from_row_major(data: &[Vec<f64>]) -> MemoryResult<Self> {
        let matrix = Self::new();
        matrix.load_row_major(data)?;
        Ok(matrix)
    }

    /// Replace the contents with one row vector per input row
    pub fn load_row_major(&self, data: &[Vec<f64>]) -> MemoryResult<()> {
        check_rectangular(data)?;
        let fresh: Vec<Arc<Vector>> = data
            .iter()
            .map(|row| Arc::new(Vector::row(row.clone())))
            .collect();
        self.publish(fresh);
        Ok(())
    }

    /// Replace the contents with one column vector per input column
    pub fn load_column_major(&self, data: &[Vec<f64>]) -> MemoryResult<()> {
        let (_, cols) = check_rectangular(data)?;
        let fresh: Vec<Arc<Vector>> = (0..cols)
            .map(|col| {
                let values = data.iter().map(|row| row[col]).collect();
                Arc::new(Vector::column(values))
            })
            .collect();
        self.publish(fresh);
        Ok(())
    }

    /// Row-major copy of the current contents, transposing column-major storage.
    ///
    /// An empty matrix reads as an empty payload. Vectors that no longer
    /// share one length or one orientation are rejected.
    pub fn read_row_major(&self) -> MemoryResult<MatrixData> {
        let vectors = self.vectors();
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let guards: Vec<_> = vectors.iter().map(|v| v.read()).collect();
        if let Err(e) = check_uniform(&guards) {
            release_all(guards);
            return Err(e);
        }

        let data = match guards[0].orientation {
            Orientation::Row => guards.iter().map(|g| g.values.clone()).collect(),
            Orientation::Column => {
                let rows = guards[0].values.len();
                (0..rows)
                    .map(|row| guards.iter().map(|g| g.values[row]).collect())
                    .collect()
            }
        };
        release_all(guards);
        Ok(data)
    }

    /// Vector at `index`
    pub fn get(&self, index: usize) -> MemoryResult<Arc<Vector>> {
        let vectors = self.vectors();
        let guards: Vec<_> = vectors.iter().map(|v| v.read()).collect();
        let found = vectors
            .get(index)
            .cloned()
            .ok_or(MemoryError::IndexOutOfBounds {
                index,
                length: vectors.len(),
            });
        release_all(guards);
        found
    }

    /// Number of stored vectors (rows when row-major, columns when column-major)
    pub fn length(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Orientation of the first vector; undefined for an empty matrix
    pub fn orientation(&self) -> MemoryResult<Orientation> {
        let vectors = self.vectors();
        vectors
            .first()
            .map(|v| v.orientation())
            .ok_or(MemoryError::EmptyMatrix)
    }

    /// `false` for an empty matrix
    pub fn is_row_major(&self) -> bool {
        matches!(self.orientation(), Ok(Orientation::Row))
    }

    /// Capture the current vector set once
    pub fn vectors(&self) -> VectorSet {
        self.vectors.read().clone()
    }

    /// Swap in a new vector set while holding exclusive locks on the old one
    fn publish(&self, fresh: Vec<Arc<Vector>>) {
        let mut slot = self.vectors.write();
        let previous = slot.clone();
        let guards: Vec<_> = previous.iter().map(|v| v.write()).collect();
        *slot = Arc::from(fresh);
        release_all(guards);
    }
}

/// Drop guards in reverse acquisition order
fn release_all<G>(mut guards: Vec<G>) {
    while let Some(guard) = guards.pop() {
        drop(guard);
    }
}

/// All guarded vectors share the first one's length and orientation
fn check_uniform(guards: &[RwLockReadGuard<'_, VectorState>]) -> MemoryResult<()> {
    let Some(first) = guards.first() else {
        return Ok(());
    };
    let expected = first.values.len();
    for (index, guard) in guards.iter().enumerate() {
        if guard.orientation != first.orientation {
            return Err(MemoryError::OrientationMismatch {
                operation: "read",
                left: first.orientation,
                right: guard.orientation,
            });
        }
        if guard.values.len() != expected {
            return Err(MemoryError::RaggedRows {
                row: index,
                expected,
                found: guard.values.len(),
            });
        }
    }
    Ok(())
}

/// Validate a non-empty rectangular payload, returning (rows, cols)
fn check_rectangular(data: &[Vec<f64>]) -> MemoryResult<(usize, usize)> {
    let cols = match data.first() {
        Some(first) if !first.is_empty() => first.len(),
        _ => return Err(MemoryError::EmptyMatrix),
    };
    for (row, values) in data.iter().enumerate() {
        if values.len() != cols {
            return Err(MemoryError::RaggedRows {
                row,
                expected: cols,
                found: values.len(),
            });
        }
    }
    Ok((data.len(), cols))
}
