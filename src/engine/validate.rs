//! Vector batch validation.
//!
//! Every mutating or querying path runs its input through here before the
//! index is touched, so a bad batch can never leave the index partially
//! modified.

use crate::index::VectorBatch;
use crate::{Error, Result};

/// Validates a batch of vectors against the engine's fixed dimensionality
/// and flattens it into a row-major [`VectorBatch`].
///
/// `operation` names the caller for error reporting. Empty input is valid
/// and produces a `(0, dim)` batch.
///
/// # Errors
///
/// Returns [`Error::VectorSize`] naming the first offending row when any
/// vector's length differs from `dim`.
pub fn validate_vectors(
    vectors: &[Vec<f32>],
    dim: usize,
    operation: &str,
) -> Result<VectorBatch> {
    for (index, vector) in vectors.iter().enumerate() {
        if vector.len() != dim {
            return Err(Error::VectorSize {
                operation: operation.to_string(),
                index,
                expected: dim,
                actual: vector.len(),
            });
        }
    }

    let mut data = Vec::with_capacity(vectors.len() * dim);
    for vector in vectors {
        data.extend_from_slice(vector);
    }

    Ok(VectorBatch {
        data,
        rows: vectors.len(),
        dim,
    })
}
