//! L2 row normalization for query batches.
//!
//! Indices are built over unit-norm vectors, so inner product equals cosine
//! similarity; queries must be brought to the same scale before search. All
//! arithmetic stays in f32, the index's input precision.

use crate::matrix::FeatureMatrix;

/// Scale each row to unit L2 norm. Pure; the input is never mutated.
///
/// Rows with zero norm are passed through unchanged rather than rejected —
/// a zero query scores 0.0 against every training vector, which keeps the
/// search well-defined and deterministic.
pub fn normalize_rows(matrix: &FeatureMatrix) -> FeatureMatrix {
    let mut data = Vec::with_capacity(matrix.rows() * matrix.dim());
    for row in matrix.iter_rows() {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            data.extend(row.iter().map(|v| v / norm));
        } else {
            data.extend_from_slice(row);
        }
    }
    FeatureMatrix::new_unchecked(data, matrix.rows(), matrix.dim())
}
