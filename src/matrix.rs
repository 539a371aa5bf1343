//! Row-major feature matrix with shape validation.

use crate::error::EnsembleError;

/// An ordered sequence of fixed-length f32 feature vectors, one per sample.
/// Immutable once constructed; ragged input is rejected up front so every
/// downstream consumer can assume uniform row length.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Vec<f32>,
    rows: usize,
    dim: usize,
}

impl FeatureMatrix {
    /// Build from per-sample rows. All rows must share the first row's length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, EnsembleError> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in &rows {
            if row.len() != dim {
                return Err(EnsembleError::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            rows: rows.len(),
            dim,
        })
    }

    /// Build from a flat row-major slab.
    pub fn from_flat(data: Vec<f32>, rows: usize, dim: usize) -> Result<Self, EnsembleError> {
        if data.len() != rows * dim {
            return Err(EnsembleError::DimensionMismatch {
                expected: rows * dim,
                actual: data.len(),
            });
        }
        Ok(Self { data, rows, dim })
    }

    pub(crate) fn new_unchecked(data: Vec<f32>, rows: usize, dim: usize) -> Self {
        debug_assert_eq!(data.len(), rows * dim);
        Self { data, rows, dim }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Row `i` as a slice. Panics if out of bounds, like slice indexing.
    pub fn row(&self, i: usize) -> &[f32] {
        let start = i * self.dim;
        &self.data[start..start + self.dim]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim.max(1)).take(self.rows)
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_uniform() {
        let m = FeatureMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.dim(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_from_rows_ragged_rejected() {
        let err = FeatureMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(
            err,
            EnsembleError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_from_flat_size_checked() {
        assert!(FeatureMatrix::from_flat(vec![0.0; 6], 2, 3).is_ok());
        assert!(FeatureMatrix::from_flat(vec![0.0; 5], 2, 3).is_err());
    }

    #[test]
    fn test_empty_matrix() {
        let m = FeatureMatrix::from_rows(Vec::new()).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.iter_rows().count(), 0);
    }

    #[test]
    fn test_iter_rows_matches_row() {
        let m = FeatureMatrix::from_rows(vec![vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let collected: Vec<&[f32]> = m.iter_rows().collect();
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[2], m.row(2));
    }
}
