//! A single fold's trained model: index, labels, and neighbor count.

use anyhow::{Result, bail};
use rayon::prelude::*;

use crate::error::EnsembleError;
use crate::index::FlatIndex;
use crate::matrix::FeatureMatrix;
use crate::voting::{majority_label, resolve_neighbor_labels};

/// Upper bound on class label values. Labels index a count array during
/// voting, so they must stay dense; anything past this bound is treated as
/// a malformed artifact rather than a class id.
pub const MAX_LABEL: u32 = 65_535;

/// Below this many queries, rayon task overhead outweighs the win from
/// fanning a batch out across threads.
const PARALLEL_QUERY_THRESHOLD: usize = 256;

/// Cached parallelism flag (checked once at first use).
/// Set FOLDVOTE_PARALLEL=0 to force sequential execution everywhere.
static PARALLEL_ENABLED: once_cell::sync::Lazy<bool> = once_cell::sync::Lazy::new(|| {
    dotenvy::var("FOLDVOTE_PARALLEL")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true)
});

pub(crate) fn parallel_enabled() -> bool {
    *PARALLEL_ENABLED
}

/// One loaded `(index, labels, k)` triple. Immutable after construction;
/// searches are read-only and safe to run concurrently.
#[derive(Debug, Clone)]
pub struct FoldModel {
    index: FlatIndex,
    labels: Vec<u32>,
    k: usize,
}

impl FoldModel {
    /// Validate and assemble a fold. Construction is the only place the
    /// fold invariants are checked, so every later operation can rely on
    /// them: `index.len() == labels.len()`, `1 <= k <= labels.len()`,
    /// `max(labels) <= MAX_LABEL`.
    pub fn new(index: FlatIndex, labels: Vec<u32>, k: usize) -> Result<Self> {
        if labels.len() != index.len() {
            bail!(
                "label count {} does not match index vector count {}",
                labels.len(),
                index.len()
            );
        }
        if k == 0 {
            bail!("n_neighbors must be at least 1");
        }
        if k > labels.len() {
            bail!(
                "n_neighbors {k} exceeds training set size {}",
                labels.len()
            );
        }
        if let Some(max) = labels.iter().max()
            && *max > MAX_LABEL
        {
            bail!("label {max} exceeds the supported dense-label range (max {MAX_LABEL})");
        }
        Ok(Self { index, labels, k })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Highest class label present in this fold.
    pub fn max_label(&self) -> u32 {
        self.labels.iter().copied().max().unwrap_or(0)
    }

    /// Neighbor positions for each query in a normalized batch: exactly `k`
    /// positions per query, nearest first.
    pub fn search(&self, queries: &FeatureMatrix) -> Result<Vec<Vec<u32>>, EnsembleError> {
        self.check_batch_dim(queries)?;
        self.map_queries(queries, |model, query| model.search_one(query))
    }

    /// Per-query majority label over the `k` nearest neighbors' labels.
    pub fn predict(&self, queries: &FeatureMatrix) -> Result<Vec<u32>, EnsembleError> {
        self.check_batch_dim(queries)?;
        self.map_queries(queries, |model, query| model.predict_one(query))
    }

    fn check_batch_dim(&self, queries: &FeatureMatrix) -> Result<(), EnsembleError> {
        if queries.rows() > 0 && queries.dim() != self.index.dimension() {
            return Err(EnsembleError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: queries.dim(),
            });
        }
        Ok(())
    }

    /// Apply `op` to every query row, in parallel for large batches. Order
    /// is preserved either way, so results match sequential execution.
    fn map_queries<T, F>(&self, queries: &FeatureMatrix, op: F) -> Result<Vec<T>, EnsembleError>
    where
        T: Send,
        F: Fn(&Self, &[f32]) -> Result<T, EnsembleError> + Sync,
    {
        let rows: Vec<&[f32]> = queries.iter_rows().collect();
        if parallel_enabled() && rows.len() >= PARALLEL_QUERY_THRESHOLD {
            rows.par_iter().map(|&query| op(self, query)).collect()
        } else {
            rows.iter().map(|&query| op(self, query)).collect()
        }
    }

    fn search_one(&self, query: &[f32]) -> Result<Vec<u32>, EnsembleError> {
        let neighbors = self.index.search(query, self.k)?;
        if neighbors.len() != self.k {
            // k <= len is a construction invariant, so a short result means
            // the index and this model disagree about the training set.
            return Err(EnsembleError::Invariant(format!(
                "search returned {} neighbors, expected {}",
                neighbors.len(),
                self.k
            )));
        }
        Ok(neighbors.into_iter().map(|n| n.position).collect())
    }

    fn predict_one(&self, query: &[f32]) -> Result<u32, EnsembleError> {
        let positions = self.search_one(query)?;
        let votes = resolve_neighbor_labels(&positions, &self.labels)?;
        majority_label(&votes)
            .ok_or_else(|| EnsembleError::Invariant("empty neighbor vote set".to_string()))
    }
}
