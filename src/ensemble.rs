//! Two-stage ensemble prediction over a loaded registry.
//!
//! Stage one runs per fold: normalize once, search, majority-vote the
//! neighbor labels. Stage two hard-votes the per-fold predictions for each
//! query. Every fold's vote is counted before a final label is emitted —
//! there is no early exit on reaching a simple majority, because a late
//! fold can still move a tie.

use rayon::prelude::*;

use crate::error::EnsembleError;
use crate::fold::parallel_enabled;
use crate::matrix::FeatureMatrix;
use crate::normalize::normalize_rows;
use crate::registry::ModelRegistry;
use crate::store::ArtifactStore;
use crate::voting::{VoteBuf, majority_label};

/// Registry lifecycle: `Unloaded` transitions once, to `Loaded` or `Failed`,
/// and never leaves the terminal state.
#[derive(Debug, Default)]
enum RegistryState {
    #[default]
    Unloaded,
    Loaded(ModelRegistry),
    Failed { fold: Option<usize> },
}

impl RegistryState {
    fn name(&self) -> &'static str {
        match self {
            RegistryState::Unloaded => "unloaded",
            RegistryState::Loaded(_) => "loaded",
            RegistryState::Failed { .. } => "failed",
        }
    }
}

/// Ensemble k-NN classifier over per-fold ANN indices.
///
/// ```no_run
/// use foldvote::{EnsembleClassifier, FeatureMatrix, FsArtifactStore};
///
/// # fn main() -> Result<(), foldvote::EnsembleError> {
/// let store = FsArtifactStore::new("models/");
/// let mut classifier = EnsembleClassifier::new();
/// classifier.load(&store, 5)?;
///
/// let queries = FeatureMatrix::from_rows(vec![vec![0.1, 0.9, 0.3]])?;
/// let labels = classifier.predict(&queries)?;
/// # let _ = labels;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct EnsembleClassifier {
    state: RegistryState,
}

impl EnsembleClassifier {
    pub fn new() -> Self {
        Self {
            state: RegistryState::Unloaded,
        }
    }

    /// Load `fold_count` folds from the store. Single-shot: a second call
    /// fails with [`EnsembleError::AlreadyLoaded`] whatever the outcome of
    /// the first. On failure the classifier lands in the terminal failed
    /// state and every later `predict` fails with
    /// [`EnsembleError::NoModelsLoaded`].
    pub fn load(
        &mut self,
        store: &dyn ArtifactStore,
        fold_count: usize,
    ) -> Result<(), EnsembleError> {
        if !matches!(self.state, RegistryState::Unloaded) {
            return Err(EnsembleError::AlreadyLoaded {
                state: self.state.name(),
            });
        }
        match ModelRegistry::load(store, fold_count) {
            Ok(registry) => {
                self.state = RegistryState::Loaded(registry);
                Ok(())
            }
            Err(err) => {
                tracing::error!(fold = ?err.fold(), %err, "registry load failed");
                self.state = RegistryState::Failed { fold: err.fold() };
                Err(err)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, RegistryState::Loaded(_))
    }

    /// The fold a failed load was attributed to, when that is known.
    pub fn failed_fold(&self) -> Option<usize> {
        match &self.state {
            RegistryState::Failed { fold } => *fold,
            _ => None,
        }
    }

    /// The loaded registry, if the load succeeded.
    pub fn registry(&self) -> Option<&ModelRegistry> {
        match &self.state {
            RegistryState::Loaded(registry) => Some(registry),
            _ => None,
        }
    }

    /// Final ensemble labels for a raw (un-normalized) query batch.
    pub fn predict(&self, queries: &FeatureMatrix) -> Result<Vec<u32>, EnsembleError> {
        match &self.state {
            RegistryState::Unloaded => Err(EnsembleError::IndexUnavailable),
            RegistryState::Failed { .. } => Err(EnsembleError::NoModelsLoaded),
            RegistryState::Loaded(registry) => predict_with_registry(registry, queries),
        }
    }
}

/// The two-stage pipeline against an already-loaded registry.
///
/// Fold order never affects the outcome (the across-fold vote sees a
/// multiset), and fold searches are independent, so stage one may fan out
/// across folds; order-preserving collection keeps results identical to
/// sequential execution.
pub fn predict_with_registry(
    registry: &ModelRegistry,
    queries: &FeatureMatrix,
) -> Result<Vec<u32>, EnsembleError> {
    if registry.is_empty() {
        return Err(EnsembleError::NoModelsLoaded);
    }

    let normalized = normalize_rows(queries);
    let n_queries = normalized.rows();

    let models = registry.models();
    let per_fold: Result<Vec<Vec<u32>>, EnsembleError> = if parallel_enabled() {
        models.par_iter().map(|m| m.predict(&normalized)).collect()
    } else {
        models.iter().map(|m| m.predict(&normalized)).collect()
    };
    let per_fold = per_fold?;

    for (fold, row) in per_fold.iter().enumerate() {
        if row.len() != n_queries {
            return Err(EnsembleError::QueryCountMismatch {
                fold,
                expected: n_queries,
                actual: row.len(),
            });
        }
    }

    let mut finals = Vec::with_capacity(n_queries);
    let mut votes = VoteBuf::new();
    for query in 0..n_queries {
        votes.clear();
        votes.extend(per_fold.iter().map(|row| row[query]));
        let label = majority_label(&votes)
            .ok_or_else(|| EnsembleError::Invariant("empty fold vote set".to_string()))?;
        finals.push(label);
    }

    tracing::debug!(
        queries = n_queries,
        folds = per_fold.len(),
        "ensemble prediction complete"
    );
    Ok(finals)
}
