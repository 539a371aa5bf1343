//! Ordered collection of fold models with an all-or-nothing load.

use anyhow::bail;

use crate::error::EnsembleError;
use crate::fold::FoldModel;
use crate::store::ArtifactStore;

/// The loaded ensemble: one [`FoldModel`] per fold, in fold order.
///
/// A registry only ever exists fully populated — `load` either returns every
/// fold or fails with the first offending fold, so callers can never observe
/// a partially-usable ensemble. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<FoldModel>,
    dimension: usize,
    n_classes: usize,
}

impl ModelRegistry {
    /// Load `fold_count` folds (0-indexed) from the store, failing fast on
    /// the first missing or malformed fold. Folds must agree on feature
    /// dimensionality; the first fold sets the expectation.
    pub fn load(store: &dyn ArtifactStore, fold_count: usize) -> Result<Self, EnsembleError> {
        let mut models: Vec<FoldModel> = Vec::with_capacity(fold_count);
        for fold in 0..fold_count {
            let model = Self::load_fold(store, fold, models.first())
                .map_err(|source| EnsembleError::ArtifactLoad { fold, source })?;
            tracing::info!(
                fold,
                vectors = model.len(),
                k = model.k(),
                dimension = model.dimension(),
                "loaded fold model"
            );
            models.push(model);
        }

        let dimension = models.first().map(|m| m.dimension()).unwrap_or(0);
        let n_classes = models
            .iter()
            .map(|m| m.max_label() as usize + 1)
            .max()
            .unwrap_or(0);

        if models.is_empty() {
            tracing::warn!("registry loaded with zero folds; predict will fail");
        } else {
            tracing::info!(folds = models.len(), dimension, n_classes, "fold ensemble ready");
        }

        Ok(Self {
            models,
            dimension,
            n_classes,
        })
    }

    fn load_fold(
        store: &dyn ArtifactStore,
        fold: usize,
        first: Option<&FoldModel>,
    ) -> anyhow::Result<FoldModel> {
        let index = store.load_index(fold)?;
        let params = store.load_params(fold)?;
        if let Some(first) = first
            && index.dimension() != first.dimension()
        {
            bail!(
                "fold dimension {} disagrees with fold 0 dimension {}",
                index.dimension(),
                first.dimension()
            );
        }
        FoldModel::new(index, params.y_train_labels, params.n_neighbors)
    }

    pub fn models(&self) -> &[FoldModel] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Feature dimensionality shared by every fold (0 for an empty registry).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of distinct classes implied by the label vectors
    /// (max label over all folds + 1).
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }
}
