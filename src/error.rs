//! Typed error taxonomy for ensemble loading and prediction.
//!
//! Collaborator layers (artifact parsing, filesystem I/O) report failures as
//! `anyhow::Error`; the registry converts them into [`EnsembleError::ArtifactLoad`]
//! at the load boundary so callers always see a typed failure with the fold
//! number attached. Nothing is downgraded to a default prediction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnsembleError {
    /// Missing, corrupt, or invalid artifacts for a fold. Fatal to the whole
    /// registry load; retry policy (if any) belongs to the caller.
    #[error("failed to load artifacts for fold {fold}: {source}")]
    ArtifactLoad {
        fold: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Query feature dimensionality disagrees with the trained dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Prediction attempted before `load()` was called.
    #[error("fold indices are not loaded; call load() first")]
    IndexUnavailable,

    /// Prediction attempted on a failed or empty registry.
    #[error("no fold models loaded")]
    NoModelsLoaded,

    /// `load()` is single-shot; the registry never leaves a terminal state.
    #[error("load() already attempted (registry state: {state})")]
    AlreadyLoaded { state: &'static str },

    /// Fold prediction rows disagree on query count. Structurally impossible
    /// when every fold processes the same batch, but checked anyway.
    #[error("fold {fold} produced {actual} predictions, expected {expected}")]
    QueryCountMismatch {
        fold: usize,
        expected: usize,
        actual: usize,
    },

    /// Other internal consistency checks (neighbor position outside the
    /// label vector, empty vote set). Should never occur in correct
    /// operation.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl EnsembleError {
    /// The fold a load failure is attributed to, if any.
    pub fn fold(&self) -> Option<usize> {
        match self {
            EnsembleError::ArtifactLoad { fold, .. } => Some(*fold),
            _ => None,
        }
    }
}
