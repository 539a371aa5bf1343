//! Artifact store for per-fold model files.
//!
//! The registry only ever asks a store two questions: "load the index for
//! fold f" and "load the parameters for fold f". Keeping that behind a trait
//! lets tests substitute in-memory stores and keeps the persistence layer
//! out of the voting core. Store errors stay `anyhow` here; the registry
//! wraps them with the failing fold number.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::index::FlatIndex;

/// Per-fold inference parameters, persisted alongside the index.
///
/// `y_train_labels` is position-aligned with the index's vector slab:
/// `y_train_labels[p]` is the class of the vector at position `p`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldParams {
    /// Neighbor count used at inference for this fold.
    pub n_neighbors: usize,
    /// Dense 0-indexed class labels, one per training vector.
    pub y_train_labels: Vec<u32>,
}

/// Source of per-fold artifacts.
pub trait ArtifactStore {
    fn load_index(&self, fold: usize) -> Result<FlatIndex>;
    fn load_params(&self, fold: usize) -> Result<FoldParams>;
}

/// Directory-of-files store: `index_fold_{f}.fvix` + `params_fold_{f}.mpk`
/// under a single model directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self, fold: usize) -> PathBuf {
        self.dir.join(format!("index_fold_{fold}.fvix"))
    }

    pub fn params_path(&self, fold: usize) -> PathBuf {
        self.dir.join(format!("params_fold_{fold}.mpk"))
    }

    /// Write-side helper for the training pipeline and for test fixtures.
    /// The inference path never calls this.
    pub fn save_params(&self, fold: usize, params: &FoldParams) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create model dir {:?}", self.dir))?;
        let path = self.params_path(fold);
        let encoded = rmp_serde::to_vec(params).context("encode fold params")?;
        let temp_path = path.with_extension("mpk.tmp");
        std::fs::write(&temp_path, &encoded)
            .with_context(|| format!("write temp params file {temp_path:?}"))?;
        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("rename temp params file {temp_path:?}"))?;
        tracing::debug!(?path, fold, labels = params.y_train_labels.len(), "saved fold params");
        Ok(())
    }

    /// Write-side helper: persist a fold's index at its store path.
    pub fn save_index(&self, fold: usize, index: &FlatIndex) -> Result<()> {
        index.save(&self.index_path(fold))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn load_index(&self, fold: usize) -> Result<FlatIndex> {
        let path = self.index_path(fold);
        FlatIndex::load(&path).with_context(|| format!("load index artifact {path:?}"))
    }

    fn load_params(&self, fold: usize) -> Result<FoldParams> {
        let path = self.params_path(fold);
        let bytes =
            std::fs::read(&path).with_context(|| format!("read params artifact {path:?}"))?;
        rmp_serde::from_slice(&bytes).with_context(|| format!("decode params artifact {path:?}"))
    }
}
