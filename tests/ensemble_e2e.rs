//! End-to-end tests over real fold artifacts on disk: build indices and
//! params with the write-side helpers, load through the registry, predict
//! through the classifier.

use std::path::Path;

use foldvote::{
    EnsembleClassifier, EnsembleError, FeatureMatrix, FlatIndex, FoldParams, FsArtifactStore,
    Quantization,
};
use tempfile::tempdir;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    raw.into_iter().map(|v| v / norm).collect()
}

/// Training vectors whose similarity to an e1-direction query strictly
/// decreases with position: position `p` is `normalize(e1 + p * 0.1 * e2)`.
/// Searching with `k = labels.len()` therefore visits positions in order,
/// so `labels` doubles as the query's neighbor-label sequence.
fn write_fold(store: &FsArtifactStore, fold: usize, labels: &[u32], k: usize) {
    let rows: Vec<Vec<f32>> = (0..labels.len())
        .map(|p| l2_normalize(vec![1.0, p as f32 * 0.1, 0.0]))
        .collect();
    let index = FlatIndex::build(3, Quantization::F32, rows).unwrap();
    store.save_index(fold, &index).unwrap();
    store
        .save_params(
            fold,
            &FoldParams {
                n_neighbors: k,
                y_train_labels: labels.to_vec(),
            },
        )
        .unwrap();
}

fn load_classifier(dir: &Path, fold_count: usize) -> EnsembleClassifier {
    let store = FsArtifactStore::new(dir);
    let mut classifier = EnsembleClassifier::new();
    classifier.load(&store, fold_count).unwrap();
    classifier
}

/// Registry with 3 folds whose neighbor labels for the fixed query are
/// [1,1,0], [1,0,0], [1,1,1]: fold predictions [1,0,1], final label 1.
#[test]
fn three_fold_scenario() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    write_fold(&store, 0, &[1, 1, 0], 3);
    write_fold(&store, 1, &[1, 0, 0], 3);
    write_fold(&store, 2, &[1, 1, 1], 3);

    let classifier = load_classifier(dir.path(), 3);
    // Deliberately un-normalized query; the pipeline normalizes it.
    let queries = FeatureMatrix::from_rows(vec![vec![7.0, 0.0, 0.0]]).unwrap();
    assert_eq!(classifier.predict(&queries).unwrap(), vec![1]);
}

#[test]
fn normalization_does_not_change_the_outcome() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    for fold in 0..3 {
        write_fold(&store, fold, &[2, 0, 0, 1], 3);
    }
    let classifier = load_classifier(dir.path(), 3);

    let raw = FeatureMatrix::from_rows(vec![vec![0.003, 0.0, 0.0]]).unwrap();
    let scaled = FeatureMatrix::from_rows(vec![vec![3000.0, 0.0, 0.0]]).unwrap();
    assert_eq!(
        classifier.predict(&raw).unwrap(),
        classifier.predict(&scaled).unwrap()
    );
}

/// Missing fold 3 of 5 must fail the whole load; no predictions may ever
/// come from the folds that did load.
#[test]
fn load_is_atomic() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    for fold in [0, 1, 2, 4] {
        write_fold(&store, fold, &[0, 1], 1);
    }

    let mut classifier = EnsembleClassifier::new();
    let err = classifier.load(&store, 5).unwrap_err();
    assert!(matches!(err, EnsembleError::ArtifactLoad { fold: 3, .. }));
    assert_eq!(classifier.failed_fold(), Some(3));

    let queries = FeatureMatrix::from_rows(vec![vec![1.0, 0.0, 0.0]]).unwrap();
    assert!(matches!(
        classifier.predict(&queries).unwrap_err(),
        EnsembleError::NoModelsLoaded
    ));
}

#[test]
fn corrupt_index_fails_the_load() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    write_fold(&store, 0, &[0, 1], 1);
    write_fold(&store, 1, &[0, 1], 1);
    std::fs::write(store.index_path(1), b"garbage").unwrap();

    let mut classifier = EnsembleClassifier::new();
    let err = classifier.load(&store, 2).unwrap_err();
    assert!(matches!(err, EnsembleError::ArtifactLoad { fold: 1, .. }));
}

/// Repeated predict calls on the same loaded registry must agree exactly.
/// The 300-query batch also pushes the per-fold path over the parallel
/// threshold, so parallel execution is covered too.
#[test]
fn predict_is_idempotent() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    write_fold(&store, 0, &[0, 1, 1, 2, 0], 3);
    write_fold(&store, 1, &[1, 1, 0, 2, 2], 3);
    write_fold(&store, 2, &[2, 0, 1, 1, 0], 5);

    let classifier = load_classifier(dir.path(), 3);

    // Deterministic pseudo-random batch.
    let rows: Vec<Vec<f32>> = (0..300)
        .map(|i| {
            let x = ((i * 37 + 11) % 101) as f32 / 101.0;
            let y = ((i * 53 + 7) % 89) as f32 / 89.0;
            let z = ((i * 71 + 3) % 97) as f32 / 97.0;
            vec![x, y, z]
        })
        .collect();
    let queries = FeatureMatrix::from_rows(rows).unwrap();

    let first = classifier.predict(&queries).unwrap();
    let second = classifier.predict(&queries).unwrap();
    assert_eq!(first.len(), 300);
    assert_eq!(first, second);
}

#[test]
fn f16_artifacts_predict_like_f32() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());

    // Same fold content stored at both quantizations, as folds 0 and 1.
    let labels = vec![1u32, 1, 0, 2];
    let rows: Vec<Vec<f32>> = (0..labels.len())
        .map(|p| l2_normalize(vec![1.0, p as f32 * 0.25, 0.5]))
        .collect();
    for (fold, quant) in [(0, Quantization::F32), (1, Quantization::F16)] {
        let index = FlatIndex::build(3, quant, rows.clone()).unwrap();
        store.save_index(fold, &index).unwrap();
        store
            .save_params(
                fold,
                &FoldParams {
                    n_neighbors: 3,
                    y_train_labels: labels.clone(),
                },
            )
            .unwrap();
    }

    let classifier = load_classifier(dir.path(), 2);
    let registry = classifier.registry().unwrap();
    let queries = FeatureMatrix::from_rows(vec![vec![1.0, 0.1, 0.4]]).unwrap();

    let per_fold: Vec<Vec<u32>> = registry
        .models()
        .iter()
        .map(|m| m.predict(&foldvote::normalize_rows(&queries)).unwrap())
        .collect();
    assert_eq!(per_fold[0], per_fold[1]);
}

#[test]
fn registry_exposes_ensemble_shape() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    write_fold(&store, 0, &[0, 3, 1], 2);
    write_fold(&store, 1, &[1, 0, 0], 2);

    let classifier = load_classifier(dir.path(), 2);
    let registry = classifier.registry().unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.dimension(), 3);
    assert_eq!(registry.n_classes(), 4);
}
