//! Integration tests for the training loop

use detbench_config::{DataConfig, SolverConfig};
use detbench_engine::{
    do_train, Checkpointer, ProposalModel, SyntheticDataset, TensorSaver,
};
use tempfile::TempDir;

fn solver(max_iter: usize) -> SolverConfig {
    SolverConfig {
        max_iter,
        base_lr: 0.02,
        momentum: 0.9,
        weight_decay: 1e-4,
        warmup_factor: 1.0 / 3.0,
        warmup_iters: 10,
        gamma: 0.1,
        steps: vec![],
        checkpoint_period: 10,
        log_period: 5,
    }
}

fn dataset() -> SyntheticDataset {
    SyntheticDataset::generate(&DataConfig {
        num_images: 8,
        batch_size: 4,
        levels: 2,
        anchors_per_level: 25,
        boxes_per_image: 3,
        image_size: (320, 240),
        seed: 42,
    })
}

fn checkpointer(dir: &TempDir) -> Checkpointer {
    Checkpointer::new(dir.path(), &dir.path().join("last_checkpoint"))
}

#[test]
fn test_periodic_and_final_checkpoints() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let ckpt = checkpointer(&dir);
    let mut model = ProposalModel::new();
    let data = dataset();

    let report = do_train(&mut model, &data, &solver(25), &ckpt, None, 0, true)
        .expect("Training failed");

    assert_eq!(report.iterations_run, 25);
    assert!(dir.path().join("model_0000010.json").exists());
    assert!(dir.path().join("model_0000020.json").exists());
    assert!(dir.path().join("model_final.json").exists());
    assert!(dir.path().join("last_checkpoint").exists());

    let loaded = ckpt.load_last().expect("load failed").expect("no checkpoint");
    assert_eq!(loaded.iteration, 25);
    assert_eq!(loaded.weights.len(), ProposalModel::num_params());
}

#[test]
fn test_resume_from_marker_continues_iteration() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let ckpt = checkpointer(&dir);
    let data = dataset();

    let mut model = ProposalModel::new();
    do_train(&mut model, &data, &solver(10), &ckpt, None, 0, true).expect("Training failed");

    // Second run resumes where the first left off.
    let saved = ckpt.load_last().expect("load failed").expect("no checkpoint");
    let mut resumed = ProposalModel::new();
    resumed.set_weights(saved.weights).expect("bad weights");
    let report = do_train(&mut resumed, &data, &solver(20), &ckpt, None, saved.iteration, true)
        .expect("Training failed");

    assert_eq!(report.iterations_run, 10);
    let final_state = ckpt.load_last().expect("load failed").expect("no checkpoint");
    assert_eq!(final_state.iteration, 20);
}

#[test]
fn test_training_reduces_loss() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let ckpt = checkpointer(&dir);
    let data = dataset();

    let mut model = ProposalModel::new();
    let initial: f64 = model.forward_backward(data.batch(0)).losses.values().sum();

    do_train(&mut model, &data, &solver(60), &ckpt, None, 0, true).expect("Training failed");

    let trained: f64 = model.forward_backward(data.batch(0)).losses.values().sum();
    assert!(
        trained < initial,
        "loss did not decrease: {initial} -> {trained}"
    );
}

#[test]
fn test_worker_rank_does_not_checkpoint() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let ckpt = checkpointer(&dir);
    let mut model = ProposalModel::new();

    do_train(&mut model, &dataset(), &solver(15), &ckpt, None, 0, false)
        .expect("Training failed");

    assert!(!dir.path().join("last_checkpoint").exists());
    assert!(!dir.path().join("model_final.json").exists());
}

#[test]
fn test_saver_writes_iteration_dumps() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let dump_dir = dir.path().join("dump");
    let ckpt = checkpointer(&dir);
    let mut model = ProposalModel::new();
    let mut saver = TensorSaver::new(&dump_dir, 0);

    do_train(&mut model, &dataset(), &solver(3), &ckpt, Some(&mut saver), 0, true)
        .expect("Training failed");

    assert!(dump_dir.join("iter_1").exists());
    assert!(dump_dir.join("iter_3").exists());
}

#[test]
fn test_resume_at_max_iter_is_a_noop() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let ckpt = checkpointer(&dir);
    let mut model = ProposalModel::new();

    let report = do_train(&mut model, &dataset(), &solver(10), &ckpt, None, 10, true)
        .expect("Training failed");
    assert_eq!(report.iterations_run, 0);
    // Nothing ran, so nothing was saved.
    assert!(!ckpt.has_checkpoint());
}
