//! Integration tests for the evaluation pass

use detbench_boxes::{ProposalSelector, SelectorParams};
use detbench_config::DataConfig;
use detbench_engine::inference::PredictionRecord;
use detbench_engine::{run_inference, ProposalModel, SyntheticDataset, TensorSaver};
use tempfile::TempDir;

fn dataset() -> SyntheticDataset {
    SyntheticDataset::generate(&DataConfig {
        num_images: 6,
        batch_size: 2,
        levels: 2,
        anchors_per_level: 25,
        boxes_per_image: 3,
        image_size: (320, 240),
        seed: 21,
    })
}

fn selector() -> ProposalSelector {
    ProposalSelector::new(SelectorParams {
        pre_nms_top_n: 50,
        post_nms_top_n: 30,
        nms_thresh: 0.7,
        min_size: 0.0,
        fpn_post_nms_top_n: 30,
        fpn_post_nms_per_batch: true,
        training: false,
    })
}

#[test]
fn test_report_covers_every_image() {
    let model = ProposalModel::new();
    let data = dataset();
    let report = run_inference(&model, &data, &selector(), 0.5, None, None)
        .expect("Inference failed");

    assert_eq!(report.dataset_size, 6);
    assert!(report.recall >= 0.0 && report.recall <= 1.0);
    assert!(report.mean_best_iou >= 0.0 && report.mean_best_iou <= 1.0);
    assert!(report.total_time_secs >= report.model_time_secs);
    assert!(!report.timestamp.is_empty());
}

#[test]
fn test_predictions_file_is_written() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let model = ProposalModel::new();
    let data = dataset();

    run_inference(&model, &data, &selector(), 0.5, Some(dir.path()), None)
        .expect("Inference failed");

    let path = dir.path().join("predictions.json");
    assert!(path.exists());
    let json = std::fs::read_to_string(&path).expect("read failed");
    let records: Vec<PredictionRecord> = serde_json::from_str(&json).expect("parse failed");
    assert_eq!(records.len(), 6);
    // Records are sorted by image id.
    for (idx, record) in records.iter().enumerate() {
        assert_eq!(record.image_id, idx);
        assert!(!record.proposals.is_empty());
    }
}

#[test]
fn test_saver_receives_selector_dumps() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let dump_dir = dir.path().join("dump");
    let model = ProposalModel::new();
    let data = dataset();
    let mut saver = TensorSaver::new(&dump_dir, 0);

    run_inference(&model, &data, &selector(), 0.5, None, Some(&mut saver))
        .expect("Inference failed");

    let rpn_dir = dump_dir.join("iter_0").join("rpn");
    assert!(rpn_dir.exists());
    assert!(rpn_dir.join("box_decode").exists());
}

#[test]
fn test_dense_anchors_recall_everything_at_tiny_threshold() {
    // With an untrained model the proposals are the anchors themselves. The
    // level-1 grid tiles the whole image, so when the final budget keeps all
    // candidates every gt box overlaps at least one proposal.
    let data = dataset();
    let model = ProposalModel::new();
    let keep_all = ProposalSelector::new(SelectorParams {
        pre_nms_top_n: 100,
        post_nms_top_n: 100,
        nms_thresh: 0.7,
        min_size: 0.0,
        fpn_post_nms_top_n: 100,
        fpn_post_nms_per_batch: false,
        training: false,
    });

    let report = run_inference(&model, &data, &keep_all, 1e-6, None, None)
        .expect("Inference failed");
    assert_eq!(report.recall, 1.0);
}
