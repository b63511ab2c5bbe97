//! Post-training evaluation pass
//!
//! Runs the model over the dataset behind a progress bar, timing the model
//! separately from the full pass, then scores proposal recall against the
//! ground truth and writes the predictions alongside a JSON report.

use crate::data::SyntheticDataset;
use crate::model::ProposalModel;
use crate::saver::TensorSaver;
use crate::timer::{format_time, Timer};
use anyhow::{Context, Result};
use detbench_boxes::{iou, BoxList, DumpSink, ProposalSelector};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Evaluation results plus pass timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub dataset_size: usize,
    pub iou_thresh: f64,
    /// Fraction of ground-truth boxes matched by a proposal at `iou_thresh`
    pub recall: f64,
    /// Mean over ground-truth boxes of the best proposal IoU
    pub mean_best_iou: f64,
    pub total_time_secs: f64,
    pub model_time_secs: f64,
    pub timestamp: String,
}

/// Per-image prediction record written to `predictions.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub image_id: usize,
    pub proposals: BoxList,
}

/// Evaluate the model over the whole dataset.
///
/// With `output_dir`, writes `predictions.json` there. `saver` receives the
/// selector's stage dumps when run comparison is enabled.
pub fn run_inference(
    model: &ProposalModel,
    dataset: &SyntheticDataset,
    selector: &ProposalSelector,
    iou_thresh: f64,
    output_dir: Option<&Path>,
    mut saver: Option<&mut TensorSaver>,
) -> Result<EvalReport> {
    info!("Start evaluation on {} images", dataset.len());
    let mut total_timer = Timer::new();
    let mut model_timer = Timer::new();
    total_timer.tic();

    let pb = ProgressBar::new(dataset.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}] {msg}")
            .unwrap(),
    );

    let mut predictions: BTreeMap<usize, BoxList> = BTreeMap::new();
    for batch_idx in 0..dataset.num_batches() {
        let batch = dataset.batch(batch_idx);

        model_timer.tic();
        let outputs: Vec<_> = batch.iter().map(|img| model.predict(img)).collect();
        let proposals = selector.select(
            &outputs,
            None,
            saver.as_deref_mut().map(|s| s as &mut dyn DumpSink),
        );
        model_timer.toc();

        for (img, boxes) in batch.iter().zip(proposals.into_iter()) {
            predictions.insert(img.id, boxes);
        }
        if let Some(saver) = saver.as_deref_mut() {
            saver.step(None);
        }
        pb.inc(batch.len() as u64);
    }
    pb.finish_with_message("done");

    let total_secs = total_timer.toc();
    let per_image = total_secs / dataset.len().max(1) as f64;
    info!(
        "Total run time: {} ({:.4} s / img)",
        format_time(total_secs),
        per_image
    );
    info!(
        "Model inference time: {} ({:.4} s / img)",
        format_time(model_timer.total_secs()),
        model_timer.total_secs() / dataset.len().max(1) as f64
    );

    if let Some(&last_id) = predictions.keys().next_back() {
        if predictions.len() != last_id + 1 {
            warn!(
                "Evaluated image ids are not a contiguous set; some images \
                 may be missing from the evaluation"
            );
        }
    }

    if let Some(output_dir) = output_dir {
        let records: Vec<PredictionRecord> = predictions
            .iter()
            .map(|(&image_id, proposals)| PredictionRecord {
                image_id,
                proposals: proposals.clone(),
            })
            .collect();
        std::fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create output directory: {}", output_dir.display())
        })?;
        let path = output_dir.join("predictions.json");
        let json =
            serde_json::to_string(&records).context("Failed to serialize predictions")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write predictions: {}", path.display()))?;
    }

    let (recall, mean_best_iou) = score_proposals(dataset, &predictions, iou_thresh);
    info!("recall@{:.2}: {:.4}  mean best IoU: {:.4}", iou_thresh, recall, mean_best_iou);

    Ok(EvalReport {
        dataset_size: dataset.len(),
        iou_thresh,
        recall,
        mean_best_iou,
        total_time_secs: total_secs,
        model_time_secs: model_timer.total_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Recall at the IoU threshold and the mean best IoU over ground-truth boxes
fn score_proposals(
    dataset: &SyntheticDataset,
    predictions: &BTreeMap<usize, BoxList>,
    iou_thresh: f64,
) -> (f64, f64) {
    let mut total_gt = 0usize;
    let mut recalled = 0usize;
    let mut iou_sum = 0.0;

    for img in dataset.images() {
        let Some(proposals) = predictions.get(&img.id) else {
            total_gt += img.gt.len();
            continue;
        };
        for gt_box in img.gt.boxes() {
            total_gt += 1;
            let best = proposals
                .boxes()
                .iter()
                .map(|p| iou(p, gt_box))
                .fold(0.0, f64::max);
            iou_sum += best;
            if best >= iou_thresh {
                recalled += 1;
            }
        }
    }

    if total_gt == 0 {
        return (0.0, 0.0);
    }
    (recalled as f64 / total_gt as f64, iou_sum / total_gt as f64)
}
