//! The training loop
//!
//! Mirrors the classic engine shape: iterate to `max_iter`, meter data and
//! step times, fold the per-step loss map into smoothed meters, log an ETA
//! line every `log_period`, checkpoint every `checkpoint_period`, and write
//! `model_final` at the end. Only the main rank writes checkpoints.

use crate::checkpoint::{CheckpointData, Checkpointer};
use crate::data::SyntheticDataset;
use crate::meters::MetricLogger;
use crate::model::ProposalModel;
use crate::optimizer::{Sgd, WarmupMultiStepLr};
use crate::saver::TensorSaver;
use crate::timer::format_time;
use anyhow::{Context, Result};
use detbench_config::SolverConfig;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

/// Summary of a completed training run
#[derive(Debug)]
pub struct TrainReport {
    /// Iterations actually executed (zero when resuming at `max_iter`)
    pub iterations_run: usize,
    pub total_time_secs: f64,
    /// Loss map from the last step
    pub final_losses: BTreeMap<String, f64>,
}

/// Run training from `start_iter` to `solver.max_iter`.
///
/// `is_main` gates checkpoint writes so concurrent worker ranks do not race
/// on the output directory.
pub fn do_train(
    model: &mut ProposalModel,
    dataset: &SyntheticDataset,
    solver: &SolverConfig,
    checkpointer: &Checkpointer,
    mut saver: Option<&mut TensorSaver>,
    start_iter: usize,
    is_main: bool,
) -> Result<TrainReport> {
    info!("Start training");
    let max_iter = solver.max_iter;
    let mut meters = MetricLogger::new("  ");
    let scheduler = WarmupMultiStepLr::from_config(solver);
    let mut optimizer = Sgd::new(
        ProposalModel::num_params(),
        solver.momentum,
        solver.weight_decay,
    );

    let mut final_losses = BTreeMap::new();
    let start_training = Instant::now();
    let mut end = Instant::now();

    for iteration in (start_iter + 1)..=max_iter {
        let batch = dataset.batch(iteration - 1);
        let data_time = end.elapsed().as_secs_f64();

        if let Some(saver) = saver.as_deref_mut() {
            saver.step(Some(iteration));
            for img in batch {
                let flat: Vec<f64> = img.gt.boxes().iter().flatten().copied().collect();
                saver
                    .save(None, &format!("gt_boxes_img_{}", img.id), &flat)
                    .context("Failed to dump ground-truth boxes")?;
            }
        }

        let out = model.forward_backward(batch);
        let lr = scheduler.lr_at(iteration);
        optimizer.step(model.weights_mut(), &out.grads, lr);

        meters.update_losses(&out.losses);
        let batch_time = end.elapsed().as_secs_f64();
        end = Instant::now();
        meters.update("time", batch_time);
        meters.update("data", data_time);

        let eta_secs =
            meters.get("time").map_or(0.0, |m| m.global_avg()) * (max_iter - iteration) as f64;

        if iteration % solver.log_period == 0 || iteration == max_iter {
            info!(
                "eta: {}  iter: {}  {}  lr: {:.6}",
                format_time(eta_secs),
                iteration,
                meters,
                lr
            );
        }

        if is_main {
            if iteration % solver.checkpoint_period == 0 {
                save_checkpoint(checkpointer, model, iteration, &out.losses)
                    .context("Failed to save periodic checkpoint")?;
            }
            if iteration == max_iter {
                save_named(checkpointer, "model_final", model, iteration, &out.losses)
                    .context("Failed to save final checkpoint")?;
            }
        }

        final_losses = out.losses;
    }

    let iterations_run = max_iter.saturating_sub(start_iter);
    let total_secs = start_training.elapsed().as_secs_f64();
    info!(
        "Total training time: {} ({:.4} s / it)",
        format_time(total_secs),
        total_secs / iterations_run.max(1) as f64
    );

    Ok(TrainReport {
        iterations_run,
        total_time_secs: total_secs,
        final_losses,
    })
}

fn save_checkpoint(
    checkpointer: &Checkpointer,
    model: &ProposalModel,
    iteration: usize,
    losses: &BTreeMap<String, f64>,
) -> Result<()> {
    save_named(
        checkpointer,
        &format!("model_{iteration:07}"),
        model,
        iteration,
        losses,
    )
}

fn save_named(
    checkpointer: &Checkpointer,
    name: &str,
    model: &ProposalModel,
    iteration: usize,
    losses: &BTreeMap<String, f64>,
) -> Result<()> {
    let data = CheckpointData {
        weights: model.weights().to_vec(),
        iteration,
        losses: losses.clone(),
    };
    checkpointer.save(name, &data)?;
    Ok(())
}
