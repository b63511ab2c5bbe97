//! detbench - detection-training run harness
//!
//! Usage:
//!   detbench run --config-file runs/baseline.yaml --skip-test
//!   detbench run --config-file runs/baseline.yaml --num-procs 4
//!   detbench train --config-file runs/baseline.yaml
//!   detbench test --config-file runs/baseline.yaml
//!   detbench clean --config-file runs/baseline.yaml
//!
//! `run` resets the previous run's artifacts (the dump directory, the
//! `last_checkpoint` marker and the log file) before training, so it always
//! starts fresh; `train` leaves them in place and resumes from the marker
//! when one exists.

mod launch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use detbench_boxes::{ProposalSelector, SelectorParams};
use detbench_config::{ProposalConfig, RunConfig};
use detbench_engine::{
    do_train, run_inference, Checkpointer, ProposalModel, SyntheticDataset, TensorSaver,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "detbench", about = "Detection-training run harness", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset run artifacts, then train (and evaluate unless skipped)
    Run {
        /// Path to the YAML run configuration
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,

        /// Skip the post-training evaluation pass
        #[arg(long)]
        skip_test: bool,

        /// Worker process count; values above 1 respawn ranked workers
        #[arg(long, default_value = "1")]
        num_procs: usize,
    },

    /// Train without touching artifacts; resumes from `last_checkpoint`
    Train {
        /// Path to the YAML run configuration
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,

        /// Skip the post-training evaluation pass
        #[arg(long)]
        skip_test: bool,
    },

    /// Evaluate the last checkpoint
    Test {
        /// Path to the YAML run configuration
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,
    },

    /// Remove run artifacts only
    Clean {
        /// Path to the YAML run configuration
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config_file, skip_test, num_procs } => {
            let config = load_config(config_file.as_deref())?;
            launch::clean_run_artifacts(&config)?;
            if num_procs > 1 {
                init_logging(None)?;
                let code = launch::spawn_workers(num_procs, config_file.as_deref(), skip_test)?;
                if code != 0 {
                    std::process::exit(code);
                }
                Ok(())
            } else {
                init_logging(Some(&config.log_file()))?;
                train_and_eval(&config, skip_test, true)
            }
        }
        Commands::Train { config_file, skip_test } => {
            let config = load_config(config_file.as_deref())?;
            let is_main = launch::rank().map_or(true, |r| r == 0);
            init_logging(Some(&config.log_file()))?;
            train_and_eval(&config, skip_test, is_main)
        }
        Commands::Test { config_file } => {
            let config = load_config(config_file.as_deref())?;
            init_logging(Some(&config.log_file()))?;
            evaluate(&config)
        }
        Commands::Clean { config_file } => {
            // No file logging here: the log file is one of the artifacts
            // being removed.
            let config = load_config(config_file.as_deref())?;
            init_logging(None)?;
            launch::clean_run_artifacts(&config)
        }
    }
}

fn load_config(config_file: Option<&Path>) -> Result<RunConfig> {
    match config_file {
        Some(path) => RunConfig::from_file(path),
        None => Ok(RunConfig::default()),
    }
}

/// Log to stderr, and additionally to the run log file when given
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry()
                .with(tracing_subscriber::filter::LevelFilter::INFO)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::filter::LevelFilter::INFO)
                .with(stderr_layer)
                .init();
        }
    }
    Ok(())
}

fn train_and_eval(config: &RunConfig, skip_test: bool, is_main: bool) -> Result<()> {
    std::fs::create_dir_all(&config.paths.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.paths.output_dir.display()
        )
    })?;

    let dataset = SyntheticDataset::generate(&config.data);
    let checkpointer = Checkpointer::new(&config.paths.output_dir, &config.checkpoint_marker());

    let mut model = ProposalModel::new();
    let start_iter = match checkpointer.load_last().context("Failed to resolve checkpoint")? {
        Some(saved) => {
            info!("Resuming from iteration {}", saved.iteration);
            model.set_weights(saved.weights)?;
            saved.iteration
        }
        None => 0,
    };

    let mut saver = config
        .dump
        .enabled
        .then(|| TensorSaver::new(&config.dump_dir(), start_iter));

    do_train(
        &mut model,
        &dataset,
        &config.solver,
        &checkpointer,
        saver.as_mut(),
        start_iter,
        is_main,
    )
    .context("Training failed")?;

    if skip_test {
        info!("Skipping evaluation (--skip-test)");
        return Ok(());
    }
    if !is_main {
        return Ok(());
    }
    run_eval_pass(config, &model, saver.as_mut())
}

fn evaluate(config: &RunConfig) -> Result<()> {
    let checkpointer = Checkpointer::new(&config.paths.output_dir, &config.checkpoint_marker());
    let saved = checkpointer
        .load_last()
        .context("Failed to resolve checkpoint")?
        .context("No checkpoint found; run training first")?;

    let mut model = ProposalModel::new();
    model.set_weights(saved.weights)?;

    let mut saver = config
        .dump
        .enabled
        .then(|| TensorSaver::new(&config.dump_dir(), 0));
    run_eval_pass(config, &model, saver.as_mut())
}

fn run_eval_pass(
    config: &RunConfig,
    model: &ProposalModel,
    saver: Option<&mut TensorSaver>,
) -> Result<()> {
    let dataset = SyntheticDataset::generate(&config.data);
    let selector = ProposalSelector::new(selector_params(&config.proposals, false));

    let report = run_inference(
        model,
        &dataset,
        &selector,
        config.test.iou_thresh,
        Some(&config.paths.output_dir),
        saver,
    )
    .context("Evaluation failed")?;

    let path = config.paths.output_dir.join("eval_report.json");
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    info!("Wrote evaluation report to {}", path.display());
    Ok(())
}

fn selector_params(p: &ProposalConfig, training: bool) -> SelectorParams {
    SelectorParams {
        pre_nms_top_n: if training { p.pre_nms_top_n_train } else { p.pre_nms_top_n_test },
        post_nms_top_n: if training { p.post_nms_top_n_train } else { p.post_nms_top_n_test },
        nms_thresh: p.nms_thresh,
        min_size: p.min_size,
        fpn_post_nms_top_n: if training {
            p.fpn_post_nms_top_n_train
        } else {
            p.fpn_post_nms_top_n_test
        },
        fpn_post_nms_per_batch: p.fpn_post_nms_per_batch,
        training,
    }
}
