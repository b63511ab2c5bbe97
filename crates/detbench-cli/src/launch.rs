//! Run-artifact cleanup and multi-process launch
//!
//! The cleanup step treats a missing artifact as an already-satisfied
//! postcondition: deleting three paths that may or may not exist must always
//! succeed, so a fresh run can be forced from any state. Only genuinely
//! unexpected I/O errors propagate.

use anyhow::{Context, Result};
use detbench_config::RunConfig;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use tracing::{info, warn};

/// Worker rank environment variable
pub const RANK_ENV: &str = "DETBENCH_RANK";
/// Worker count environment variable
pub const WORLD_SIZE_ENV: &str = "DETBENCH_WORLD_SIZE";

/// Rank of the current process, if it was spawned as a worker
pub fn rank() -> Option<usize> {
    std::env::var(RANK_ENV).ok()?.parse().ok()
}

/// Remove the dump directory, checkpoint marker and log file.
///
/// Idempotent: running it twice leaves the same end state and the second run
/// is not an error.
pub fn clean_run_artifacts(config: &RunConfig) -> Result<()> {
    remove_dir_if_exists(&config.dump_dir())?;
    remove_file_if_exists(&config.checkpoint_marker())?;
    remove_file_if_exists(&config.log_file())?;
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to remove directory: {}", path.display()))
        }
    }
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to remove file: {}", path.display())),
    }
}

/// Spawn `num_procs` ranked copies of this executable running the `train`
/// subcommand, wait for all of them, and return the exit code to propagate:
/// zero when every worker succeeded, otherwise the first failure's code.
pub fn spawn_workers(
    num_procs: usize,
    config_file: Option<&Path>,
    skip_test: bool,
) -> Result<i32> {
    let exe = std::env::current_exe().context("Failed to resolve current executable")?;
    info!("Launching {num_procs} worker processes");

    let mut children = Vec::with_capacity(num_procs);
    for worker_rank in 0..num_procs {
        let mut cmd = Command::new(&exe);
        cmd.arg("train");
        if let Some(config_file) = config_file {
            cmd.arg("--config-file").arg(config_file);
        }
        if skip_test {
            cmd.arg("--skip-test");
        }
        cmd.env(RANK_ENV, worker_rank.to_string());
        cmd.env(WORLD_SIZE_ENV, num_procs.to_string());
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn worker {worker_rank}"))?;
        children.push((worker_rank, child));
    }

    let mut exit_code = 0;
    for (worker_rank, mut child) in children {
        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for worker {worker_rank}"))?;
        if !status.success() {
            warn!("worker {worker_rank} exited with {status}");
            if exit_code == 0 {
                exit_code = status.code().unwrap_or(1);
            }
        }
    }
    Ok(exit_code)
}
