//! Per-iteration value dumps for run comparison
//!
//! Writes named value arrays under `<base>/iter_<n>/[<scope>/]<name>.(<len>)
//! .json` so two runs can be diffed stage by stage. The saver is handed
//! explicitly to whoever produces values; failures to write a dump are logged
//! and never fail the run.

use anyhow::{Context, Result};
use detbench_boxes::DumpSink;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Dumps value arrays into an iteration-scoped directory tree
#[derive(Debug)]
pub struct TensorSaver {
    base_dir: PathBuf,
    iteration: usize,
}

impl TensorSaver {
    pub fn new(base_dir: &Path, iteration: usize) -> Self {
        Self { base_dir: base_dir.to_path_buf(), iteration }
    }

    /// Advance to the next iteration, or jump to a specific one
    pub fn step(&mut self, iteration: Option<usize>) {
        match iteration {
            Some(it) => self.iteration = it,
            None => self.iteration += 1,
        }
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Write one value array under the current iteration directory
    pub fn save(&self, scope: Option<&str>, name: &str, values: &[f64]) -> Result<()> {
        let mut dir = self.base_dir.join(format!("iter_{}", self.iteration));
        if let Some(scope) = scope {
            dir = dir.join(scope);
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create dump directory: {}", dir.display()))?;

        let path = dir.join(format!("{}.({})", name, values.len()));
        let json = serde_json::to_string(values).context("Failed to serialize dump values")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write dump file: {}", path.display()))?;
        Ok(())
    }
}

impl DumpSink for TensorSaver {
    fn dump(&mut self, scope: &str, name: &str, values: &[f64]) {
        if let Err(err) = self.save(Some(scope), name, values) {
            warn!("tensor dump failed for {scope}/{name}: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_creates_iteration_tree() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let saver = TensorSaver::new(dir.path(), 3);
        saver.save(None, "gt_boxes", &[1.0, 2.0, 3.0]).expect("save failed");
        assert!(dir.path().join("iter_3").join("gt_boxes.(3)").exists());
    }

    #[test]
    fn test_scope_nests_a_subdirectory() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let saver = TensorSaver::new(dir.path(), 0);
        saver.save(Some("rpn/box_decode"), "boxes", &[0.0; 8]).expect("save failed");
        assert!(dir
            .path()
            .join("iter_0")
            .join("rpn/box_decode")
            .join("boxes.(8)")
            .exists());
    }

    #[test]
    fn test_step_advances_and_jumps() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut saver = TensorSaver::new(dir.path(), 0);
        saver.step(None);
        assert_eq!(saver.iteration(), 1);
        saver.step(Some(10));
        assert_eq!(saver.iteration(), 10);
    }

    #[test]
    fn test_values_roundtrip_through_json() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let saver = TensorSaver::new(dir.path(), 1);
        saver.save(None, "v", &[0.25, -1.5]).expect("save failed");
        let content =
            std::fs::read_to_string(dir.path().join("iter_1").join("v.(2)")).expect("read failed");
        let parsed: Vec<f64> = serde_json::from_str(&content).expect("parse failed");
        assert_eq!(parsed, vec![0.25, -1.5]);
    }
}
