//! Checkpoint save/load with a `last_checkpoint` marker
//!
//! Each save writes `<name>.json` (weights plus training metadata) into the
//! output directory and rewrites the marker file to point at it. Resuming
//! reads the marker: if it is present the run continues from the recorded
//! checkpoint, otherwise training starts fresh. Deleting the marker is
//! therefore all a launcher needs to do to force a fresh run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Serialized checkpoint contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Model parameters
    pub weights: Vec<f64>,
    /// Iteration the checkpoint was taken at
    pub iteration: usize,
    /// Loss map at save time, for inspection
    #[serde(default)]
    pub losses: BTreeMap<String, f64>,
}

/// Saves and resolves checkpoints in an output directory
#[derive(Debug, Clone)]
pub struct Checkpointer {
    output_dir: PathBuf,
    marker_path: PathBuf,
}

impl Checkpointer {
    pub fn new(output_dir: &Path, marker_path: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            marker_path: marker_path.to_path_buf(),
        }
    }

    /// Save a checkpoint under `name` and update the marker.
    ///
    /// # Errors
    /// Fails if the output directory cannot be created or either file cannot
    /// be written.
    pub fn save(&self, name: &str, data: &CheckpointData) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create output directory: {}", self.output_dir.display())
        })?;

        let path = self.output_dir.join(format!("{name}.json"));
        let json = serde_json::to_string(data).context("Failed to serialize checkpoint")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write checkpoint: {}", path.display()))?;

        fs::write(&self.marker_path, format!("{}\n", path.display())).with_context(|| {
            format!("Failed to write checkpoint marker: {}", self.marker_path.display())
        })?;

        Ok(path)
    }

    /// Whether a resumable checkpoint is recorded
    pub fn has_checkpoint(&self) -> bool {
        self.marker_path.exists()
    }

    /// Load the checkpoint the marker points at, or `None` for a fresh run.
    ///
    /// # Errors
    /// Fails if the marker points at a missing or unparseable file; a corrupt
    /// run state should surface, not silently restart from scratch.
    pub fn load_last(&self) -> Result<Option<CheckpointData>> {
        if !self.marker_path.exists() {
            return Ok(None);
        }
        let recorded = fs::read_to_string(&self.marker_path).with_context(|| {
            format!("Failed to read checkpoint marker: {}", self.marker_path.display())
        })?;
        let path = PathBuf::from(recorded.trim());
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
        let data: CheckpointData = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn checkpointer(dir: &TempDir) -> Checkpointer {
        Checkpointer::new(dir.path(), &dir.path().join("last_checkpoint"))
    }

    fn data(iteration: usize) -> CheckpointData {
        CheckpointData {
            weights: vec![0.5; 4],
            iteration,
            losses: BTreeMap::new(),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ckpt = checkpointer(&dir);

        ckpt.save("model_0000010", &data(10)).expect("save failed");
        let loaded = ckpt.load_last().expect("load failed").expect("no checkpoint");
        assert_eq!(loaded.iteration, 10);
        assert_eq!(loaded.weights, vec![0.5; 4]);
    }

    #[test]
    fn test_marker_tracks_newest_save() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ckpt = checkpointer(&dir);

        ckpt.save("model_0000010", &data(10)).expect("save failed");
        ckpt.save("model_0000020", &data(20)).expect("save failed");
        let loaded = ckpt.load_last().expect("load failed").expect("no checkpoint");
        assert_eq!(loaded.iteration, 20);
    }

    #[test]
    fn test_fresh_run_without_marker() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ckpt = checkpointer(&dir);
        assert!(!ckpt.has_checkpoint());
        assert!(ckpt.load_last().expect("load failed").is_none());
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ckpt = checkpointer(&dir);

        let path = ckpt.save("model_final", &data(5)).expect("save failed");
        fs::write(&path, b"not json").expect("corrupt write failed");
        assert!(ckpt.load_last().is_err());
    }

    #[test]
    fn test_dangling_marker_is_an_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let ckpt = checkpointer(&dir);
        fs::write(dir.path().join("last_checkpoint"), "/no/such/model.json\n")
            .expect("marker write failed");
        assert!(ckpt.load_last().is_err());
    }
}
