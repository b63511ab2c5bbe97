//! Run configuration for the detbench training harness
//!
//! Configuration is loaded from a YAML file. Every section has defaults, so a
//! partial file (or none at all) yields a runnable configuration. Unknown keys
//! are ignored, which keeps fuller config files from other deployments
//! loadable here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors produced by configuration validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("solver.max_iter must be greater than zero")]
    ZeroMaxIter,
    #[error("solver.base_lr must be positive, got {0}")]
    NonPositiveLr(f64),
    #[error("data.batch_size must be greater than zero")]
    ZeroBatchSize,
    #[error("data.num_images must be greater than zero")]
    ZeroNumImages,
    #[error("proposals.nms_thresh must be in (0, 1], got {0}")]
    BadNmsThresh(f64),
    #[error("proposals.{0} must be greater than zero")]
    ZeroTopN(&'static str),
}

/// Complete run configuration loaded from a YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Filesystem locations for run artifacts
    #[serde(default)]
    pub paths: PathsConfig,
    /// Training loop and optimizer parameters
    #[serde(default)]
    pub solver: SolverConfig,
    /// Proposal post-processing parameters
    #[serde(default)]
    pub proposals: ProposalConfig,
    /// Synthetic dataset parameters
    #[serde(default)]
    pub data: DataConfig,
    /// Evaluation parameters
    #[serde(default)]
    pub test: TestConfig,
    /// Tensor dump parameters
    #[serde(default)]
    pub dump: DumpConfig,
}

/// Filesystem locations for run artifacts
///
/// All paths are resolved relative to `output_dir`, which itself defaults to
/// the working directory. The defaults reproduce the classic artifact trio:
/// `./dump`, `last_checkpoint`, `log.txt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for checkpoints, reports and the log file
    pub output_dir: PathBuf,
    /// Tensor dump directory name
    pub dump_dir: PathBuf,
    /// Name of the marker file recording the newest checkpoint
    pub checkpoint_marker: String,
    /// Name of the run log file
    pub log_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            dump_dir: PathBuf::from("dump"),
            checkpoint_marker: "last_checkpoint".to_string(),
            log_file: "log.txt".to_string(),
        }
    }
}

/// Training loop and optimizer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Total number of training iterations
    pub max_iter: usize,
    /// Base learning rate reached after warmup
    pub base_lr: f64,
    /// SGD momentum
    pub momentum: f64,
    /// L2 weight decay
    pub weight_decay: f64,
    /// LR multiplier at iteration zero (ramps linearly to 1.0)
    pub warmup_factor: f64,
    /// Number of warmup iterations
    pub warmup_iters: usize,
    /// Multiplicative decay applied at each milestone
    pub gamma: f64,
    /// Iteration milestones for LR decay
    pub steps: Vec<usize>,
    /// Save a checkpoint every this many iterations
    pub checkpoint_period: usize,
    /// Log meters every this many iterations
    pub log_period: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            base_lr: 0.02,
            momentum: 0.9,
            weight_decay: 1e-4,
            warmup_factor: 1.0 / 3.0,
            warmup_iters: 500,
            gamma: 0.1,
            steps: vec![600, 800],
            checkpoint_period: 250,
            log_period: 20,
        }
    }
}

/// Proposal post-processing parameters
///
/// Separate train/test budgets for the top-N stages, matching the usual
/// proposal-selection setup where training keeps more candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    pub pre_nms_top_n_train: usize,
    pub pre_nms_top_n_test: usize,
    pub post_nms_top_n_train: usize,
    pub post_nms_top_n_test: usize,
    pub fpn_post_nms_top_n_train: usize,
    pub fpn_post_nms_top_n_test: usize,
    /// Apply the cross-level top-N over the whole batch during training
    /// rather than per image
    pub fpn_post_nms_per_batch: bool,
    /// IoU threshold for non-maximum suppression
    pub nms_thresh: f64,
    /// Minimum box side length in pixels; smaller proposals are dropped
    pub min_size: f64,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            pre_nms_top_n_train: 2000,
            pre_nms_top_n_test: 1000,
            post_nms_top_n_train: 500,
            post_nms_top_n_test: 300,
            fpn_post_nms_top_n_train: 500,
            fpn_post_nms_top_n_test: 300,
            fpn_post_nms_per_batch: true,
            nms_thresh: 0.7,
            min_size: 0.0,
        }
    }
}

/// Synthetic dataset parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Number of images in the dataset
    pub num_images: usize,
    /// Images per batch
    pub batch_size: usize,
    /// Number of feature levels
    pub levels: usize,
    /// Anchors generated per level
    pub anchors_per_level: usize,
    /// Ground-truth boxes per image
    pub boxes_per_image: usize,
    /// Image width and height in pixels
    pub image_size: (usize, usize),
    /// RNG seed for dataset generation
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            num_images: 64,
            batch_size: 4,
            levels: 3,
            anchors_per_level: 48,
            boxes_per_image: 4,
            image_size: (640, 480),
            seed: 0,
        }
    }
}

/// Evaluation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// IoU threshold above which a ground-truth box counts as recalled
    pub iou_thresh: f64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self { iou_thresh: 0.5 }
    }
}

/// Tensor dump parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Write per-iteration tensor dumps under the dump directory
    pub enabled: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RunConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.solver.max_iter == 0 {
            return Err(ConfigError::ZeroMaxIter);
        }
        if self.solver.base_lr <= 0.0 {
            return Err(ConfigError::NonPositiveLr(self.solver.base_lr));
        }
        if self.data.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.data.num_images == 0 {
            return Err(ConfigError::ZeroNumImages);
        }
        if !(self.proposals.nms_thresh > 0.0 && self.proposals.nms_thresh <= 1.0) {
            return Err(ConfigError::BadNmsThresh(self.proposals.nms_thresh));
        }
        if self.proposals.pre_nms_top_n_train == 0 || self.proposals.pre_nms_top_n_test == 0 {
            return Err(ConfigError::ZeroTopN("pre_nms_top_n"));
        }
        if self.proposals.post_nms_top_n_train == 0 || self.proposals.post_nms_top_n_test == 0 {
            return Err(ConfigError::ZeroTopN("post_nms_top_n"));
        }
        Ok(())
    }

    /// Absolute or cwd-relative path of the tensor dump directory
    pub fn dump_dir(&self) -> PathBuf {
        self.paths.output_dir.join(&self.paths.dump_dir)
    }

    /// Path of the `last_checkpoint` marker file
    pub fn checkpoint_marker(&self) -> PathBuf {
        self.paths.output_dir.join(&self.paths.checkpoint_marker)
    }

    /// Path of the run log file
    pub fn log_file(&self) -> PathBuf {
        self.paths.output_dir.join(&self.paths.log_file)
    }
}
