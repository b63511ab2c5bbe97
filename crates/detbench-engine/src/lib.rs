//! Training and evaluation engine for the detbench harness
//!
//! The engine owns everything between the launcher and the box math: the
//! metered training loop, checkpointing with the `last_checkpoint` marker,
//! the timed inference pass, and the per-iteration tensor dump facility.

pub mod checkpoint;
pub mod data;
pub mod inference;
pub mod meters;
pub mod model;
pub mod optimizer;
pub mod saver;
pub mod timer;
pub mod trainer;

pub use checkpoint::{CheckpointData, Checkpointer};
pub use data::{DatasetImage, SyntheticDataset};
pub use inference::{run_inference, EvalReport};
pub use meters::{MetricLogger, SmoothedValue};
pub use model::ProposalModel;
pub use optimizer::{Sgd, WarmupMultiStepLr};
pub use saver::TensorSaver;
pub use timer::{format_time, Timer};
pub use trainer::{do_train, TrainReport};
