//! Box geometry and proposal post-processing
//!
//! This crate implements the detection-side domain types: scored box lists,
//! the delta box coder, greedy non-maximum suppression, and the proposal
//! selector that turns raw per-level model outputs into a ranked proposal
//! set.

pub mod boxlist;
pub mod coder;
pub mod nms;
pub mod selector;

pub use boxlist::{iou, BoxList};
pub use coder::BoxCoder;
pub use nms::{boxlist_nms, nms};
pub use selector::{DumpSink, ImageOutputs, LevelOutput, ProposalSelector, SelectorParams};
