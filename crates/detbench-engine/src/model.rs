//! Learnable proposal model
//!
//! A deliberately small stand-in for the external detector the original
//! harness drove: a linear regressor from normalized anchor geometry to box
//! deltas, plus a logistic objectness head. Both heads have closed-form
//! gradients, so the training loop needs no autograd library. The training
//! contract matches the original engine: one step returns a map of named
//! losses, and the summed map is what gets stepped on.

use crate::data::DatasetImage;
use detbench_boxes::{iou, BoxCoder, ImageOutputs, LevelOutput};
use std::collections::BTreeMap;

/// IoU above which an anchor counts as a positive example
const POSITIVE_IOU: f64 = 0.3;
/// Smooth-L1 transition point
const SMOOTH_L1_BETA: f64 = 1.0;

const NUM_FEATURES: usize = 4;
// Weight layout: 4x4 delta matrix row-major, 4 delta biases, 4 objectness
// weights, 1 objectness bias.
const DELTA_W: usize = 0;
const DELTA_B: usize = 16;
const OBJ_W: usize = 20;
const OBJ_B: usize = 24;
const NUM_PARAMS: usize = 25;

/// Output of one training step
#[derive(Debug)]
pub struct StepOutput {
    /// Named losses; the trainer sums them for logging
    pub losses: BTreeMap<String, f64>,
    /// Gradient for every model parameter
    pub grads: Vec<f64>,
}

/// Linear delta regressor + logistic objectness head
#[derive(Debug, Clone)]
pub struct ProposalModel {
    weights: Vec<f64>,
    coder: BoxCoder,
}

impl Default for ProposalModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProposalModel {
    pub fn new() -> Self {
        Self {
            weights: vec![0.0; NUM_PARAMS],
            coder: BoxCoder::default(),
        }
    }

    pub fn num_params() -> usize {
        NUM_PARAMS
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    /// Replace the weights, e.g. when resuming from a checkpoint
    pub fn set_weights(&mut self, weights: Vec<f64>) -> anyhow::Result<()> {
        anyhow::ensure!(
            weights.len() == NUM_PARAMS,
            "checkpoint has {} parameters, model expects {}",
            weights.len(),
            NUM_PARAMS
        );
        self.weights = weights;
        Ok(())
    }

    /// Forward and backward over one batch.
    ///
    /// Objectness is a binary cross-entropy over every anchor; box regression
    /// is a smooth-L1 over positive anchors only, each against the deltas
    /// encoding its best-IoU ground-truth box.
    pub fn forward_backward(&self, batch: &[DatasetImage]) -> StepOutput {
        let mut grads = vec![0.0; NUM_PARAMS];
        let mut obj_loss = 0.0;
        let mut box_loss = 0.0;
        let mut num_anchors = 0usize;
        let mut num_positive = 0usize;

        // First pass: counts, so per-example gradient scale is known upfront.
        for img in batch {
            for level in &img.anchors {
                num_anchors += level.len();
                for anchor in level {
                    if match_gt(anchor, img).is_some() {
                        num_positive += 1;
                    }
                }
            }
        }
        if num_anchors == 0 {
            let mut losses = BTreeMap::new();
            losses.insert("loss_objectness".to_string(), 0.0);
            losses.insert("loss_box_reg".to_string(), 0.0);
            return StepOutput { losses, grads };
        }

        let obj_scale = 1.0 / num_anchors as f64;
        let box_scale = if num_positive > 0 {
            1.0 / (num_positive * NUM_FEATURES) as f64
        } else {
            0.0
        };

        for img in batch {
            for level in &img.anchors {
                for anchor in level {
                    let feat = features(anchor, img.size);
                    let matched = match_gt(anchor, img);
                    let label = if matched.is_some() { 1.0 } else { 0.0 };

                    // Objectness head.
                    let logit = self.objectness_logit(&feat);
                    let p = sigmoid(logit);
                    obj_loss += bce(p, label) * obj_scale;
                    let dlogit = (p - label) * obj_scale;
                    for c in 0..NUM_FEATURES {
                        grads[OBJ_W + c] += dlogit * feat[c];
                    }
                    grads[OBJ_B] += dlogit;

                    // Box head, positives only.
                    if let Some(gt_box) = matched {
                        let target = self.coder.encode(&[gt_box], &[*anchor])[0];
                        let pred = self.delta_pred(&feat);
                        for r in 0..4 {
                            let diff = pred[r] - target[r];
                            let (l, dl) = smooth_l1(diff);
                            box_loss += l * box_scale;
                            let g = dl * box_scale;
                            for c in 0..NUM_FEATURES {
                                grads[DELTA_W + r * NUM_FEATURES + c] += g * feat[c];
                            }
                            grads[DELTA_B + r] += g;
                        }
                    }
                }
            }
        }

        let mut losses = BTreeMap::new();
        losses.insert("loss_objectness".to_string(), obj_loss);
        losses.insert("loss_box_reg".to_string(), box_loss);
        StepOutput { losses, grads }
    }

    /// Raw per-level outputs for one image, ready for proposal selection
    pub fn predict(&self, img: &DatasetImage) -> ImageOutputs {
        let levels = img
            .anchors
            .iter()
            .map(|anchors| {
                let mut objectness = Vec::with_capacity(anchors.len());
                let mut deltas = Vec::with_capacity(anchors.len());
                for anchor in anchors {
                    let feat = features(anchor, img.size);
                    objectness.push(self.objectness_logit(&feat));
                    deltas.push(self.delta_pred(&feat));
                }
                LevelOutput { anchors: anchors.clone(), objectness, deltas }
            })
            .collect();
        ImageOutputs { levels, size: img.size }
    }

    fn objectness_logit(&self, feat: &[f64; NUM_FEATURES]) -> f64 {
        let mut logit = self.weights[OBJ_B];
        for c in 0..NUM_FEATURES {
            logit += self.weights[OBJ_W + c] * feat[c];
        }
        logit
    }

    fn delta_pred(&self, feat: &[f64; NUM_FEATURES]) -> [f64; 4] {
        let mut pred = [0.0; 4];
        for (r, out) in pred.iter_mut().enumerate() {
            let mut acc = self.weights[DELTA_B + r];
            for c in 0..NUM_FEATURES {
                acc += self.weights[DELTA_W + r * NUM_FEATURES + c] * feat[c];
            }
            *out = acc;
        }
        pred
    }
}

/// Best-IoU ground-truth box for an anchor, if the overlap clears the
/// positive threshold
fn match_gt(anchor: &[f64; 4], img: &DatasetImage) -> Option<[f64; 4]> {
    let mut best: Option<([f64; 4], f64)> = None;
    for gt_box in img.gt.boxes() {
        let overlap = iou(anchor, gt_box);
        if overlap >= POSITIVE_IOU && best.map_or(true, |(_, b)| overlap > b) {
            best = Some((*gt_box, overlap));
        }
    }
    best.map(|(b, _)| b)
}

/// Normalized anchor geometry: center and size relative to the image
fn features(anchor: &[f64; 4], size: (usize, usize)) -> [f64; NUM_FEATURES] {
    let (width, height) = (size.0 as f64, size.1 as f64);
    let aw = anchor[2] - anchor[0] + 1.0;
    let ah = anchor[3] - anchor[1] + 1.0;
    [
        (anchor[0] + 0.5 * aw) / width,
        (anchor[1] + 0.5 * ah) / height,
        aw / width,
        ah / height,
    ]
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn bce(p: f64, label: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
}

/// Smooth L1 and its derivative at `diff`
fn smooth_l1(diff: f64) -> (f64, f64) {
    if diff.abs() < SMOOTH_L1_BETA {
        (0.5 * diff * diff / SMOOTH_L1_BETA, diff / SMOOTH_L1_BETA)
    } else {
        (diff.abs() - 0.5 * SMOOTH_L1_BETA, diff.signum())
    }
}
