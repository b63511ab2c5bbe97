//! Proposal selection over raw model outputs
//!
//! Turns per-level objectness logits and box deltas into a ranked proposal
//! set per image: keep the pre-NMS top-N per level, decode deltas against the
//! anchors, clip to the image, drop degenerate boxes, run NMS, then apply a
//! final top-N across all levels. During training the ground-truth boxes are
//! appended so downstream consumers always see at least the true objects.

use crate::boxlist::BoxList;
use crate::coder::BoxCoder;
use crate::nms::boxlist_nms;

/// Receiver for intermediate value dumps produced during selection.
///
/// The trainer wires its tensor saver in here; selection itself never touches
/// the filesystem.
pub trait DumpSink {
    fn dump(&mut self, scope: &str, name: &str, values: &[f64]);
}

/// Raw model outputs for one feature level of one image
#[derive(Debug, Clone)]
pub struct LevelOutput {
    /// Anchor boxes, xyxy
    pub anchors: Vec<[f64; 4]>,
    /// Objectness logits, one per anchor
    pub objectness: Vec<f64>,
    /// Regression deltas, one per anchor
    pub deltas: Vec<[f64; 4]>,
}

/// Raw model outputs for one image across all levels
#[derive(Debug, Clone)]
pub struct ImageOutputs {
    pub levels: Vec<LevelOutput>,
    /// Image size as (width, height)
    pub size: (usize, usize),
}

/// Selection budgets and thresholds
#[derive(Debug, Clone)]
pub struct SelectorParams {
    /// Candidates kept per level before NMS
    pub pre_nms_top_n: usize,
    /// Candidates kept per level after NMS
    pub post_nms_top_n: usize,
    /// NMS IoU threshold
    pub nms_thresh: f64,
    /// Minimum box side length
    pub min_size: f64,
    /// Final budget across all levels
    pub fpn_post_nms_top_n: usize,
    /// Apply the final budget over the whole batch during training.
    /// Kept per-batch by default for parity with the Detectron behavior,
    /// even though per-image would be the more natural choice.
    pub fpn_post_nms_per_batch: bool,
    /// Training mode changes cross-level selection and enables the
    /// ground-truth append
    pub training: bool,
}

/// Post-processes raw outputs into proposals
#[derive(Debug, Clone)]
pub struct ProposalSelector {
    params: SelectorParams,
    coder: BoxCoder,
}

impl ProposalSelector {
    pub fn new(params: SelectorParams) -> Self {
        Self { params, coder: BoxCoder::default() }
    }

    pub fn with_coder(params: SelectorParams, coder: BoxCoder) -> Self {
        Self { params, coder }
    }

    /// Select proposals for a batch of images.
    ///
    /// `targets` supplies per-image ground truth for the training-time
    /// append; its length must match `images` when present.
    pub fn select(
        &self,
        images: &[ImageOutputs],
        targets: Option<&[BoxList]>,
        mut sink: Option<&mut (dyn DumpSink + '_)>,
    ) -> Vec<BoxList> {
        let num_levels = images.first().map_or(0, |img| img.levels.len());

        let mut boxlists: Vec<BoxList> = images
            .iter()
            .enumerate()
            .map(|(img_idx, img)| {
                let per_level: Vec<BoxList> = img
                    .levels
                    .iter()
                    .enumerate()
                    .map(|(level, lvl)| {
                        self.select_single_level(
                            img_idx,
                            level,
                            lvl,
                            img.size,
                            sink.as_deref_mut(),
                        )
                    })
                    .collect();
                BoxList::concat(&per_level)
            })
            .collect();

        if num_levels > 1 {
            boxlists = self.select_over_all_levels(boxlists);
        }

        if self.params.training {
            if let Some(targets) = targets {
                boxlists = add_gt_proposals(boxlists, targets);
            }
        }

        if let Some(sink) = sink.as_deref_mut() {
            for (img_idx, list) in boxlists.iter().enumerate() {
                sink.dump(
                    "rpn",
                    &format!("final_proposals_img_{img_idx}"),
                    &flatten(list.boxes()),
                );
            }
        }

        boxlists
    }

    fn select_single_level(
        &self,
        img_idx: usize,
        level: usize,
        lvl: &LevelOutput,
        size: (usize, usize),
        mut sink: Option<&mut (dyn DumpSink + '_)>,
    ) -> BoxList {
        assert_eq!(lvl.anchors.len(), lvl.objectness.len());
        assert_eq!(lvl.anchors.len(), lvl.deltas.len());

        let scores: Vec<f64> = lvl.objectness.iter().map(|&x| sigmoid(x)).collect();
        let k = self.params.pre_nms_top_n.min(scores.len());
        let topk = topk_indices(&scores, k);

        if let Some(sink) = sink.as_deref_mut() {
            let as_f64: Vec<f64> = topk.iter().map(|&i| i as f64).collect();
            sink.dump("rpn", &format!("topk_idx_img_{img_idx}_level_{level}"), &as_f64);
        }

        let ref_boxes: Vec<[f64; 4]> = topk.iter().map(|&i| lvl.anchors[i]).collect();
        let deltas: Vec<[f64; 4]> = topk.iter().map(|&i| lvl.deltas[i]).collect();
        let top_scores: Vec<f64> = topk.iter().map(|&i| scores[i]).collect();

        let proposals = self.coder.decode(&deltas, &ref_boxes);

        if let Some(sink) = sink.as_deref_mut() {
            sink.dump("rpn/box_decode", "ref_boxes", &flatten(&ref_boxes));
            sink.dump("rpn/box_decode", "boxes_delta", &flatten(&deltas));
            sink.dump("rpn/box_decode", "boxes", &flatten(&proposals));
        }

        let list = BoxList::new(proposals, top_scores, size)
            .clip_to_image()
            .remove_small_boxes(self.params.min_size);

        let (kept, keep_idx) =
            boxlist_nms(&list, self.params.nms_thresh, Some(self.params.post_nms_top_n));

        if let Some(sink) = sink.as_deref_mut() {
            let as_f64: Vec<f64> = keep_idx.iter().map(|&i| i as f64).collect();
            sink.dump("rpn", &format!("nms_indices_img_{img_idx}_level_{level}"), &as_f64);
            sink.dump(
                "rpn",
                &format!("proposals_img_{img_idx}_level_{level}"),
                &flatten(kept.boxes()),
            );
        }

        kept
    }

    /// Apply the final cross-level budget.
    ///
    /// During training with per-batch mode the top-N is taken over all images
    /// combined and applied as an order-preserving mask; otherwise each image
    /// keeps its own top-N in score order.
    fn select_over_all_levels(&self, boxlists: Vec<BoxList>) -> Vec<BoxList> {
        if self.params.training && self.params.fpn_post_nms_per_batch {
            let all_scores: Vec<f64> = boxlists
                .iter()
                .flat_map(|list| list.scores().iter().copied())
                .collect();
            let k = self.params.fpn_post_nms_top_n.min(all_scores.len());
            let top = topk_indices(&all_scores, k);

            let mut mask = vec![false; all_scores.len()];
            for &i in &top {
                mask[i] = true;
            }

            let mut offset = 0;
            boxlists
                .into_iter()
                .map(|list| {
                    let keep: Vec<usize> = (0..list.len())
                        .filter(|&i| mask[offset + i])
                        .collect();
                    offset += list.len();
                    list.select(&keep)
                })
                .collect()
        } else {
            boxlists
                .into_iter()
                .map(|list| {
                    let k = self.params.fpn_post_nms_top_n.min(list.len());
                    let top = topk_indices(list.scores(), k);
                    list.select(&top)
                })
                .collect()
        }
    }
}

/// Append ground-truth boxes to each image's proposals with objectness 1.0
fn add_gt_proposals(proposals: Vec<BoxList>, targets: &[BoxList]) -> Vec<BoxList> {
    assert_eq!(proposals.len(), targets.len());
    proposals
        .into_iter()
        .zip(targets.iter())
        .map(|(list, gt)| {
            let gt_list = BoxList::new(
                gt.boxes().to_vec(),
                vec![1.0; gt.len()],
                list.size(),
            );
            BoxList::concat(&[list, gt_list])
        })
        .collect()
}

/// Indices of the `k` highest scores, descending, ties broken by index
fn topk_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order.truncate(k);
    order
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn flatten(boxes: &[[f64; 4]]) -> Vec<f64> {
    boxes.iter().flatten().copied().collect()
}
