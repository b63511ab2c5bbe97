//! Delta box coder
//!
//! Encodes a target box relative to a reference box as `(dx, dy, dw, dh)` and
//! decodes predicted deltas back into boxes. `dw`/`dh` are clamped at
//! `ln(1000/16)` before exponentiation so an unbounded regression output
//! cannot produce an astronomically large box.

const TO_REMOVE: f64 = 1.0;

/// Box encode/decode with per-coordinate weights
#[derive(Debug, Clone)]
pub struct BoxCoder {
    weights: [f64; 4],
    bbox_xform_clip: f64,
}

impl Default for BoxCoder {
    fn default() -> Self {
        Self::new([1.0, 1.0, 1.0, 1.0])
    }
}

impl BoxCoder {
    pub fn new(weights: [f64; 4]) -> Self {
        Self {
            weights,
            bbox_xform_clip: (1000.0_f64 / 16.0).ln(),
        }
    }

    /// Encode `targets` relative to `references`, both xyxy
    pub fn encode(&self, targets: &[[f64; 4]], references: &[[f64; 4]]) -> Vec<[f64; 4]> {
        assert_eq!(targets.len(), references.len());
        let [wx, wy, ww, wh] = self.weights;
        targets
            .iter()
            .zip(references.iter())
            .map(|(gt, ex)| {
                let ex_w = ex[2] - ex[0] + TO_REMOVE;
                let ex_h = ex[3] - ex[1] + TO_REMOVE;
                let ex_cx = ex[0] + 0.5 * ex_w;
                let ex_cy = ex[1] + 0.5 * ex_h;

                let gt_w = gt[2] - gt[0] + TO_REMOVE;
                let gt_h = gt[3] - gt[1] + TO_REMOVE;
                let gt_cx = gt[0] + 0.5 * gt_w;
                let gt_cy = gt[1] + 0.5 * gt_h;

                [
                    wx * (gt_cx - ex_cx) / ex_w,
                    wy * (gt_cy - ex_cy) / ex_h,
                    ww * (gt_w / ex_w).ln(),
                    wh * (gt_h / ex_h).ln(),
                ]
            })
            .collect()
    }

    /// Decode predicted deltas against reference boxes
    pub fn decode(&self, deltas: &[[f64; 4]], references: &[[f64; 4]]) -> Vec<[f64; 4]> {
        assert_eq!(deltas.len(), references.len());
        let [wx, wy, ww, wh] = self.weights;
        deltas
            .iter()
            .zip(references.iter())
            .map(|(d, ex)| {
                let w = ex[2] - ex[0] + TO_REMOVE;
                let h = ex[3] - ex[1] + TO_REMOVE;
                let cx = ex[0] + 0.5 * w;
                let cy = ex[1] + 0.5 * h;

                let dx = d[0] / wx;
                let dy = d[1] / wy;
                let dw = (d[2] / ww).min(self.bbox_xform_clip);
                let dh = (d[3] / wh).min(self.bbox_xform_clip);

                let pred_cx = dx * w + cx;
                let pred_cy = dy * h + cy;
                let pred_w = dw.exp() * w;
                let pred_h = dh.exp() * h;

                [
                    pred_cx - 0.5 * pred_w,
                    pred_cy - 0.5 * pred_h,
                    pred_cx + 0.5 * pred_w - TO_REMOVE,
                    pred_cy + 0.5 * pred_h - TO_REMOVE,
                ]
            })
            .collect()
    }
}
