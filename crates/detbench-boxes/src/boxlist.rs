//! Scored box lists in xyxy pixel coordinates
//!
//! Widths and heights follow the Detectron pixel convention: a box covering a
//! single pixel has `x2 == x1` and width 1, so `width = x2 - x1 + 1`.

use serde::{Deserialize, Serialize};

const TO_REMOVE: f64 = 1.0;

/// A set of boxes over one image, each with an objectness score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxList {
    boxes: Vec<[f64; 4]>,
    scores: Vec<f64>,
    /// Image size as (width, height)
    size: (usize, usize),
}

impl BoxList {
    /// Create a box list; `boxes` and `scores` must have the same length.
    pub fn new(boxes: Vec<[f64; 4]>, scores: Vec<f64>, size: (usize, usize)) -> Self {
        assert_eq!(
            boxes.len(),
            scores.len(),
            "boxes and scores must be the same length"
        );
        Self { boxes, scores, size }
    }

    /// Empty list for an image of the given size
    pub fn empty(size: (usize, usize)) -> Self {
        Self { boxes: Vec::new(), scores: Vec::new(), size }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn boxes(&self) -> &[[f64; 4]] {
        &self.boxes
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    /// Per-box area under the +1 convention
    pub fn areas(&self) -> Vec<f64> {
        self.boxes
            .iter()
            .map(|b| (b[2] - b[0] + TO_REMOVE) * (b[3] - b[1] + TO_REMOVE))
            .collect()
    }

    /// Clamp all coordinates into the image bounds
    pub fn clip_to_image(mut self) -> Self {
        let max_x = self.size.0 as f64 - TO_REMOVE;
        let max_y = self.size.1 as f64 - TO_REMOVE;
        for b in &mut self.boxes {
            b[0] = b[0].clamp(0.0, max_x);
            b[1] = b[1].clamp(0.0, max_y);
            b[2] = b[2].clamp(0.0, max_x);
            b[3] = b[3].clamp(0.0, max_y);
        }
        self
    }

    /// Drop boxes whose width or height is below `min_size`
    pub fn remove_small_boxes(self, min_size: f64) -> Self {
        let keep: Vec<usize> = self
            .boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                let w = b[2] - b[0] + TO_REMOVE;
                let h = b[3] - b[1] + TO_REMOVE;
                w >= min_size && h >= min_size
            })
            .map(|(i, _)| i)
            .collect();
        self.select(&keep)
    }

    /// Keep only the boxes at the given indices, in the given order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            boxes: indices.iter().map(|&i| self.boxes[i]).collect(),
            scores: indices.iter().map(|&i| self.scores[i]).collect(),
            size: self.size,
        }
    }

    /// Concatenate lists over the same image
    pub fn concat(lists: &[BoxList]) -> Self {
        assert!(!lists.is_empty(), "cannot concat zero box lists");
        let size = lists[0].size;
        for list in lists {
            assert_eq!(list.size, size, "all box lists must share the image size");
        }
        let mut boxes = Vec::new();
        let mut scores = Vec::new();
        for list in lists {
            boxes.extend_from_slice(&list.boxes);
            scores.extend_from_slice(&list.scores);
        }
        Self { boxes, scores, size }
    }
}

/// Intersection-over-union of two xyxy boxes under the +1 convention
pub fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0]) + TO_REMOVE).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1]) + TO_REMOVE).max(0.0);
    let inter = ix * iy;
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0] + TO_REMOVE) * (a[3] - a[1] + TO_REMOVE);
    let area_b = (b[2] - b[0] + TO_REMOVE) * (b[3] - b[1] + TO_REMOVE);
    inter / (area_a + area_b - inter)
}
