//! Greedy non-maximum suppression

use crate::boxlist::{iou, BoxList};

/// Run greedy NMS over scored boxes.
///
/// Returns the indices of the kept boxes in score-descending order. Boxes
/// with IoU above `thresh` against an already-kept box are suppressed. With
/// `max_proposals`, selection stops once that many boxes survive.
pub fn nms(
    boxes: &[[f64; 4]],
    scores: &[f64],
    thresh: f64,
    max_proposals: Option<usize>,
) -> Vec<usize> {
    assert_eq!(boxes.len(), scores.len());

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let cap = max_proposals.unwrap_or(usize::MAX);
    let mut keep: Vec<usize> = Vec::new();
    for &idx in &order {
        if keep.len() >= cap {
            break;
        }
        let suppressed = keep.iter().any(|&k| iou(&boxes[k], &boxes[idx]) > thresh);
        if !suppressed {
            keep.push(idx);
        }
    }
    keep
}

/// NMS over a [`BoxList`]; returns the surviving list and the kept indices.
///
/// The indices refer into the input list, exposed so callers can record which
/// boxes survived (the tensor-dump path in the selector relies on this).
pub fn boxlist_nms(
    list: &BoxList,
    thresh: f64,
    max_proposals: Option<usize>,
) -> (BoxList, Vec<usize>) {
    let keep = nms(list.boxes(), list.scores(), thresh, max_proposals);
    (list.select(&keep), keep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlapping_boxes_are_suppressed() {
        let boxes = vec![
            [0.0, 0.0, 9.0, 9.0],
            [1.0, 1.0, 10.0, 10.0], // heavy overlap with the first
            [50.0, 50.0, 59.0, 59.0],
        ];
        let scores = vec![0.9, 0.8, 0.7];
        let keep = nms(&boxes, &scores, 0.5, None);
        assert_eq!(keep, vec![0, 2]);
    }

    #[test]
    fn test_disjoint_boxes_all_survive_in_score_order() {
        let boxes = vec![
            [0.0, 0.0, 9.0, 9.0],
            [20.0, 20.0, 29.0, 29.0],
            [40.0, 40.0, 49.0, 49.0],
        ];
        let scores = vec![0.1, 0.9, 0.5];
        let keep = nms(&boxes, &scores, 0.5, None);
        assert_eq!(keep, vec![1, 2, 0]);
    }

    #[test]
    fn test_max_proposals_caps_output() {
        let boxes = vec![
            [0.0, 0.0, 9.0, 9.0],
            [20.0, 20.0, 29.0, 29.0],
            [40.0, 40.0, 49.0, 49.0],
        ];
        let scores = vec![0.3, 0.2, 0.1];
        let keep = nms(&boxes, &scores, 0.5, Some(2));
        assert_eq!(keep.len(), 2);
        assert_eq!(keep, vec![0, 1]);
    }

    #[test]
    fn test_boxlist_nms_returns_survivors() {
        let list = BoxList::new(
            vec![[0.0, 0.0, 9.0, 9.0], [0.0, 0.0, 9.0, 9.0]],
            vec![0.4, 0.6],
            (100, 100),
        );
        let (kept, indices) = boxlist_nms(&list, 0.5, None);
        assert_eq!(kept.len(), 1);
        assert_eq!(indices, vec![1]);
        assert_eq!(kept.scores()[0], 0.6);
    }

    #[test]
    fn test_empty_input() {
        let keep = nms(&[], &[], 0.5, None);
        assert!(keep.is_empty());
    }
}
