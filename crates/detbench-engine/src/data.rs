//! Deterministic synthetic detection dataset
//!
//! Stands in for the external data pipeline of the original harness, which
//! ran the comparison loop on fake image batches. Anchors sit on a regular
//! grid per feature level; ground-truth boxes are sampled from a seeded RNG,
//! so a given seed always produces the same dataset.

use detbench_boxes::BoxList;
use detbench_config::DataConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One image: per-level anchors plus ground truth
#[derive(Debug, Clone)]
pub struct DatasetImage {
    pub id: usize,
    /// Image size as (width, height)
    pub size: (usize, usize),
    /// Anchor boxes per feature level
    pub anchors: Vec<Vec<[f64; 4]>>,
    pub gt: BoxList,
}

/// Seeded in-memory dataset
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    images: Vec<DatasetImage>,
    batch_size: usize,
}

impl SyntheticDataset {
    pub fn generate(config: &DataConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let (width, height) = config.image_size;

        let images = (0..config.num_images)
            .map(|id| {
                let anchors = (0..config.levels)
                    .map(|level| anchor_grid(level, config.anchors_per_level, width, height))
                    .collect();
                let gt = sample_gt_boxes(&mut rng, config.boxes_per_image, width, height);
                DatasetImage { id, size: (width, height), anchors, gt }
            })
            .collect();

        Self { images, batch_size: config.batch_size.max(1) }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[DatasetImage] {
        &self.images
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches in one pass over the dataset
    pub fn num_batches(&self) -> usize {
        self.images.len().div_ceil(self.batch_size)
    }

    /// The `idx`-th batch, wrapping around the dataset so the training loop
    /// can run for more iterations than one epoch provides
    pub fn batch(&self, idx: usize) -> &[DatasetImage] {
        if self.images.is_empty() {
            return &[];
        }
        let start = (idx % self.num_batches()) * self.batch_size;
        let end = (start + self.batch_size).min(self.images.len());
        &self.images[start..end]
    }
}

/// Regular grid of square anchors for one level.
///
/// Anchor side doubles per level, mimicking a feature pyramid.
fn anchor_grid(level: usize, count: usize, width: usize, height: usize) -> Vec<[f64; 4]> {
    let side = 32.0 * (1 << level) as f64;
    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);
    let step_x = width as f64 / cols as f64;
    let step_y = height as f64 / rows as f64;

    (0..count)
        .map(|i| {
            let cx = (i % cols) as f64 * step_x + step_x / 2.0;
            let cy = (i / cols) as f64 * step_y + step_y / 2.0;
            [
                cx - side / 2.0,
                cy - side / 2.0,
                cx + side / 2.0 - 1.0,
                cy + side / 2.0 - 1.0,
            ]
        })
        .collect()
}

fn sample_gt_boxes(rng: &mut StdRng, count: usize, width: usize, height: usize) -> BoxList {
    let (wf, hf) = (width as f64, height as f64);
    let boxes: Vec<[f64; 4]> = (0..count)
        .map(|_| {
            // Clamp to the image so small configured sizes stay valid.
            let w = rng.gen_range(24.0_f64..96.0).min(wf);
            let h = rng.gen_range(24.0_f64..96.0).min(hf);
            let x1 = rng.gen_range(0.0..(wf - w + 1.0));
            let y1 = rng.gen_range(0.0..(hf - h + 1.0));
            [x1, y1, x1 + w - 1.0, y1 + h - 1.0]
        })
        .collect();
    let scores = vec![1.0; count];
    BoxList::new(boxes, scores, (width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DataConfig {
        DataConfig {
            num_images: 10,
            batch_size: 4,
            levels: 2,
            anchors_per_level: 16,
            boxes_per_image: 3,
            image_size: (320, 240),
            seed: 7,
        }
    }

    #[test]
    fn test_same_seed_same_dataset() {
        let a = SyntheticDataset::generate(&config());
        let b = SyntheticDataset::generate(&config());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.images().iter().zip(b.images().iter()) {
            assert_eq!(x.gt.boxes(), y.gt.boxes());
        }
    }

    #[test]
    fn test_different_seed_different_boxes() {
        let a = SyntheticDataset::generate(&config());
        let mut other = config();
        other.seed = 8;
        let b = SyntheticDataset::generate(&other);
        assert_ne!(a.images()[0].gt.boxes(), b.images()[0].gt.boxes());
    }

    #[test]
    fn test_batches_wrap_around() {
        let dataset = SyntheticDataset::generate(&config());
        assert_eq!(dataset.num_batches(), 3);
        assert_eq!(dataset.batch(0).len(), 4);
        assert_eq!(dataset.batch(2).len(), 2); // tail batch
        assert_eq!(dataset.batch(3)[0].id, dataset.batch(0)[0].id);
    }

    #[test]
    fn test_gt_boxes_inside_image() {
        let dataset = SyntheticDataset::generate(&config());
        for img in dataset.images() {
            for b in img.gt.boxes() {
                assert!(b[0] >= 0.0 && b[1] >= 0.0);
                assert!(b[2] < img.size.0 as f64);
                assert!(b[3] < img.size.1 as f64);
            }
        }
    }

    #[test]
    fn test_small_image_clamps_gt_boxes() {
        let mut cfg = config();
        cfg.image_size = (64, 64);
        let dataset = SyntheticDataset::generate(&cfg);
        for img in dataset.images() {
            for b in img.gt.boxes() {
                assert!(b[0] >= 0.0 && b[1] >= 0.0);
                assert!(b[2] < 64.0 && b[3] < 64.0);
            }
        }
    }

    #[test]
    fn test_empty_dataset_yields_empty_batches() {
        let mut cfg = config();
        cfg.num_images = 0;
        let dataset = SyntheticDataset::generate(&cfg);
        assert!(dataset.is_empty());
        assert!(dataset.batch(0).is_empty());
    }

    #[test]
    fn test_anchor_sides_double_per_level() {
        let dataset = SyntheticDataset::generate(&config());
        let img = &dataset.images()[0];
        let side0 = img.anchors[0][0][2] - img.anchors[0][0][0] + 1.0;
        let side1 = img.anchors[1][0][2] - img.anchors[1][0][0] + 1.0;
        assert!((side1 - 2.0 * side0).abs() < 1e-9);
    }
}
