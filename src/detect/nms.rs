use std::cmp::Ordering;

use crate::detect::prediction::Prediction;

pub const DEFAULT_MAX_BOXES: usize = 10;
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.1;

/// Greedy non-max suppression.
///
/// Candidates are ranked by score, ties keep their input order. The best
/// remaining candidate is kept and every other candidate overlapping it by
/// more than `overlap_threshold` IOU is dropped, until `limit` boxes are kept
/// or no candidates remain.
pub fn non_max_suppression(
    predictions: &[Prediction],
    limit: usize,
    overlap_threshold: f32,
) -> Vec<Prediction> {
    let mut order: Vec<usize> = (0..predictions.len()).collect();
    // Vec::sort_by is stable.
    order.sort_by(|&a, &b| {
        predictions[b]
            .score
            .partial_cmp(&predictions[a].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut active = vec![true; order.len()];
    let mut kept = Vec::with_capacity(limit.min(order.len()));

    for i in 0..order.len() {
        if kept.len() >= limit {
            break;
        }
        if !active[i] {
            continue;
        }
        let candidate = predictions[order[i]];
        kept.push(candidate);
        for j in (i + 1)..order.len() {
            if active[j] && candidate.rect.iou(&predictions[order[j]].rect) > overlap_threshold {
                active[j] = false;
            }
        }
    }

    kept
}

/// Non-max suppression with fixed limits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NonMaxSuppressor {
    pub limit: usize,
    pub overlap_threshold: f32,
}

impl Default for NonMaxSuppressor {
    fn default() -> Self {
        Self {
            limit: DEFAULT_MAX_BOXES,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

impl NonMaxSuppressor {
    pub fn new(limit: usize, overlap_threshold: f32) -> Self {
        Self {
            limit,
            overlap_threshold,
        }
    }

    pub fn suppress(&self, predictions: &[Prediction]) -> Vec<Prediction> {
        non_max_suppression(predictions, self.limit, self.overlap_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pred(class_index: usize, score: f32, x: f32, y: f32, w: f32, h: f32) -> Prediction {
        Prediction {
            class_index,
            score,
            rect: Rect::new(x, y, w, h),
        }
    }

    fn random_predictions(rng: &mut StdRng, count: usize) -> Vec<Prediction> {
        (0..count)
            .map(|_| {
                // Coarse score steps so ties actually occur.
                let score = (rng.gen_range(30..100) as f32) / 100.0;
                pred(
                    rng.gen_range(0..22),
                    score,
                    rng.gen_range(0.0..380.0),
                    rng.gen_range(0.0..380.0),
                    rng.gen_range(8.0..120.0),
                    rng.gen_range(8.0..120.0),
                )
            })
            .collect()
    }

    #[test]
    fn keeps_best_of_overlapping_cluster() {
        let input = vec![
            pred(0, 0.5, 0.0, 0.0, 100.0, 100.0),
            pred(1, 0.9, 5.0, 5.0, 100.0, 100.0),
            pred(2, 0.7, 300.0, 300.0, 50.0, 50.0),
        ];
        let kept = non_max_suppression(&input, 10, 0.1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].class_index, 1);
        assert_eq!(kept[1].class_index, 2);
    }

    #[test]
    fn equal_scores_keep_emission_order() {
        let input = vec![
            pred(0, 0.8, 0.0, 0.0, 100.0, 100.0),
            pred(1, 0.8, 2.0, 2.0, 100.0, 100.0),
            pred(2, 0.8, 200.0, 200.0, 10.0, 10.0),
        ];
        let kept = non_max_suppression(&input, 10, 0.1);
        assert_eq!(
            kept.iter().map(|p| p.class_index).collect::<Vec<_>>(),
            vec![0, 2]
        );
    }

    #[test]
    fn limit_truncates_output() {
        let input: Vec<Prediction> = (0..20)
            .map(|i| pred(i, 0.5 + i as f32 * 0.01, i as f32 * 20.0, 0.0, 10.0, 10.0))
            .collect();
        let kept = NonMaxSuppressor::default().suppress(&input);
        assert_eq!(kept.len(), DEFAULT_MAX_BOXES);
        assert_eq!(kept[0].class_index, 19);
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let input = vec![pred(0, 0.9, 0.0, 0.0, 10.0, 10.0)];
        assert!(non_max_suppression(&input, 0, 0.1).is_empty());
        assert_eq!(non_max_suppression(&input, 1, 0.1).len(), 1);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(non_max_suppression(&[], 10, 0.1).is_empty());
    }

    #[test]
    fn suppression_is_idempotent_on_random_sets() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let nms = NonMaxSuppressor::default();
        for _ in 0..200 {
            let count = rng.gen_range(0..60);
            let input = random_predictions(&mut rng, count);
            let once = nms.suppress(&input);
            let twice = nms.suppress(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn output_is_bounded_and_pairwise_disjoint_enough() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let input = random_predictions(&mut rng, 80);
            let kept = non_max_suppression(&input, 10, 0.1);
            assert!(kept.len() <= 10);
            for (i, a) in kept.iter().enumerate() {
                for b in &kept[i + 1..] {
                    assert!(a.rect.iou(&b.rect) <= 0.1);
                }
                if i > 0 {
                    assert!(kept[i - 1].score >= a.score);
                }
            }
        }
    }
}
