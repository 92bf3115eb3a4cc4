//! Post-processing of raw per-scale detections.

use crate::Rect;

/// Reduces the raw windows accepted across all pyramid levels to the final
/// detection set.
pub trait DetectionMerger {
    fn merge(&self, detections: Vec<Rect>) -> Vec<Rect>;
}

/// Replaces overlapping detections by their bounding union until no two
/// remaining rectangles overlap.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapMerger;

impl DetectionMerger for OverlapMerger {
    fn merge(&self, mut detections: Vec<Rect>) -> Vec<Rect> {
        // Each pass that merges anything shrinks the set, so this terminates.
        let mut merged = true;
        while merged {
            merged = false;
            let mut out: Vec<Rect> = Vec::with_capacity(detections.len());
            for r in detections {
                match out.iter_mut().find(|o| o.overlaps(&r)) {
                    Some(existing) => {
                        *existing = existing.union(&r);
                        merged = true;
                    }
                    None => out.push(r),
                }
            }
            detections = out;
        }
        detections
    }
}

/// Returns the raw detections unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl DetectionMerger for KeepAll {
    fn merge(&self, detections: Vec<Rect>) -> Vec<Rect> {
        detections
    }
}

impl<F> DetectionMerger for F
where
    F: Fn(Vec<Rect>) -> Vec<Rect>,
{
    fn merge(&self, detections: Vec<Rect>) -> Vec<Rect> {
        self(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_merger_unions_chains() {
        // a overlaps b, b overlaps c, a and c are disjoint
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(8, 0, 10, 10);
        let c = Rect::new(16, 0, 10, 10);
        let far = Rect::new(100, 100, 5, 5);

        let merged = OverlapMerger.merge(vec![a, far, c, b]);
        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&Rect::new(0, 0, 26, 10)));
        assert!(merged.contains(&far));
    }

    #[test]
    fn test_overlap_merger_result_is_disjoint() {
        let rects: Vec<Rect> = (0..20)
            .map(|i| Rect::new((i * 7) % 40, (i * 11) % 40, 6, 6))
            .collect();
        let merged = OverlapMerger.merge(rects.clone());

        for (i, a) in merged.iter().enumerate() {
            for b in &merged[i + 1..] {
                assert!(!a.overlaps(b));
            }
        }
        // Every input is covered by some output
        for r in &rects {
            assert!(merged.iter().any(|m| m.contains(r)));
        }
    }

    #[test]
    fn test_keep_all_and_closure() {
        let rects = vec![Rect::new(0, 0, 4, 4), Rect::new(1, 1, 4, 4)];
        assert_eq!(KeepAll.merge(rects.clone()), rects);

        let first_only = |v: Vec<Rect>| v.into_iter().take(1).collect::<Vec<_>>();
        assert_eq!(first_only.merge(rects.clone()), vec![rects[0]]);
        assert!(OverlapMerger.merge(Vec::new()).is_empty());
    }
}
