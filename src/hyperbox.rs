use serde::{Deserialize, Serialize};

use crate::utils::kahan_sum;

/// An axis-aligned box anchored at the origin, described by its upper corner.
///
/// Boxes carry maximize-oriented, non-negative values: fitness weights are
/// applied (and negatives clamped to zero) before a box is built, so inside
/// this module bigger is always better on every axis.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Hyperbox {
    corner: Vec<f64>,
}

impl Hyperbox {
    /// # Panics
    /// Panics when a corner coordinate is negative or not finite.
    pub fn new(corner: Vec<f64>) -> Hyperbox {
        assert!(
            corner.iter().all(|c| c.is_finite() && *c >= 0.0),
            "hyperbox corners must be finite and non-negative"
        );
        Hyperbox { corner }
    }

    pub fn dim(&self) -> usize {
        self.corner.len()
    }

    pub fn corner(&self) -> &[f64] {
        &self.corner
    }

    pub fn get(&self, d: usize) -> f64 {
        self.corner[d]
    }

    pub fn volume(&self) -> f64 {
        self.corner.iter().product()
    }

    /// The box without dimension `d`.
    pub fn project(&self, d: usize) -> Hyperbox {
        let corner = self
            .corner
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != d)
            .map(|(_, &c)| c)
            .collect();
        Hyperbox { corner }
    }

    /// Whether `point` lies inside the box (componentwise at most the corner).
    pub fn contains(&self, point: &[f64]) -> bool {
        point.iter().zip(self.corner.iter()).all(|(p, c)| p <= c)
    }

    /// Componentwise at least `other` with a strict improvement somewhere.
    pub fn dominates(&self, other: &Hyperbox) -> bool {
        let mut strictly_better = false;
        for (a, b) in self.corner.iter().zip(other.corner.iter()) {
            if a < b {
                return false;
            }
            if a > b {
                strictly_better = true;
            }
        }
        strictly_better
    }
}

/// Sorted distinct positive corner values of `boxes` along `dim`.
fn boundaries(boxes: &[Hyperbox], dim: usize) -> Vec<f64> {
    let mut values: Vec<f64> = boxes
        .iter()
        .map(|b| b.get(dim))
        .filter(|v| *v > 0.0)
        .collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values.dedup();
    values
}

/// 0-anchored intervals between consecutive boundaries.
fn intervals(bounds: &[f64]) -> Vec<(f64, f64)> {
    let mut result = Vec::with_capacity(bounds.len());
    let mut lo = 0.0;
    for &hi in bounds {
        result.push((lo, hi));
        lo = hi;
    }
    result
}

/// Visit every cell of the grid spanned by `interval_sets` with its midpoint
/// and volume. An empty `interval_sets` yields one trivial cell of volume 1;
/// a dimension without intervals yields no cells.
fn for_each_cell<F: FnMut(&[f64], f64)>(interval_sets: &[Vec<(f64, f64)>], mut visit: F) {
    if interval_sets.iter().any(|s| s.is_empty()) {
        return;
    }
    let mut idx = vec![0usize; interval_sets.len()];
    let mut mid = vec![0.0; interval_sets.len()];
    loop {
        let mut vol = 1.0;
        for (d, set) in interval_sets.iter().enumerate() {
            let (lo, hi) = set[idx[d]];
            mid[d] = 0.5 * (lo + hi);
            vol *= hi - lo;
        }
        visit(&mid, vol);
        let mut d = 0;
        loop {
            if d == interval_sets.len() {
                return;
            }
            idx[d] += 1;
            if idx[d] < interval_sets[d].len() {
                break;
            }
            idx[d] = 0;
            d += 1;
        }
    }
}

fn check_dims(boxes: &[Hyperbox]) -> usize {
    let k = boxes[0].dim();
    assert!(
        boxes.iter().all(|b| b.dim() == k),
        "hyperboxes of mixed dimensionality"
    );
    assert!(k >= 1, "hyperboxes must have at least one dimension");
    k
}

/// One axis variant of the dominated-extent sweep shared by [hypervolume]
/// and [cross_hypervolume]. The grid spans all dimensions with boundaries
/// from the train corners; each cell's owner is the containing train box
/// with the largest extent along `axis`, and the owner's test partner
/// contributes its own extent along `axis` times the cell volume. Tied
/// owners contribute the mean of their partners' extents.
fn sweep_axis(train: &[Hyperbox], test: &[Hyperbox], axis: usize) -> f64 {
    let k = train[0].dim();
    let interval_sets: Vec<Vec<(f64, f64)>> =
        (0..k).map(|d| intervals(&boundaries(train, d))).collect();
    let mut contributions: Vec<f64> = Vec::new();
    for_each_cell(&interval_sets, |mid, vol| {
        let mut best = f64::NEG_INFINITY;
        let mut owners: Vec<usize> = Vec::new();
        for (i, b) in train.iter().enumerate() {
            if b.contains(mid) {
                let ext = b.get(axis);
                if ext > best {
                    best = ext;
                    owners.clear();
                    owners.push(i);
                } else if ext == best {
                    owners.push(i);
                }
            }
        }
        if !owners.is_empty() {
            let partner_extent = owners.iter().map(|&i| test[i].get(axis)).sum::<f64>()
                / owners.len() as f64;
            contributions.push(partner_extent * vol);
        }
    });
    kahan_sum(contributions)
}

/// Dominated-extent measure of a set of 0-anchored boxes: the mean over
/// axes of the per-axis sweep, each sweep integrating the owning box's
/// extent over the covered region.
pub fn hypervolume(boxes: &[Hyperbox]) -> f64 {
    if boxes.is_empty() {
        return 0.0;
    }
    let k = check_dims(boxes);
    let per_axis: Vec<f64> = (0..k).map(|a| sweep_axis(boxes, boxes, a)).collect();
    kahan_sum(per_axis) / k as f64
}

/// Hypervolume of the test-side boxes indexed by the train-side structure:
/// the sweep grid and ownership come from `train`, the contributed extents
/// from each owner's `test` partner. `cross_hypervolume(a, a)` equals
/// `hypervolume(a)`.
///
/// # Panics
/// Panics when the two sequences differ in length or dimensionality.
pub fn cross_hypervolume(train: &[Hyperbox], test: &[Hyperbox]) -> f64 {
    assert!(
        train.len() == test.len(),
        "{} train boxes paired with {} test boxes",
        train.len(),
        test.len()
    );
    if train.is_empty() {
        return 0.0;
    }
    let k = check_dims(train);
    assert!(
        check_dims(test) == k,
        "train and test boxes of different dimensionality"
    );
    let per_axis: Vec<f64> = (0..k).map(|a| sweep_axis(train, test, a)).collect();
    kahan_sum(per_axis) / k as f64
}

/// Mean over axes of the cell-integrated train-test gap: for each axis d,
/// cells come from the train grid over the other dimensions, and each cell
/// contributes its volume times |train_d - test_d| of the owning pair (tied
/// owners averaged). Dominated train boxes are excluded together with their
/// test partners before the sweep.
///
/// # Panics
/// Panics when the two sequences differ in length or dimensionality.
pub fn pareto_delta(train: &[Hyperbox], test: &[Hyperbox]) -> f64 {
    assert!(
        train.len() == test.len(),
        "{} train boxes paired with {} test boxes",
        train.len(),
        test.len()
    );
    if train.is_empty() {
        return 0.0;
    }
    let k = check_dims(train);
    assert!(
        check_dims(test) == k,
        "train and test boxes of different dimensionality"
    );

    // pairwise exclusion of dominated training boxes
    let keep: Vec<usize> = (0..train.len())
        .filter(|&i| {
            !train
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other.dominates(&train[i]))
        })
        .collect();
    let train: Vec<&Hyperbox> = keep.iter().map(|&i| &train[i]).collect();
    let test: Vec<&Hyperbox> = keep.iter().map(|&i| &test[i]).collect();

    let mut per_axis: Vec<f64> = Vec::with_capacity(k);
    for d in 0..k {
        let projected: Vec<Hyperbox> = train.iter().map(|b| b.project(d)).collect();
        let other_dims: Vec<usize> = (0..k).filter(|&x| x != d).collect();
        let interval_sets: Vec<Vec<(f64, f64)>> = other_dims
            .iter()
            .map(|&dim| intervals(&boundaries_of_refs(&train, dim)))
            .collect();
        let mut contributions: Vec<f64> = Vec::new();
        for_each_cell(&interval_sets, |mid, vol| {
            let mut best = f64::NEG_INFINITY;
            let mut owners: Vec<usize> = Vec::new();
            for (i, b) in projected.iter().enumerate() {
                if b.contains(mid) {
                    let ext = train[i].get(d);
                    if ext > best {
                        best = ext;
                        owners.clear();
                        owners.push(i);
                    } else if ext == best {
                        owners.push(i);
                    }
                }
            }
            if !owners.is_empty() {
                let gap = owners
                    .iter()
                    .map(|&i| (train[i].get(d) - test[i].get(d)).abs())
                    .sum::<f64>()
                    / owners.len() as f64;
                contributions.push(gap * vol);
            }
        });
        per_axis.push(kahan_sum(contributions));
    }
    kahan_sum(per_axis) / k as f64
}

fn boundaries_of_refs(boxes: &[&Hyperbox], dim: usize) -> Vec<f64> {
    let mut values: Vec<f64> = boxes
        .iter()
        .map(|b| b.get(dim))
        .filter(|v| *v > 0.0)
        .collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes(corners: &[&[f64]]) -> Vec<Hyperbox> {
        corners.iter().map(|c| Hyperbox::new(c.to_vec())).collect()
    }

    #[test]
    fn test_dominates() {
        let a = Hyperbox::new(vec![1.0, 1.0]);
        let b = Hyperbox::new(vec![0.5, 1.0]);
        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
        assert!(!a.dominates(&a), "a box never dominates itself");
        let c = Hyperbox::new(vec![2.0, 0.5]);
        assert!(!a.dominates(&c) && !c.dominates(&a), "trade-offs do not dominate");
    }

    #[test]
    fn test_project_and_volume() {
        let b = Hyperbox::new(vec![2.0, 0.5, 3.0]);
        assert_eq!(b.project(1).corner(), &[2.0, 3.0]);
        assert!((b.volume() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_hypervolume_of_empty_set_is_zero() {
        assert_eq!(hypervolume(&[]), 0.0);
        assert_eq!(pareto_delta(&[], &[]), 0.0);
        assert_eq!(cross_hypervolume(&[], &[]), 0.0);
    }

    #[test]
    fn test_hypervolume_single_box() {
        // one box measures volume times the mean corner coordinate
        let hv = hypervolume(&boxes(&[&[1.0, 1.0]]));
        assert!((hv - 1.0).abs() < 1e-9, "unit box should measure 1, got {}", hv);
        let hv = hypervolume(&boxes(&[&[0.5, 1.5]]));
        assert!((hv - 0.75).abs() < 1e-9, "box (0.5, 1.5) should measure 0.75, got {}", hv);
        let hv = hypervolume(&boxes(&[&[0.5, 0.5]]));
        assert!((hv - 0.125).abs() < 1e-9, "box (0.5, 0.5) should measure 1/8, got {}", hv);
        let hv = hypervolume(&boxes(&[&[2.0, 1.0]]));
        assert!((hv - 3.0).abs() < 1e-9, "box (2, 1) should measure 3, got {}", hv);
    }

    #[test]
    fn test_hypervolume_three_box_front() {
        let front = boxes(&[&[1.0, 1.0], &[2.0, 0.5], &[0.5, 2.0]]);
        let hv = hypervolume(&front);
        assert!((hv - 2.75).abs() < 1e-9, "expected 2.75, got {}", hv);
    }

    #[test]
    fn test_hypervolume_is_monotone() {
        let mut front = boxes(&[&[1.0, 1.0], &[2.0, 0.5]]);
        let before = hypervolume(&front);
        front.push(Hyperbox::new(vec![0.5, 2.0]));
        let after = hypervolume(&front);
        assert!(after >= before, "adding a box decreased the measure: {} -> {}", before, after);

        // replacing a box by one dominating it cannot decrease the measure
        let grown = boxes(&[&[1.0, 1.0], &[2.0, 0.8], &[0.5, 2.0]]);
        assert!(hypervolume(&grown) >= after);
    }

    #[test]
    fn test_cross_hypervolume_on_identical_fronts() {
        let front = boxes(&[&[1.0, 1.0]]);
        assert!((cross_hypervolume(&front, &front) - 1.0).abs() < 1e-9);
        assert_eq!(pareto_delta(&front, &front), 0.0);

        // asymmetric set: cross against itself must still equal its measure
        let asym = boxes(&[&[2.0, 1.0], &[1.0, 2.0], &[1.5, 1.5]]);
        let hv = hypervolume(&asym);
        let cross = cross_hypervolume(&asym, &asym);
        assert!(
            (hv - cross).abs() < 1e-9,
            "cross of a front against itself should equal its measure: {} vs {}",
            hv,
            cross
        );
        assert!(pareto_delta(&asym, &asym).abs() < 1e-12);
    }

    #[test]
    fn test_cross_hypervolume_uses_test_partner_extent() {
        let train = boxes(&[&[1.0, 1.0]]);
        let test = boxes(&[&[0.5, 0.5]]);
        let cross = cross_hypervolume(&train, &test);
        // both axis sweeps credit the single cell with the partner's 0.5
        assert!((cross - 0.5).abs() < 1e-9, "got {}", cross);
    }

    #[test]
    fn test_pareto_delta_paired_gap() {
        let train = boxes(&[&[1.0, 1.0]]);
        let test = boxes(&[&[0.8, 0.6]]);
        let delta = pareto_delta(&train, &test);
        assert!(
            (delta - 0.3).abs() < 1e-9,
            "expected mean(|1-0.8|, |1-0.6|) = 0.3, got {}",
            delta
        );
    }

    #[test]
    fn test_pareto_delta_excludes_dominated_pairs() {
        // (0.5, 0.5) is dominated by (1, 1); its wildly-off test partner
        // must not contribute
        let train = boxes(&[&[1.0, 1.0], &[0.5, 0.5]]);
        let test = boxes(&[&[0.8, 0.6], &[9.0, 9.0]]);
        let delta = pareto_delta(&train, &test);
        assert!((delta - 0.3).abs() < 1e-9, "got {}", delta);
    }

    #[test]
    fn test_zero_corner_box_contributes_nothing() {
        let hv = hypervolume(&boxes(&[&[0.0, 5.0]]));
        assert_eq!(hv, 0.0);
        let hv = hypervolume(&boxes(&[&[0.0, 5.0], &[1.0, 1.0]]));
        assert!((hv - 1.0).abs() < 1e-9, "got {}", hv);
    }

    #[test]
    #[should_panic(expected = "non-negative")]
    fn test_negative_corner_panics() {
        Hyperbox::new(vec![1.0, -0.1]);
    }
}
