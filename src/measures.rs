use crate::hyperbox::Hyperbox;
use crate::mask::FeatureMask;

/// Hyperboxes from rows of objective values: weighted (maximize-oriented)
/// and clamped at zero, so every box is anchored in the positive orthant.
pub fn hyperboxes_from_rows(rows: &[Vec<f64>], weights: &[f64]) -> Vec<Hyperbox> {
    rows.iter()
        .map(|row| {
            assert!(
                row.len() == weights.len(),
                "{} objective values for {} weights",
                row.len(),
                weights.len()
            );
            let corner = row
                .iter()
                .zip(weights.iter())
                .map(|(v, w)| (v * w).max(0.0))
                .collect();
            Hyperbox::new(corner)
        })
        .collect()
}

/// Mean Jaccard similarity over all unordered pairs; 1 for fewer than two
/// masks.
pub fn mean_pairwise_jaccard(masks: &[FeatureMask]) -> f64 {
    if masks.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..masks.len() {
        for j in i + 1..masks.len() {
            total += masks[i].jaccard(&masks[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Per-feature selection frequency over a set of masks.
pub fn selection_frequencies(masks: &[FeatureMask], n_features: usize) -> Vec<f64> {
    let mut counts = vec![0usize; n_features];
    for mask in masks {
        mask.accumulate_into(&mut counts);
    }
    counts
        .iter()
        .map(|&c| c as f64 / masks.len().max(1) as f64)
        .collect()
}

/// Stability of selection frequencies across folds: the total min-frequency
/// mass over the total max-frequency mass, per feature. 1 when every fold
/// selects the same features at the same rate, 0 when no feature recurs.
///
/// Masks must live in a shared feature space, so fold fronts have to be
/// downlifted before comparison.
pub fn stability_by_weight_overlap(fold_masks: &[Vec<FeatureMask>], n_features: usize) -> f64 {
    if fold_masks.len() < 2 {
        return 1.0;
    }
    let frequencies: Vec<Vec<f64>> = fold_masks
        .iter()
        .map(|masks| selection_frequencies(masks, n_features))
        .collect();
    let mut min_mass = 0.0;
    let mut max_mass = 0.0;
    for f in 0..n_features {
        let column: Vec<f64> = frequencies.iter().map(|freq| freq[f]).collect();
        min_mass += column.iter().copied().fold(f64::INFINITY, f64::min);
        max_mass += column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    }
    if max_mass <= 0.0 {
        return 0.0;
    }
    min_mass / max_mass
}

/// Union of all masks of one fold front.
pub fn union_mask(masks: &[FeatureMask], n_features: usize) -> FeatureMask {
    let mut counts = vec![0usize; n_features];
    for mask in masks {
        mask.accumulate_into(&mut counts);
    }
    FeatureMask::from_bools(counts.iter().map(|&c| c > 0).collect())
}

/// Mean pairwise Dice similarity of the fold-union masks.
pub fn stability_by_dice(fold_masks: &[Vec<FeatureMask>], n_features: usize) -> f64 {
    if fold_masks.len() < 2 {
        return 1.0;
    }
    let unions: Vec<FeatureMask> = fold_masks
        .iter()
        .map(|masks| union_mask(masks, n_features))
        .collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..unions.len() {
        for j in i + 1..unions.len() {
            total += unions[i].dice(&unions[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// For every member of every fold, the best Dice match among the members of
/// each other fold; the mean of those best matches.
pub fn stability_by_best_dice(fold_masks: &[Vec<FeatureMask>]) -> f64 {
    if fold_masks.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut count = 0usize;
    for (a, front_a) in fold_masks.iter().enumerate() {
        for (b, front_b) in fold_masks.iter().enumerate() {
            if a == b || front_b.is_empty() {
                continue;
            }
            for mask in front_a {
                let best = front_b
                    .iter()
                    .map(|other| mask.dice(other))
                    .fold(f64::NEG_INFINITY, f64::max);
                total += best;
                count += 1;
            }
        }
    }
    if count == 0 {
        return 0.0;
    }
    total / count as f64
}

/// Mean signed optimism of the inner estimate against the honest one.
pub fn performance_gap(inner: &[f64], honest: &[f64]) -> f64 {
    assert!(inner.len() == honest.len(), "fold count mismatch");
    if inner.is_empty() {
        return 0.0;
    }
    inner
        .iter()
        .zip(honest.iter())
        .map(|(i, h)| i - h)
        .sum::<f64>()
        / inner.len() as f64
}

/// Mean absolute disagreement between the inner and honest estimates.
pub fn performance_error(inner: &[f64], honest: &[f64]) -> f64 {
    assert!(inner.len() == honest.len(), "fold count mismatch");
    if inner.is_empty() {
        return 0.0;
    }
    inner
        .iter()
        .zip(honest.iter())
        .map(|(i, h)| (i - h).abs())
        .sum::<f64>()
        / inner.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperbox::hypervolume;

    fn mask(positions: &[usize]) -> FeatureMask {
        FeatureMask::from_positions(positions.iter().copied(), 8)
    }

    #[test]
    fn test_hyperboxes_weight_and_clamp() {
        let boxes = hyperboxes_from_rows(&[vec![0.8, 0.3], vec![0.2, 0.9]], &[1.0, -1.0]);
        assert_eq!(boxes[0].corner(), &[0.8, 0.0], "minimized values clamp at zero");
        assert_eq!(boxes[1].corner(), &[0.2, 0.0]);
        assert!((hypervolume(&boxes) - 0.0).abs() < 1e-12);

        // extent-weighted measure: volume times the mean corner coordinate
        let boxes = hyperboxes_from_rows(&[vec![0.5, 0.5]], &[1.0, 1.0]);
        assert!((hypervolume(&boxes) - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_mean_pairwise_jaccard() {
        assert_eq!(mean_pairwise_jaccard(&[mask(&[0, 1])]), 1.0);
        let identical = vec![mask(&[0, 1]), mask(&[0, 1]), mask(&[0, 1])];
        assert_eq!(mean_pairwise_jaccard(&identical), 1.0);
        let disjoint = vec![mask(&[0, 1]), mask(&[2, 3])];
        assert_eq!(mean_pairwise_jaccard(&disjoint), 0.0);
    }

    #[test]
    fn test_weight_overlap_bounds() {
        let same = vec![
            vec![mask(&[0]), mask(&[0, 1])],
            vec![mask(&[0]), mask(&[0, 1])],
        ];
        assert!((stability_by_weight_overlap(&same, 8) - 1.0).abs() < 1e-12);

        let different = vec![vec![mask(&[0, 1])], vec![mask(&[2, 3])]];
        assert_eq!(stability_by_weight_overlap(&different, 8), 0.0);

        let partial = vec![vec![mask(&[0, 1])], vec![mask(&[0, 2])]];
        let overlap = stability_by_weight_overlap(&partial, 8);
        assert!(overlap > 0.0 && overlap < 1.0, "got {}", overlap);
    }

    #[test]
    fn test_dice_stability_uses_fold_unions() {
        let folds = vec![
            vec![mask(&[0]), mask(&[1])],
            vec![mask(&[0, 1])],
        ];
        // both folds union to {0, 1}
        assert!((stability_by_dice(&folds, 8) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_best_dice_rewards_any_good_match() {
        let folds = vec![
            vec![mask(&[0, 1]), mask(&[6, 7])],
            vec![mask(&[0, 1])],
        ];
        let best = stability_by_best_dice(&folds);
        // fold 1's member matches perfectly; fold 0 contributes one perfect
        // and one zero match
        assert!((best - 2.0 / 3.0).abs() < 1e-12, "got {}", best);
    }

    #[test]
    fn test_performance_gap_and_error() {
        let inner = vec![0.9, 0.8];
        let honest = vec![0.7, 0.9];
        assert!((performance_gap(&inner, &honest) - 0.05).abs() < 1e-12);
        assert!((performance_error(&inner, &honest) - 0.15).abs() < 1e-12);
        assert_eq!(performance_gap(&[], &[]), 0.0);
    }
}
