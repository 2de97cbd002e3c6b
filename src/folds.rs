use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::{InputData, Outcome};
use crate::utils::{quantile, split_into_balanced_random_chunks};

/// One fold: a disjoint test-index set; the train set is the complement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fold {
    pub test: Vec<usize>,
}

impl Fold {
    pub fn train(&self, n_samples: usize) -> Vec<usize> {
        let mut in_test = vec![false; n_samples];
        for &i in &self.test {
            in_test[i] = true;
        }
        (0..n_samples).filter(|&i| !in_test[i]).collect()
    }
}

/// Strata for a categorical outcome are the label indices themselves.
pub fn categorical_strata(labels: &[usize]) -> Vec<usize> {
    labels.to_vec()
}

/// Strata for a survival outcome: `(event, time_bin)` codes, the time bins
/// cut at event-duration quantiles among observed events. The smallest
/// stratum is merged with the next smallest until every stratum holds at
/// least `min_stratum_size` samples.
pub fn survival_strata(
    events: &[bool],
    durations: &[f64],
    n_time_strata: usize,
    min_stratum_size: usize,
) -> Vec<usize> {
    let n_bins = n_time_strata.max(1);
    let mut event_durations: Vec<f64> = events
        .iter()
        .zip(durations.iter())
        .filter(|(e, _)| **e)
        .map(|(_, d)| *d)
        .collect();
    event_durations.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let edges: Vec<f64> = (1..n_bins)
        .map(|b| quantile(&event_durations, b as f64 / n_bins as f64))
        .collect();
    let time_bin = |d: f64| -> usize { edges.iter().filter(|&&e| d > e).count() };

    let raw: Vec<usize> = events
        .iter()
        .zip(durations.iter())
        .map(|(&e, &d)| time_bin(d) * 2 + usize::from(e))
        .collect();
    merge_small_strata(raw, min_stratum_size)
}

/// Strata of the designated stratification outcome of a dataset.
pub fn strata_for(data: &InputData, n_time_strata: usize, min_stratum_size: usize) -> Vec<usize> {
    match data.stratification_outcome() {
        Outcome::Categorical { labels, .. } => categorical_strata(labels),
        Outcome::Survival { events, durations, .. } => {
            survival_strata(events, durations, n_time_strata, min_stratum_size)
        }
    }
}

/// Refine two stratifications by their Cartesian product, then re-apply the
/// smallest-stratum merging rule.
pub fn integrate_strata(a: &[usize], b: &[usize], min_stratum_size: usize) -> Vec<usize> {
    assert!(
        a.len() == b.len(),
        "integrating strata of {} and {} samples",
        a.len(),
        b.len()
    );
    let width = b.iter().max().map(|m| m + 1).unwrap_or(1);
    let product: Vec<usize> = a.iter().zip(b.iter()).map(|(&x, &y)| x * width + y).collect();
    merge_small_strata(product, min_stratum_size)
}

/// Repeatedly merge the smallest stratum into the next smallest until every
/// stratum reaches `min_size`. Labels are renumbered densely, ordered by
/// first appearance.
fn merge_small_strata(mut labels: Vec<usize>, min_size: usize) -> Vec<usize> {
    loop {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for &l in &labels {
            *counts.entry(l).or_insert(0) += 1;
        }
        if counts.len() <= 1 {
            break;
        }
        let mut by_size: Vec<(usize, usize)> = counts.iter().map(|(&l, &c)| (c, l)).collect();
        by_size.sort();
        let (smallest_count, smallest_label) = by_size[0];
        if smallest_count >= min_size {
            break;
        }
        let (_, target_label) = by_size[1];
        for l in labels.iter_mut() {
            if *l == smallest_label {
                *l = target_label;
            }
        }
    }
    renumber(labels)
}

fn renumber(labels: Vec<usize>) -> Vec<usize> {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    let mut next = 0;
    labels
        .into_iter()
        .map(|l| {
            *mapping.entry(l).or_insert_with(|| {
                let id = next;
                next += 1;
                id
            })
        })
        .collect()
}

/// Stratified k-fold with `n_repeats` independent shufflings: each stratum
/// is split into balanced random chunks and chunk i of every stratum joins
/// fold i. Deterministic given the rng state.
pub fn stratified_k_fold(
    strata: &[usize],
    n_folds: usize,
    n_repeats: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Fold> {
    assert!(n_folds >= 2, "stratified k-fold needs at least 2 folds");
    let n_strata = strata.iter().max().map(|m| m + 1).unwrap_or(0);
    let mut folds = Vec::with_capacity(n_folds * n_repeats);
    for _ in 0..n_repeats.max(1) {
        let mut tests: Vec<Vec<usize>> = vec![Vec::new(); n_folds];
        for stratum in 0..n_strata {
            let members: Vec<usize> = (0..strata.len()).filter(|&i| strata[i] == stratum).collect();
            let chunks = split_into_balanced_random_chunks(members, n_folds, rng);
            for (fold, chunk) in chunks.into_iter().enumerate() {
                tests[fold].extend(chunk);
            }
        }
        for mut test in tests {
            test.sort();
            folds.push(Fold { test });
        }
    }
    folds
}
