use log::debug;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const NORMALIZATION_TOLERANCE: f64 = 1e-9;

/// A normalized non-negative weight vector used for feature sampling.
///
/// Weighted draws go through a cached cumulative array and binary search, so
/// repeated `extract` calls on a cached distribution cost O(log N). An
/// all-zero input degenerates to the uniform distribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Distribution {
    weights: Vec<f64>,
    #[serde(skip)]
    cumulative: Option<Vec<f64>>,
}

impl PartialEq for Distribution {
    fn eq(&self, other: &Self) -> bool {
        self.weights == other.weights
    }
}

impl Distribution {
    /// Normalize raw non-negative weights into a distribution.
    ///
    /// # Panics
    /// Panics when a weight is negative or not finite.
    pub fn from_weights(weights: Vec<f64>) -> Distribution {
        assert!(
            weights.iter().all(|w| w.is_finite() && *w >= 0.0),
            "distribution weights must be finite and non-negative"
        );
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            debug!(
                "all-zero weight vector of length {} degenerates to uniform",
                weights.len()
            );
            return Distribution::uniform(weights.len());
        }
        Distribution {
            weights: weights.iter().map(|w| w / total).collect(),
            cumulative: None,
        }
    }

    pub fn uniform(n: usize) -> Distribution {
        Distribution {
            weights: vec![1.0 / n as f64; n],
            cumulative: None,
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weight(&self, i: usize) -> f64 {
        self.weights[i]
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Memoize the cumulative sums so that subsequent draws are O(log N).
    pub fn as_cached(mut self) -> Distribution {
        if self.cumulative.is_none() {
            self.cumulative = Some(Self::build_cumulative(&self.weights));
        }
        self
    }

    fn build_cumulative(weights: &[f64]) -> Vec<f64> {
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for w in weights {
            acc += w;
            cumulative.push(acc);
        }
        cumulative
    }

    fn search(cumulative: &[f64], u: f64) -> usize {
        let idx = cumulative.partition_point(|&c| c <= u);
        idx.min(cumulative.len() - 1)
    }

    /// Draw one index with probability equal to its weight.
    pub fn extract(&self, rng: &mut ChaCha8Rng) -> usize {
        let u = rng.gen::<f64>();
        match &self.cumulative {
            Some(cumulative) => Self::search(cumulative, u),
            None => Self::search(&Self::build_cumulative(&self.weights), u),
        }
    }

    /// Draw `k` distinct indices without replacement.
    ///
    /// Each draw removes the chosen index's weight before the next one. When
    /// fewer than `k` indices carry weight the remaining draws fall back to
    /// the zero-weight indices uniformly.
    pub fn extract_many_distinct(&self, k: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
        let k = k.min(self.len());
        let mut working = self.weights.clone();
        let mut drawn = Vec::with_capacity(k);
        for _ in 0..k {
            let total: f64 = working.iter().sum();
            let idx = if total > 0.0 {
                let cumulative = Self::build_cumulative(&working);
                let u = rng.gen::<f64>() * total;
                Self::search(&cumulative, u)
            } else {
                // only zero-weight indices remain
                let remaining: Vec<usize> = (0..working.len())
                    .filter(|i| !drawn.contains(i))
                    .collect();
                remaining[rng.gen_range(0..remaining.len())]
            };
            working[idx] = 0.0;
            drawn.push(idx);
        }
        drawn
    }

    /// Keep the `k` largest weights (ties broken by lowest index), zero the
    /// rest and renormalize.
    ///
    /// # Panics
    /// Panics when `k` is zero.
    pub fn focus(&self, k: usize) -> Distribution {
        assert!(k >= 1, "focus requires k >= 1");
        if k >= self.len() {
            return Distribution::from_weights(self.weights.clone());
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            self.weights[b]
                .partial_cmp(&self.weights[a])
                .unwrap()
                .then(a.cmp(&b))
        });
        let mut kept = vec![0.0; self.len()];
        for &i in order.iter().take(k) {
            kept[i] = self.weights[i];
        }
        Distribution::from_weights(kept)
    }

    pub fn nonzero(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.weights[i] > 0.0).collect()
    }

    pub fn nonzero_num(&self) -> usize {
        self.weights.iter().filter(|&&w| w > 0.0).count()
    }

    pub fn is_uniform(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        let expected = 1.0 / self.len() as f64;
        self.weights
            .iter()
            .all(|w| (w - expected).abs() < NORMALIZATION_TOLERANCE)
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() < NORMALIZATION_TOLERANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_from_weights_normalizes() {
        let d = Distribution::from_weights(vec![2.0, 6.0, 2.0]);
        assert!(d.is_normalized(), "weights should sum to 1, got {}", d.sum());
        assert!((d.weight(1) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_degenerates_to_uniform() {
        let d = Distribution::from_weights(vec![0.0, 0.0, 0.0, 0.0]);
        assert!(d.is_uniform(), "all-zero weights should fall back to uniform");
        assert!(d.is_normalized());
    }

    #[test]
    #[should_panic(expected = "non-negative")]
    fn test_negative_weight_panics() {
        Distribution::from_weights(vec![0.5, -0.1]);
    }

    #[test]
    fn test_extract_frequencies_match_weights() {
        // one million draws at seed 42 stay within ±0.005 of the targets
        let d = Distribution::from_weights(vec![0.1, 0.2, 0.7]).as_cached();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut counts = [0usize; 3];
        let n = 1_000_000;
        for _ in 0..n {
            counts[d.extract(&mut rng)] += 1;
        }
        let targets = [0.1, 0.2, 0.7];
        for (i, &target) in targets.iter().enumerate() {
            let freq = counts[i] as f64 / n as f64;
            assert!(
                (freq - target).abs() < 0.005,
                "index {} drawn with frequency {} but weight is {}",
                i,
                freq,
                target
            );
        }
    }

    #[test]
    fn test_cached_and_uncached_draws_agree() {
        let uncached = Distribution::from_weights(vec![0.3, 0.3, 0.4]);
        let cached = uncached.clone().as_cached();
        let mut rng1 = ChaCha8Rng::seed_from_u64(42);
        let mut rng2 = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(uncached.extract(&mut rng1), cached.extract(&mut rng2));
        }
    }

    #[test]
    fn test_focus_keeps_top_k_with_ties_to_lowest_index() {
        let d = Distribution::from_weights(vec![1.0, 3.0, 3.0, 2.0, 1.0]);
        let focused = d.focus(2);
        assert!(focused.nonzero_num() <= 2);
        // the two 3.0 weights win, equal after renormalization
        assert_eq!(focused.nonzero(), vec![1, 2]);
        assert!((focused.weight(1) - 0.5).abs() < 1e-12);

        // tie between indices 0 and 4 resolved toward index 0
        let tied = Distribution::from_weights(vec![1.0, 0.0, 5.0, 0.0, 1.0]);
        assert_eq!(tied.focus(2).nonzero(), vec![0, 2]);
    }

    #[test]
    fn test_focus_with_k_at_least_len_is_identity() {
        let d = Distribution::from_weights(vec![0.2, 0.3, 0.5]);
        assert_eq!(d.focus(3), d);
        assert_eq!(d.focus(10), d);
    }

    #[test]
    fn test_extract_many_distinct() {
        let d = Distribution::from_weights(vec![0.0, 10.0, 1.0, 10.0, 0.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let drawn = d.extract_many_distinct(3, &mut rng);
        assert_eq!(drawn.len(), 3);
        let mut unique = drawn.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3, "draws should be distinct, got {:?}", drawn);
        // the three nonzero indices must be exactly the ones drawn
        assert_eq!(unique, vec![1, 2, 3]);
    }

    #[test]
    fn test_nonzero_helpers() {
        let d = Distribution::from_weights(vec![0.0, 1.0, 0.0, 2.0]);
        assert_eq!(d.nonzero(), vec![1, 3]);
        assert_eq!(d.nonzero_num(), 2);
        assert!(!d.is_uniform());
        assert!(Distribution::uniform(7).is_uniform());
    }
}
