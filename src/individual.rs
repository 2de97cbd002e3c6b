use serde::{Deserialize, Serialize};

use crate::distrib::Distribution;
use crate::mask::FeatureMask;
use crate::predictor::Predictor;

/// Per-objective score vector plus maximize/minimize signs.
///
/// Dominance is Pareto dominance on `values * weights`: A dominates B iff
/// every weighted value is at least as good and one is strictly better. An
/// empty fitness never dominates and is never dominated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fitness {
    values: Vec<f64>,
    weights: Vec<f64>,
}

impl Fitness {
    /// # Panics
    /// Panics when lengths differ or a weight is not +1 or -1.
    pub fn new(values: Vec<f64>, weights: Vec<f64>) -> Fitness {
        assert!(
            values.len() == weights.len(),
            "{} fitness values for {} weights",
            values.len(),
            weights.len()
        );
        assert!(
            weights.iter().all(|w| *w == 1.0 || *w == -1.0),
            "fitness weights must be +1 or -1"
        );
        Fitness { values, weights }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn value(&self, i: usize) -> f64 {
        self.values[i]
    }

    /// Maximize-oriented values, `values * weights`.
    pub fn weighted(&self) -> Vec<f64> {
        self.values
            .iter()
            .zip(self.weights.iter())
            .map(|(v, w)| v * w)
            .collect()
    }

    /// Sum of the weighted values, the aggregate used by bounded halls of
    /// fame.
    pub fn weighted_sum(&self) -> f64 {
        self.values
            .iter()
            .zip(self.weights.iter())
            .map(|(v, w)| v * w)
            .sum()
    }

    pub fn dominates(&self, other: &Fitness) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        assert!(
            self.len() == other.len(),
            "dominance between fitnesses of {} and {} objectives",
            self.len(),
            other.len()
        );
        let mut strictly_better = false;
        for i in 0..self.len() {
            let a = self.values[i] * self.weights[i];
            let b = other.values[i] * other.weights[i];
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

/// A candidate feature subset plus its evaluation state.
///
/// Identity is the mask's content hash, never object identity: a hall of
/// fame shares individuals with the population by value. Sorter attributes
/// (`crowding`, `peculiarity`, `social_score`, `clone_rank`) are scratch
/// state owned by the selection machinery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Individual {
    pub mask: FeatureMask,
    pub fitness: Option<Fitness>,
    pub std_dev: Option<Vec<f64>>,
    pub ci95: Option<Vec<(f64, f64)>>,
    pub bootstrap_mean: Option<Vec<f64>>,
    pub importance: Option<Distribution>,
    pub predictors: Vec<Option<Predictor>>,
    pub crowding: Option<f64>,
    pub peculiarity: Option<f64>,
    pub social_score: Option<f64>,
    pub clone_rank: Option<usize>,
    pub hash: u64,
    pub generation: usize,
}

impl Individual {
    pub fn new(mask: FeatureMask, generation: usize) -> Individual {
        let hash = mask.content_hash();
        Individual {
            mask,
            fitness: None,
            std_dev: None,
            ci95: None,
            bootstrap_mean: None,
            importance: None,
            predictors: Vec::new(),
            crowding: None,
            peculiarity: None,
            social_score: None,
            clone_rank: None,
            hash,
            generation,
        }
    }

    /// Number of selected features.
    pub fn k(&self) -> usize {
        self.mask.sum()
    }

    pub fn has_fitness(&self) -> bool {
        self.fitness.is_some()
    }

    /// # Panics
    /// Panics when the individual has not been evaluated yet.
    pub fn fitness(&self) -> &Fitness {
        self.fitness
            .as_ref()
            .expect("individual has no fitness; evaluate it first")
    }

    /// # Panics
    /// Panics when no bootstrap confidence interval was computed.
    pub fn ci95(&self) -> &[(f64, f64)] {
        self.ci95
            .as_deref()
            .expect("individual has no confidence interval; evaluate with n_bootstrap > 0")
    }

    /// Mean width of the per-objective 95% intervals; infinite when absent,
    /// so interval-less individuals always lose a reliability tie-break.
    pub fn mean_ci_width(&self) -> f64 {
        match &self.ci95 {
            Some(intervals) if !intervals.is_empty() => {
                intervals.iter().map(|(lo, hi)| hi - lo).sum::<f64>() / intervals.len() as f64
            }
            _ => f64::INFINITY,
        }
    }

    /// Re-derive the content hash after an in-place mask change.
    pub fn compute_hash(&mut self) {
        self.hash = self.mask.content_hash();
    }

    /// Drop the fitness and everything derived from it. Called whenever
    /// variation actually changed the mask.
    pub fn invalidate(&mut self) {
        self.fitness = None;
        self.std_dev = None;
        self.ci95 = None;
        self.bootstrap_mean = None;
        self.importance = None;
        self.predictors = Vec::new();
        self.crowding = None;
        self.peculiarity = None;
        self.social_score = None;
        self.clone_rank = None;
        self.compute_hash();
    }

    pub fn dominates(&self, other: &Individual) -> bool {
        match (&self.fitness, &other.fitness) {
            (Some(a), Some(b)) => a.dominates(b),
            _ => false,
        }
    }

    /// A storage clone stripped of predictors, importances and sorter
    /// scratch state. Halls of fame keep only mothballed individuals.
    pub fn mothball(&self) -> Individual {
        let mut stored = self.clone();
        stored.predictors = Vec::new();
        stored.importance = None;
        stored.crowding = None;
        stored.peculiarity = None;
        stored.social_score = None;
        stored.clone_rank = None;
        stored
    }
}
