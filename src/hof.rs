use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::individual::Individual;

/// A hall-of-fame factory, parsed from the configuration's `hofs` list:
/// `pareto`, `fronts:<F>` or `bounded:<S>`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum HofSpec {
    Pareto,
    Fronts(usize),
    Bounded(usize),
}

impl HofSpec {
    pub fn parse(spec: &str) -> Result<HofSpec, String> {
        if spec == "pareto" {
            return Ok(HofSpec::Pareto);
        }
        if let Some(arg) = spec.strip_prefix("fronts:") {
            let n: usize = arg
                .parse()
                .map_err(|_| format!("invalid hofs entry '{}'", spec))?;
            if n < 1 {
                return Err(format!("invalid hofs entry '{}': needs at least one front", spec));
            }
            return Ok(HofSpec::Fronts(n));
        }
        if let Some(arg) = spec.strip_prefix("bounded:") {
            let n: usize = arg
                .parse()
                .map_err(|_| format!("invalid hofs entry '{}'", spec))?;
            if n < 1 {
                return Err(format!("invalid hofs entry '{}': needs a positive size", spec));
            }
            return Ok(HofSpec::Bounded(n));
        }
        Err(format!(
            "unknown hofs entry '{}': expected pareto, fronts:<F> or bounded:<S>",
            spec
        ))
    }

    pub fn name(&self) -> String {
        match self {
            HofSpec::Pareto => "pareto".to_string(),
            HofSpec::Fronts(n) => format!("fronts{}", n),
            HofSpec::Bounded(n) => format!("bounded{}", n),
        }
    }

    pub fn build(&self) -> HallOfFame {
        HallOfFame {
            spec: self.clone(),
            fronts: match self {
                HofSpec::Fronts(n) => vec![Vec::new(); *n],
                _ => vec![Vec::new()],
            },
        }
    }
}

/// A set of non-dominated individuals with a duplicate-aware update
/// protocol.
///
/// After every `update` no stored member dominates another within its front
/// and no two members share a mask. The multi-front variant lets candidates
/// rejected from front f drip to front f+1; the bounded variant keeps the S
/// best members by weighted aggregate sum instead of a Pareto front.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HallOfFame {
    spec: HofSpec,
    fronts: Vec<Vec<Individual>>,
}

impl HallOfFame {
    pub fn spec(&self) -> &HofSpec {
        &self.spec
    }

    pub fn name(&self) -> String {
        self.spec.name()
    }

    pub fn len(&self) -> usize {
        self.fronts.iter().map(|f| f.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_fronts(&self) -> usize {
        self.fronts.len()
    }

    pub fn front(&self, f: usize) -> &[Individual] {
        &self.fronts[f]
    }

    /// Offer every candidate in turn. Individuals without fitness are
    /// ignored; stored copies are mothballed.
    pub fn update(&mut self, candidates: &[Individual]) {
        for candidate in candidates {
            if !candidate.has_fitness() {
                continue;
            }
            match self.spec {
                HofSpec::Bounded(limit) => self.offer_bounded(candidate, limit),
                _ => self.offer_front(candidate, 0),
            }
        }
    }

    fn offer_front(&mut self, candidate: &Individual, front: usize) {
        if front >= self.fronts.len() {
            return;
        }
        if self.fronts[front].iter().any(|m| m.hash == candidate.hash) {
            return;
        }
        if self.fronts[front].iter().any(|m| m.dominates(candidate)) {
            // rejected here; a multi-front hall lets it drip down
            self.offer_front(candidate, front + 1);
            return;
        }
        let displaced: Vec<Individual> = self.fronts[front]
            .iter()
            .filter(|m| candidate.dominates(m))
            .cloned()
            .collect();
        self.fronts[front].retain(|m| !candidate.dominates(m));
        self.fronts[front].push(candidate.mothball());
        for fallen in &displaced {
            self.offer_front(fallen, front + 1);
        }
    }

    fn offer_bounded(&mut self, candidate: &Individual, limit: usize) {
        if self.fronts[0].iter().any(|m| m.hash == candidate.hash) {
            return;
        }
        self.fronts[0].push(candidate.mothball());
        self.fronts[0].sort_by(|a, b| {
            b.fitness()
                .weighted_sum()
                .partial_cmp(&a.fitness().weighted_sum())
                .unwrap()
        });
        self.fronts[0].truncate(limit);
    }

    /// Stable enumeration of all members, best first within each front,
    /// ordered by the first objective's weighted value.
    pub fn hofers(&self) -> Vec<&Individual> {
        let mut result = Vec::with_capacity(self.len());
        for front in &self.fronts {
            let mut members: Vec<&Individual> = front.iter().collect();
            members.sort_by(|a, b| {
                let fa = a.fitness().weighted();
                let fb = b.fitness().weighted();
                fb[0].partial_cmp(&fa[0]).unwrap().then(a.hash.cmp(&b.hash))
            });
            result.extend(members);
        }
        result
    }

    /// Sanity predicate used by tests: no member dominates another within a
    /// front, no duplicate masks anywhere.
    pub fn is_consistent(&self) -> bool {
        let mut hashes = HashSet::new();
        for front in &self.fronts {
            for m in front {
                if !hashes.insert(m.hash) {
                    return false;
                }
            }
            if matches!(self.spec, HofSpec::Bounded(_)) {
                continue;
            }
            for a in front {
                for b in front {
                    if a.hash != b.hash && a.dominates(b) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::tests::individual_with_fitness;

    #[test]
    fn test_spec_parsing() {
        assert_eq!(HofSpec::parse("pareto").unwrap(), HofSpec::Pareto);
        assert_eq!(HofSpec::parse("fronts:3").unwrap(), HofSpec::Fronts(3));
        assert_eq!(HofSpec::parse("bounded:10").unwrap(), HofSpec::Bounded(10));
        assert!(HofSpec::parse("elite").is_err());
        assert!(HofSpec::parse("fronts:zero").is_err());
    }

    #[test]
    fn test_pareto_update_keeps_only_non_dominated() {
        let mut hof = HofSpec::Pareto.build();
        hof.update(&[
            individual_with_fitness(&[0], 8, &[0.5, 0.5]),
            individual_with_fitness(&[1], 8, &[0.9, 0.1]),
            individual_with_fitness(&[2], 8, &[0.6, 0.6]), // dominates the first
        ]);
        assert_eq!(hof.len(), 2, "the dominated member must be evicted");
        assert!(hof.is_consistent());
        let values: Vec<f64> = hof.hofers().iter().map(|m| m.fitness().value(0)).collect();
        assert_eq!(values, vec![0.9, 0.6], "hofers are ordered by the first objective");
    }

    #[test]
    fn test_dominated_candidate_is_rejected() {
        let mut hof = HofSpec::Pareto.build();
        hof.update(&[individual_with_fitness(&[0], 8, &[0.9, 0.9])]);
        hof.update(&[individual_with_fitness(&[1], 8, &[0.5, 0.5])]);
        assert_eq!(hof.len(), 1);
        assert_eq!(hof.hofers()[0].mask.true_positions(), vec![0]);
    }

    #[test]
    fn test_duplicate_masks_are_no_ops() {
        let mut hof = HofSpec::Pareto.build();
        let a = individual_with_fitness(&[0, 3], 8, &[0.7, 0.7]);
        hof.update(&[a.clone()]);
        hof.update(&[a.clone()]);
        hof.update(&[individual_with_fitness(&[0, 3], 8, &[0.7, 0.7])]);
        assert_eq!(hof.len(), 1, "the same mask must never be stored twice");
    }

    #[test]
    fn test_unfit_candidates_are_ignored() {
        let mut hof = HofSpec::Pareto.build();
        let unfit = Individual::new(crate::mask::FeatureMask::zeros(8), 0);
        hof.update(&[unfit]);
        assert!(hof.is_empty());
        hof.update(&[]);
        assert!(hof.is_empty(), "updating with an empty batch changes nothing");
    }

    #[test]
    fn test_multi_front_drip() {
        let mut hof = HofSpec::Fronts(2).build();
        hof.update(&[
            individual_with_fitness(&[0], 8, &[0.9, 0.9]),
            individual_with_fitness(&[1], 8, &[0.5, 0.5]),
            individual_with_fitness(&[2], 8, &[0.4, 0.6]),
        ]);
        assert_eq!(hof.front(0).len(), 1, "only the dominating member stays on front 0");
        assert_eq!(hof.front(1).len(), 2, "rejected members drip to front 1");
        assert!(hof.is_consistent());
    }

    #[test]
    fn test_displaced_member_drips_to_next_front() {
        let mut hof = HofSpec::Fronts(2).build();
        hof.update(&[individual_with_fitness(&[0], 8, &[0.5, 0.5])]);
        hof.update(&[individual_with_fitness(&[1], 8, &[0.6, 0.6])]);
        assert_eq!(hof.front(0).len(), 1);
        assert_eq!(hof.front(0)[0].mask.true_positions(), vec![1]);
        assert_eq!(
            hof.front(1).len(),
            1,
            "a displaced front-0 member falls to front 1 instead of vanishing"
        );
    }

    #[test]
    fn test_bounded_keeps_best_by_aggregate_sum() {
        let mut hof = HofSpec::Bounded(2).build();
        hof.update(&[
            individual_with_fitness(&[0], 8, &[0.2, 0.2]),
            individual_with_fitness(&[1], 8, &[0.9, 0.1]),
            individual_with_fitness(&[2], 8, &[0.5, 0.6]),
        ]);
        assert_eq!(hof.len(), 2);
        let sums: Vec<f64> = hof
            .hofers()
            .iter()
            .map(|m| m.fitness().weighted_sum())
            .collect();
        assert!(sums.contains(&1.0) && sums.contains(&1.1), "got {:?}", sums);
    }
}
