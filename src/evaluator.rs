use log::warn;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::data::{Matrix, Outcome};
use crate::distrib::Distribution;
use crate::folds::Fold;
use crate::individual::{Fitness, Individual};
use crate::mask::FeatureMask;
use crate::objective::{bootstrap_stats, Objective, Predictions};
use crate::predictor::{Model, Predictor};

/// Batches smaller than this are never worth the fan-out.
const PARALLEL_BATCH_THRESHOLD: usize = 4;

/// Everything one candidate evaluation produces.
#[derive(Clone, Debug)]
pub struct EvalResult {
    pub fitness: Fitness,
    pub std_dev: Option<Vec<f64>>,
    pub ci95: Option<Vec<(f64, f64)>>,
    pub bootstrap_mean: Option<Vec<f64>>,
    pub importance: Option<Distribution>,
    /// Per-objective predictor refit on the whole training data, already
    /// downlifted to the evaluator's feature space. None for structural
    /// objectives, and for every objective unless predictors were requested.
    pub predictors: Vec<Option<Predictor>>,
}

impl EvalResult {
    /// Install this result on an individual.
    pub fn apply_to(&self, individual: &mut Individual) {
        individual.fitness = Some(self.fitness.clone());
        individual.std_dev = self.std_dev.clone();
        individual.ci95 = self.ci95.clone();
        individual.bootstrap_mean = self.bootstrap_mean.clone();
        individual.importance = self.importance.clone();
        individual.predictors = self.predictors.clone();
    }
}

/// The per-fold evaluation engine: read-only training data, objectives and
/// inner folds, shared across the worker pool behind `&self`.
///
/// A mask is scored by selecting its columns, fitting each predictive
/// objective's model per inner fold, scoring the held-out rows and combining
/// fold values through the objective's combiner. Structural objectives are
/// scored from the mask alone. All randomness is confined to the bootstrap,
/// seeded per candidate, so a batch is reproducible regardless of worker
/// count or scheduling.
pub struct Evaluator {
    x: Matrix,
    outcomes: Vec<Outcome>,
    objectives: Vec<Objective>,
    folds: Vec<Fold>,
    n_bootstrap: usize,
    compute_importance: bool,
    max_iterations: usize,
    lasso_lambda: f64,
    max_workers: usize,
    pool: Option<rayon::ThreadPool>,
}

impl Evaluator {
    /// # Errors
    /// Fails when the worker pool cannot be constructed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        x: Matrix,
        outcomes: Vec<Outcome>,
        objectives: Vec<Objective>,
        folds: Vec<Fold>,
        n_bootstrap: usize,
        compute_importance: bool,
        max_iterations: usize,
        lasso_lambda: f64,
        max_workers: usize,
    ) -> Result<Evaluator, String> {
        for outcome in &outcomes {
            assert!(
                outcome.len() == x.n_rows(),
                "{} samples in x but {} in outcome '{}'",
                x.n_rows(),
                outcome.len(),
                outcome.name()
            );
        }
        let pool = if max_workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(max_workers)
                    .build()
                    .map_err(|e| format!("cannot build the evaluation pool: {}", e))?,
            )
        } else {
            None
        };
        Ok(Evaluator {
            x,
            outcomes,
            objectives,
            folds,
            n_bootstrap,
            compute_importance,
            max_iterations,
            lasso_lambda,
            max_workers,
            pool,
        })
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    pub fn x(&self) -> &Matrix {
        &self.x
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn n_features(&self) -> usize {
        self.x.n_cols()
    }

    pub fn fitness_weights(&self) -> Vec<f64> {
        self.objectives.iter().map(|o| o.weight).collect()
    }

    /// Evaluate a batch of masks, results in input order.
    ///
    /// Candidate i draws its bootstrap rng from `batch_seed + i`, so the
    /// outcome is identical whether the batch runs on the pool or on the
    /// driver thread.
    pub fn evaluate_batch(
        &self,
        masks: &[FeatureMask],
        batch_seed: u64,
        want_predictors: bool,
    ) -> Vec<EvalResult> {
        if self.max_workers == 1 || masks.len() < PARALLEL_BATCH_THRESHOLD {
            return masks
                .iter()
                .enumerate()
                .map(|(i, m)| self.evaluate_one(m, batch_seed.wrapping_add(i as u64), want_predictors))
                .collect();
        }
        let pool = self.pool.as_ref().expect("max_workers > 1 without a pool");
        pool.install(|| {
            masks
                .par_iter()
                .enumerate()
                .map(|(i, m)| self.evaluate_one(m, batch_seed.wrapping_add(i as u64), want_predictors))
                .collect()
        })
    }

    /// Evaluate every individual in the population that has no fitness yet
    /// and install the results.
    pub fn evaluate_population(
        &self,
        individuals: &mut [Individual],
        batch_seed: u64,
        want_predictors: bool,
    ) {
        let pending: Vec<usize> = (0..individuals.len())
            .filter(|&i| !individuals[i].has_fitness())
            .collect();
        if pending.is_empty() {
            return;
        }
        let masks: Vec<FeatureMask> = pending.iter().map(|&i| individuals[i].mask.clone()).collect();
        let results = self.evaluate_batch(&masks, batch_seed, want_predictors);
        for (&i, result) in pending.iter().zip(results.iter()) {
            result.apply_to(&mut individuals[i]);
        }
    }

    pub fn evaluate_one(&self, mask: &FeatureMask, seed: u64, want_predictors: bool) -> EvalResult {
        assert!(
            mask.len() == self.x.n_cols(),
            "mask of {} features against a matrix of {} columns",
            mask.len(),
            self.x.n_cols()
        );
        let columns = mask.true_positions();
        let x_sel = self.x.select_columns(&columns);

        // one fit chain per distinct (model, outcome) pair; objectives
        // sharing a pair share its predictions
        let mut pairs: Vec<(Model, usize)> = Vec::new();
        for objective in &self.objectives {
            let pair = (objective.model, objective.outcome_index);
            if !objective.is_structural() && !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        let mut fold_predictions: Vec<Vec<Predictions>> = Vec::with_capacity(pairs.len());
        let mut magnitudes = vec![0.0; columns.len()];
        for &(model, outcome_index) in &pairs {
            let outcome = &self.outcomes[outcome_index];
            let mut per_fold = Vec::with_capacity(self.folds.len());
            for fold in &self.folds {
                let train = fold.train(self.x.n_rows());
                let predictor = self.fit_or_dummy(model, &x_sel.select_rows(&train), &outcome.subset(&train));
                if self.compute_importance {
                    for (i, m) in predictor.coefficient_magnitudes(columns.len()).iter().enumerate() {
                        magnitudes[i] += *m;
                    }
                }
                per_fold.push(self.predictions_on(&predictor, &x_sel, outcome, &fold.test));
            }
            fold_predictions.push(per_fold);
        }

        let mut values = Vec::with_capacity(self.objectives.len());
        for objective in &self.objectives {
            if objective.is_structural() {
                values.push(objective.structural_value(mask));
                continue;
            }
            let pair = (objective.model, objective.outcome_index);
            let slot = pairs.iter().position(|p| *p == pair).unwrap();
            let fold_values: Vec<f64> = fold_predictions[slot]
                .iter()
                .map(|p| objective.compute(p))
                .collect();
            values.push(objective.combine_fold_results(&fold_values));
        }
        let fitness = Fitness::new(values, self.fitness_weights());

        let (std_dev, ci95, bootstrap_mean) = if self.n_bootstrap > 0 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut stds = Vec::with_capacity(self.objectives.len());
            let mut cis = Vec::with_capacity(self.objectives.len());
            let mut means = Vec::with_capacity(self.objectives.len());
            for (o, objective) in self.objectives.iter().enumerate() {
                if objective.is_structural() {
                    let v = fitness.value(o);
                    stds.push(0.0);
                    cis.push((v, v));
                    means.push(v);
                    continue;
                }
                let pair = (objective.model, objective.outcome_index);
                let slot = pairs.iter().position(|p| *p == pair).unwrap();
                let mut pooled = fold_predictions[slot][0].clone();
                for p in &fold_predictions[slot][1..] {
                    pooled.extend(p);
                }
                let stats = bootstrap_stats(objective, &pooled, self.n_bootstrap, &mut rng);
                stds.push(stats.std_dev);
                cis.push(stats.ci95);
                means.push(stats.mean);
            }
            (Some(stds), Some(cis), Some(means))
        } else {
            (None, None, None)
        };

        let importance = if self.compute_importance {
            let mut weights = vec![0.0; self.x.n_cols()];
            for (i, &column) in columns.iter().enumerate() {
                weights[column] = magnitudes[i];
            }
            Some(Distribution::from_weights(weights).as_cached())
        } else {
            None
        };

        let predictors = if want_predictors {
            self.objectives
                .iter()
                .map(|objective| {
                    if objective.is_structural() {
                        return None;
                    }
                    let outcome = &self.outcomes[objective.outcome_index];
                    let predictor = self.fit_or_dummy(objective.model, &x_sel, outcome);
                    Some(predictor.downlifted(columns.clone()))
                })
                .collect()
        } else {
            vec![None; self.objectives.len()]
        };

        EvalResult {
            fitness,
            std_dev,
            ci95,
            bootstrap_mean,
            importance,
            predictors,
        }
    }

    fn fit_or_dummy(&self, model: Model, x: &Matrix, outcome: &Outcome) -> Predictor {
        match Predictor::fit(model, x, outcome, self.lasso_lambda, self.max_iterations) {
            Ok(predictor) => predictor,
            Err(message) => {
                warn!(
                    "fit of {:?} on outcome '{}' failed ({}); substituting the dummy predictor",
                    model,
                    outcome.name(),
                    message
                );
                Predictor::dummy_for(outcome)
            }
        }
    }

    fn predictions_on(
        &self,
        predictor: &Predictor,
        x_sel: &Matrix,
        outcome: &Outcome,
        test: &[usize],
    ) -> Predictions {
        let x_test = x_sel.select_rows(test);
        match outcome.subset(test) {
            Outcome::Categorical { labels, label_order, .. } => Predictions::Classification {
                predicted: predictor.predict_labels(&x_test),
                truth: labels,
                n_classes: label_order.len(),
            },
            Outcome::Survival { events, durations, .. } => Predictions::Survival {
                risk: predictor.risk_scores(&x_test),
                events,
                durations,
            },
        }
    }
}
