use log::{debug, info};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::data::Outcome;
use crate::distrib::Distribution;
use crate::evaluator::Evaluator;
use crate::ga::{finalize, Logbook, OptimizerOutput};
use crate::hof::{HallOfFame, HofSpec};
use crate::individual::Individual;
use crate::mask::FeatureMask;
use crate::param::{Algorithm, Param};
use crate::predictor::lasso_coordinate_descent;

/// Run one of the non-evolutionary baselines behind the same algorithm
/// switch as the optimizer: every visited mask is evaluated and offered to
/// the halls of fame, and the result shape is identical to a GA run.
pub fn run(
    algorithm: &Algorithm,
    evaluator: &Evaluator,
    importance: &Distribution,
    param: &Param,
    hof_specs: &[HofSpec],
    rng: &mut ChaCha8Rng,
) -> Result<OptimizerOutput, String> {
    let visited = match algorithm {
        Algorithm::RFE => recursive_elimination(evaluator, param, rng),
        Algorithm::LASSO_MO => lasso_path(evaluator, param, rng)?,
        Algorithm::sweeping => importance_sweep(evaluator, importance, param, rng),
        other => panic!("'{:?}' is not a baseline algorithm", other),
    };
    info!(
        "baseline {:?} evaluated {} candidate masks",
        algorithm,
        visited.len()
    );

    let mut hofs: Vec<HallOfFame> = hof_specs.iter().map(|s| s.build()).collect();
    for hof in hofs.iter_mut() {
        hof.update(&visited);
    }
    Ok(OptimizerOutput {
        results: finalize(&hofs, evaluator, rng.gen()),
        retained: visited,
        logbook: Logbook::default(),
    })
}

/// Recursive feature elimination: start from the full active set and drop
/// the lowest-aggregate-importance fraction per step until the configured
/// floor. Every visited mask becomes a candidate.
fn recursive_elimination(
    evaluator: &Evaluator,
    param: &Param,
    rng: &mut ChaCha8Rng,
) -> Vec<Individual> {
    let n = evaluator.n_features();
    let floor = param.ga.min_num_features.max(1);
    let mut current = FeatureMask::from_positions(0..n, n);
    let mut visited = Vec::new();
    loop {
        let result = evaluator.evaluate_one(&current, rng.gen(), false);
        let mut individual = Individual::new(current.clone(), visited.len());
        result.apply_to(&mut individual);

        // rank the selected features by their fitted coefficient mass;
        // without importances the drop degenerates to lowest positions
        let mut ranked: Vec<(f64, usize)> = current
            .iter_true()
            .map(|i| {
                let weight = individual
                    .importance
                    .as_ref()
                    .map(|d| d.weight(i))
                    .unwrap_or(0.0);
                (weight, i)
            })
            .collect();
        visited.push(individual);

        let k = ranked.len();
        if k <= floor {
            break;
        }
        let drop = (((k as f64) * param.baselines.rfe_drop_fraction).floor() as usize)
            .max(1)
            .min(k - floor);
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
        let kept = ranked[drop..].iter().map(|&(_, i)| i);
        current = FeatureMask::from_positions(kept, n);
        debug!("rfe step: {} -> {} features", k, k - drop);
    }
    visited
}

/// A log-spaced lambda path: the non-zero lasso support at each lambda
/// becomes a candidate mask. Needs a categorical outcome.
fn lasso_path(
    evaluator: &Evaluator,
    param: &Param,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<Individual>, String> {
    let n = evaluator.n_features();
    let outcome = evaluator
        .outcomes()
        .iter()
        .find(|o| !o.is_survival())
        .ok_or_else(|| "LASSO_MO needs a categorical outcome".to_string())?;
    let (labels, n_classes) = match outcome {
        Outcome::Categorical { labels, label_order, .. } => (labels, label_order.len()),
        Outcome::Survival { .. } => unreachable!(),
    };

    let path_len = param.baselines.lasso_path_len.max(2);
    let (lo, hi) = (param.baselines.lasso_lambda_min, param.baselines.lasso_lambda_max);
    let mut masks: Vec<FeatureMask> = Vec::new();
    for step in 0..path_len {
        let t = step as f64 / (path_len - 1) as f64;
        let lambda = hi * (lo / hi).powf(t);
        let mut support = vec![0.0; n];
        let fitted_classes = if n_classes == 2 { 1 } else { n_classes };
        for class in 0..fitted_classes {
            let y: Vec<f64> = labels.iter().map(|&l| f64::from(u8::from(l == class))).collect();
            let (_, beta) =
                lasso_coordinate_descent(evaluator.x(), &y, lambda, param.evaluation.max_iterations)?;
            for (s, b) in support.iter_mut().zip(beta.iter()) {
                *s += b.abs();
            }
        }
        let mask = FeatureMask::from_bools(support.iter().map(|&s| s > 0.0).collect());
        if mask.sum() == 0 || masks.iter().any(|m| *m == mask) {
            continue;
        }
        debug!("lasso path: lambda {:.4} keeps {} features", lambda, mask.sum());
        masks.push(mask);
    }

    let results = evaluator.evaluate_batch(&masks, rng.gen(), false);
    Ok(masks
        .into_iter()
        .zip(results.iter())
        .enumerate()
        .map(|(step, (mask, result))| {
            let mut individual = Individual::new(mask, step);
            result.apply_to(&mut individual);
            individual
        })
        .collect())
}

/// Top-k masks by collapsed prefilter importance for every k in the
/// configured feature-count range.
fn importance_sweep(
    evaluator: &Evaluator,
    importance: &Distribution,
    param: &Param,
    rng: &mut ChaCha8Rng,
) -> Vec<Individual> {
    let n = evaluator.n_features();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        importance
            .weight(b)
            .partial_cmp(&importance.weight(a))
            .unwrap()
            .then(a.cmp(&b))
    });

    let lo = param.ga.min_num_features.max(1).min(n);
    let hi = param.ga.max_num_features.min(n).max(lo);
    let masks: Vec<FeatureMask> = (lo..=hi)
        .map(|k| FeatureMask::from_positions(order[..k].iter().copied(), n))
        .collect();
    let results = evaluator.evaluate_batch(&masks, rng.gen(), false);
    masks
        .into_iter()
        .zip(results.iter())
        .enumerate()
        .map(|(step, (mask, result))| {
            let mut individual = Individual::new(mask, step);
            result.apply_to(&mut individual);
            individual
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Matrix;
    use crate::objective::Objective;
    use crate::param::ObjectiveSpec;
    use rand::SeedableRng;

    fn test_evaluator(compute_importance: bool) -> Evaluator {
        let rows: Vec<Vec<f64>> = (0..12)
            .map(|i| {
                let class = if i < 6 { -1.0 } else { 1.0 };
                vec![class * 2.0, ((i * 3) % 5) as f64 / 5.0, ((i * 7) % 4) as f64 / 4.0, 0.25]
            })
            .collect();
        let raw: Vec<String> = (0..12)
            .map(|i| if i < 6 { "a".to_string() } else { "b".to_string() })
            .collect();
        let outcome = crate::data::Outcome::categorical("status", raw);
        let data = {
            let mut d = crate::data::InputData::new("fixture");
            d.outcomes = vec![outcome.clone()];
            d
        };
        let objectives = Objective::parse_all(
            &[
                ObjectiveSpec::Name("accuracy".to_string()),
                ObjectiveSpec::Name("leanness".to_string()),
            ],
            &data,
            0.0,
        )
        .unwrap();
        let strata: Vec<usize> = (0..12).map(|i| usize::from(i >= 6)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let folds = crate::folds::stratified_k_fold(&strata, 3, 1, &mut rng);
        Evaluator::new(
            Matrix::from_rows(rows),
            vec![outcome],
            objectives,
            folds,
            0,
            compute_importance,
            100,
            0.01,
            1,
        )
        .unwrap()
    }

    fn test_param() -> Param {
        let mut param = Param::new();
        param.objectives = vec![ObjectiveSpec::Name("accuracy".to_string())];
        param.ga.min_num_features = 1;
        param.ga.max_num_features = 3;
        param
    }

    #[test]
    fn test_rfe_shrinks_to_the_floor() {
        let evaluator = test_evaluator(true);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let visited = recursive_elimination(&evaluator, &test_param(), &mut rng);
        assert!(visited.len() >= 2, "the path must visit more than the full set");
        assert_eq!(visited[0].k(), 4, "the path starts from the full active set");
        assert_eq!(visited.last().unwrap().k(), 1, "the path ends at the floor");
        for window in visited.windows(2) {
            assert!(window[1].k() < window[0].k(), "each step must strictly shrink");
        }
        assert!(
            visited.last().unwrap().mask.get(0),
            "the separating feature should survive elimination"
        );
    }

    #[test]
    fn test_lasso_path_supports_shrink_with_lambda() {
        let evaluator = test_evaluator(false);
        let mut param = test_param();
        param.baselines.lasso_path_len = 8;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let visited = lasso_path(&evaluator, &param, &mut rng).unwrap();
        assert!(!visited.is_empty());
        assert!(visited.iter().all(|i| i.has_fitness()));
        assert!(
            visited.iter().all(|i| i.mask.get(0)),
            "every non-empty support should include the separating feature"
        );
    }

    #[test]
    fn test_sweep_enumerates_the_feature_count_range() {
        let evaluator = test_evaluator(false);
        let importance = Distribution::from_weights(vec![0.5, 0.3, 0.15, 0.05]);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let visited = importance_sweep(&evaluator, &importance, &test_param(), &mut rng);
        assert_eq!(visited.len(), 3, "one mask per k in [1, 3]");
        assert_eq!(visited[0].mask.true_positions(), vec![0]);
        assert_eq!(visited[1].mask.true_positions(), vec![0, 1]);
        assert_eq!(visited[2].mask.true_positions(), vec![0, 1, 2]);
    }

    #[test]
    fn test_baseline_run_produces_hall_results() {
        let evaluator = test_evaluator(true);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let output = run(
            &Algorithm::RFE,
            &evaluator,
            &Distribution::uniform(4),
            &test_param(),
            &[HofSpec::Pareto],
            &mut rng,
        )
        .unwrap();
        assert_eq!(output.results.len(), 1);
        assert!(!output.results[0].is_empty());
        assert_eq!(
            output.results[0].predictors.len(),
            output.results[0].individuals.len()
        );
    }
}
