use log::{info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::artifacts::{self, FitnessTable};
use crate::baselines;
use crate::cinfo;
use crate::data::{InputData, Matrix, Outcome};
use crate::evaluator::Evaluator;
use crate::folds::{self, Fold};
use crate::ga::{self, OptimizerResult};
use crate::hof::HofSpec;
use crate::hyperbox::{cross_hypervolume, hypervolume, pareto_delta};
use crate::mask::FeatureMask;
use crate::measures;
use crate::objective::{Objective, Predictions};
use crate::param::{Algorithm, MutationOperator, Param, SortingStrategy};
use crate::predictor::Predictor;
use crate::prefilter;
use crate::registry::{self, ValidationRegistry};
use rayon::prelude::*;

/// Run the full nested cross-validation under `run_dir`.
///
/// One optimizer (or baseline) run per outer fold, each on its own
/// prefiltered training data with its own inner folds; fold artifacts land
/// in `<run_dir>/<hof-name>/fold_<i>/` and the cross-fold quality measures
/// in each hall's `registry.json`.
pub fn run(
    data: &InputData,
    param: &Param,
    running: Arc<AtomicBool>,
    run_dir: &Path,
) -> Result<(), Box<dyn Error>> {
    let hof_specs: Vec<HofSpec> = param
        .hofs
        .iter()
        .map(|h| HofSpec::parse(h))
        .collect::<Result<_, String>>()?;
    let objectives = Objective::parse_all(
        &param.objectives,
        data,
        param.evaluation.max_fold_deviation,
    )?;

    let strata = folds::strata_for(data, param.cv.n_time_strata, param.cv.min_stratum_size);
    let mut rng = ga::component_rng(param.general.seed, "outer folds");
    let outer = folds::stratified_k_fold(&strata, param.cv.outer_folds, param.cv.cv_repeats, &mut rng);
    info!(
        "nested cross-validation: {} outer folds over {} samples",
        outer.len(),
        data.sample_len()
    );

    for spec in &hof_specs {
        fs::create_dir_all(run_dir.join(spec.name()))?;
    }

    if param.cv.fold_parallelism {
        let pool = rayon::ThreadPoolBuilder::new()
            .build()
            .map_err(|e| format!("cannot build the fold pool: {}", e))?;
        let results: Vec<Result<(), String>> = pool.install(|| {
            outer
                .par_iter()
                .enumerate()
                .map(|(i, fold)| {
                    run_fold(data, param, &hof_specs, i, fold, Arc::clone(&running), run_dir)
                })
                .collect()
        });
        for result in results {
            result?;
        }
    } else {
        for (i, fold) in outer.iter().enumerate() {
            run_fold(data, param, &hof_specs, i, fold, Arc::clone(&running), run_dir)?;
        }
    }

    for spec in &hof_specs {
        compute_measures(data, param, &objectives, &run_dir.join(spec.name()), outer.len())?;
    }
    Ok(())
}

fn run_fold(
    data: &InputData,
    param: &Param,
    hof_specs: &[HofSpec],
    fold_index: usize,
    fold: &Fold,
    running: Arc<AtomicBool>,
    run_dir: &Path,
) -> Result<(), String> {
    cinfo!(
        param.general.display_colorful,
        "\x1b[1;93mFold #{}...\x1b[0m",
        fold_index + 1
    );
    let train_rows = fold.train(data.sample_len());
    let train_data = data.subset(&train_rows);
    let test_data = data.subset(&fold.test);

    let prefiltered = prefilter::run(&train_data, &param.prefilter, param.evaluation.max_iterations)?;
    let reduced_train = prefiltered.lifter.uplift_data(&train_data);
    let reduced_test = prefiltered.lifter.uplift_data(&test_data);
    let feature_names = reduced_train.collapsed_feature_names();
    let x_train = reduced_train.collapsed_matrix();
    let x_test = reduced_test.collapsed_matrix();

    let objectives = Objective::parse_all(
        &param.objectives,
        data,
        param.evaluation.max_fold_deviation,
    )?;

    let inner_strata =
        folds::strata_for(&train_data, param.cv.n_time_strata, param.cv.min_stratum_size);
    let mut fold_rng = ga::component_rng(param.general.seed, &format!("fold {}", fold_index));
    let inner = folds::stratified_k_fold(&inner_strata, param.cv.inner_n_folds, 1, &mut fold_rng);

    // personalized mutation and RFE both read fitted importances
    let compute_importance = param.evaluation.compute_importance
        || param.general.algorithm == Algorithm::RFE
        || param.ga.bitlist_mutation_operator == MutationOperator::pers;
    let evaluator = Evaluator::new(
        x_train.clone(),
        train_data.outcomes.clone(),
        objectives.clone(),
        inner,
        param.evaluation.n_bootstrap,
        compute_importance,
        param.evaluation.max_iterations,
        param.prefilter.lasso_lambda,
        param.cv.max_workers,
    )?;

    let output = match &param.general.algorithm {
        Algorithm::NSGA2 | Algorithm::NSGA3 => {
            let mut ga_param = param.clone();
            if param.general.algorithm == Algorithm::NSGA3 {
                ga_param.ga.sorting_strategy = SortingStrategy::NSGA3;
            }
            ga::optimize(
                &evaluator,
                &prefiltered.importance,
                &ga_param,
                hof_specs,
                None,
                running,
                &mut fold_rng,
            )
        }
        baseline => baselines::run(
            baseline,
            &evaluator,
            &prefiltered.importance,
            param,
            hof_specs,
            &mut fold_rng,
        )?,
    };

    for result in &output.results {
        let table = assemble(
            &objectives,
            result,
            &x_train,
            &train_data.outcomes,
            &x_test,
            &test_data.outcomes,
        );
        write_fold_artifacts(
            run_dir,
            result,
            fold_index,
            &feature_names,
            &table,
            &objectives,
            &x_test,
            &test_data.outcomes,
        )
        .map_err(|e| format!("fold {} artifacts: {}", fold_index, e))?;
        cinfo!(
            param.general.display_colorful,
            "\x1b[1;93mFold #{} | hall '{}' ({}) holds {} members\x1b[0m",
            fold_index + 1,
            result.name,
            result.nick,
            result.len()
        );
    }
    Ok(())
}

/// Fitness of every hall member under the three regimes: refit-on-train,
/// the stored inner-CV estimate, and the held-out outer-test score.
fn assemble(
    objectives: &[Objective],
    result: &OptimizerResult,
    x_train: &Matrix,
    train_outcomes: &[Outcome],
    x_test: &Matrix,
    test_outcomes: &[Outcome],
) -> FitnessTable {
    let mut table = FitnessTable {
        nicks: objectives.iter().map(|o| o.nick.clone()).collect(),
        train: Vec::with_capacity(result.len()),
        inner_cv: Vec::with_capacity(result.len()),
        test: Vec::with_capacity(result.len()),
    };
    for (member, predictors) in result.individuals.iter().zip(result.predictors.iter()) {
        table.inner_cv.push(member.fitness().values().to_vec());
        table
            .train
            .push(regime_values(objectives, predictors, &member.mask, x_train, train_outcomes));
        table
            .test
            .push(regime_values(objectives, predictors, &member.mask, x_test, test_outcomes));
    }
    table
}

fn regime_values(
    objectives: &[Objective],
    predictors: &[Option<Predictor>],
    mask: &FeatureMask,
    x: &Matrix,
    outcomes: &[Outcome],
) -> Vec<f64> {
    objectives
        .iter()
        .zip(predictors.iter())
        .map(|(objective, predictor)| {
            if objective.is_structural() {
                return objective.structural_value(mask);
            }
            match predictor {
                Some(p) => {
                    objective.compute(&predictions_of(p, x, &outcomes[objective.outcome_index]))
                }
                None => {
                    warn!("no predictor for objective '{}'; scoring 0", objective.nick);
                    0.0
                }
            }
        })
        .collect()
}

fn predictions_of(predictor: &Predictor, x: &Matrix, outcome: &Outcome) -> Predictions {
    match outcome {
        Outcome::Categorical { labels, label_order, .. } => Predictions::Classification {
            predicted: predictor.predict_labels(x),
            truth: labels.clone(),
            n_classes: label_order.len(),
        },
        Outcome::Survival { events, durations, .. } => Predictions::Survival {
            risk: predictor.risk_scores(x),
            events: events.clone(),
            durations: durations.clone(),
        },
    }
}

/// Write one fold's tables into its hall-of-fame directory. Everything goes
/// to a hidden staging directory first and is renamed into place only once
/// complete, so a failing fold leaves nothing behind.
#[allow(clippy::too_many_arguments)]
fn write_fold_artifacts(
    run_dir: &Path,
    result: &OptimizerResult,
    fold_index: usize,
    feature_names: &[String],
    table: &FitnessTable,
    objectives: &[Objective],
    x_test: &Matrix,
    test_outcomes: &[Outcome],
) -> Result<(), Box<dyn Error>> {
    let hof_dir = run_dir.join(&result.name);
    let final_dir = hof_dir.join(format!("fold_{}", fold_index));
    let staging = hof_dir.join(format!(".fold_{}.partial", fold_index));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let masks: Vec<FeatureMask> = result.individuals.iter().map(|m| m.mask.clone()).collect();
    artifacts::write_solution_features(staging.join("solution_features.csv"), feature_names, &masks)?;
    artifacts::write_fitnesses(staging.join("fitnesses.csv"), table)?;

    // confusion of the leading member per categorical objective
    if let Some(first) = result.predictors.first() {
        for (objective, predictor) in objectives.iter().zip(first.iter()) {
            let predictor = match predictor {
                Some(p) => p,
                None => continue,
            };
            if let Outcome::Categorical { labels, label_order, .. } =
                &test_outcomes[objective.outcome_index]
            {
                let counts = artifacts::confusion_counts(
                    &predictor.predict_labels(x_test),
                    labels,
                    label_order.len(),
                );
                artifacts::write_confusion(
                    staging.join(format!("confusion_{}.csv", objective.nick)),
                    label_order,
                    &counts,
                )?;
            }
        }
    }

    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&staging, &final_dir)?;
    Ok(())
}

/// Cross-fold quality measures for one hall-of-fame directory, computed
/// from the saved tables and cached in its registry.
fn compute_measures(
    data: &InputData,
    param: &Param,
    objectives: &[Objective],
    hof_dir: &Path,
    n_folds: usize,
) -> Result<(), Box<dyn Error>> {
    let mut reg = ValidationRegistry::open(hof_dir.join("registry.json"), param.general.best_effort)?;
    let weights: Vec<f64> = objectives.iter().map(|o| o.weight).collect();
    let full_names = data.collapsed_feature_names();
    let position: HashMap<&String, usize> =
        full_names.iter().enumerate().map(|(i, n)| (n, i)).collect();

    let mut tables = Vec::with_capacity(n_folds);
    let mut reduced_masks: Vec<Vec<FeatureMask>> = Vec::with_capacity(n_folds);
    let mut full_masks: Vec<Vec<FeatureMask>> = Vec::with_capacity(n_folds);
    for fold in 0..n_folds {
        let dir = hof_dir.join(format!("fold_{}", fold));
        tables.push(artifacts::read_fitnesses(dir.join("fitnesses.csv"))?);
        let (names, masks) = artifacts::read_solution_features(dir.join("solution_features.csv"))?;
        let columns: Vec<usize> = names
            .iter()
            .map(|n| {
                position
                    .get(n)
                    .copied()
                    .ok_or_else(|| format!("unknown feature '{}' in fold {}", n, fold))
            })
            .collect::<Result<_, String>>()?;
        full_masks.push(
            masks
                .iter()
                .map(|m| {
                    FeatureMask::from_positions(
                        m.iter_true().map(|i| columns[i]),
                        full_names.len(),
                    )
                })
                .collect(),
        );
        reduced_masks.push(masks);
    }

    let per_fold = |f: &dyn Fn(&FitnessTable) -> f64| -> Vec<f64> { tables.iter().map(f).collect() };
    let test_hv = per_fold(&|t| hypervolume(&measures::hyperboxes_from_rows(&t.test, &weights)));
    let inner_hv =
        per_fold(&|t| hypervolume(&measures::hyperboxes_from_rows(&t.inner_cv, &weights)));
    let cross_hv = per_fold(&|t| {
        cross_hypervolume(
            &measures::hyperboxes_from_rows(&t.train, &weights),
            &measures::hyperboxes_from_rows(&t.test, &weights),
        )
    });
    let delta = per_fold(&|t| {
        pareto_delta(
            &measures::hyperboxes_from_rows(&t.train, &weights),
            &measures::hyperboxes_from_rows(&t.test, &weights),
        )
    });
    let jaccard: Vec<f64> = reduced_masks
        .iter()
        .map(|masks| measures::mean_pairwise_jaccard(masks))
        .collect();

    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len().max(1) as f64;
    let scalar_with_folds = [
        (registry::TEST_HYPERVOLUME, &test_hv),
        (registry::INNER_CV_HYPERVOLUME, &inner_hv),
        (registry::CROSS_HYPERVOLUME, &cross_hv),
        (registry::PARETO_DELTA, &delta),
        (registry::MEAN_JACCARD, &jaccard),
    ];
    for (key, values) in scalar_with_folds {
        reg.get_or_compute(key, || Ok(json!(mean(values))))?;
        reg.get_or_compute(&registry::folds_key(key), || Ok(json!(values)))?;
    }
    reg.get_or_compute(registry::STABILITY_WEIGHT_OVERLAP, || {
        Ok(json!(measures::stability_by_weight_overlap(
            &full_masks,
            full_names.len()
        )))
    })?;
    reg.get_or_compute(registry::STABILITY_DICE, || {
        Ok(json!(measures::stability_by_dice(&full_masks, full_names.len())))
    })?;
    reg.get_or_compute(registry::STABILITY_BEST_DICE, || {
        Ok(json!(measures::stability_by_best_dice(&full_masks)))
    })?;
    reg.get_or_compute(registry::PERFORMANCE_GAP, || {
        Ok(json!(measures::performance_gap(&inner_hv, &cross_hv)))
    })?;
    reg.get_or_compute(registry::PERFORMANCE_ERROR, || {
        Ok(json!(measures::performance_error(&inner_hv, &cross_hv)))
    })?;
    info!(
        "quality measures recorded in {}",
        hof_dir.join("registry.json").display()
    );
    Ok(())
}

/// Score persisted full-space masks against a second dataset: each mask's
/// models are refit on the whole primary dataset and applied to the
/// external samples.
pub fn external_rows(
    primary: &InputData,
    external: &InputData,
    objectives: &[Objective],
    masks: &[FeatureMask],
    lasso_lambda: f64,
    max_iterations: usize,
) -> Vec<Vec<f64>> {
    let x_primary = primary.collapsed_matrix();
    let x_external = external.collapsed_matrix();
    masks
        .iter()
        .map(|mask| {
            let columns = mask.true_positions();
            let x_sel = x_primary.select_columns(&columns);
            let x_ext = x_external.select_columns(&columns);
            objectives
                .iter()
                .map(|objective| {
                    if objective.is_structural() {
                        return objective.structural_value(mask);
                    }
                    let outcome = &primary.outcomes[objective.outcome_index];
                    let predictor =
                        match Predictor::fit(objective.model, &x_sel, outcome, lasso_lambda, max_iterations)
                        {
                            Ok(p) => p,
                            Err(message) => {
                                warn!(
                                    "external refit of '{}' failed ({}); substituting the dummy",
                                    objective.nick, message
                                );
                                Predictor::dummy_for(outcome)
                            }
                        };
                    let external_outcome = &external.outcomes[objective.outcome_index];
                    objective.compute(&predictions_of(&predictor, &x_ext, external_outcome))
                })
                .collect()
        })
        .collect()
}

/// Record external hypervolume and Pareto delta for every hall directory
/// under `run_dir`.
pub fn external_validation(
    primary: &InputData,
    external: &InputData,
    param: &Param,
    run_dir: &Path,
) -> Result<(), Box<dyn Error>> {
    if !primary.check_compatibility(external) {
        return Err(format!(
            "external dataset '{}' does not match the views of '{}'",
            external.nick, primary.nick
        )
        .into());
    }
    let objectives = Objective::parse_all(
        &param.objectives,
        primary,
        param.evaluation.max_fold_deviation,
    )?;
    let weights: Vec<f64> = objectives.iter().map(|o| o.weight).collect();
    let full_names = primary.collapsed_feature_names();
    let position: HashMap<&String, usize> =
        full_names.iter().enumerate().map(|(i, n)| (n, i)).collect();

    for hof in &param.hofs {
        let spec = HofSpec::parse(hof)?;
        let hof_dir = run_dir.join(spec.name());
        let mut reg =
            ValidationRegistry::open(hof_dir.join("registry.json"), param.general.best_effort)?;

        let mut external_hv = Vec::new();
        let mut external_delta = Vec::new();
        let mut fold = 0;
        loop {
            let dir = hof_dir.join(format!("fold_{}", fold));
            if !dir.exists() {
                break;
            }
            let (names, masks) = artifacts::read_solution_features(dir.join("solution_features.csv"))?;
            let columns: Vec<usize> = names
                .iter()
                .map(|n| {
                    position
                        .get(n)
                        .copied()
                        .ok_or_else(|| format!("unknown feature '{}' in fold {}", n, fold))
                })
                .collect::<Result<_, String>>()?;
            let full: Vec<FeatureMask> = masks
                .iter()
                .map(|m| {
                    FeatureMask::from_positions(m.iter_true().map(|i| columns[i]), full_names.len())
                })
                .collect();
            let rows = external_rows(
                primary,
                external,
                &objectives,
                &full,
                param.prefilter.lasso_lambda,
                param.evaluation.max_iterations,
            );
            let table = artifacts::read_fitnesses(dir.join("fitnesses.csv"))?;
            let external_boxes = measures::hyperboxes_from_rows(&rows, &weights);
            let test_boxes = measures::hyperboxes_from_rows(&table.test, &weights);
            external_hv.push(hypervolume(&external_boxes));
            external_delta.push(pareto_delta(&test_boxes, &external_boxes));
            fold += 1;
        }
        if external_hv.is_empty() {
            warn!("no persisted folds under {}; nothing to validate", hof_dir.display());
            continue;
        }
        let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
        reg.set(registry::EXTERNAL_HYPERVOLUME, json!(mean(&external_hv)))?;
        reg.set(&registry::folds_key(registry::EXTERNAL_HYPERVOLUME), json!(external_hv))?;
        reg.set(registry::EXTERNAL_PARETO_DELTA, json!(mean(&external_delta)))?;
        reg.set(
            &registry::folds_key(registry::EXTERNAL_PARETO_DELTA),
            json!(external_delta),
        )?;
        info!("external validation recorded for hall '{}'", spec.name());
    }
    Ok(())
}
