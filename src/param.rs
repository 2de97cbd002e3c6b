use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;

use crate::hof::HofSpec;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[allow(non_camel_case_types)]
pub enum Algorithm {
    NSGA2,
    NSGA3,
    RFE,
    LASSO_MO,
    sweeping,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum SortingStrategy {
    CrowdFull,
    CrowdCI,
    Social,
    NSGA3,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[allow(non_camel_case_types)]
pub enum MutationOperator {
    flip,
    symm,
    pers,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[allow(non_camel_case_types)]
pub enum CategoricalImportance {
    none,
    uniform,
    anova,
    lasso,
    fisher,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[allow(non_camel_case_types)]
pub enum SurvivalImportance {
    none,
    uniform,
    Cox,
    uniCox,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[allow(non_camel_case_types)]
pub enum SelectionRule {
    elitist,
    tournament,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[allow(non_camel_case_types)]
pub enum InitialFeaturesDistribution {
    uniform,
    binomial,
    binomial_from_uniform,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum OutcomeKind {
    Categorical,
    Survival,
}

/// An objective specifier: a bare name, or a `[objective, model, outcome]`
/// triple.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ObjectiveSpec {
    Name(String),
    Triple(String, String, String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ViewSpec {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutcomeSpec {
    pub name: String,
    pub kind: OutcomeKind,
}

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: DataParam,
    #[serde(default)]
    pub ga: GA,
    #[serde(default)]
    pub prefilter: Prefilter,
    #[serde(default = "objectives_default")]
    pub objectives: Vec<ObjectiveSpec>,
    #[serde(default)]
    pub cv: CVParam,
    #[serde(default)]
    pub evaluation: Evaluation,
    #[serde(default)]
    pub baselines: Baselines,
    #[serde(default = "hofs_default")]
    pub hofs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "seed_default")]
    pub seed: u64,
    #[serde(default = "algorithm_default")]
    pub algorithm: Algorithm,
    #[serde(default = "log_base_default")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "true_default")]
    pub display_colorful: bool,
    #[serde(default = "outdir_default")]
    pub outdir: String,
    #[serde(default = "true_default")]
    pub best_effort: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DataParam {
    #[serde(default = "empty_string")]
    pub dataset: String,
    #[serde(default = "empty_string")]
    pub external_dataset: String,
    #[serde(default)]
    pub views: Vec<ViewSpec>,
    #[serde(default)]
    pub external_views: Vec<ViewSpec>,
    #[serde(default = "empty_string")]
    pub outcome_file: String,
    #[serde(default = "empty_string")]
    pub external_outcome_file: String,
    #[serde(default)]
    pub outcomes: Vec<OutcomeSpec>,
    #[serde(default = "empty_string")]
    pub stratify_outcome: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GA {
    #[serde(default = "pop_default")]
    pub pop: usize,
    #[serde(default = "generations_default")]
    pub generations: Vec<usize>,
    #[serde(default = "mating_prob_default")]
    pub mating_prob: f64,
    #[serde(default = "mutation_frequency_default")]
    pub mutation_frequency: f64,
    #[serde(default = "sorting_strategy_default")]
    pub sorting_strategy: SortingStrategy,
    #[serde(default = "mutation_operator_default")]
    pub bitlist_mutation_operator: MutationOperator,
    #[serde(default = "false_default")]
    pub use_clone_repurposing: bool,
    #[serde(default = "selection_default")]
    pub selection: SelectionRule,
    #[serde(default = "tournament_size_default")]
    pub selection_tournament_size: usize,
    #[serde(default = "one_default")]
    pub min_num_features: usize,
    #[serde(default = "max_num_features_default")]
    pub max_num_features: usize,
    #[serde(default = "initial_features_distribution_default")]
    pub initial_features_distribution: InitialFeaturesDistribution,
    #[serde(default = "initial_features_mean_default")]
    pub initial_features_mean: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Prefilter {
    #[serde(default = "categorical_importance_default")]
    pub feature_importance_categorical: CategoricalImportance,
    #[serde(default = "survival_importance_default")]
    pub feature_importance_survival: SurvivalImportance,
    #[serde(default = "max_pvalue_default")]
    pub max_pvalue: f64,
    #[serde(default = "lasso_lambda_default")]
    pub lasso_lambda: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CVParam {
    #[serde(default = "folds_default")]
    pub inner_n_folds: usize,
    #[serde(default = "folds_default")]
    pub outer_folds: usize,
    #[serde(default = "one_default")]
    pub cv_repeats: usize,
    #[serde(default = "false_default")]
    pub fold_parallelism: bool,
    #[serde(default = "one_default")]
    pub max_workers: usize,
    #[serde(default = "n_time_strata_default")]
    pub n_time_strata: usize,
    #[serde(default = "min_stratum_size_default")]
    pub min_stratum_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Evaluation {
    #[serde(default = "uzero_default")]
    pub n_bootstrap: usize,
    #[serde(default = "false_default")]
    pub compute_importance: bool,
    #[serde(default = "zero_default")]
    pub max_fold_deviation: f64,
    #[serde(default = "max_iterations_default")]
    pub max_iterations: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Baselines {
    #[serde(default = "rfe_drop_fraction_default")]
    pub rfe_drop_fraction: f64,
    #[serde(default = "lasso_path_len_default")]
    pub lasso_path_len: usize,
    #[serde(default = "lasso_lambda_max_default")]
    pub lasso_lambda_max: f64,
    #[serde(default = "lasso_lambda_min_default")]
    pub lasso_lambda_min: f64,
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for DataParam {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for GA {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Prefilter {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for CVParam {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Evaluation {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Baselines {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn get(param_file: String) -> Result<Param, Box<dyn Error>> {
    let param_file_reader = File::open(param_file)?;
    let param_reader = BufReader::new(param_file_reader);

    let mut config: Param = serde_yaml::from_reader(param_reader)?;

    validate(&mut config)?;

    Ok(config)
}

pub fn validate(param: &mut Param) -> Result<(), String> {
    if !param.general.log_base.is_empty() {
        param.general.display_colorful = false;
    }

    if param.objectives.is_empty() {
        return Err("objectives must declare at least one objective".to_string());
    }

    if param.ga.pop < 2 {
        return Err(format!("Invalid pop={}. Must be >= 2.", param.ga.pop));
    }

    if param.ga.generations.is_empty() {
        return Err("generations must list at least one sweep".to_string());
    }

    if !(0.0..=1.0).contains(&param.ga.mating_prob) {
        return Err(format!(
            "Invalid mating_prob={:.3}. Must be in range [0, 1].",
            param.ga.mating_prob
        ));
    }

    if param.ga.mutation_frequency < 0.0 {
        return Err(format!(
            "Invalid mutation_frequency={:.3}. Must be >= 0.",
            param.ga.mutation_frequency
        ));
    }

    if param.ga.selection_tournament_size != 2 && param.ga.selection_tournament_size != 4 {
        return Err(format!(
            "Invalid selection_tournament_size={}. Must be 2 or 4.",
            param.ga.selection_tournament_size
        ));
    }

    if param.ga.min_num_features < 1 || param.ga.max_num_features < param.ga.min_num_features {
        return Err(format!(
            "Invalid feature count range [{}, {}].",
            param.ga.min_num_features, param.ga.max_num_features
        ));
    }

    if param.cv.inner_n_folds < 2 || param.cv.outer_folds < 2 {
        return Err(format!(
            "Invalid fold counts inner_n_folds={} outer_folds={}. Both must be >= 2.",
            param.cv.inner_n_folds, param.cv.outer_folds
        ));
    }

    if param.cv.cv_repeats < 1 {
        return Err("Invalid cv_repeats=0. Must be >= 1.".to_string());
    }

    if param.cv.max_workers < 1 {
        return Err("Invalid max_workers=0. Must be >= 1.".to_string());
    }

    if param.cv.fold_parallelism && param.cv.max_workers > 1 {
        warn!(
            "fold_parallelism forces sequential candidate evaluation; \
            max_workers reduced from {} to 1 to avoid oversubscription.",
            param.cv.max_workers
        );
        param.cv.max_workers = 1;
    }

    if param.evaluation.n_bootstrap > 0 && param.evaluation.n_bootstrap < 100 {
        warn!(
            "n_bootstrap={} is small; percentile confidence intervals may be unstable.",
            param.evaluation.n_bootstrap
        );
    }

    if param.ga.bitlist_mutation_operator == MutationOperator::pers
        && !param.evaluation.compute_importance
    {
        warn!(
            "bitlist_mutation_operator=pers without compute_importance: individuals \
            lacking importances fall back to plain flip mutation."
        );
    }

    if param.general.algorithm == Algorithm::sweeping && param.ga.generations.len() > 1 {
        warn!("sweeping enumerates feature counts directly; the generations list is ignored.");
    }

    for hof in &param.hofs {
        HofSpec::parse(hof)?;
    }

    Ok(())
}

// Default value definitions

fn seed_default() -> u64 {
    4815162342
}
fn empty_string() -> String {
    "".to_string()
}
fn algorithm_default() -> Algorithm {
    Algorithm::NSGA2
}
fn log_base_default() -> String {
    "".to_string()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn outdir_default() -> String {
    "paretomics_out".to_string()
}
fn objectives_default() -> Vec<ObjectiveSpec> {
    Vec::new()
}
fn hofs_default() -> Vec<String> {
    vec!["pareto".to_string()]
}
fn pop_default() -> usize {
    200
}
fn generations_default() -> Vec<usize> {
    vec![50]
}
fn mating_prob_default() -> f64 {
    0.5
}
fn mutation_frequency_default() -> f64 {
    2.0
}
fn sorting_strategy_default() -> SortingStrategy {
    SortingStrategy::CrowdFull
}
fn mutation_operator_default() -> MutationOperator {
    MutationOperator::flip
}
fn selection_default() -> SelectionRule {
    SelectionRule::elitist
}
fn tournament_size_default() -> usize {
    2
}
fn max_num_features_default() -> usize {
    50
}
fn initial_features_distribution_default() -> InitialFeaturesDistribution {
    InitialFeaturesDistribution::uniform
}
fn initial_features_mean_default() -> f64 {
    10.0
}
fn categorical_importance_default() -> CategoricalImportance {
    CategoricalImportance::anova
}
fn survival_importance_default() -> SurvivalImportance {
    SurvivalImportance::Cox
}
fn max_pvalue_default() -> f64 {
    0.05
}
fn lasso_lambda_default() -> f64 {
    0.01
}
fn folds_default() -> usize {
    5
}
fn n_time_strata_default() -> usize {
    2
}
fn min_stratum_size_default() -> usize {
    5
}
fn max_iterations_default() -> usize {
    100
}
fn rfe_drop_fraction_default() -> f64 {
    0.2
}
fn lasso_path_len_default() -> usize {
    20
}
fn lasso_lambda_max_default() -> f64 {
    1.0
}
fn lasso_lambda_min_default() -> f64 {
    1e-3
}
fn false_default() -> bool {
    false
}
fn true_default() -> bool {
    true
}
fn zero_default() -> f64 {
    0.0
}
fn uzero_default() -> usize {
    0
}
fn one_default() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objective_spec_forms_parse() {
        let yaml = "
objectives:
  - balanced_accuracy
  - [cindex, cox, os]
  - leanness
";
        let param: Param = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(param.objectives.len(), 3);
        assert_eq!(
            param.objectives[0],
            ObjectiveSpec::Name("balanced_accuracy".to_string())
        );
        assert_eq!(
            param.objectives[1],
            ObjectiveSpec::Triple("cindex".to_string(), "cox".to_string(), "os".to_string())
        );
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let param: Param = serde_yaml::from_str("objectives: [accuracy]").unwrap();
        assert_eq!(param.ga.pop, 200);
        assert_eq!(param.ga.generations, vec![50]);
        assert_eq!(param.cv.inner_n_folds, 5);
        assert_eq!(param.general.algorithm, Algorithm::NSGA2);
        assert_eq!(param.hofs, vec!["pareto".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_tournament_size() {
        let mut param: Param = serde_yaml::from_str("objectives: [accuracy]").unwrap();
        param.ga.selection_tournament_size = 3;
        let err = validate(&mut param).unwrap_err();
        assert!(
            err.contains("selection_tournament_size"),
            "error should name the offending key, got: {}",
            err
        );
    }

    #[test]
    fn test_validate_forces_sequential_under_fold_parallelism() {
        let mut param: Param = serde_yaml::from_str("objectives: [accuracy]").unwrap();
        param.cv.fold_parallelism = true;
        param.cv.max_workers = 8;
        validate(&mut param).unwrap();
        assert_eq!(param.cv.max_workers, 1);
    }

    #[test]
    fn test_validate_requires_objectives() {
        let mut param = Param::new();
        assert!(validate(&mut param).is_err());
    }
}
