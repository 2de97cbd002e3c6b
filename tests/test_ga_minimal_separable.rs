use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use paretomics::data::{InputData, Matrix, Outcome};
use paretomics::distrib::Distribution;
use paretomics::evaluator::Evaluator;
use paretomics::folds;
use paretomics::ga;
use paretomics::hof::HofSpec;
use paretomics::objective::Objective;
use paretomics::param::{ObjectiveSpec, Param};

/// Four samples over two features; feature 1 equals the outcome exactly,
/// feature 0 is uninformative.
fn fixture() -> (Matrix, Outcome) {
    let x = Matrix::from_rows(vec![
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 1.0],
        vec![0.0, 0.0],
    ]);
    let raw = vec![
        "neg".to_string(),
        "pos".to_string(),
        "pos".to_string(),
        "neg".to_string(),
    ];
    (x, Outcome::categorical("status", raw))
}

fn fixture_evaluator() -> Evaluator {
    let (x, outcome) = fixture();
    let data = {
        let mut d = InputData::new("fixture");
        d.outcomes = vec![outcome.clone()];
        d
    };
    let objectives = Objective::parse_all(
        &[
            ObjectiveSpec::Name("balanced_accuracy".to_string()),
            ObjectiveSpec::Name("leanness".to_string()),
        ],
        &data,
        0.0,
    )
    .unwrap();
    let strata = match &outcome {
        Outcome::Categorical { labels, .. } => folds::categorical_strata(labels),
        Outcome::Survival { .. } => unreachable!(),
    };
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let inner = folds::stratified_k_fold(&strata, 2, 1, &mut rng);
    Evaluator::new(x, vec![outcome], objectives, inner, 0, false, 100, 0.01, 1).unwrap()
}

fn fixture_param() -> Param {
    let mut param = Param::new();
    param.objectives = vec![
        ObjectiveSpec::Name("balanced_accuracy".to_string()),
        ObjectiveSpec::Name("leanness".to_string()),
    ];
    param.ga.pop = 8;
    param.ga.generations = vec![10];
    param.ga.min_num_features = 1;
    param.ga.max_num_features = 2;
    param
}

fn run_fixture(seed: u64) -> ga::OptimizerOutput {
    let evaluator = fixture_evaluator();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    ga::optimize(
        &evaluator,
        &Distribution::uniform(2),
        &fixture_param(),
        &[HofSpec::Pareto],
        None,
        Arc::new(AtomicBool::new(true)),
        &mut rng,
    )
}

#[test]
fn test_front_is_the_separating_singleton() {
    let output = run_fixture(42);
    let front = &output.results[0].individuals;
    assert!(!front.is_empty(), "the hall must retain at least one member");

    let best = front
        .iter()
        .find(|i| i.mask.get(1) && !i.mask.get(0))
        .expect("the single separating feature must sit on the front");
    let values = best.fitness().values();
    assert!(
        (values[0] - 1.0).abs() < 1e-9,
        "feature 1 reproduces the outcome, got balanced accuracy {}",
        values[0]
    );
    assert!((values[1] - 0.5).abs() < 1e-12, "leanness of one feature is 1/2");

    // the only other undominated point is the empty mask, whose dummy
    // predictor trades accuracy for leanness 1
    for member in front.iter().filter(|i| i.k() > 0) {
        assert!(
            member.mask.get(1) && !member.mask.get(0),
            "a non-empty member other than the separating singleton would be dominated"
        );
    }
    for member in front.iter().filter(|i| i.k() == 0) {
        assert!(
            (member.fitness().values()[1] - 1.0).abs() < 1e-12,
            "the empty mask carries leanness 1"
        );
    }
}

#[test]
fn test_fixture_run_is_reproducible() {
    let first = run_fixture(42);
    let second = run_fixture(42);
    assert_eq!(
        first.results[0].nick, second.results[0].nick,
        "identical seeds must produce identical hall digests"
    );
    assert_eq!(first.logbook.records.len(), second.logbook.records.len());
}
