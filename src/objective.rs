use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::data::{InputData, Outcome};
use crate::mask::FeatureMask;
use crate::param::ObjectiveSpec;
use crate::predictor::{concordance_index, Model};
use crate::utils::{mean_and_std, quantile};

/// The closed set of scoring rules an objective can apply.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum Metric {
    Accuracy,
    BalancedAccuracy,
    MacroF1,
    CIndex,
    Leanness,
    RootLeanness,
    SoftLeanness,
}

impl Metric {
    pub fn parse(name: &str) -> Result<Metric, String> {
        match name {
            "accuracy" => Ok(Metric::Accuracy),
            "balanced_accuracy" => Ok(Metric::BalancedAccuracy),
            "macro_f1" => Ok(Metric::MacroF1),
            "cindex" => Ok(Metric::CIndex),
            "leanness" => Ok(Metric::Leanness),
            "root_leanness" => Ok(Metric::RootLeanness),
            "soft_leanness" => Ok(Metric::SoftLeanness),
            other => Err(format!("unknown objective '{}'", other)),
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Metric::Leanness | Metric::RootLeanness | Metric::SoftLeanness
        )
    }

    pub fn is_survival(&self) -> bool {
        matches!(self, Metric::CIndex)
    }
}

/// Predictions gathered on a set of samples, in the shape the metric needs.
#[derive(Clone, Debug)]
pub enum Predictions {
    Classification {
        predicted: Vec<usize>,
        truth: Vec<usize>,
        n_classes: usize,
    },
    Survival {
        risk: Vec<f64>,
        events: Vec<bool>,
        durations: Vec<f64>,
    },
}

impl Predictions {
    pub fn len(&self) -> usize {
        match self {
            Predictions::Classification { truth, .. } => truth.len(),
            Predictions::Survival { events, .. } => events.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The rows at `indices`, repeats allowed; the bootstrap resampler.
    pub fn resample(&self, indices: &[usize]) -> Predictions {
        match self {
            Predictions::Classification {
                predicted,
                truth,
                n_classes,
            } => Predictions::Classification {
                predicted: indices.iter().map(|&i| predicted[i]).collect(),
                truth: indices.iter().map(|&i| truth[i]).collect(),
                n_classes: *n_classes,
            },
            Predictions::Survival {
                risk,
                events,
                durations,
            } => Predictions::Survival {
                risk: indices.iter().map(|&i| risk[i]).collect(),
                events: indices.iter().map(|&i| events[i]).collect(),
                durations: indices.iter().map(|&i| durations[i]).collect(),
            },
        }
    }

    /// Append another batch of predictions of the same shape.
    pub fn extend(&mut self, other: &Predictions) {
        match (self, other) {
            (
                Predictions::Classification { predicted, truth, .. },
                Predictions::Classification {
                    predicted: p2,
                    truth: t2,
                    ..
                },
            ) => {
                predicted.extend_from_slice(p2);
                truth.extend_from_slice(t2);
            }
            (
                Predictions::Survival {
                    risk,
                    events,
                    durations,
                },
                Predictions::Survival {
                    risk: r2,
                    events: e2,
                    durations: d2,
                },
            ) => {
                risk.extend_from_slice(r2);
                events.extend_from_slice(e2);
                durations.extend_from_slice(d2);
            }
            _ => panic!("mixing classification and survival predictions"),
        }
    }
}

/// One objective: a metric, and for predictive metrics the model family and
/// the outcome it scores against. Structural metrics depend on the mask
/// alone.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Objective {
    pub metric: Metric,
    pub model: Model,
    pub outcome_index: usize,
    pub nick: String,
    /// +1 maximize, -1 minimize
    pub weight: f64,
    /// when > 0, fold combination zeroes the fitness if the across-fold
    /// standard deviation exceeds this threshold
    pub max_fold_deviation: f64,
}

impl Objective {
    /// Resolve a config specifier against the dataset's outcomes.
    ///
    /// A bare name picks the default model for the metric family and the
    /// first outcome of the matching kind; a `[objective, model, outcome]`
    /// triple names all three. A `_dev` suffix arms the with-deviation fold
    /// combiner using `max_fold_deviation`.
    pub fn parse(
        spec: &ObjectiveSpec,
        data: &InputData,
        max_fold_deviation: f64,
    ) -> Result<Objective, String> {
        let (raw_name, model_name, outcome_name) = match spec {
            ObjectiveSpec::Name(name) => (name.clone(), None, None),
            ObjectiveSpec::Triple(name, model, outcome) => {
                (name.clone(), Some(model.clone()), Some(outcome.clone()))
            }
        };
        let (metric_name, with_deviation) = match raw_name.strip_suffix("_dev") {
            Some(base) => (base.to_string(), true),
            None => (raw_name.clone(), false),
        };
        let metric = Metric::parse(&metric_name)?;

        if metric.is_structural() {
            return Ok(Objective {
                metric,
                model: Model::Dummy,
                outcome_index: 0,
                nick: raw_name,
                weight: 1.0,
                max_fold_deviation: 0.0,
            });
        }

        let model = match &model_name {
            Some(name) => Model::parse(name)?,
            None if metric.is_survival() => Model::Cox,
            None => Model::Logistic,
        };
        let outcome_index = match &outcome_name {
            Some(name) => data
                .outcomes
                .iter()
                .position(|o| o.name() == name.as_str())
                .ok_or_else(|| format!("objective '{}' names unknown outcome '{}'", raw_name, name))?,
            None => data
                .outcomes
                .iter()
                .position(|o| o.is_survival() == metric.is_survival())
                .ok_or_else(|| {
                    format!(
                        "objective '{}' finds no {} outcome in dataset '{}'",
                        raw_name,
                        if metric.is_survival() { "survival" } else { "categorical" },
                        data.nick
                    )
                })?,
        };
        let outcome = &data.outcomes[outcome_index];
        if metric.is_survival() != outcome.is_survival() {
            return Err(format!(
                "objective '{}' paired with incompatible outcome '{}'",
                raw_name,
                outcome.name()
            ));
        }
        if metric.is_survival() && model != Model::Cox && model != Model::Dummy {
            return Err(format!("objective '{}' needs a survival-capable model", raw_name));
        }

        let nick = match spec {
            ObjectiveSpec::Name(_) => raw_name.clone(),
            ObjectiveSpec::Triple(..) => format!("{}_{}", raw_name, outcome.name()),
        };
        Ok(Objective {
            metric,
            model,
            outcome_index,
            nick,
            weight: 1.0,
            max_fold_deviation: if with_deviation { max_fold_deviation } else { 0.0 },
        })
    }

    pub fn parse_all(
        specs: &[ObjectiveSpec],
        data: &InputData,
        max_fold_deviation: f64,
    ) -> Result<Vec<Objective>, String> {
        specs
            .iter()
            .map(|spec| Objective::parse(spec, data, max_fold_deviation))
            .collect()
    }

    pub fn is_structural(&self) -> bool {
        self.metric.is_structural()
    }

    /// Whether this objective overrides the plain arithmetic-mean fold
    /// combination.
    pub fn force_general_cv(&self) -> bool {
        self.max_fold_deviation > 0.0
    }

    /// Value of a structural objective for a mask.
    pub fn structural_value(&self, mask: &FeatureMask) -> f64 {
        let leanness = 1.0 / (1.0 + mask.sum() as f64);
        match self.metric {
            Metric::Leanness => leanness,
            Metric::RootLeanness => leanness.sqrt(),
            // gentle penalty that only bites for large subsets
            Metric::SoftLeanness => 1.0 / (1.0 + (mask.sum() as f64 / 10.0).powi(2)),
            _ => panic!("structural value of the predictive objective '{}'", self.nick),
        }
    }

    /// Value of a predictive objective from predictions.
    pub fn compute(&self, predictions: &Predictions) -> f64 {
        if predictions.is_empty() {
            return 0.0;
        }
        match (self.metric, predictions) {
            (Metric::Accuracy, Predictions::Classification { predicted, truth, .. }) => {
                let correct = predicted
                    .iter()
                    .zip(truth.iter())
                    .filter(|(p, t)| p == t)
                    .count();
                correct as f64 / truth.len() as f64
            }
            (
                Metric::BalancedAccuracy,
                Predictions::Classification {
                    predicted,
                    truth,
                    n_classes,
                },
            ) => {
                let mut recalls = Vec::new();
                for class in 0..*n_classes {
                    let total = truth.iter().filter(|&&t| t == class).count();
                    if total == 0 {
                        continue;
                    }
                    let hit = predicted
                        .iter()
                        .zip(truth.iter())
                        .filter(|(&p, &t)| t == class && p == class)
                        .count();
                    recalls.push(hit as f64 / total as f64);
                }
                if recalls.is_empty() {
                    0.0
                } else {
                    recalls.iter().sum::<f64>() / recalls.len() as f64
                }
            }
            (
                Metric::MacroF1,
                Predictions::Classification {
                    predicted,
                    truth,
                    n_classes,
                },
            ) => {
                let mut f1s = Vec::new();
                for class in 0..*n_classes {
                    let tp = predicted
                        .iter()
                        .zip(truth.iter())
                        .filter(|(&p, &t)| p == class && t == class)
                        .count() as f64;
                    let fp = predicted
                        .iter()
                        .zip(truth.iter())
                        .filter(|(&p, &t)| p == class && t != class)
                        .count() as f64;
                    let fn_ = predicted
                        .iter()
                        .zip(truth.iter())
                        .filter(|(&p, &t)| p != class && t == class)
                        .count() as f64;
                    if tp + fp + fn_ == 0.0 {
                        continue;
                    }
                    f1s.push(2.0 * tp / (2.0 * tp + fp + fn_));
                }
                if f1s.is_empty() {
                    0.0
                } else {
                    f1s.iter().sum::<f64>() / f1s.len() as f64
                }
            }
            (
                Metric::CIndex,
                Predictions::Survival {
                    risk,
                    events,
                    durations,
                },
            ) => concordance_index(risk, events, durations),
            (metric, _) => panic!("metric {:?} applied to predictions of the wrong kind", metric),
        }
    }

    /// Per-fold values combined into one fitness value: arithmetic mean, or
    /// the with-deviation rule when armed.
    pub fn combine_fold_results(&self, fold_values: &[f64]) -> f64 {
        let (mean, std) = mean_and_std(fold_values);
        if self.force_general_cv() && std > self.max_fold_deviation {
            return 0.0;
        }
        mean
    }

    /// Convert a normalized objective value back to a human-readable label:
    /// identity for predictive objectives, the implied feature count for
    /// structural ones.
    pub fn val_to_label(&self, value: f64) -> f64 {
        match self.metric {
            Metric::Leanness => (1.0 / value - 1.0).round(),
            Metric::RootLeanness => (1.0 / (value * value) - 1.0).round(),
            Metric::SoftLeanness => {
                if value <= 0.0 {
                    f64::INFINITY
                } else {
                    (10.0 * ((1.0 - value) / value).sqrt()).round()
                }
            }
            _ => value,
        }
    }

    /// Whether this objective scores against `outcome`.
    pub fn matches_outcome(&self, outcome: &Outcome) -> bool {
        !self.is_structural() && self.metric.is_survival() == outcome.is_survival()
    }
}

/// Bootstrap summary of a single objective: mean, standard deviation and the
/// central 95% percentile interval over B resamples.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BootstrapStats {
    pub mean: f64,
    pub std_dev: f64,
    pub ci95: (f64, f64),
}

/// Resample the prediction rows B times with replacement and summarize the
/// metric's distribution.
pub fn bootstrap_stats(
    objective: &Objective,
    predictions: &Predictions,
    n_bootstrap: usize,
    rng: &mut ChaCha8Rng,
) -> BootstrapStats {
    let n = predictions.len();
    let mut values = Vec::with_capacity(n_bootstrap);
    for _ in 0..n_bootstrap {
        let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        values.push(objective.compute(&predictions.resample(&indices)));
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let (mean, std_dev) = mean_and_std(&values);
    BootstrapStats {
        mean,
        std_dev,
        ci95: (quantile(&values, 0.025), quantile(&values, 0.975)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn classification(predicted: &[usize], truth: &[usize], n_classes: usize) -> Predictions {
        Predictions::Classification {
            predicted: predicted.to_vec(),
            truth: truth.to_vec(),
            n_classes,
        }
    }

    fn objective(metric: Metric) -> Objective {
        Objective {
            metric,
            model: Model::Logistic,
            outcome_index: 0,
            nick: format!("{:?}", metric),
            weight: 1.0,
            max_fold_deviation: 0.0,
        }
    }

    #[test]
    fn test_accuracy_and_balanced_accuracy() {
        // imbalanced truth: majority-vote predictions score high accuracy
        // but chance-level balanced accuracy
        let p = classification(&[0, 0, 0, 0, 0, 0], &[0, 0, 0, 0, 1, 1], 2);
        assert!((objective(Metric::Accuracy).compute(&p) - 4.0 / 6.0).abs() < 1e-12);
        assert!((objective(Metric::BalancedAccuracy).compute(&p) - 0.5).abs() < 1e-12);

        let perfect = classification(&[0, 1, 0, 1], &[0, 1, 0, 1], 2);
        assert_eq!(objective(Metric::BalancedAccuracy).compute(&perfect), 1.0);
    }

    #[test]
    fn test_macro_f1() {
        let p = classification(&[0, 1, 1, 0], &[0, 1, 0, 0], 2);
        // class 0: tp=2 fp=0 fn=1 -> f1 = 4/5; class 1: tp=1 fp=1 fn=0 -> f1 = 2/3
        let expected = (0.8 + 2.0 / 3.0) / 2.0;
        assert!((objective(Metric::MacroF1).compute(&p) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_structural_values_and_labels() {
        let leanness = objective(Metric::Leanness);
        let empty = FeatureMask::zeros(10);
        assert_eq!(leanness.structural_value(&empty), 1.0, "leanness of the empty mask is 1");
        let three = FeatureMask::from_positions([0, 4, 7], 10);
        assert!((leanness.structural_value(&three) - 0.25).abs() < 1e-12);
        assert_eq!(leanness.val_to_label(0.25), 3.0, "val_to_label inverts leanness");

        let root = objective(Metric::RootLeanness);
        assert!((root.structural_value(&three) - 0.5).abs() < 1e-12);
        assert_eq!(root.val_to_label(0.5), 3.0);
    }

    #[test]
    fn test_fold_combination_mean_and_deviation_guard() {
        let plain = objective(Metric::Accuracy);
        assert!((plain.combine_fold_results(&[0.8, 0.6]) - 0.7).abs() < 1e-12);

        let mut guarded = objective(Metric::Accuracy);
        guarded.max_fold_deviation = 0.05;
        assert!(guarded.force_general_cv());
        assert_eq!(
            guarded.combine_fold_results(&[1.0, 0.2]),
            0.0,
            "unstable folds should zero the fitness"
        );
        assert!((guarded.combine_fold_results(&[0.71, 0.69]) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_parse_bare_name_and_triple() {
        let data = crate::data::tests::create_test_data();
        let bare = Objective::parse(
            &ObjectiveSpec::Name("balanced_accuracy".to_string()),
            &data,
            0.0,
        )
        .unwrap();
        assert_eq!(bare.model, Model::Logistic);
        assert_eq!(data.outcomes[bare.outcome_index].name(), "status");

        let triple = Objective::parse(
            &ObjectiveSpec::Triple("cindex".to_string(), "cox".to_string(), "os".to_string()),
            &data,
            0.0,
        )
        .unwrap();
        assert_eq!(triple.model, Model::Cox);
        assert_eq!(triple.nick, "cindex_os");

        let unknown = Objective::parse(&ObjectiveSpec::Name("auc".to_string()), &data, 0.0);
        assert!(unknown.is_err(), "unknown objective names must be fatal");

        let mismatched = Objective::parse(
            &ObjectiveSpec::Triple("accuracy".to_string(), "logistic".to_string(), "os".to_string()),
            &data,
            0.0,
        );
        assert!(mismatched.is_err(), "classification metric against survival outcome");
    }

    #[test]
    fn test_dev_suffix_arms_the_deviation_guard() {
        let data = crate::data::tests::create_test_data();
        let dev = Objective::parse(
            &ObjectiveSpec::Name("accuracy_dev".to_string()),
            &data,
            0.1,
        )
        .unwrap();
        assert_eq!(dev.metric, Metric::Accuracy);
        assert!(dev.force_general_cv());
        assert_eq!(dev.max_fold_deviation, 0.1);
    }

    #[test]
    fn test_bootstrap_stats_on_constant_predictions() {
        let p = classification(&[0, 1, 0, 1], &[0, 1, 0, 1], 2);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let stats = bootstrap_stats(&objective(Metric::Accuracy), &p, 200, &mut rng);
        assert_eq!(stats.mean, 1.0, "perfect predictions resample to 1 everywhere");
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.ci95, (1.0, 1.0));
    }

    #[test]
    fn test_bootstrap_interval_brackets_the_point_estimate() {
        let p = classification(&[0, 0, 1, 1, 0, 1, 0, 0], &[0, 1, 1, 1, 0, 0, 0, 1], 2);
        let obj = objective(Metric::Accuracy);
        let point = obj.compute(&p);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let stats = bootstrap_stats(&obj, &p, 500, &mut rng);
        assert!(stats.ci95.0 <= point && point <= stats.ci95.1);
        assert!(stats.std_dev > 0.0);
    }
}
