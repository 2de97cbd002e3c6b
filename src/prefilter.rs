use fishers_exact::fishers_exact;
use log::{debug, warn};
use rand::distributions::Distribution as SampleFrom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{Binomial, ContinuousCDF, FisherSnedecor, Normal};

use crate::data::{InputData, Matrix, Outcome};
use crate::distrib::Distribution;
use crate::individual::Individual;
use crate::lifter::{FeatureSpaceLifter, MultiViewLifter};
use crate::mask::FeatureMask;
use crate::param::{CategoricalImportance, InitialFeaturesDistribution, Prefilter, SurvivalImportance, GA};
use crate::predictor::{fit_univariate_cox, lasso_coordinate_descent};

/// Prefilter verdict for one run: the per-view lifters and the importance
/// distribution over the surviving (reduced, collapsed) feature space.
#[derive(Clone, Debug)]
pub struct PrefilterOutput {
    pub lifter: MultiViewLifter,
    pub importance: Distribution,
}

/// Run the configured filters on every view of `data`.
///
/// Each outcome votes with the filter of its kind; a feature survives when
/// any outcome keeps it (multi-outcome OR) and its importance weights are
/// summed across outcomes. Per-view weights are normalized and scaled by the
/// view's surviving feature count before collapsing, so a view's share of
/// the seed distribution follows its size rather than its weight scale.
pub fn run(
    data: &InputData,
    config: &Prefilter,
    max_iterations: usize,
) -> Result<PrefilterOutput, String> {
    let mut view_names = Vec::with_capacity(data.views.len());
    let mut lifters = Vec::with_capacity(data.views.len());
    let mut reduced_weights = Vec::new();

    for view in &data.views {
        let n = view.x.n_cols();
        let mut active = vec![false; n];
        let mut weights = vec![0.0; n];
        for outcome in &data.outcomes {
            let (a, w) = match outcome {
                Outcome::Categorical { labels, label_order, .. } => categorical_filter(
                    config.feature_importance_categorical,
                    &view.x,
                    labels,
                    label_order.len(),
                    config,
                    max_iterations,
                )?,
                Outcome::Survival { events, durations, .. } => survival_filter(
                    config.feature_importance_survival,
                    &view.x,
                    events,
                    durations,
                    config,
                )?,
            };
            for i in 0..n {
                active[i] |= a[i];
                weights[i] += w[i];
            }
        }
        let survivors = active.iter().filter(|&&a| a).count();
        debug!(
            "prefilter kept {}/{} features of view '{}'",
            survivors, n, view.name
        );
        if survivors == 0 {
            warn!("prefilter removed every feature of view '{}'", view.name);
        }

        let view_weights: Vec<f64> = (0..n).filter(|&i| active[i]).map(|i| weights[i]).collect();
        let total: f64 = view_weights.iter().sum();
        for w in &view_weights {
            if total > 0.0 {
                reduced_weights.push(w / total * survivors as f64);
            } else {
                reduced_weights.push(1.0);
            }
        }
        view_names.push(view.name.clone());
        lifters.push(FeatureSpaceLifter::new(active));
    }

    if reduced_weights.is_empty() {
        return Err(format!(
            "prefilter removed every feature of dataset '{}'",
            data.nick
        ));
    }
    Ok(PrefilterOutput {
        lifter: MultiViewLifter::new(view_names, lifters),
        importance: Distribution::from_weights(reduced_weights).as_cached(),
    })
}

fn categorical_filter(
    method: CategoricalImportance,
    x: &Matrix,
    labels: &[usize],
    n_classes: usize,
    config: &Prefilter,
    max_iterations: usize,
) -> Result<(Vec<bool>, Vec<f64>), String> {
    let n = x.n_cols();
    match method {
        CategoricalImportance::none | CategoricalImportance::uniform => {
            Ok((vec![true; n], vec![1.0; n]))
        }
        CategoricalImportance::anova => {
            let mut active = vec![false; n];
            let mut weights = vec![0.0; n];
            for j in 0..n {
                let (f, p) = anova_f_test(&x.column(j), labels, n_classes)?;
                if p <= config.max_pvalue {
                    active[j] = true;
                    weights[j] = f;
                }
            }
            Ok((active, weights))
        }
        CategoricalImportance::lasso => {
            let mut weights = vec![0.0; n];
            // binary outcomes need a single fit, multiclass one per class
            let fitted_classes = if n_classes == 2 { 1 } else { n_classes };
            for class in 0..fitted_classes {
                let y: Vec<f64> = labels.iter().map(|&l| f64::from(u8::from(l == class))).collect();
                let (_, beta) = lasso_coordinate_descent(x, &y, config.lasso_lambda, max_iterations)?;
                for (w, b) in weights.iter_mut().zip(beta.iter()) {
                    *w += b.abs();
                }
            }
            let active = weights.iter().map(|&w| w > 0.0).collect();
            Ok((active, weights))
        }
        CategoricalImportance::fisher => {
            let mut active = vec![false; n];
            let mut weights = vec![0.0; n];
            for j in 0..n {
                let p = fisher_presence_test(&x.column(j), labels)?;
                if p <= config.max_pvalue {
                    active[j] = true;
                    weights[j] = 1.0 - p;
                }
            }
            Ok((active, weights))
        }
    }
}

fn survival_filter(
    method: SurvivalImportance,
    x: &Matrix,
    events: &[bool],
    durations: &[f64],
    config: &Prefilter,
) -> Result<(Vec<bool>, Vec<f64>), String> {
    let n = x.n_cols();
    match method {
        SurvivalImportance::none | SurvivalImportance::uniform => {
            Ok((vec![true; n], vec![1.0; n]))
        }
        SurvivalImportance::Cox => {
            let mut active = vec![false; n];
            let mut weights = vec![0.0; n];
            for j in 0..n {
                let column = x.column(j);
                let beta = fit_univariate_cox(&column, events, durations)?;
                let p = cox_wald_pvalue(&column, events, durations, beta)?;
                if p <= config.max_pvalue {
                    active[j] = true;
                    weights[j] = beta.abs();
                }
            }
            Ok((active, weights))
        }
        SurvivalImportance::uniCox => {
            let mut weights = vec![0.0; n];
            for j in 0..n {
                weights[j] = fit_univariate_cox(&x.column(j), events, durations)?.abs();
            }
            Ok((vec![true; n], weights))
        }
    }
}

/// One-way ANOVA: F statistic and its upper-tail p-value.
fn anova_f_test(column: &[f64], labels: &[usize], n_classes: usize) -> Result<(f64, f64), String> {
    let n = column.len();
    if n_classes < 2 || n <= n_classes {
        return Ok((0.0, 1.0));
    }
    let grand_mean = column.iter().sum::<f64>() / n as f64;
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for class in 0..n_classes {
        let group: Vec<f64> = column
            .iter()
            .zip(labels.iter())
            .filter(|(_, &l)| l == class)
            .map(|(v, _)| *v)
            .collect();
        if group.is_empty() {
            continue;
        }
        let mean = group.iter().sum::<f64>() / group.len() as f64;
        ss_between += group.len() as f64 * (mean - grand_mean).powi(2);
        ss_within += group.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    }
    let df1 = (n_classes - 1) as f64;
    let df2 = (n - n_classes) as f64;
    if ss_within <= 0.0 {
        // a constant-within-groups feature: either perfectly separating or
        // globally constant
        return Ok(if ss_between > 0.0 {
            (f64::MAX, 0.0)
        } else {
            (0.0, 1.0)
        });
    }
    let f = (ss_between / df1) / (ss_within / df2);
    let distribution = FisherSnedecor::new(df1, df2)
        .map_err(|e| format!("degenerate F distribution ({}, {}): {}", df1, df2, e))?;
    Ok((f, 1.0 - distribution.cdf(f)))
}

/// Two-tailed Fisher exact test of feature presence (`value > 0`) against
/// membership in the reference class.
fn fisher_presence_test(column: &[f64], labels: &[usize]) -> Result<f64, String> {
    let mut table = [0u32; 4];
    for (value, &label) in column.iter().zip(labels.iter()) {
        let present = *value > 0.0;
        let reference = label == 0;
        let cell = usize::from(!present) * 2 + usize::from(!reference);
        table[cell] += 1;
    }
    Ok(fishers_exact(&table)
        .map_err(|e| format!("fisher exact test failed: {}", e))?
        .two_tail_pvalue)
}

/// Wald p-value of a fitted univariate Cox coefficient, from the observed
/// information at `beta` over descending-duration prefix risk sets.
fn cox_wald_pvalue(
    column: &[f64],
    events: &[bool],
    durations: &[f64],
    beta: f64,
) -> Result<f64, String> {
    let n = column.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| durations[b].partial_cmp(&durations[a]).unwrap());
    let mut sum_risk = 0.0;
    let mut sum_xr = 0.0;
    let mut sum_xxr = 0.0;
    let mut information = 0.0;
    for &idx in &order {
        let risk = (beta * column[idx]).exp();
        sum_risk += risk;
        sum_xr += column[idx] * risk;
        sum_xxr += column[idx] * column[idx] * risk;
        if events[idx] {
            let mean = sum_xr / sum_risk;
            information += sum_xxr / sum_risk - mean * mean;
        }
    }
    if information <= 0.0 {
        return Ok(1.0);
    }
    let z = beta.abs() * information.sqrt();
    let normal = Normal::new(0.0, 1.0).map_err(|e| format!("standard normal: {}", e))?;
    Ok(2.0 * (1.0 - normal.cdf(z)))
}

/// Number of features of a fresh individual, drawn from the configured
/// distribution and clamped into `[min_num_features, max_num_features]`
/// (further capped by the surviving feature count).
pub fn draw_feature_count(ga: &GA, n_active: usize, rng: &mut ChaCha8Rng) -> usize {
    let hi = ga.max_num_features.min(n_active).max(1);
    let lo = ga.min_num_features.min(hi).max(1);
    let binomial_draw = |mean: f64, rng: &mut ChaCha8Rng| -> usize {
        let p = (mean / hi as f64).clamp(f64::MIN_POSITIVE, 1.0);
        let binomial = Binomial::new(p, hi as u64).expect("binomial from a clamped probability");
        let draw: u64 = binomial.sample(rng);
        draw as usize
    };
    let k = match ga.initial_features_distribution {
        InitialFeaturesDistribution::uniform => rng.gen_range(lo..=hi),
        InitialFeaturesDistribution::binomial => binomial_draw(ga.initial_features_mean, rng),
        InitialFeaturesDistribution::binomial_from_uniform => {
            let mean = rng.gen_range(lo as f64..=hi as f64);
            binomial_draw(mean, rng)
        }
    };
    k.clamp(lo, hi)
}

/// Seed a fresh individual: K features drawn without replacement from the
/// importance distribution.
pub fn seed_individual(
    ga: &GA,
    importance: &Distribution,
    generation: usize,
    rng: &mut ChaCha8Rng,
) -> Individual {
    let k = draw_feature_count(ga, importance.nonzero_num(), rng);
    let positions = importance.extract_many_distinct(k, rng);
    Individual::new(FeatureMask::from_positions(positions, importance.len()), generation)
}

/// The initial population of a run, `ga.pop` seeded individuals.
pub fn initial_population(
    ga: &GA,
    importance: &Distribution,
    rng: &mut ChaCha8Rng,
) -> Vec<Individual> {
    (0..ga.pop)
        .map(|_| seed_individual(ga, importance, 0, rng))
        .collect()
}
