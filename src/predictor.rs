use argmin::{
    core::{CostFunction, Error as ArgminError, Executor},
    solver::brent::BrentOpt,
};
use log::debug;
use serde::{Deserialize, Serialize};
use statrs::function::logistic::logistic;

use crate::data::{Matrix, Outcome};
use crate::utils::solve_linear_system;

const IRLS_TOLERANCE: f64 = 1e-6;
const RIDGE_EPSILON: f64 = 1e-6;

/// Model families a predictive objective can ask for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum Model {
    Logistic,
    LassoLogistic,
    Cox,
    Dummy,
}

impl Model {
    pub fn parse(name: &str) -> Result<Model, String> {
        match name {
            "logistic" => Ok(Model::Logistic),
            "lasso" => Ok(Model::LassoLogistic),
            "cox" => Ok(Model::Cox),
            "dummy" => Ok(Model::Dummy),
            other => Err(format!("unknown model '{}'", other)),
        }
    }
}

/// A fitted model handle, one closed capability set for every family.
///
/// Classification handles answer `predict_labels`, survival handles answer
/// `risk_scores` / `score_concordance_index`, and every handle exposes its
/// coefficient magnitudes for importance extraction. `Dummy` is a member of
/// the same set: it predicts a constant and carries no coefficients.
/// `Downlifted` wraps another handle so that full-space inputs are re-mapped
/// onto the columns the model was trained on at prediction time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Predictor {
    /// One-vs-rest logistic model, one weight row per class.
    Logistic {
        intercepts: Vec<f64>,
        weights: Vec<Vec<f64>>,
    },
    /// L1-penalized one-vs-rest logistic model.
    LassoLogistic {
        intercepts: Vec<f64>,
        weights: Vec<Vec<f64>>,
        lambda: f64,
    },
    /// Cox proportional hazards, linear risk on the coefficients.
    Cox { coefficients: Vec<f64> },
    /// Constant prediction: the majority class, or zero risk.
    Dummy { label: usize },
    Downlifted {
        columns: Vec<usize>,
        inner: Box<Predictor>,
    },
}

impl Predictor {
    /// Fit `model` on the given rows of `x` against `outcome`.
    ///
    /// An empty feature matrix falls back to the Dummy predictor; genuine
    /// numerical failures surface as `Err` and are the caller's to absorb.
    pub fn fit(
        model: Model,
        x: &Matrix,
        outcome: &Outcome,
        lambda: f64,
        max_iterations: usize,
    ) -> Result<Predictor, String> {
        assert!(
            x.n_rows() == outcome.len(),
            "{} samples in x but {} in outcome '{}'",
            x.n_rows(),
            outcome.len(),
            outcome.name()
        );
        if x.n_cols() == 0 {
            return Ok(Predictor::dummy_for(outcome));
        }
        match model {
            Model::Dummy => Ok(Predictor::dummy_for(outcome)),
            Model::Logistic => match outcome {
                Outcome::Categorical { labels, label_order, .. } => {
                    fit_logistic_ovr(x, labels, label_order.len(), 0.0, max_iterations)
                }
                Outcome::Survival { name, .. } => {
                    Err(format!("logistic model against survival outcome '{}'", name))
                }
            },
            Model::LassoLogistic => match outcome {
                Outcome::Categorical { labels, label_order, .. } => {
                    fit_lasso_logistic_ovr(x, labels, label_order.len(), lambda, max_iterations)
                }
                Outcome::Survival { name, .. } => {
                    Err(format!("lasso model against survival outcome '{}'", name))
                }
            },
            Model::Cox => match outcome {
                Outcome::Survival { events, durations, .. } => {
                    let coefficients = fit_cox(x, events, durations, max_iterations)?;
                    Ok(Predictor::Cox { coefficients })
                }
                Outcome::Categorical { name, .. } => {
                    Err(format!("cox model against categorical outcome '{}'", name))
                }
            },
        }
    }

    /// The constant predictor appropriate for the outcome kind.
    pub fn dummy_for(outcome: &Outcome) -> Predictor {
        match outcome {
            // label order is most-common-first, so the majority class is 0
            Outcome::Categorical { .. } => Predictor::Dummy { label: 0 },
            Outcome::Survival { .. } => Predictor::Dummy { label: 0 },
        }
    }

    /// Re-map full-space prediction inputs onto the trained columns.
    pub fn downlifted(self, columns: Vec<usize>) -> Predictor {
        Predictor::Downlifted {
            columns,
            inner: Box::new(self),
        }
    }

    /// Predicted class index per row.
    pub fn predict_labels(&self, x: &Matrix) -> Vec<usize> {
        match self {
            Predictor::Logistic { intercepts, weights }
            | Predictor::LassoLogistic { intercepts, weights, .. } => (0..x.n_rows())
                .map(|r| {
                    let row = x.row(r);
                    let mut best = 0;
                    let mut best_score = f64::NEG_INFINITY;
                    for (c, (b, w)) in intercepts.iter().zip(weights.iter()).enumerate() {
                        let score = b + dot(w, row);
                        if score > best_score {
                            best_score = score;
                            best = c;
                        }
                    }
                    best
                })
                .collect(),
            Predictor::Cox { .. } => {
                panic!("label prediction on a survival predictor")
            }
            Predictor::Dummy { label } => vec![*label; x.n_rows()],
            Predictor::Downlifted { columns, inner } => {
                inner.predict_labels(&x.select_columns(columns))
            }
        }
    }

    /// Linear risk score per row; larger means earlier expected event.
    pub fn risk_scores(&self, x: &Matrix) -> Vec<f64> {
        match self {
            Predictor::Cox { coefficients } => {
                (0..x.n_rows()).map(|r| dot(coefficients, x.row(r))).collect()
            }
            Predictor::Dummy { .. } => vec![0.0; x.n_rows()],
            Predictor::Logistic { .. } | Predictor::LassoLogistic { .. } => {
                panic!("risk scores on a classification predictor")
            }
            Predictor::Downlifted { columns, inner } => {
                inner.risk_scores(&x.select_columns(columns))
            }
        }
    }

    /// Harrell concordance index of the risk scores against `(events,
    /// durations)`; 0.5 when no comparable pair exists.
    pub fn score_concordance_index(
        &self,
        x: &Matrix,
        events: &[bool],
        durations: &[f64],
    ) -> f64 {
        concordance_index(&self.risk_scores(x), events, durations)
    }

    /// Per-feature absolute coefficient, summed across classes. The Dummy
    /// predictor reports zeros.
    pub fn coefficient_magnitudes(&self, n_features: usize) -> Vec<f64> {
        match self {
            Predictor::Logistic { weights, .. }
            | Predictor::LassoLogistic { weights, .. } => {
                let mut magnitudes = vec![0.0; n_features];
                for row in weights {
                    for (i, w) in row.iter().enumerate() {
                        magnitudes[i] += w.abs();
                    }
                }
                magnitudes
            }
            Predictor::Cox { coefficients } => {
                let mut magnitudes = vec![0.0; n_features];
                for (i, c) in coefficients.iter().enumerate() {
                    magnitudes[i] = c.abs();
                }
                magnitudes
            }
            Predictor::Dummy { .. } => vec![0.0; n_features],
            Predictor::Downlifted { inner, .. } => inner.coefficient_magnitudes(n_features),
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Harrell's c-index: among usable pairs (the earlier time is an event),
/// count concordant risk orderings, half-credit ties.
pub fn concordance_index(risk: &[f64], events: &[bool], durations: &[f64]) -> f64 {
    let n = risk.len();
    let mut concordant = 0.0;
    let mut comparable = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            // i must be an observed event strictly before j
            if !events[i] || durations[i] >= durations[j] {
                continue;
            }
            comparable += 1.0;
            if risk[i] > risk[j] {
                concordant += 1.0;
            } else if risk[i] == risk[j] {
                concordant += 0.5;
            }
        }
    }
    if comparable == 0.0 {
        0.5
    } else {
        concordant / comparable
    }
}

fn fit_logistic_ovr(
    x: &Matrix,
    labels: &[usize],
    n_classes: usize,
    l2: f64,
    max_iterations: usize,
) -> Result<Predictor, String> {
    let mut intercepts = Vec::with_capacity(n_classes);
    let mut weights = Vec::with_capacity(n_classes);
    // a binary problem needs a single one-vs-rest fit, the negation is implied
    let fitted_classes = if n_classes == 2 { 1 } else { n_classes };
    for class in 0..fitted_classes {
        let y: Vec<f64> = labels
            .iter()
            .map(|&l| if l == class { 1.0 } else { 0.0 })
            .collect();
        let (b, w) = irls(x, &y, l2, max_iterations)?;
        intercepts.push(b);
        weights.push(w);
    }
    if n_classes == 2 {
        intercepts.push(-intercepts[0]);
        weights.push(weights[0].iter().map(|w| -w).collect());
    }
    Ok(Predictor::Logistic { intercepts, weights })
}

/// Iteratively reweighted least squares for one binary logistic problem.
/// A small ridge keeps the normal equations solvable on separable data.
fn irls(
    x: &Matrix,
    y: &[f64],
    l2: f64,
    max_iterations: usize,
) -> Result<(f64, Vec<f64>), String> {
    let n = x.n_rows();
    let p = x.n_cols();
    let ridge = l2.max(RIDGE_EPSILON);
    // coefficient 0 is the intercept
    let mut beta = vec![0.0; p + 1];
    for iteration in 0..max_iterations.max(1) {
        let mu: Vec<f64> = (0..n)
            .map(|r| logistic(beta[0] + dot(&beta[1..], x.row(r))))
            .collect();
        // weighted normal equations (X' W X + ridge) d = X' (y - mu)
        let mut a = vec![vec![0.0; p + 1]; p + 1];
        let mut g = vec![0.0; p + 1];
        for r in 0..n {
            let w = (mu[r] * (1.0 - mu[r])).max(1e-8);
            let residual = y[r] - mu[r];
            let row = x.row(r);
            for i in 0..=p {
                let xi = if i == 0 { 1.0 } else { row[i - 1] };
                g[i] += xi * residual;
                for j in i..=p {
                    let xj = if j == 0 { 1.0 } else { row[j - 1] };
                    a[i][j] += w * xi * xj;
                }
            }
        }
        for i in 0..=p {
            for j in 0..i {
                a[i][j] = a[j][i];
            }
            if i > 0 {
                a[i][i] += ridge;
            }
        }
        let delta = solve_linear_system(a, g)
            .ok_or_else(|| "singular IRLS system".to_string())?;
        let step: f64 = delta.iter().map(|d| d.abs()).fold(0.0, f64::max);
        for (b, d) in beta.iter_mut().zip(delta.iter()) {
            *b += d;
        }
        if step < IRLS_TOLERANCE {
            debug!("IRLS converged after {} iterations", iteration + 1);
            break;
        }
    }
    if beta.iter().any(|b| !b.is_finite()) {
        return Err("IRLS diverged to non-finite coefficients".to_string());
    }
    Ok((beta[0], beta[1..].to_vec()))
}

fn fit_lasso_logistic_ovr(
    x: &Matrix,
    labels: &[usize],
    n_classes: usize,
    lambda: f64,
    max_iterations: usize,
) -> Result<Predictor, String> {
    let mut intercepts = Vec::with_capacity(n_classes);
    let mut weights = Vec::with_capacity(n_classes);
    let fitted_classes = if n_classes == 2 { 1 } else { n_classes };
    for class in 0..fitted_classes {
        let y: Vec<f64> = labels
            .iter()
            .map(|&l| if l == class { 1.0 } else { 0.0 })
            .collect();
        let (b, w) = lasso_coordinate_descent(x, &y, lambda, max_iterations)?;
        intercepts.push(b);
        weights.push(w);
    }
    if n_classes == 2 {
        intercepts.push(-intercepts[0]);
        weights.push(weights[0].iter().map(|w| -w).collect());
    }
    Ok(Predictor::LassoLogistic {
        intercepts,
        weights,
        lambda,
    })
}

/// L1 logistic regression by coordinate descent on the quadratic
/// approximation around the fixed working weight 1/4, soft-thresholding
/// each coordinate in turn.
pub fn lasso_coordinate_descent(
    x: &Matrix,
    y: &[f64],
    lambda: f64,
    max_iterations: usize,
) -> Result<(f64, Vec<f64>), String> {
    let n = x.n_rows();
    let p = x.n_cols();
    let mut intercept = 0.0;
    let mut beta = vec![0.0; p];
    // linear predictor cache, updated per coordinate move
    let mut eta = vec![0.0; n];
    let col_sq: Vec<f64> = (0..p)
        .map(|j| (0..n).map(|r| x.get(r, j).powi(2)).sum::<f64>() / (4.0 * n as f64))
        .collect();
    for _ in 0..max_iterations.max(1) {
        let mut max_move = 0.0f64;

        // intercept, unpenalized
        let gradient: f64 = (0..n).map(|r| y[r] - logistic(eta[r])).sum::<f64>() / n as f64;
        let delta = 4.0 * gradient;
        intercept += delta;
        for e in eta.iter_mut() {
            *e += delta;
        }
        max_move = max_move.max(delta.abs());

        for j in 0..p {
            if col_sq[j] <= 0.0 {
                continue;
            }
            let gradient: f64 = (0..n)
                .map(|r| x.get(r, j) * (y[r] - logistic(eta[r])))
                .sum::<f64>()
                / n as f64;
            let raw = beta[j] * col_sq[j] + gradient;
            let updated = soft_threshold(raw, lambda) / col_sq[j];
            let delta = updated - beta[j];
            if delta != 0.0 {
                beta[j] = updated;
                for r in 0..n {
                    let step = delta * x.get(r, j);
                    eta[r] += step;
                }
                max_move = max_move.max(delta.abs());
            }
        }
        if max_move < IRLS_TOLERANCE {
            break;
        }
    }
    if !intercept.is_finite() || beta.iter().any(|b| !b.is_finite()) {
        return Err("lasso coordinate descent diverged".to_string());
    }
    Ok((intercept, beta))
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Newton iterations on the Breslow partial likelihood with a ridge floor.
fn fit_cox(
    x: &Matrix,
    events: &[bool],
    durations: &[f64],
    max_iterations: usize,
) -> Result<Vec<f64>, String> {
    let n = x.n_rows();
    let p = x.n_cols();
    let mut beta = vec![0.0; p];
    // descending duration so risk sets accumulate by prefix
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| durations[b].partial_cmp(&durations[a]).unwrap());

    for iteration in 0..max_iterations.max(1) {
        let risks: Vec<f64> = (0..n).map(|r| dot(&beta, x.row(r)).exp()).collect();
        if risks.iter().any(|r| !r.is_finite()) {
            return Err("cox partial likelihood overflow".to_string());
        }
        let mut gradient = vec![0.0; p];
        let mut hessian = vec![vec![0.0; p]; p];
        let mut sum_risk = 0.0;
        let mut sum_xr = vec![0.0; p];
        let mut sum_xxr = vec![vec![0.0; p]; p];
        for &idx in &order {
            let row = x.row(idx);
            sum_risk += risks[idx];
            for i in 0..p {
                sum_xr[i] += row[i] * risks[idx];
                for j in i..p {
                    sum_xxr[i][j] += row[i] * row[j] * risks[idx];
                }
            }
            if events[idx] {
                for i in 0..p {
                    let mean_i = sum_xr[i] / sum_risk;
                    gradient[i] += row[i] - mean_i;
                    for j in i..p {
                        let mean_j = sum_xr[j] / sum_risk;
                        hessian[i][j] += sum_xxr[i][j] / sum_risk - mean_i * mean_j;
                    }
                }
            }
        }
        for i in 0..p {
            for j in 0..i {
                hessian[i][j] = hessian[j][i];
            }
            hessian[i][i] += RIDGE_EPSILON;
        }
        let delta = solve_linear_system(hessian, gradient)
            .ok_or_else(|| "singular cox information matrix".to_string())?;
        let step: f64 = delta.iter().map(|d| d.abs()).fold(0.0, f64::max);
        for (b, d) in beta.iter_mut().zip(delta.iter()) {
            *b += d;
        }
        if step < IRLS_TOLERANCE {
            debug!("cox Newton converged after {} iterations", iteration + 1);
            break;
        }
    }
    if beta.iter().any(|b| !b.is_finite()) {
        return Err("cox Newton diverged to non-finite coefficients".to_string());
    }
    Ok(beta)
}

// Helper structure for Brent optimization of the one-feature Cox partial
// likelihood; holds the column and the survival outcome by reference.
struct NegPartialLikelihood<'a> {
    column: &'a [f64],
    events: &'a [bool],
    durations: &'a [f64],
}

impl NegPartialLikelihood<'_> {
    fn log_partial_likelihood(&self, beta: f64) -> f64 {
        let n = self.column.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| self.durations[b].partial_cmp(&self.durations[a]).unwrap());
        let mut sum_risk = 0.0;
        let mut log_likelihood = 0.0;
        for &idx in &order {
            sum_risk += (beta * self.column[idx]).exp();
            if self.events[idx] {
                log_likelihood += beta * self.column[idx] - sum_risk.ln();
            }
        }
        log_likelihood
    }
}

impl CostFunction for NegPartialLikelihood<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, beta: &Self::Param) -> Result<Self::Output, ArgminError> {
        Ok(-self.log_partial_likelihood(*beta))
    }
}

/// Maximum-likelihood coefficient of a single-feature Cox model, found by
/// Brent search on the bracketed partial likelihood.
pub fn fit_univariate_cox(
    column: &[f64],
    events: &[bool],
    durations: &[f64],
) -> Result<f64, String> {
    let cost = NegPartialLikelihood {
        column,
        events,
        durations,
    };
    let solver = BrentOpt::new(-50.0, 50.0);
    let res = Executor::new(cost, solver)
        .configure(|state| state.max_iters(100))
        .run()
        .map_err(|e| format!("univariate cox optimisation failed: {}", e))?;
    res.state
        .param
        .ok_or_else(|| "univariate cox optimisation returned no parameter".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_vec;

    fn xor_free_data() -> (Matrix, Outcome) {
        // linearly separable: class follows the first feature
        let x = Matrix::from_rows(vec![
            vec![1.0, 0.3],
            vec![0.9, 0.8],
            vec![1.1, 0.1],
            vec![0.1, 0.5],
            vec![0.0, 0.9],
            vec![0.2, 0.2],
        ]);
        let y = Outcome::categorical(
            "status",
            string_vec!["a", "a", "a", "b", "b", "b"],
        );
        (x, y)
    }

    #[test]
    fn test_logistic_fit_separates() {
        let (x, y) = xor_free_data();
        let model = Predictor::fit(Model::Logistic, &x, &y, 0.0, 100).unwrap();
        let predicted = model.predict_labels(&x);
        match &y {
            Outcome::Categorical { labels, .. } => {
                assert_eq!(&predicted, labels, "separable data should be fit perfectly")
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_lasso_shrinks_noise_feature() {
        let (x, y) = xor_free_data();
        let model = Predictor::fit(Model::LassoLogistic, &x, &y, 0.1, 200).unwrap();
        match &model {
            Predictor::LassoLogistic { weights, .. } => {
                assert!(
                    weights[0][0].abs() > weights[0][1].abs(),
                    "the informative feature should out-weigh the noise one: {:?}",
                    weights
                );
            }
            _ => panic!("expected a lasso predictor"),
        }
        let magnitudes = model.coefficient_magnitudes(2);
        assert!(magnitudes[0] > 0.0);
    }

    #[test]
    fn test_lasso_penalty_scale() {
        let (x, y) = xor_free_data();
        let truth: Vec<f64> = match &y {
            Outcome::Categorical { labels, .. } => labels.iter().map(|&l| l as f64).collect(),
            _ => unreachable!(),
        };
        // a moderate penalty keeps the separating coefficient alive
        let (_, beta) = lasso_coordinate_descent(&x, &truth, 0.1, 200).unwrap();
        assert!(
            beta[0].abs() > 0.0,
            "lambda 0.1 must not wipe a cleanly separable fit: {:?}",
            beta
        );
        // an extreme penalty empties the support entirely
        let (_, heavy) = lasso_coordinate_descent(&x, &truth, 10.0, 200).unwrap();
        assert!(
            heavy.iter().all(|b| *b == 0.0),
            "lambda 10 should shrink everything to zero: {:?}",
            heavy
        );
    }

    #[test]
    fn test_empty_matrix_falls_back_to_dummy() {
        let (_, y) = xor_free_data();
        let x = Matrix::zeros(6, 0);
        let model = Predictor::fit(Model::Logistic, &x, &y, 0.0, 100).unwrap();
        assert_eq!(model, Predictor::Dummy { label: 0 });
        assert_eq!(model.predict_labels(&x), vec![0; 6]);
        assert_eq!(model.coefficient_magnitudes(0), Vec::<f64>::new());
    }

    #[test]
    fn test_cox_fit_recovers_risk_direction() {
        // higher x[0] means earlier event
        let x = Matrix::from_rows(vec![
            vec![2.0],
            vec![1.5],
            vec![1.0],
            vec![0.5],
            vec![0.2],
            vec![0.0],
        ]);
        let events = vec![true, true, true, true, false, false];
        let durations = vec![1.0, 2.0, 4.0, 7.0, 9.0, 10.0];
        let y = Outcome::survival("os", events.clone(), durations.clone());
        let model = Predictor::fit(Model::Cox, &x, &y, 0.0, 100).unwrap();
        match &model {
            Predictor::Cox { coefficients } => {
                assert!(coefficients[0] > 0.0, "risk should increase with the feature")
            }
            _ => panic!("expected a cox predictor"),
        }
        let cindex = model.score_concordance_index(&x, &events, &durations);
        assert!(cindex > 0.9, "near-perfect ordering expected, got {}", cindex);
    }

    #[test]
    fn test_univariate_cox_matches_newton_direction() {
        let column = vec![2.0, 1.5, 1.0, 0.5, 0.2, 0.0];
        let events = vec![true, true, true, true, false, false];
        let durations = vec![1.0, 2.0, 4.0, 7.0, 9.0, 10.0];
        let beta = fit_univariate_cox(&column, &events, &durations).unwrap();
        assert!(beta > 0.0, "Brent search should find a positive effect, got {}", beta);
    }

    #[test]
    fn test_concordance_index_bounds() {
        let events = vec![true, true, false];
        let durations = vec![1.0, 2.0, 3.0];
        assert_eq!(concordance_index(&[3.0, 2.0, 1.0], &events, &durations), 1.0);
        assert_eq!(concordance_index(&[1.0, 2.0, 3.0], &events, &durations), 0.0);
        assert_eq!(
            concordance_index(&[1.0, 1.0, 1.0], &events, &durations),
            0.5,
            "all-tied risks score half credit"
        );
        // no comparable pair at all
        assert_eq!(concordance_index(&[1.0], &[false], &[1.0]), 0.5);
    }

    #[test]
    fn test_downlifted_selects_columns() {
        let (x, y) = xor_free_data();
        let reduced = x.select_columns(&[0]);
        let model = Predictor::fit(Model::Logistic, &reduced, &y, 0.0, 100)
            .unwrap()
            .downlifted(vec![0]);
        assert_eq!(
            model.predict_labels(&x),
            model.predict_labels(&x),
            "wrapped prediction is deterministic"
        );
        match &y {
            Outcome::Categorical { labels, .. } => {
                assert_eq!(&model.predict_labels(&x), labels)
            }
            _ => unreachable!(),
        }
    }
}
