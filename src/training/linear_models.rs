//! Regularised linear regression: ridge (closed form), lasso and elastic net
//! (cyclic coordinate descent)
//!
//! Sample weights enter as a weighted least-squares problem: features and
//! target are centred on their weighted means and each row is scaled by
//! `sqrt(w_i)`.

use super::{check_n_features, ensure, unknown_param, validate_fit_input, Regressor};
use crate::config::HyperParams;
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Solve the symmetric positive-definite system `A x = b` with a Cholesky
/// factorisation. Adds a small ridge to the diagonal once if `A` is not
/// positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    cholesky_solve_jittered(a, b, true)
}

fn cholesky_solve_jittered(a: &Array2<f64>, b: &Array1<f64>, retry: bool) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    // A = L * L^T
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    if !retry {
                        return None;
                    }
                    let mut a_reg = a.clone();
                    let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64;
                    for k in 0..n {
                        a_reg[[k, k]] += ridge.max(1e-12);
                    }
                    return cholesky_solve_jittered(&a_reg, b, false);
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L * z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * z[j]).sum();
        z[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T * x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (z[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Gauss-Jordan elimination with partial pivoting, used when Cholesky fails
fn gauss_jordan_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut aug = Array2::<f64>::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| aug[[r1, col]].abs().total_cmp(&aug[[r2, col]].abs()))?;
        if aug[[pivot_row, col]].abs() < 1e-10 {
            return None;
        }
        if pivot_row != col {
            for j in 0..=n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }
        let pivot = aug[[col, col]];
        for j in 0..=n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                for j in 0..=n {
                    aug[[row, j]] -= factor * aug[[col, j]];
                }
            }
        }
    }

    Some(aug.column(n).to_owned())
}

fn soft_threshold(val: f64, threshold: f64) -> f64 {
    if val > threshold {
        val - threshold
    } else if val < -threshold {
        val + threshold
    } else {
        0.0
    }
}

/// Shared configuration for the three linear families
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModelConfig {
    /// Overall regularization strength
    pub alpha: f64,
    /// L1 share of the penalty (elastic net only)
    pub l1_ratio: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub fit_intercept: bool,
}

impl Default for LinearModelConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            l1_ratio: 0.5,
            max_iter: 1000,
            tol: 1e-4,
            fit_intercept: true,
        }
    }
}

impl LinearModelConfig {
    /// Parse the parameters `model` accepts; `l1_ratio` is only valid for
    /// elastic net and the iteration controls only for the coordinate descent
    /// models.
    fn from_params(model: &str, params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        let iterative = model != "ridge";
        for (name, value) in params.iter() {
            match name.as_str() {
                "alpha" => config.alpha = value.to_f64(name)?,
                "fit_intercept" => config.fit_intercept = value.to_bool(name)?,
                "l1_ratio" if model == "elas" => config.l1_ratio = value.to_f64(name)?,
                "max_iter" if iterative => config.max_iter = value.to_usize(name)?,
                "tol" if iterative => config.tol = value.to_f64(name)?,
                "solver" | "selection" | "normalize" | "copy_X" | "precompute" | "warm_start" => {
                    debug!(model, param = name.as_str(), "Ignoring solver option")
                }
                other => unknown_param(model, other, value)?,
            }
        }
        ensure(config.alpha >= 0.0, "alpha", config.alpha, "must be non-negative")?;
        ensure((0.0..=1.0).contains(&config.l1_ratio), "l1_ratio", config.l1_ratio, "must be in [0, 1]")?;
        ensure(config.tol > 0.0, "tol", config.tol, "must be positive")?;
        Ok(config)
    }
}

/// Weighted design: centred and scaled by `sqrt(w)`, plus the weighted means
/// needed to recover the intercept
struct WeightedDesign {
    x: Array2<f64>,
    y: Array1<f64>,
    x_mean: Array1<f64>,
    y_mean: f64,
}

impl WeightedDesign {
    /// With `rescale`, weights are scaled to sum to the number of rows so the
    /// averaged coordinate descent objective keeps its unweighted meaning
    fn new(x: &Array2<f64>, y: &Array1<f64>, weights: &[f64], fit_intercept: bool, rescale: bool) -> Self {
        let n = x.nrows();
        let w_sum: f64 = weights.iter().sum();
        let scale = if rescale { n as f64 / w_sum } else { 1.0 };
        let w = Array1::from_iter(weights.iter().map(|wi| wi * scale));
        let w_total = w_sum * scale;

        let (x_mean, y_mean) = if fit_intercept {
            let xm = x.t().dot(&w) / w_total;
            let ym = y.dot(&w) / w_total;
            (xm, ym)
        } else {
            (Array1::zeros(x.ncols()), 0.0)
        };

        let sqrt_w = w.mapv(f64::sqrt);
        let xc = (x - &x_mean.view().insert_axis(Axis(0))) * &sqrt_w.view().insert_axis(Axis(1));
        let yc = (y - y_mean) * &sqrt_w;

        Self {
            x: xc,
            y: yc,
            x_mean,
            y_mean,
        }
    }

    fn intercept(&self, coef: &Array1<f64>, fit_intercept: bool) -> f64 {
        if fit_intercept {
            self.y_mean - coef.dot(&self.x_mean)
        } else {
            0.0
        }
    }
}

/// Minimise `1/(2n) ||y - Xw||^2 + alpha * l1_ratio * |w|_1
/// + alpha * (1 - l1_ratio) / 2 * ||w||^2` by cyclic coordinate descent.
/// Returns the coefficients and the number of sweeps run.
fn coordinate_descent(design: &WeightedDesign, config: &LinearModelConfig, l1_ratio: f64) -> (Array1<f64>, usize) {
    let x = &design.x;
    let n = x.nrows() as f64;
    let p = x.ncols();

    let col_norms: Vec<f64> = x.columns().into_iter().map(|c| c.dot(&c)).collect();
    let l1 = config.alpha * l1_ratio * n;
    let l2 = config.alpha * (1.0 - l1_ratio) * n;

    let mut w = Array1::<f64>::zeros(p);
    let mut r = design.y.clone();
    let mut sweeps = 0;

    for _ in 0..config.max_iter {
        sweeps += 1;
        let mut max_delta = 0.0f64;
        let mut max_w = 0.0f64;

        for j in 0..p {
            if col_norms[j] < 1e-15 {
                continue;
            }
            let col = x.column(j);
            let old = w[j];
            let rho = col.dot(&r) + col_norms[j] * old;
            let new = soft_threshold(rho, l1) / (col_norms[j] + l2);
            if new != old {
                r.scaled_add(old - new, &col);
                w[j] = new;
            }
            max_delta = max_delta.max((new - old).abs());
            max_w = max_w.max(new.abs());
        }

        if max_w == 0.0 || max_delta / max_w < config.tol {
            break;
        }
    }

    if sweeps == config.max_iter {
        warn!(max_iter = config.max_iter, "Coordinate descent did not converge");
    }
    (w, sweeps)
}

/// Ridge regression (L2-penalised least squares), solved in closed form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    pub config: LinearModelConfig,
    coef: Option<Array1<f64>>,
    intercept: f64,
}

impl RidgeRegression {
    pub fn new(config: LinearModelConfig) -> Self {
        Self {
            config,
            coef: None,
            intercept: 0.0,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(LinearModelConfig::from_params("ridge", params)?))
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.config.alpha = alpha;
        self
    }

    pub fn coef(&self) -> Option<&Array1<f64>> {
        self.coef.as_ref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Regressor for RidgeRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let design = WeightedDesign::new(x, y, &weights, self.config.fit_intercept, false);

        let mut xtx = design.x.t().dot(&design.x);
        for i in 0..xtx.nrows() {
            xtx[[i, i]] += self.config.alpha;
        }
        let xty = design.x.t().dot(&design.y);

        let coef = cholesky_solve(&xtx, &xty)
            .or_else(|| gauss_jordan_solve(&xtx, &xty))
            .ok_or_else(|| RunnerError::ComputationError("Singular normal equations in ridge".to_string()))?;

        self.intercept = design.intercept(&coef, self.config.fit_intercept);
        self.coef = Some(coef);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coef = self.coef.as_ref().ok_or(RunnerError::ModelNotFitted)?;
        check_n_features(coef.len(), x)?;
        Ok(x.dot(coef) + self.intercept)
    }

    fn name(&self) -> &'static str {
        "ridge"
    }
}

/// Lasso regression (L1 penalty)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LassoRegression {
    pub config: LinearModelConfig,
    coef: Option<Array1<f64>>,
    intercept: f64,
    n_iter: usize,
}

impl LassoRegression {
    pub fn new(config: LinearModelConfig) -> Self {
        Self {
            config,
            coef: None,
            intercept: 0.0,
            n_iter: 0,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(LinearModelConfig::from_params("lasso", params)?))
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.config.alpha = alpha;
        self
    }

    pub fn coef(&self) -> Option<&Array1<f64>> {
        self.coef.as_ref()
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

impl Regressor for LassoRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let design = WeightedDesign::new(x, y, &weights, self.config.fit_intercept, true);
        let (coef, n_iter) = coordinate_descent(&design, &self.config, 1.0);
        self.intercept = design.intercept(&coef, self.config.fit_intercept);
        self.n_iter = n_iter;
        self.coef = Some(coef);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coef = self.coef.as_ref().ok_or(RunnerError::ModelNotFitted)?;
        check_n_features(coef.len(), x)?;
        Ok(x.dot(coef) + self.intercept)
    }

    fn name(&self) -> &'static str {
        "lasso"
    }
}

/// Elastic net (mixed L1/L2 penalty)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticNetRegression {
    pub config: LinearModelConfig,
    coef: Option<Array1<f64>>,
    intercept: f64,
    n_iter: usize,
}

impl ElasticNetRegression {
    pub fn new(config: LinearModelConfig) -> Self {
        Self {
            config,
            coef: None,
            intercept: 0.0,
            n_iter: 0,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(LinearModelConfig::from_params("elas", params)?))
    }

    pub fn with_l1_ratio(mut self, l1_ratio: f64) -> Self {
        self.config.l1_ratio = l1_ratio;
        self
    }

    pub fn coef(&self) -> Option<&Array1<f64>> {
        self.coef.as_ref()
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

impl Regressor for ElasticNetRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let design = WeightedDesign::new(x, y, &weights, self.config.fit_intercept, true);
        let (coef, n_iter) = coordinate_descent(&design, &self.config, self.config.l1_ratio);
        self.intercept = design.intercept(&coef, self.config.fit_intercept);
        self.n_iter = n_iter;
        self.coef = Some(coef);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coef = self.coef.as_ref().ok_or(RunnerError::ModelNotFitted)?;
        check_n_features(coef.len(), x)?;
        Ok(x.dot(coef) + self.intercept)
    }

    fn name(&self) -> &'static str {
        "elas"
    }
}
