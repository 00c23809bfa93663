//! Epsilon-insensitive support vector regression
//!
//! Solves the SVR dual by coordinate descent. The bias is absorbed into the
//! kernel (`K + 1`), so each coordinate `β_i = α_i - α*_i` has a closed-form
//! soft-thresholded update clipped to the per-sample box `[-C·w_i, C·w_i]`.

use super::{check_n_features, ensure, unknown_param, validate_fit_input, Regressor};
use crate::config::{HyperParams, ParamValue};
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum number of samples for eager kernel matrix computation.
/// Beyond this, training will return an error to prevent OOM.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Kernel function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum KernelType {
    /// K(x, y) = x · y
    Linear,
    /// K(x, y) = (γ * x · y + r)^d
    Polynomial,
    /// K(x, y) = exp(-γ * ||x - y||²)
    #[default]
    RBF,
    /// K(x, y) = tanh(γ * x · y + r)
    Sigmoid,
}

/// Kernel coefficient
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Gamma {
    /// 1 / (n_features * var(X))
    Scale,
    /// 1 / n_features
    #[default]
    Auto,
    Value(f64),
}

/// SVM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMConfig {
    /// Regularization parameter (C)
    pub c: f64,
    /// Epsilon for regression (SVR tube width)
    pub epsilon: f64,
    pub kernel: KernelType,
    pub gamma: Gamma,
    pub degree: i32,
    pub coef0: f64,
    /// Tolerance for stopping criterion
    pub tol: f64,
    /// Maximum number of passes over the data
    pub max_iter: usize,
    pub random_state: Option<u64>,
}

impl Default for SVMConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 0.1,
            kernel: KernelType::RBF,
            gamma: Gamma::Auto,
            degree: 3,
            coef0: 0.0,
            tol: 1e-3,
            max_iter: 1000,
            random_state: Some(0),
        }
    }
}

impl SVMConfig {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        for (name, value) in params.iter() {
            match name.as_str() {
                "C" | "c" => config.c = value.to_f64(name)?,
                "epsilon" => config.epsilon = value.to_f64(name)?,
                "kernel" => {
                    config.kernel = match value.to_str(name)? {
                        "linear" => KernelType::Linear,
                        "poly" => KernelType::Polynomial,
                        "rbf" => KernelType::RBF,
                        "sigmoid" => KernelType::Sigmoid,
                        _ => return Err(RunnerError::invalid_param(name, value, "expected linear, poly, rbf or sigmoid")),
                    }
                }
                "gamma" => {
                    config.gamma = match value {
                        ParamValue::String(s) if s == "scale" => Gamma::Scale,
                        ParamValue::String(s) if s == "auto" => Gamma::Auto,
                        other => Gamma::Value(other.to_f64(name)?),
                    }
                }
                "degree" => config.degree = value.to_usize(name)? as i32,
                "coef0" => config.coef0 = value.to_f64(name)?,
                "tol" => config.tol = value.to_f64(name)?,
                "max_iter" => {
                    // -1 means no limit
                    config.max_iter = match value {
                        ParamValue::Int(v) if *v < 0 => usize::MAX,
                        other => other.to_usize(name)?,
                    }
                }
                "random_state" => config.random_state = value.to_seed(name)?,
                "shrinking" | "cache_size" => debug!(param = name.as_str(), "Ignoring solver tuning parameter"),
                other => unknown_param("svm", other, value)?,
            }
        }
        ensure(config.c > 0.0, "C", config.c, "must be positive")?;
        ensure(config.epsilon >= 0.0, "epsilon", config.epsilon, "must be non-negative")?;
        if let Gamma::Value(g) = config.gamma {
            ensure(g > 0.0, "gamma", g, "must be positive")?;
        }
        Ok(config)
    }
}

/// Support Vector Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMRegressor {
    config: SVMConfig,
    support_vectors: Option<Array2<f64>>,
    /// alpha - alpha* for each support vector
    coefficients: Option<Array1<f64>>,
    gamma: f64,
    n_features: usize,
}

impl SVMRegressor {
    pub fn new(config: SVMConfig) -> Self {
        Self {
            config,
            support_vectors: None,
            coefficients: None,
            gamma: 1.0,
            n_features: 0,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(SVMConfig::from_params(params)?))
    }

    pub fn n_support(&self) -> usize {
        self.support_vectors.as_ref().map_or(0, |sv| sv.nrows())
    }

    fn resolve_gamma(&self, x: &Array2<f64>) -> f64 {
        let n_features = x.ncols() as f64;
        match self.config.gamma {
            Gamma::Value(g) => g,
            Gamma::Auto => 1.0 / n_features,
            Gamma::Scale => {
                let var = x.var(0.0);
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
        }
    }

    fn kernel(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        let gamma = self.gamma;
        match self.config.kernel {
            KernelType::Linear => a.dot(&b),
            KernelType::Polynomial => (gamma * a.dot(&b) + self.config.coef0).powi(self.config.degree),
            KernelType::RBF => {
                let norm_sq: f64 = a.iter().zip(b.iter()).map(|(ai, bi)| (ai - bi).powi(2)).sum();
                (-gamma * norm_sq).exp()
            }
            KernelType::Sigmoid => (gamma * a.dot(&b) + self.config.coef0).tanh(),
        }
    }

    /// Kernel matrix with the bias column folded in (`K + 1`)
    fn compute_kernel_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (0..n).map(|j| self.kernel(x.row(i), x.row(j)) + 1.0).collect())
            .collect();
        Array2::from_shape_fn((n, n), |(i, j)| rows[i][j])
    }
}

impl Regressor for SVMRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let n = x.nrows();

        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(RunnerError::ValidationError(format!(
                "Dataset has {} samples, exceeding the maximum {} for SVR kernel matrix. \
                 Consider subsampling or using a different algorithm.",
                n, MAX_KERNEL_MATRIX_SAMPLES
            )));
        }

        self.gamma = self.resolve_gamma(x);
        self.n_features = x.ncols();
        let q = self.compute_kernel_matrix(x);

        let eps = self.config.epsilon;
        let bounds: Vec<f64> = weights.iter().map(|w| self.config.c * w).collect();
        let mut beta = Array1::<f64>::zeros(n);
        // f = Q β
        let mut f = Array1::<f64>::zeros(n);

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        let mut order: Vec<usize> = (0..n).collect();
        let mut converged = false;
        let mut epochs = 0usize;

        while epochs < self.config.max_iter {
            epochs += 1;
            order.shuffle(&mut rng);
            let mut max_change: f64 = 0.0;

            for &i in &order {
                let qii = q[[i, i]];
                if qii <= 0.0 || bounds[i] == 0.0 {
                    continue;
                }
                let grad = f[i] - y[i];
                let z = beta[i] - grad / qii;
                let shrunk = z.signum() * (z.abs() - eps / qii).max(0.0);
                let new_beta = shrunk.clamp(-bounds[i], bounds[i]);
                let delta = new_beta - beta[i];

                if delta != 0.0 {
                    f.scaled_add(delta, &q.column(i));
                    beta[i] = new_beta;
                    max_change = max_change.max(delta.abs());
                }
            }

            if max_change < self.config.tol {
                converged = true;
                break;
            }
        }

        let support: Vec<usize> = (0..n).filter(|&i| beta[i].abs() > 1e-10).collect();
        debug!(epochs, converged, n_support = support.len(), "SVR fitted");

        self.support_vectors = Some(x.select(ndarray::Axis(0), &support));
        self.coefficients = Some(support.iter().map(|&i| beta[i]).collect());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (sv, coef) = match (&self.support_vectors, &self.coefficients) {
            (Some(sv), Some(coef)) => (sv, coef),
            _ => return Err(RunnerError::ModelNotFitted),
        };
        check_n_features(self.n_features, x)?;

        let predictions: Vec<f64> = x
            .outer_iter()
            .into_par_iter()
            .map(|sample| {
                sv.outer_iter()
                    .zip(coef.iter())
                    .map(|(s, &b)| b * (self.kernel(s, sample) + 1.0))
                    .sum::<f64>()
            })
            .collect();
        Ok(Array1::from_vec(predictions))
    }

    fn name(&self) -> &'static str {
        "svm"
    }
}
