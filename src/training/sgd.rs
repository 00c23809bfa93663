//! Stochastic Gradient Descent (SGD) regressor
//!
//! Supports squared, Huber and epsilon-insensitive losses, L2/L1/elastic-net
//! penalties and the usual learning rate schedules. Processes one sample at a
//! time; each sample's gradient is scaled by its weight.

use super::{check_n_features, ensure, unknown_param, validate_fit_input, Regressor};
use crate::config::HyperParams;
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SGDLoss {
    SquaredError,
    /// Robust regression
    Huber,
    /// SVR-like
    EpsilonInsensitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Penalty {
    None,
    L2,
    L1,
    ElasticNet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningRateSchedule {
    Constant,
    /// 1 / (alpha * (t + t0))
    Optimal,
    /// eta0 / t^power_t
    InvScaling,
    /// Halve when loss stops improving
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SGDConfig {
    pub loss: SGDLoss,
    pub penalty: Penalty,
    pub learning_rate: LearningRateSchedule,
    pub eta0: f64,
    /// Regularization strength
    pub alpha: f64,
    /// Elastic-net mixing (0 = L2, 1 = L1)
    pub l1_ratio: f64,
    pub max_iter: usize,
    pub tol: f64,
    /// For the InvScaling schedule
    pub power_t: f64,
    /// For Huber and epsilon-insensitive losses
    pub epsilon: f64,
    pub fit_intercept: bool,
    pub random_state: Option<u64>,
}

impl Default for SGDConfig {
    fn default() -> Self {
        Self {
            loss: SGDLoss::SquaredError,
            penalty: Penalty::L2,
            learning_rate: LearningRateSchedule::InvScaling,
            eta0: 0.01,
            alpha: 0.0001,
            l1_ratio: 0.15,
            max_iter: 1000,
            tol: 1e-3,
            power_t: 0.25,
            epsilon: 0.1,
            fit_intercept: true,
            random_state: Some(0),
        }
    }
}

impl SGDConfig {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        for (name, value) in params.iter() {
            match name.as_str() {
                "loss" => {
                    config.loss = match value.to_str(name)? {
                        "squared_error" | "squared_loss" => SGDLoss::SquaredError,
                        "huber" => SGDLoss::Huber,
                        "epsilon_insensitive" => SGDLoss::EpsilonInsensitive,
                        _ => {
                            return Err(RunnerError::invalid_param(
                                name,
                                value,
                                "expected squared_error, huber or epsilon_insensitive",
                            ))
                        }
                    }
                }
                "penalty" => {
                    config.penalty = match value {
                        crate::config::ParamValue::Null => Penalty::None,
                        other => match other.to_str(name)? {
                            "l2" => Penalty::L2,
                            "l1" => Penalty::L1,
                            "elasticnet" => Penalty::ElasticNet,
                            "none" => Penalty::None,
                            _ => return Err(RunnerError::invalid_param(name, value, "expected l2, l1 or elasticnet")),
                        },
                    }
                }
                "learning_rate" => {
                    config.learning_rate = match value.to_str(name)? {
                        "constant" => LearningRateSchedule::Constant,
                        "optimal" => LearningRateSchedule::Optimal,
                        "invscaling" => LearningRateSchedule::InvScaling,
                        "adaptive" => LearningRateSchedule::Adaptive,
                        _ => {
                            return Err(RunnerError::invalid_param(
                                name,
                                value,
                                "expected constant, optimal, invscaling or adaptive",
                            ))
                        }
                    }
                }
                "eta0" => config.eta0 = value.to_f64(name)?,
                "alpha" => config.alpha = value.to_f64(name)?,
                "l1_ratio" => config.l1_ratio = value.to_f64(name)?,
                "max_iter" => config.max_iter = value.to_usize(name)?,
                "tol" => config.tol = value.to_f64(name)?,
                "power_t" => config.power_t = value.to_f64(name)?,
                "epsilon" => config.epsilon = value.to_f64(name)?,
                "fit_intercept" => config.fit_intercept = value.to_bool(name)?,
                "random_state" => config.random_state = value.to_seed(name)?,
                other => unknown_param("sgd", other, value)?,
            }
        }
        ensure(config.alpha >= 0.0, "alpha", config.alpha, "must be non-negative")?;
        ensure(config.eta0 > 0.0, "eta0", config.eta0, "must be positive")?;
        ensure((0.0..=1.0).contains(&config.l1_ratio), "l1_ratio", config.l1_ratio, "must be in [0, 1]")?;
        ensure(config.max_iter > 0, "max_iter", config.max_iter, "must be positive")?;
        Ok(config)
    }

    /// (L2, L1) coefficients for the configured penalty
    fn penalty_coefficients(&self) -> (f64, f64) {
        match self.penalty {
            Penalty::None => (0.0, 0.0),
            Penalty::L2 => (self.alpha, 0.0),
            Penalty::L1 => (0.0, self.alpha),
            Penalty::ElasticNet => (self.alpha * (1.0 - self.l1_ratio), self.alpha * self.l1_ratio),
        }
    }
}

fn get_lr(config: &SGDConfig, t: usize) -> f64 {
    match config.learning_rate {
        LearningRateSchedule::Constant => config.eta0,
        LearningRateSchedule::Optimal => {
            let t0 = 1.0 / (config.alpha.max(1e-12) * config.eta0);
            1.0 / (config.alpha.max(1e-12) * (t as f64 + t0))
        }
        LearningRateSchedule::InvScaling => config.eta0 / (t as f64).powf(config.power_t),
        // adjusted by the epoch loop
        LearningRateSchedule::Adaptive => config.eta0,
    }
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SGDRegressor {
    pub config: SGDConfig,
    coef: Option<Array1<f64>>,
    intercept: f64,
    n_iter: usize,
}

impl SGDRegressor {
    pub fn new(config: SGDConfig) -> Self {
        Self {
            config,
            coef: None,
            intercept: 0.0,
            n_iter: 0,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(SGDConfig::from_params(params)?))
    }

    pub fn coef(&self) -> Option<&Array1<f64>> {
        self.coef.as_ref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Epochs run by the last fit
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn loss_derivative(&self, diff: f64) -> (f64, f64) {
        let eps = self.config.epsilon;
        match self.config.loss {
            SGDLoss::SquaredError => (diff, 0.5 * diff * diff),
            SGDLoss::Huber => {
                if diff.abs() <= eps {
                    (diff, 0.5 * diff * diff)
                } else {
                    (eps * diff.signum(), eps * (diff.abs() - 0.5 * eps))
                }
            }
            SGDLoss::EpsilonInsensitive => {
                if diff.abs() <= eps {
                    (0.0, 0.0)
                } else {
                    (diff.signum(), diff.abs() - eps)
                }
            }
        }
    }
}

impl Regressor for SGDRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let n = x.nrows();
        let p = x.ncols();

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        let (l2_coeff, l1_coeff) = self.config.penalty_coefficients();
        let w_total: f64 = weights.iter().sum();

        let mut w = Array1::<f64>::zeros(p);
        let mut b = 0.0;
        let mut indices: Vec<usize> = (0..n).collect();
        let mut best_loss = f64::INFINITY;
        let mut current_eta = self.config.eta0;
        let mut no_improvement = 0usize;
        let mut t = 1usize;
        self.n_iter = 0;

        for _epoch in 0..self.config.max_iter {
            indices.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for &i in &indices {
                let xi = x.row(i);
                let pred = xi.dot(&w) + b;
                let (dloss, loss) = self.loss_derivative(pred - y[i]);
                let dloss = dloss * weights[i];
                epoch_loss += weights[i] * loss;

                let lr = match self.config.learning_rate {
                    LearningRateSchedule::Adaptive => current_eta,
                    _ => get_lr(&self.config, t),
                };

                for j in 0..p {
                    let grad = dloss * xi[j] + l2_coeff * w[j];
                    w[j] -= lr * grad;
                    if l1_coeff > 0.0 {
                        w[j] = soft_threshold(w[j], lr * l1_coeff);
                    }
                }
                if self.config.fit_intercept {
                    b -= lr * dloss;
                }
                t += 1;
            }

            self.n_iter += 1;
            epoch_loss /= w_total;

            if !epoch_loss.is_finite() {
                return Err(RunnerError::TrainingError(
                    "SGD diverged, try a smaller eta0".to_string(),
                ));
            }

            // Stop after five epochs without improving on the best loss by tol
            if epoch_loss > best_loss - self.config.tol {
                no_improvement += 1;
                if self.config.learning_rate == LearningRateSchedule::Adaptive && current_eta > 1e-6 {
                    current_eta /= 5.0;
                    no_improvement = 0;
                } else if no_improvement >= 5 {
                    break;
                }
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(epoch_loss);
        }

        debug!(epochs = self.n_iter, loss = best_loss, "SGD fitted");
        self.coef = Some(w);
        self.intercept = b;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let w = self.coef.as_ref().ok_or(RunnerError::ModelNotFitted)?;
        check_n_features(w.len(), x)?;
        Ok(x.dot(w) + self.intercept)
    }

    fn name(&self) -> &'static str {
        "sgd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_regression_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((100, 2), |(i, j)| ((i * (j + 3)) % 17) as f64 / 17.0);
        let y: Array1<f64> = x.rows().into_iter().map(|r| 2.0 * r[0] - r[1] + 0.5).collect();
        (x, y)
    }

    #[test]
    fn test_sgd_regressor() {
        let (x, y) = make_regression_data();
        let config = SGDConfig {
            learning_rate: LearningRateSchedule::Constant,
            eta0: 0.05,
            max_iter: 200,
            tol: 1e-6,
            ..Default::default()
        };
        let mut model = SGDRegressor::new(config);
        model.fit(&x, &y, None).unwrap();
        let preds = model.predict(&x).unwrap();
        let mae: f64 = preds.iter().zip(y.iter()).map(|(p, t)| (p - t).abs()).sum::<f64>() / 100.0;
        assert!(mae < 0.1, "MAE too high: {}", mae);
    }

    #[test]
    fn test_sgd_huber_and_l1() {
        let (x, y) = make_regression_data();
        let params = HyperParams::new()
            .with("loss", "huber")
            .with("penalty", "elasticnet")
            .with("max_iter", 50i64);
        let mut model = SGDRegressor::from_params(&params).unwrap();
        model.fit(&x, &y, None).unwrap();
        assert!(model.predict(&x).unwrap().iter().all(|p| p.is_finite()));
        assert!(model.n_iter() <= 50);
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
    }

    #[test]
    fn test_bad_schedule() {
        let params = HyperParams::new().with("learning_rate", "cosine");
        assert!(matches!(
            SGDRegressor::from_params(&params),
            Err(RunnerError::InvalidParameter { .. })
        ));
    }
}
