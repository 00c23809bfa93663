//! AdaBoost.R2 regressor
//!
//! Each round draws a bootstrap sample from the current sample distribution,
//! fits a shallow regression tree to it and scores the tree by its normalised
//! loss over all rows. Rows the tree fits poorly gain weight in the next round.
//! Predictions are the weighted median over the ensemble.

use super::decision_tree::{seeded_rng, DecisionTreeRegressor};
use super::{check_n_features, ensure, unknown_param, validate_fit_input, Regressor};
use crate::config::HyperParams;
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-row loss applied to the normalised absolute error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdaBoostLoss {
    Linear,
    Square,
    Exponential,
}

impl AdaBoostLoss {
    fn apply(&self, e: f64) -> f64 {
        match self {
            AdaBoostLoss::Linear => e,
            AdaBoostLoss::Square => e * e,
            AdaBoostLoss::Exponential => 1.0 - (-e).exp(),
        }
    }
}

/// AdaBoost hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub loss: AdaBoostLoss,
    /// Depth of each base tree
    pub max_depth: usize,
    pub random_state: Option<u64>,
}

impl Default for AdaBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            learning_rate: 1.0,
            loss: AdaBoostLoss::Linear,
            max_depth: 3,
            random_state: None,
        }
    }
}

impl AdaBoostConfig {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        for (name, value) in params.iter() {
            match name.as_str() {
                "n_estimators" => config.n_estimators = value.to_usize(name)?,
                "learning_rate" => config.learning_rate = value.to_f64(name)?,
                "max_depth" => config.max_depth = value.to_usize(name)?,
                "random_state" => config.random_state = value.to_seed(name)?,
                "loss" => {
                    config.loss = match value.to_str(name)? {
                        "linear" => AdaBoostLoss::Linear,
                        "square" => AdaBoostLoss::Square,
                        "exponential" => AdaBoostLoss::Exponential,
                        _ => {
                            return Err(RunnerError::invalid_param(
                                name,
                                value,
                                "expected linear, square or exponential",
                            ))
                        }
                    }
                }
                other => unknown_param("adaboost", other, value)?,
            }
        }
        ensure(config.n_estimators > 0, "n_estimators", config.n_estimators, "must be positive")?;
        ensure(config.learning_rate > 0.0, "learning_rate", config.learning_rate, "must be positive")?;
        ensure(config.max_depth > 0, "max_depth", config.max_depth, "must be positive")?;
        Ok(config)
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_loss(mut self, loss: AdaBoostLoss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }
}

/// AdaBoost.R2 ensemble of regression trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaBoostRegressor {
    config: AdaBoostConfig,
    estimators: Vec<DecisionTreeRegressor>,
    estimator_weights: Vec<f64>,
    n_features: usize,
}

impl AdaBoostRegressor {
    pub fn new(config: AdaBoostConfig) -> Self {
        Self {
            config,
            estimators: Vec::new(),
            estimator_weights: Vec::new(),
            n_features: 0,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(AdaBoostConfig::from_params(params)?))
    }

    pub fn n_estimators_fitted(&self) -> usize {
        self.estimators.len()
    }
}

/// Draw `n` rows with replacement according to `dist` and return draw counts
fn weighted_bootstrap<R: Rng>(dist: &[f64], rng: &mut R) -> Vec<usize> {
    let n = dist.len();
    let mut cumulative = Vec::with_capacity(n);
    let mut acc = 0.0;
    for &d in dist {
        acc += d;
        cumulative.push(acc);
    }

    let mut counts = vec![0usize; n];
    for _ in 0..n {
        let u = rng.gen::<f64>() * acc;
        let idx = cumulative.partition_point(|&c| c <= u).min(n - 1);
        counts[idx] += 1;
    }
    counts
}

impl Regressor for AdaBoostRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let n_samples = x.nrows();
        let lr = self.config.learning_rate;

        let total: f64 = weights.iter().sum();
        let mut dist: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let mut rng = seeded_rng(self.config.random_state);

        self.estimators.clear();
        self.estimator_weights.clear();
        self.n_features = x.ncols();

        for round in 0..self.config.n_estimators {
            let counts = weighted_bootstrap(&dist, &mut rng);
            let rows: Vec<usize> = (0..n_samples).filter(|&i| counts[i] > 0).collect();
            let tree_weights: Vec<f64> = counts.iter().map(|&c| c as f64).collect();

            let mut tree = DecisionTreeRegressor::new().with_max_depth(Some(self.config.max_depth));
            tree.fit_rows(x, y, &tree_weights, &rows, &mut rng)?;
            let predictions = tree.predict(x)?;

            let errors: Vec<f64> = predictions.iter().zip(y.iter()).map(|(p, t)| (p - t).abs()).collect();
            let max_error = errors.iter().cloned().fold(0.0, f64::max);

            if max_error <= 0.0 {
                // Perfect fit: this tree alone decides
                self.estimators.push(tree);
                self.estimator_weights.push(1.0);
                debug!(round, "AdaBoost reached zero error");
                break;
            }

            let losses: Vec<f64> = errors.iter().map(|e| self.config.loss.apply(e / max_error)).collect();
            let estimator_error: f64 = losses.iter().zip(dist.iter()).map(|(l, d)| l * d).sum();

            if estimator_error <= 0.0 {
                // Errors only on rows without mass: beta would zero the distribution
                self.estimators.push(tree);
                self.estimator_weights.push(1.0);
                debug!(round, "AdaBoost reached zero weighted error");
                break;
            }

            if estimator_error >= 0.5 {
                if self.estimators.is_empty() {
                    self.estimators.push(tree);
                    self.estimator_weights.push(1.0);
                }
                debug!(round, estimator_error, "AdaBoost stopped, learner no better than chance");
                break;
            }

            let beta = estimator_error / (1.0 - estimator_error);
            let estimator_weight = lr * (1.0 / beta.max(1e-300)).ln();

            for (d, l) in dist.iter_mut().zip(losses.iter()) {
                *d *= beta.powf((1.0 - l) * lr);
            }
            let dist_sum: f64 = dist.iter().sum();
            if dist_sum <= 0.0 {
                break;
            }
            for d in dist.iter_mut() {
                *d /= dist_sum;
            }

            self.estimators.push(tree);
            self.estimator_weights.push(estimator_weight);
        }

        if self.estimators.is_empty() {
            return Err(RunnerError::TrainingError(
                "AdaBoost finished without a usable estimator".to_string(),
            ));
        }
        debug!(n_estimators = self.estimators.len(), "AdaBoost fitted");
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.estimators.is_empty() {
            return Err(RunnerError::ModelNotFitted);
        }
        check_n_features(self.n_features, x)?;

        let all_predictions: Vec<Array1<f64>> = self
            .estimators
            .iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<Vec<_>>>()?;

        let half_weight: f64 = self.estimator_weights.iter().sum::<f64>() / 2.0;

        let predictions: Vec<f64> = (0..x.nrows())
            .map(|i| {
                let mut pairs: Vec<(f64, f64)> = all_predictions
                    .iter()
                    .zip(self.estimator_weights.iter())
                    .map(|(p, &w)| (p[i], w))
                    .collect();
                pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

                // Weighted median
                let mut acc = 0.0;
                for &(value, w) in &pairs {
                    acc += w;
                    if acc >= half_weight {
                        return value;
                    }
                }
                pairs.last().map(|p| p.0).unwrap_or(0.0)
            })
            .collect();

        Ok(Array1::from_vec(predictions))
    }

    fn name(&self) -> &'static str {
        "adaboost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_adaboost_regressor() {
        let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64 / 6.0);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);

        let config = AdaBoostConfig::default().with_n_estimators(30).with_random_state(42);
        let mut model = AdaBoostRegressor::new(config);
        model.fit(&x, &y, None).unwrap();

        let preds = model.predict(&x).unwrap();
        let mae: f64 = preds.iter().zip(y.iter()).map(|(p, t)| (p - t).abs()).sum::<f64>() / 60.0;
        assert!(mae < 1.5, "MAE too high: {}", mae);
    }

    #[test]
    fn test_square_loss_param() {
        let params = HyperParams::new().with("loss", "square").with("n_estimators", 5i64);
        let config = AdaBoostConfig::from_params(&params).unwrap();
        assert_eq!(config.loss, AdaBoostLoss::Square);

        let bad = HyperParams::new().with("loss", "huber");
        assert!(AdaBoostConfig::from_params(&bad).is_err());
    }

    #[test]
    fn test_weighted_bootstrap_skips_zero_mass() {
        let mut rng = seeded_rng(Some(0));
        let counts = weighted_bootstrap(&[0.0, 1.0, 0.0], &mut rng);
        assert_eq!(counts, vec![0, 3, 0]);
    }

    #[test]
    fn test_constant_target() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![4.0, 4.0, 4.0];
        let mut model = AdaBoostRegressor::new(AdaBoostConfig::default().with_random_state(1));
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.n_estimators_fitted(), 1);
        assert_eq!(model.predict(&x).unwrap().to_vec(), vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_zero_weight_rows_still_fit() {
        let x = Array2::from_shape_fn((8, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);

        // All mass on one row: the first learner is exact there and wrong elsewhere
        let single = array![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let mut model = AdaBoostRegressor::new(AdaBoostConfig::default().with_random_state(0));
        model.fit(&x, &y, Some(&single)).unwrap();
        assert_eq!(model.n_estimators_fitted(), 1);
        assert_eq!(model.predict(&x).unwrap()[7], y[7]);

        let partial = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut model = AdaBoostRegressor::new(AdaBoostConfig::default().with_random_state(0));
        model.fit(&x, &y, Some(&partial)).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_eq!(preds.len(), 8);
        assert!(preds.iter().all(|p| p.is_finite()));
    }
}
