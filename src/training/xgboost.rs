//! XGBoost-style gradient boosting with second-order approximation
//!
//! Key differences from standard gradient boosting:
//! - Uses both gradient (first derivative) and hessian (second derivative) of loss
//! - Regularized leaf weights: w* = -G / (H + lambda)
//! - Gain-based split scoring: Gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)] - γ
//! - Built-in L1 (alpha) and L2 (lambda) regularization
//! - Minimum child weight constraint
//!
//! Sample weights scale each row's gradient and hessian.

use super::{check_n_features, ensure, unknown_param, validate_fit_input_with_missing, Regressor};
use crate::config::HyperParams;
use crate::error::{Result, RunnerError};
use crate::metrics::Metric;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// XGBoost configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split (gamma)
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub random_state: Option<u64>,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: Some(0),
        }
    }
}

impl XGBoostConfig {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        for (name, value) in params.iter() {
            match name.as_str() {
                "n_estimators" => config.n_estimators = value.to_usize(name)?,
                "learning_rate" | "eta" => config.learning_rate = value.to_f64(name)?,
                "max_depth" => config.max_depth = value.to_usize(name)?,
                "min_child_weight" => config.min_child_weight = value.to_f64(name)?,
                "reg_lambda" | "lambda" => config.reg_lambda = value.to_f64(name)?,
                "reg_alpha" | "alpha" => config.reg_alpha = value.to_f64(name)?,
                "gamma" => config.gamma = value.to_f64(name)?,
                "subsample" => config.subsample = value.to_f64(name)?,
                "colsample_bytree" => config.colsample_bytree = value.to_f64(name)?,
                "random_state" | "seed" => config.random_state = value.to_seed(name)?,
                other => unknown_param("xgb", other, value)?,
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure(self.n_estimators > 0, "n_estimators", self.n_estimators, "must be positive")?;
        ensure(self.learning_rate > 0.0, "learning_rate", self.learning_rate, "must be positive")?;
        ensure(self.reg_lambda >= 0.0, "reg_lambda", self.reg_lambda, "must be non-negative")?;
        ensure(self.reg_alpha >= 0.0, "reg_alpha", self.reg_alpha, "must be non-negative")?;
        ensure(
            self.subsample > 0.0 && self.subsample <= 1.0,
            "subsample",
            self.subsample,
            "must be in (0, 1]",
        )?;
        ensure(
            self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0,
            "colsample_bytree",
            self.colsample_bytree,
            "must be in (0, 1]",
        )
    }
}

/// A single node in the XGBoost tree
#[derive(Debug, Clone, Serialize, Deserialize)]
enum XGBNode {
    Leaf { weight: f64 },
    Split {
        feature: usize,
        threshold: f64,
        /// Branch taken by a missing (NaN) feature value
        #[serde(default)]
        default_left: bool,
        left: Box<XGBNode>,
        right: Box<XGBNode>,
    },
}

impl XGBNode {
    fn predict(&self, sample: ArrayView1<'_, f64>) -> f64 {
        match self {
            XGBNode::Leaf { weight } => *weight,
            XGBNode::Split {
                feature,
                threshold,
                default_left,
                left,
                right,
            } => {
                if goes_left(sample[*feature], *threshold, *default_left) {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }
}

fn goes_left(value: f64, threshold: f64, default_left: bool) -> bool {
    if value.is_nan() {
        default_left
    } else {
        value <= threshold
    }
}

/// Build an XGBoost tree using exact greedy split finding
fn build_xgb_tree(
    x: &Array2<f64>,
    grad: &Array1<f64>,
    hess: &Array1<f64>,
    indices: &[usize],
    feature_indices: &[usize],
    depth: usize,
    config: &XGBoostConfig,
) -> XGBNode {
    let n = indices.len();

    let g_sum: f64 = indices.iter().map(|&i| grad[i]).sum();
    let h_sum: f64 = indices.iter().map(|&i| hess[i]).sum();

    let leaf_weight = compute_leaf_weight(g_sum, h_sum, config.reg_lambda, config.reg_alpha);

    if depth >= config.max_depth || n < 2 || h_sum < config.min_child_weight {
        return XGBNode::Leaf { weight: leaf_weight };
    }

    let best_split = feature_indices
        .par_iter()
        .filter_map(|&f| find_best_split_for_feature(x, grad, hess, indices, f, config))
        .max_by(|a, b| a.gain.total_cmp(&b.gain));

    match best_split {
        Some(SplitCandidate {
            feature,
            threshold,
            gain,
            default_left,
        }) if gain > config.gamma => {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| goes_left(x[[i, feature]], threshold, default_left));

            if left_idx.is_empty() || right_idx.is_empty() {
                return XGBNode::Leaf { weight: leaf_weight };
            }

            let left = build_xgb_tree(x, grad, hess, &left_idx, feature_indices, depth + 1, config);
            let right = build_xgb_tree(x, grad, hess, &right_idx, feature_indices, depth + 1, config);

            XGBNode::Split {
                feature,
                threshold,
                default_left,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        _ => XGBNode::Leaf { weight: leaf_weight },
    }
}

/// Optimal leaf weight with L1 (alpha) and L2 (lambda) regularization
fn compute_leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    let denom = h_sum + lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    if alpha > 0.0 {
        // Soft-threshold for L1
        let g_adj = if g_sum > alpha {
            g_sum - alpha
        } else if g_sum < -alpha {
            g_sum + alpha
        } else {
            return 0.0;
        };
        -g_adj / denom
    } else {
        -g_sum / denom
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    default_left: bool,
}

/// Best split for a single feature using the exact greedy method.
///
/// Rows with a missing value are tried on both sides of every threshold and
/// the better direction is kept as the node's default branch.
fn find_best_split_for_feature(
    x: &Array2<f64>,
    grad: &Array1<f64>,
    hess: &Array1<f64>,
    indices: &[usize],
    feature: usize,
    config: &XGBoostConfig,
) -> Option<SplitCandidate> {
    let (mut present, missing): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| !x[[i, feature]].is_nan());
    present.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

    let g_missing: f64 = missing.iter().map(|&i| grad[i]).sum();
    let h_missing: f64 = missing.iter().map(|&i| hess[i]).sum();
    let g_total: f64 = present.iter().map(|&i| grad[i]).sum::<f64>() + g_missing;
    let h_total: f64 = present.iter().map(|&i| hess[i]).sum::<f64>() + h_missing;

    let lambda = config.reg_lambda;
    let score = |g: f64, h: f64| (g * g) / (h + lambda);
    let parent = score(g_total, h_total);

    let directions: &[bool] = if missing.is_empty() { &[false] } else { &[false, true] };
    let mut g_present = 0.0;
    let mut h_present = 0.0;
    let mut best: Option<SplitCandidate> = None;

    for pos in 0..present.len().saturating_sub(1) {
        let idx = present[pos];
        let next_idx = present[pos + 1];
        g_present += grad[idx];
        h_present += hess[idx];

        // Skip if next sample has same feature value
        if (x[[idx, feature]] - x[[next_idx, feature]]).abs() < 1e-12 {
            continue;
        }

        for &default_left in directions {
            let (g_left, h_left) = if default_left {
                (g_present + g_missing, h_present + h_missing)
            } else {
                (g_present, h_present)
            };
            let g_right = g_total - g_left;
            let h_right = h_total - h_left;

            if h_left < config.min_child_weight || h_right < config.min_child_weight {
                continue;
            }

            let gain = 0.5 * (score(g_left, h_left) + score(g_right, h_right) - parent);
            if best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: (x[[idx, feature]] + x[[next_idx, feature]]) / 2.0,
                    gain,
                    default_left,
                });
            }
        }
    }

    best
}

fn subsample(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = ((n as f64) * ratio).ceil() as usize;
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(k.max(1));
    indices.sort_unstable();
    indices
}

/// XGBoost Regressor (squared error loss)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostRegressor {
    config: XGBoostConfig,
    trees: Vec<XGBNode>,
    base_score: f64,
    n_features: usize,
}

impl XGBoostRegressor {
    pub fn new(config: XGBoostConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_score: 0.0,
            n_features: 0,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(XGBoostConfig::from_params(params)?))
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn boost(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &[f64],
        eval: Option<(Metric, bool)>,
    ) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        self.n_features = n_features;

        let w = Array1::from_vec(weights.to_vec());
        let w_sum = w.sum();
        self.base_score = (&w * y).sum() / w_sum;
        let mut preds = Array1::from_elem(n_samples, self.base_score);

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        self.trees.clear();

        for round in 0..self.config.n_estimators {
            // Squared error: grad = w * (pred - y), hess = w
            let grad: Array1<f64> = (&preds - y) * &w;
            let hess = w.clone();

            let row_indices = subsample(&mut rng, n_samples, self.config.subsample);
            let col_indices = subsample(&mut rng, n_features, self.config.colsample_bytree);

            let tree = build_xgb_tree(x, &grad, &hess, &row_indices, &col_indices, 0, &self.config);

            for (i, row) in x.outer_iter().enumerate() {
                preds[i] += self.config.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);

            if let Some((metric, verbose)) = eval {
                let value = metric.compute(y, preds.view().insert_axis(Axis(1)))?;
                if verbose {
                    info!(round, metric = %metric, value, "train");
                } else {
                    debug!(round, metric = %metric, value, "train");
                }
            }
        }

        if preds.iter().any(|p| !p.is_finite()) {
            return Err(RunnerError::TrainingError(
                "boosting diverged to non-finite predictions".to_string(),
            ));
        }
        Ok(())
    }

    /// Compute feature importances by counting splits across all trees
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        if self.n_features == 0 {
            return None;
        }
        let mut counts = vec![0.0f64; self.n_features];
        for tree in &self.trees {
            count_splits(tree, &mut counts);
        }
        let total: f64 = counts.iter().sum();
        if total > 0.0 {
            for c in counts.iter_mut() {
                *c /= total;
            }
        }
        Some(Array1::from_vec(counts))
    }
}

fn count_splits(node: &XGBNode, counts: &mut [f64]) {
    if let XGBNode::Split {
        feature, left, right, ..
    } = node
    {
        counts[*feature] += 1.0;
        count_splits(left, counts);
        count_splits(right, counts);
    }
}

impl Regressor for XGBoostRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input_with_missing(x, y, sample_weight)?;
        self.boost(x, y, &weights, None)
    }

    fn fit_with_eval(&mut self, x: &Array2<f64>, y: &Array1<f64>, eval_metric: Metric, verbose: bool) -> Result<()> {
        let weights = validate_fit_input_with_missing(x, y, None)?;
        self.boost(x, y, &weights, Some((eval_metric, verbose)))
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(RunnerError::ModelNotFitted);
        }
        check_n_features(self.n_features, x)?;

        let preds: Vec<f64> = x
            .outer_iter()
            .map(|row| {
                self.base_score
                    + self
                        .trees
                        .iter()
                        .map(|tree| self.config.learning_rate * tree.predict(row))
                        .sum::<f64>()
            })
            .collect();
        Ok(Array1::from_vec(preds))
    }

    fn name(&self) -> &'static str {
        "xgb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regression_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_vec((50, 2), (0..100).map(|i| i as f64 * 0.1).collect()).unwrap();
        let y: Array1<f64> = x.rows().into_iter().map(|r| r[0] * 2.0 + r[1] * 0.5 + 1.0).collect();
        (x, y)
    }

    fn r2(pred: &Array1<f64>, y: &Array1<f64>) -> f64 {
        let ym = y.mean().unwrap();
        let ss_res = (pred - y).mapv(|v| v * v).sum();
        let ss_tot = y.mapv(|v| (v - ym).powi(2)).sum();
        1.0 - ss_res / ss_tot
    }

    #[test]
    fn test_xgboost_regressor() {
        let (x, y) = regression_data();
        let mut model = XGBoostRegressor::new(XGBoostConfig {
            n_estimators: 50,
            max_depth: 4,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();
        let score = r2(&model.predict(&x).unwrap(), &y);
        assert!(score > 0.9, "XGBoost regressor R² = {}", score);
    }

    #[test]
    fn test_fit_with_eval() {
        let (x, y) = regression_data();
        let mut model = XGBoostRegressor::new(XGBoostConfig {
            n_estimators: 10,
            ..Default::default()
        });
        model.fit_with_eval(&x, &y, Metric::Mae, true).unwrap();
        assert_eq!(model.n_trees(), 10);
    }

    #[test]
    fn test_xgboost_regularization() {
        let (x, y) = regression_data();
        let mut model = XGBoostRegressor::new(XGBoostConfig {
            n_estimators: 30,
            reg_lambda: 10.0,
            reg_alpha: 1.0,
            gamma: 1.0,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_eq!(preds.len(), 50);
        assert!(preds.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_from_params() {
        let params = HyperParams::new()
            .with("n_estimators", 20i64)
            .with("learning_rate", 0.05)
            .with("n_jobs", 4i64);
        let model = XGBoostRegressor::from_params(&params).unwrap();
        assert_eq!(model.config().n_estimators, 20);

        let bad = HyperParams::new().with("subsample", 1.5);
        assert!(XGBoostRegressor::from_params(&bad).is_err());
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let params = HyperParams::new().with("n_estimators", 0i64);
        assert!(matches!(
            XGBoostRegressor::from_params(&params),
            Err(RunnerError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_missing_values_follow_learned_branch() {
        // Missing rows share the high target, so they should be sent right
        let mut x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64);
        let mut y = Array1::from_shape_fn(40, |i| if i < 20 { 0.0 } else { 10.0 });
        for i in 30..40 {
            x[[i, 0]] = f64::NAN;
            y[i] = 10.0;
        }
        let mut model = XGBoostRegressor::new(XGBoostConfig {
            n_estimators: 20,
            max_depth: 2,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();

        let preds = model.predict(&ndarray::array![[f64::NAN], [2.0]]).unwrap();
        assert!(preds.iter().all(|p| p.is_finite()));
        assert!(preds[0] > 8.0, "missing value predicted {}", preds[0]);
        assert!(preds[1] < 2.0, "low value predicted {}", preds[1]);
    }
}
