//! CatBoost-style gradient boosting on symmetric trees
//!
//! Symmetric (oblivious) decision trees: every node at one depth uses the same
//! split, so a tree of depth `d` is `d` (feature, threshold) pairs and `2^d`
//! leaf values. Leaves are Newton steps regularised by `l2_leaf_reg`. Sample
//! weights scale each row's gradient and hessian.

use super::{check_n_features, ensure, unknown_param, validate_fit_input_with_missing, Regressor};
use crate::config::HyperParams;
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Candidate thresholds scanned per feature and level
const MAX_CANDIDATES: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// L2 regularization on leaf values
    pub reg_lambda: f64,
    pub subsample: f64,
    pub random_state: Option<u64>,
}

impl Default for CatBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 6,
            reg_lambda: 3.0,
            subsample: 1.0,
            random_state: Some(0),
        }
    }
}

impl CatBoostConfig {
    /// Accepts both CatBoost (`iterations`, `depth`, `l2_leaf_reg`) and
    /// scikit-learn style names
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        for (name, value) in params.iter() {
            match name.as_str() {
                "iterations" | "n_estimators" => config.n_estimators = value.to_usize(name)?,
                "learning_rate" => config.learning_rate = value.to_f64(name)?,
                "depth" | "max_depth" => config.max_depth = value.to_usize(name)?,
                "l2_leaf_reg" | "reg_lambda" => config.reg_lambda = value.to_f64(name)?,
                "subsample" => config.subsample = value.to_f64(name)?,
                "random_state" | "random_seed" => config.random_state = value.to_seed(name)?,
                other => unknown_param("cat", other, value)?,
            }
        }
        ensure(config.n_estimators > 0, "iterations", config.n_estimators, "must be positive")?;
        ensure(config.learning_rate > 0.0, "learning_rate", config.learning_rate, "must be positive")?;
        ensure(config.max_depth <= 16, "depth", config.max_depth, "must be at most 16")?;
        ensure(config.reg_lambda >= 0.0, "l2_leaf_reg", config.reg_lambda, "must be non-negative")?;
        ensure(
            config.subsample > 0.0 && config.subsample <= 1.0,
            "subsample",
            config.subsample,
            "must be in (0, 1]",
        )?;
        Ok(config)
    }
}

/// Symmetric (oblivious) tree: each level uses the same split feature + threshold.
/// A missing (NaN) value compares below every threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SymmetricTree {
    splits: Vec<(usize, f64)>,
    leaf_values: Vec<f64>,
}

impl SymmetricTree {
    fn predict(&self, sample: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0usize;
        for &(feature, threshold) in &self.splits {
            idx = idx * 2 + usize::from(goes_right(sample[feature], threshold));
        }
        self.leaf_values[idx]
    }
}

fn goes_right(value: f64, threshold: f64) -> bool {
    value > threshold
}

/// Midpoints between distinct present values, plus one threshold below the
/// smallest value that isolates missing rows when there are any
fn candidate_thresholds(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut has_missing = false;
    let mut present: Vec<f64> = values
        .filter(|v| {
            has_missing |= v.is_nan();
            !v.is_nan()
        })
        .collect();
    present.sort_by(|a, b| a.total_cmp(b));
    present.dedup();

    let step = (present.len() / MAX_CANDIDATES).max(1);
    let mut thresholds: Vec<f64> = (0..present.len().saturating_sub(1))
        .step_by(step)
        .map(|i| (present[i] + present[i + 1]) / 2.0)
        .collect();
    if has_missing {
        if let Some(&min) = present.first() {
            thresholds.push(min - min.abs().max(1.0));
        }
    }
    thresholds
}

fn build_symmetric_tree(
    x: &Array2<f64>,
    gradients: &[f64],
    hessians: &[f64],
    indices: &[usize],
    max_depth: usize,
    reg_lambda: f64,
) -> SymmetricTree {
    let n_features = x.ncols();
    let mut splits = Vec::with_capacity(max_depth);
    let mut buckets: Vec<Vec<usize>> = vec![indices.to_vec()];

    for _depth in 0..max_depth {
        // Same split for every bucket at this level
        let best = (0..n_features)
            .into_par_iter()
            .filter_map(|feat| {
                let thresholds = candidate_thresholds(buckets.iter().flat_map(|b| b.iter().map(|&i| x[[i, feat]])));
                if thresholds.is_empty() {
                    return None;
                }

                let mut best_gain = f64::NEG_INFINITY;
                let mut best_thr = 0.0;

                for thr in thresholds {
                    let mut total_gain = 0.0;

                    for bucket in &buckets {
                        let (lg, lh, rg, rh) = bucket.iter().fold((0.0, 0.0, 0.0, 0.0), |(lg, lh, rg, rh), &idx| {
                            if goes_right(x[[idx, feat]], thr) {
                                (lg, lh, rg + gradients[idx], rh + hessians[idx])
                            } else {
                                (lg + gradients[idx], lh + hessians[idx], rg, rh)
                            }
                        });
                        let parent_g = lg + rg;
                        let parent_h = lh + rh;
                        let parent_score = parent_g * parent_g / (parent_h + reg_lambda);
                        let left_score = lg * lg / (lh + reg_lambda);
                        let right_score = rg * rg / (rh + reg_lambda);
                        total_gain += left_score + right_score - parent_score;
                    }

                    if total_gain > best_gain {
                        best_gain = total_gain;
                        best_thr = thr;
                    }
                }

                (best_gain > 1e-12).then_some((feat, best_thr, best_gain))
            })
            .max_by(|a, b| a.2.total_cmp(&b.2));

        match best {
            Some((feat, thr, _)) => {
                splits.push((feat, thr));
                let mut new_buckets = Vec::with_capacity(buckets.len() * 2);
                for bucket in &buckets {
                    let (left, right): (Vec<usize>, Vec<usize>) = bucket.iter().partition(|&&i| !goes_right(x[[i, feat]], thr));
                    new_buckets.push(left);
                    new_buckets.push(right);
                }
                buckets = new_buckets;
            }
            None => break,
        }
    }

    let leaf_values: Vec<f64> = buckets
        .iter()
        .map(|bucket| {
            let g: f64 = bucket.iter().map(|&i| gradients[i]).sum();
            let h: f64 = bucket.iter().map(|&i| hessians[i]).sum();
            if h + reg_lambda > 0.0 {
                -g / (h + reg_lambda)
            } else {
                0.0
            }
        })
        .collect();

    SymmetricTree { splits, leaf_values }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatBoostRegressor {
    pub config: CatBoostConfig,
    trees: Vec<SymmetricTree>,
    base_prediction: f64,
    n_features: usize,
}

impl CatBoostRegressor {
    pub fn new(config: CatBoostConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_prediction: 0.0,
            n_features: 0,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(CatBoostConfig::from_params(params)?))
    }
}

impl Regressor for CatBoostRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input_with_missing(x, y, sample_weight)?;
        let n = x.nrows();
        self.n_features = x.ncols();

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let w_sum: f64 = weights.iter().sum();
        self.base_prediction = y.iter().zip(weights.iter()).map(|(yi, w)| yi * w).sum::<f64>() / w_sum;
        let mut predictions = Array1::from_elem(n, self.base_prediction);
        self.trees.clear();

        for _ in 0..self.config.n_estimators {
            let gradients: Vec<f64> = predictions
                .iter()
                .zip(y.iter())
                .zip(weights.iter())
                .map(|((&p, &yi), &w)| w * (p - yi))
                .collect();
            let hessians: Vec<f64> = weights.clone();

            let indices: Vec<usize> = if self.config.subsample < 1.0 {
                let k = ((n as f64 * self.config.subsample).ceil() as usize).max(1);
                let mut sub: Vec<usize> = (0..n).collect();
                sub.shuffle(&mut rng);
                sub.truncate(k);
                sub
            } else {
                (0..n).collect()
            };

            let tree = build_symmetric_tree(
                x,
                &gradients,
                &hessians,
                &indices,
                self.config.max_depth,
                self.config.reg_lambda,
            );

            for (i, row) in x.outer_iter().enumerate() {
                predictions[i] += self.config.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);
        }

        debug!(n_trees = self.trees.len(), "CatBoost fitted");
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(RunnerError::ModelNotFitted);
        }
        check_n_features(self.n_features, x)?;

        Ok(x
            .outer_iter()
            .map(|row| {
                self.base_prediction
                    + self
                        .trees
                        .iter()
                        .map(|t| self.config.learning_rate * t.predict(row))
                        .sum::<f64>()
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "cat"
    }
}
