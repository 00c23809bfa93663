//! Weighted regression tree
//!
//! CART-style tree minimising weighted squared error. Used directly as the base
//! learner of AdaBoost.R2 and, with feature subsampling or random thresholds, by
//! the random forest and extra-trees ensembles.

use super::{check_n_features, validate_fit_input, Regressor};
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf { value: f64, n_samples: usize },
    /// Internal node with split
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        gain: f64,
    },
}

/// How split thresholds are chosen at each node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Splitter {
    /// Scan every midpoint between sorted feature values
    Best,
    /// One uniform threshold between the feature's min and max
    Random,
}

/// Weighted accumulator for the squared-error criterion
#[derive(Debug, Clone, Copy, Default)]
struct SplitStats {
    count: usize,
    w: f64,
    wy: f64,
    wy2: f64,
}

impl SplitStats {
    fn push(&mut self, y: f64, w: f64) {
        self.count += 1;
        self.w += w;
        self.wy += w * y;
        self.wy2 += w * y * y;
    }

    fn minus(&self, other: &SplitStats) -> SplitStats {
        SplitStats {
            count: self.count - other.count,
            w: self.w - other.w,
            wy: self.wy - other.wy,
            wy2: self.wy2 - other.wy2,
        }
    }

    /// Weighted sum of squared deviations from the weighted mean
    fn sse(&self) -> f64 {
        if self.w <= 0.0 {
            return 0.0;
        }
        (self.wy2 - self.wy * self.wy / self.w).max(0.0)
    }
}

/// Regression tree with per-sample weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeRegressor {
    root: Option<TreeNode>,
    /// Maximum depth
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Features considered at each split (all when `None`)
    pub max_features: Option<usize>,
    pub splitter: Splitter,
    pub random_state: Option<u64>,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl Default for DecisionTreeRegressor {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTreeRegressor {
    pub fn new() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            splitter: Splitter::Best,
            random_state: None,
            n_features: 0,
            feature_importances: None,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set minimum samples to split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_splitter(mut self, splitter: Splitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_random_state(mut self, seed: Option<u64>) -> Self {
        self.random_state = seed;
        self
    }

    /// Grow the tree on a subset of rows with explicit weights.
    ///
    /// `rows` may repeat; `weights` is indexed by row position in `x`.
    pub(crate) fn fit_rows(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &[f64],
        rows: &[usize],
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        if rows.is_empty() {
            return Err(RunnerError::ValidationError(
                "cannot grow a tree on zero rows".to_string(),
            ));
        }

        self.n_features = x.ncols();
        let mut importances = vec![0.0; self.n_features];
        self.root = Some(self.build_tree(x, y, weights, rows, 0, &mut importances, rng));

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_tree(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &[f64],
        rows: &[usize],
        depth: usize,
        importances: &mut [f64],
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let n_samples = rows.len();
        let mut stats = SplitStats::default();
        for &i in rows {
            stats.push(y[i], weights[i]);
        }
        let value = leaf_value(y, rows, &stats);

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || stats.sse() <= 1e-12;

        if should_stop {
            return TreeNode::Leaf { value, n_samples };
        }

        let candidates = self.candidate_features(x.ncols(), rng);
        let thresholds = match self.splitter {
            Splitter::Best => None,
            Splitter::Random => Some(random_thresholds(x, rows, &candidates, rng)),
        };

        let best = self.find_best_split(x, y, weights, rows, &stats, &candidates, thresholds.as_deref());

        match best {
            Some((feature_idx, threshold, gain)) => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                    rows.iter().partition(|&&i| x[[i, feature_idx]] <= threshold);

                importances[feature_idx] += gain;

                let left = Box::new(self.build_tree(x, y, weights, &left_rows, depth + 1, importances, rng));
                let right = Box::new(self.build_tree(x, y, weights, &right_rows, depth + 1, importances, rng));

                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                    n_samples,
                    gain,
                }
            }
            None => TreeNode::Leaf { value, n_samples },
        }
    }

    fn candidate_features(&self, n_features: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
        let k = self.max_features.unwrap_or(n_features).clamp(1, n_features);
        if k >= n_features {
            return (0..n_features).collect();
        }
        let mut features: Vec<usize> = (0..n_features).collect();
        // Partial Fisher-Yates
        for i in 0..k {
            let j = rng.gen_range(i..n_features);
            features.swap(i, j);
        }
        features.truncate(k);
        features
    }

    #[allow(clippy::too_many_arguments)]
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &[f64],
        rows: &[usize],
        parent: &SplitStats,
        candidates: &[usize],
        thresholds: Option<&[Option<f64>]>,
    ) -> Option<(usize, f64, f64)> {
        let parent_sse = parent.sse();
        let min_leaf = self.min_samples_leaf;

        // Each feature independently finds its best split
        let feature_results: Vec<Option<(usize, f64, f64)>> = candidates
            .par_iter()
            .enumerate()
            .map(|(slot, &feature_idx)| {
                if let Some(thresholds) = thresholds {
                    let threshold = thresholds[slot]?;
                    let mut left = SplitStats::default();
                    for &i in rows {
                        if x[[i, feature_idx]] <= threshold {
                            left.push(y[i], weights[i]);
                        }
                    }
                    let right = parent.minus(&left);
                    if left.count < min_leaf || right.count < min_leaf {
                        return None;
                    }
                    let gain = parent_sse - left.sse() - right.sse();
                    return (gain > 1e-12).then_some((feature_idx, threshold, gain));
                }

                let mut sorted: Vec<usize> = rows.to_vec();
                sorted.sort_by(|&a, &b| x[[a, feature_idx]].total_cmp(&x[[b, feature_idx]]));

                let mut best_gain = 0.0f64;
                let mut best_threshold = None;
                let mut left = SplitStats::default();

                for pos in 0..sorted.len() - 1 {
                    let i = sorted[pos];
                    left.push(y[i], weights[i]);

                    let current = x[[i, feature_idx]];
                    let next = x[[sorted[pos + 1], feature_idx]];
                    if next <= current {
                        continue;
                    }

                    let right = parent.minus(&left);
                    if left.count < min_leaf || right.count < min_leaf {
                        continue;
                    }

                    let gain = parent_sse - left.sse() - right.sse();
                    if gain > best_gain {
                        best_gain = gain;
                        best_threshold = Some((current + next) / 2.0);
                    }
                }

                best_threshold
                    .filter(|_| best_gain > 1e-12)
                    .map(|t| (feature_idx, t, best_gain))
            })
            .collect();

        feature_results
            .into_iter()
            .flatten()
            .max_by(|a, b| a.2.total_cmp(&b.2))
    }

    fn predict_sample(node: &TreeNode, sample: &[f64]) -> f64 {
        match node {
            TreeNode::Leaf { value, .. } => *value,
            TreeNode::Split {
                feature_idx,
                threshold,
                left,
                right,
                ..
            } => {
                if sample[*feature_idx] <= *threshold {
                    Self::predict_sample(left, sample)
                } else {
                    Self::predict_sample(right, sample)
                }
            }
        }
    }

    /// Get feature importances
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    /// Get tree depth
    pub fn get_depth(&self) -> usize {
        fn depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
            }
        }
        self.root.as_ref().map_or(0, depth)
    }

    pub(crate) fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Weighted mean of the rows, or the plain mean when every weight is zero
fn leaf_value(y: &Array1<f64>, rows: &[usize], stats: &SplitStats) -> f64 {
    if stats.w > 0.0 {
        stats.wy / stats.w
    } else if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
    }
}

fn random_thresholds(
    x: &Array2<f64>,
    rows: &[usize],
    candidates: &[usize],
    rng: &mut ChaCha8Rng,
) -> Vec<Option<f64>> {
    candidates
        .iter()
        .map(|&f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = x[[i, f]];
                (lo.min(v), hi.max(v))
            });
            if hi > lo {
                Some(rng.gen_range(lo..hi))
            } else {
                None
            }
        })
        .collect()
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    }
}

impl Regressor for DecisionTreeRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let mut rng = seeded_rng(self.random_state);
        self.fit_rows(x, y, &weights, &rows, &mut rng)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(RunnerError::ModelNotFitted)?;
        check_n_features(self.n_features, x)?;

        let predictions: Vec<f64> = x
            .outer_iter()
            .map(|row| Self::predict_sample(root, &row.to_vec()))
            .collect();
        Ok(Array1::from_vec(predictions))
    }

    fn name(&self) -> &'static str {
        "decision_tree"
    }
}
