//! K-Nearest Neighbors regressor
//!
//! Prediction is the weighted mean of the `k` nearest training targets. A
//! neighbour's weight is its sample weight times the scheme weight (1, or the
//! inverse distance).

use super::{check_n_features, ensure, unknown_param, validate_fit_input, Regressor};
use crate::config::HyperParams;
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::debug;

/// Distance metric for KNN
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    /// Euclidean distance (L2)
    #[default]
    Euclidean,
    /// Manhattan distance (L1)
    Manhattan,
    /// Minkowski distance with parameter p
    Minkowski(f64),
    /// Cosine similarity (converted to distance)
    Cosine,
}

/// Weighting scheme for neighbors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum WeightScheme {
    /// All neighbors have equal weight
    #[default]
    Uniform,
    /// Closer neighbors have more weight (inverse distance)
    Distance,
}

/// KNN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNConfig {
    /// Number of neighbors
    pub n_neighbors: usize,
    /// Distance metric
    pub metric: DistanceMetric,
    /// Weighting scheme
    pub weights: WeightScheme,
}

impl Default for KNNConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Euclidean,
            weights: WeightScheme::Uniform,
        }
    }
}

impl KNNConfig {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        let mut metric_name: Option<String> = None;
        let mut p: Option<f64> = None;

        for (name, value) in params.iter() {
            match name.as_str() {
                "n_neighbors" => config.n_neighbors = value.to_usize(name)?,
                "weights" => {
                    config.weights = match value.to_str(name)? {
                        "uniform" => WeightScheme::Uniform,
                        "distance" => WeightScheme::Distance,
                        _ => return Err(RunnerError::invalid_param(name, value, "expected uniform or distance")),
                    }
                }
                "metric" => metric_name = Some(value.to_str(name)?.to_string()),
                "p" => p = Some(value.to_f64(name)?),
                "algorithm" | "leaf_size" => debug!(param = name.as_str(), "Brute-force search only, ignoring"),
                other => unknown_param("knn", other, value)?,
            }
        }

        config.metric = match (metric_name.as_deref(), p) {
            (None | Some("minkowski"), None) => DistanceMetric::Euclidean,
            (None | Some("minkowski"), Some(p)) if p == 1.0 => DistanceMetric::Manhattan,
            (None | Some("minkowski"), Some(p)) if p == 2.0 => DistanceMetric::Euclidean,
            (None | Some("minkowski"), Some(p)) => {
                ensure(p >= 1.0, "p", p, "must be at least 1")?;
                DistanceMetric::Minkowski(p)
            }
            (Some("euclidean" | "l2"), _) => DistanceMetric::Euclidean,
            (Some("manhattan" | "l1" | "cityblock"), _) => DistanceMetric::Manhattan,
            (Some("cosine"), _) => DistanceMetric::Cosine,
            (Some(other), _) => {
                return Err(RunnerError::invalid_param(
                    "metric",
                    other,
                    "expected minkowski, euclidean, manhattan or cosine",
                ))
            }
        };

        ensure(config.n_neighbors > 0, "n_neighbors", config.n_neighbors, "must be positive")?;
        Ok(config)
    }
}

/// K-Nearest Neighbors Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNRegressor {
    config: KNNConfig,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array1<f64>>,
    sample_weight: Vec<f64>,
}

impl KNNRegressor {
    pub fn new(config: KNNConfig) -> Self {
        Self {
            config,
            x_train: None,
            y_train: None,
            sample_weight: Vec::new(),
        }
    }

    /// Create with default config and specified k
    pub fn with_k(k: usize) -> Self {
        Self::new(KNNConfig {
            n_neighbors: k,
            ..Default::default()
        })
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(KNNConfig::from_params(params)?))
    }

    pub fn config(&self) -> &KNNConfig {
        &self.config
    }
}

impl Regressor for KNNRegressor {
    /// Stores the training data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        self.sample_weight = validate_fit_input(x, y, sample_weight)?;
        self.x_train = Some(x.clone());
        self.y_train = Some(y.clone());
        Ok(())
    }

    /// Predict target values (parallelized over test samples)
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (x_train, y_train) = match (&self.x_train, &self.y_train) {
            (Some(xt), Some(yt)) => (xt, yt),
            _ => return Err(RunnerError::ModelNotFitted),
        };
        check_n_features(x_train.ncols(), x)?;

        let k = self.config.n_neighbors.min(x_train.nrows());
        let metric = self.config.metric;
        let scheme = self.config.weights;

        let predictions: Vec<f64> = x
            .outer_iter()
            .into_par_iter()
            .map(|row| {
                let neighbors = find_k_nearest(row, x_train, y_train, &self.sample_weight, k, metric);
                weighted_mean_from(&neighbors, scheme)
            })
            .collect();

        Ok(Array1::from_vec(predictions))
    }

    fn name(&self) -> &'static str {
        "knn"
    }
}

/// Max-heap entry for partial sort (keeps k smallest distances)
#[derive(PartialEq)]
struct Neighbor {
    dist: f64,
    target: f64,
    weight: f64,
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.total_cmp(&other.dist)
    }
}

/// Find k nearest neighbors using a max-heap, O(n log k)
fn find_k_nearest(
    point: ArrayView1<'_, f64>,
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    sample_weight: &[f64],
    k: usize,
    metric: DistanceMetric,
) -> Vec<Neighbor> {
    let mut heap = BinaryHeap::with_capacity(k + 1);

    for (i, row) in x_train.outer_iter().enumerate() {
        let dist = compute_distance(point, row, metric);
        let candidate = Neighbor {
            dist,
            target: y_train[i],
            weight: sample_weight[i],
        };
        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(top) = heap.peek() {
            if dist < top.dist {
                heap.pop();
                heap.push(candidate);
            }
        }
    }

    heap.into_vec()
}

/// Compute distance between two points using the specified metric
fn compute_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::Euclidean => a
            .iter()
            .zip(b.iter())
            .map(|(ai, bi)| {
                let d = ai - bi;
                d * d
            })
            .sum::<f64>()
            .sqrt(),
        DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(ai, bi)| (ai - bi).abs()).sum(),
        DistanceMetric::Minkowski(p) => a
            .iter()
            .zip(b.iter())
            .map(|(ai, bi)| (ai - bi).abs().powf(p))
            .sum::<f64>()
            .powf(1.0 / p),
        DistanceMetric::Cosine => {
            let mut dot = 0.0;
            let mut norm_a = 0.0;
            let mut norm_b = 0.0;
            for (ai, bi) in a.iter().zip(b.iter()) {
                dot += ai * bi;
                norm_a += ai * ai;
                norm_b += bi * bi;
            }
            let denom = norm_a.sqrt() * norm_b.sqrt();
            if denom > 0.0 {
                1.0 - (dot / denom)
            } else {
                1.0
            }
        }
    }
}

/// Weighted mean of neighbour targets. Falls back to the plain mean when every
/// neighbour carries zero weight.
fn weighted_mean_from(neighbors: &[Neighbor], scheme: WeightScheme) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for n in neighbors {
        let w = match scheme {
            WeightScheme::Uniform => 1.0,
            WeightScheme::Distance => 1.0 / (n.dist + 1e-10),
        } * n.weight;
        weighted_sum += w * n.target;
        weight_total += w;
    }
    if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        neighbors.iter().map(|n| n.target).sum::<f64>() / neighbors.len().max(1) as f64
    }
}
