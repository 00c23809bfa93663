//! Random forest regressor

use super::decision_tree::{seeded_rng, DecisionTreeRegressor, Splitter};
use super::{check_n_features, ensure, unknown_param, validate_fit_input, Regressor};
use crate::config::{HyperParams, ParamValue};
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2};
use rand::RngCore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Strategy for max features
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    /// Square root of n_features
    Sqrt,
    /// Log2 of n_features
    Log2,
    /// Fraction of n_features
    Fraction(f64),
    /// Fixed number
    Fixed(usize),
    /// All features
    All,
}

impl MaxFeatures {
    pub(crate) fn from_param(name: &str, value: &ParamValue) -> Result<Self> {
        match value {
            ParamValue::Null => Ok(MaxFeatures::All),
            ParamValue::String(s) => match s.as_str() {
                "sqrt" | "auto" => Ok(MaxFeatures::Sqrt),
                "log2" => Ok(MaxFeatures::Log2),
                _ => Err(RunnerError::invalid_param(name, value, "expected sqrt, log2, an integer or a fraction")),
            },
            ParamValue::Int(n) if *n > 0 => Ok(MaxFeatures::Fixed(*n as usize)),
            ParamValue::Float(f) if *f > 0.0 && *f <= 1.0 => Ok(MaxFeatures::Fraction(*f)),
            other => Err(RunnerError::invalid_param(name, other, "expected sqrt, log2, an integer or a fraction")),
        }
    }

    pub(crate) fn resolve(&self, n_features: usize) -> usize {
        match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().ceil() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
            MaxFeatures::Fixed(n) => (*n).min(n_features),
            MaxFeatures::All => n_features,
        }
        .max(1)
    }
}

/// Random forest hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestConfig {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: Option<u64>,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            random_state: None,
        }
    }
}

impl RandomForestConfig {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        for (name, value) in params.iter() {
            match name.as_str() {
                "n_estimators" => config.n_estimators = value.to_usize(name)?,
                "max_depth" => config.max_depth = value.to_opt_usize(name)?,
                "min_samples_split" => config.min_samples_split = value.to_usize(name)?,
                "min_samples_leaf" => config.min_samples_leaf = value.to_usize(name)?,
                "max_features" => config.max_features = MaxFeatures::from_param(name, value)?,
                "bootstrap" => config.bootstrap = value.to_bool(name)?,
                "random_state" => config.random_state = value.to_seed(name)?,
                other => unknown_param("rf", other, value)?,
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn validate(&self) -> Result<()> {
        ensure(self.n_estimators > 0, "n_estimators", self.n_estimators, "must be positive")?;
        ensure(self.min_samples_split >= 2, "min_samples_split", self.min_samples_split, "must be at least 2")?;
        ensure(self.min_samples_leaf >= 1, "min_samples_leaf", self.min_samples_leaf, "must be at least 1")
    }
}

/// Settings shared by the bagged tree ensembles
pub(crate) struct ForestSpec {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: usize,
    pub bootstrap: bool,
    pub splitter: Splitter,
    pub random_state: Option<u64>,
}

/// Grow `n_estimators` trees in parallel. With bootstrap each tree sees the
/// rows drawn for it, weighted by draw count times sample weight.
pub(crate) fn grow_forest(
    spec: &ForestSpec,
    x: &Array2<f64>,
    y: &Array1<f64>,
    weights: &[f64],
) -> Result<Vec<DecisionTreeRegressor>> {
    let n_samples = x.nrows();
    let base_seed = spec.random_state.unwrap_or_else(|| seeded_rng(None).next_u64());

    (0..spec.n_estimators)
        .into_par_iter()
        .map(|tree_idx| {
            let seed = base_seed.wrapping_add(tree_idx as u64);
            let mut rng = seeded_rng(Some(seed));

            let (rows, tree_weights) = if spec.bootstrap {
                let mut counts = vec![0usize; n_samples];
                for _ in 0..n_samples {
                    counts[(rng.next_u64() as usize) % n_samples] += 1;
                }
                let rows: Vec<usize> = (0..n_samples).filter(|&i| counts[i] > 0).collect();
                let tree_weights: Vec<f64> = counts
                    .iter()
                    .zip(weights.iter())
                    .map(|(&c, &w)| c as f64 * w)
                    .collect();
                (rows, tree_weights)
            } else {
                ((0..n_samples).collect(), weights.to_vec())
            };

            let mut tree = DecisionTreeRegressor::new()
                .with_max_depth(spec.max_depth)
                .with_min_samples_split(spec.min_samples_split)
                .with_min_samples_leaf(spec.min_samples_leaf)
                .with_max_features(Some(spec.max_features))
                .with_splitter(spec.splitter);
            tree.fit_rows(x, y, &tree_weights, &rows, &mut rng)?;
            Ok(tree)
        })
        .collect()
}

/// Average of the trees' predictions
pub(crate) fn predict_forest(trees: &[DecisionTreeRegressor], x: &Array2<f64>) -> Result<Array1<f64>> {
    let first = trees.first().ok_or(RunnerError::ModelNotFitted)?;
    check_n_features(first.n_features(), x)?;

    let all_predictions: Vec<Array1<f64>> = trees
        .par_iter()
        .map(|tree| tree.predict(x))
        .collect::<Result<Vec<_>>>()?;

    let mut sum = Array1::zeros(x.nrows());
    for preds in &all_predictions {
        sum += preds;
    }
    Ok(sum / all_predictions.len() as f64)
}

/// Mean of normalised per-tree importances
pub(crate) fn forest_importances(trees: &[DecisionTreeRegressor], n_features: usize) -> Array1<f64> {
    let mut total = Array1::zeros(n_features);
    for tree in trees {
        if let Some(imp) = tree.feature_importances() {
            total += imp;
        }
    }
    let s = total.sum();
    if s > 0.0 {
        total /= s;
    }
    total
}

/// Bagged ensemble of regression trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    config: RandomForestConfig,
    trees: Vec<DecisionTreeRegressor>,
    feature_importances: Option<Array1<f64>>,
}

impl RandomForestRegressor {
    pub fn new(config: RandomForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            feature_importances: None,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(RandomForestConfig::from_params(params)?))
    }

    pub fn config(&self) -> &RandomForestConfig {
        &self.config
    }

    /// Get feature importances
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    /// Get number of trees
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let n_features = x.ncols();

        let spec = ForestSpec {
            n_estimators: self.config.n_estimators,
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split,
            min_samples_leaf: self.config.min_samples_leaf,
            max_features: self.config.max_features.resolve(n_features),
            bootstrap: self.config.bootstrap,
            splitter: Splitter::Best,
            random_state: self.config.random_state,
        };

        self.trees = grow_forest(&spec, x, y, &weights)?;
        self.feature_importances = Some(forest_importances(&self.trees, n_features));
        debug!(n_trees = self.trees.len(), max_features = spec.max_features, "Random forest fitted");
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        predict_forest(&self.trees, x)
    }

    fn name(&self) -> &'static str {
        "rf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_regressor() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0];

        let config = RandomForestConfig::default().with_n_estimators(10).with_random_state(42);
        let mut rf = RandomForestRegressor::new(config);
        rf.fit(&x, &y, None).unwrap();

        let predictions = rf.predict(&x).unwrap();
        let mse: f64 = predictions
            .iter()
            .zip(y.iter())
            .map(|(p, a)| (p - a).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        assert!(mse < 2.0, "MSE too high: {}", mse);
    }

    #[test]
    fn test_feature_importances() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];

        let config = RandomForestConfig::default().with_n_estimators(10).with_random_state(42);
        let mut rf = RandomForestRegressor::new(config);
        rf.fit(&x, &y, None).unwrap();

        let importances = rf.feature_importances().unwrap();
        assert_eq!(importances.len(), 2);
        assert!(importances[0] >= importances[1]);
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let x = Array2::from_shape_fn((30, 3), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
        let y = Array1::from_shape_fn(30, |i| i as f64 * 0.5);
        let params = HyperParams::new()
            .with("n_estimators", 8i64)
            .with("max_features", "sqrt")
            .with("random_state", 3i64);

        let mut a = RandomForestRegressor::from_params(&params).unwrap();
        let mut b = RandomForestRegressor::from_params(&params).unwrap();
        a.fit(&x, &y, None).unwrap();
        b.fit(&x, &y, None).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_from_params_rejects_unknown() {
        let params = HyperParams::new().with("criterion_name", "mse");
        assert!(matches!(
            RandomForestRegressor::from_params(&params),
            Err(RunnerError::InvalidParameter { .. })
        ));

        let params = HyperParams::new().with("n_estimators", 0i64);
        assert!(RandomForestRegressor::from_params(&params).is_err());
    }
}
