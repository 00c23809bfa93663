//! Extra Trees (Extremely Randomized Trees) regressor
//!
//! Unlike a random forest, which searches for the best threshold of each
//! candidate feature, every candidate feature gets a single uniform random
//! threshold and the best of those is kept. Trees see the full training set
//! unless `bootstrap` is set.

use super::decision_tree::{DecisionTreeRegressor, Splitter};
use super::random_forest::{forest_importances, grow_forest, predict_forest, ForestSpec, MaxFeatures};
use super::{ensure, unknown_param, validate_fit_input, Regressor};
use crate::config::HyperParams;
use crate::error::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Extra trees hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraTreesConfig {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: Option<u64>,
}

impl Default for ExtraTreesConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: false,
            random_state: None,
        }
    }
}

impl ExtraTreesConfig {
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
                other => unknown_param("extra", other, value)?,
            }
        }
        ensure(config.n_estimators > 0, "n_estimators", config.n_estimators, "must be positive")?;
        ensure(config.min_samples_split >= 2, "min_samples_split", config.min_samples_split, "must be at least 2")?;
        Ok(config)
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }
}

/// Ensemble of extremely randomized regression trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraTreesRegressor {
    config: ExtraTreesConfig,
    trees: Vec<DecisionTreeRegressor>,
    feature_importances: Option<Array1<f64>>,
}

impl ExtraTreesRegressor {
    pub fn new(config: ExtraTreesConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            feature_importances: None,
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(ExtraTreesConfig::from_params(params)?))
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }
}

impl Regressor for ExtraTreesRegressor {
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
            splitter: Splitter::Random,
            random_state: self.config.random_state,
        };

        self.trees = grow_forest(&spec, x, y, &weights)?;
        self.feature_importances = Some(forest_importances(&self.trees, n_features));
        debug!(n_trees = self.trees.len(), "Extra trees fitted");
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        predict_forest(&self.trees, x)
    }

    fn name(&self) -> &'static str {
        "extra"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;

    #[test]
    fn test_extra_trees_regressor() {
        let x = Array2::from_shape_fn((50, 2), |(i, j)| (i as f64) * (j as f64 + 1.0) / 10.0);
        let y = Array1::from_shape_fn(50, |i| i as f64 * 0.3 + 1.0);

        let config = ExtraTreesConfig::default().with_n_estimators(20).with_random_state(42);
        let mut et = ExtraTreesRegressor::new(config);
        et.fit(&x, &y, None).unwrap();

        let preds = et.predict(&x).unwrap();
        let mae: f64 = preds.iter().zip(y.iter()).map(|(p, t)| (p - t).abs()).sum::<f64>() / 50.0;
        assert!(mae < 1.0, "MAE too high: {}", mae);
    }

    #[test]
    fn test_zero_weights_are_accepted() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(20, |i| i as f64);
        let w = Array1::from_shape_fn(20, |i| if i < 5 { 0.0 } else { 1.0 });

        let mut et = ExtraTreesRegressor::new(ExtraTreesConfig::default().with_n_estimators(5).with_random_state(1));
        et.fit(&x, &y, Some(&w)).unwrap();
        assert!(et.predict(&x).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_predict_before_fit() {
        let et = ExtraTreesRegressor::new(ExtraTreesConfig::default());
        assert!(matches!(
            et.predict(&Array2::zeros((1, 1))),
            Err(RunnerError::ModelNotFitted)
        ));
    }
}
