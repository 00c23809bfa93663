//! Regression estimators and the machinery the runner drives them with
//!
//! Provides:
//! - The [`Regressor`] trait every estimator family implements
//! - [`ModelType`], the closed set of supported families
//! - [`ModelRegistry`], mapping a model type to its factory
//! - Sample weighting strategies applied before fitting
//! - K-fold splitting and exhaustive grid search
//! - Native estimators: gradient-boosted trees (XGBoost style), symmetric-tree
//!   boosting (CatBoost style), AdaBoost.R2, random forest, extra trees, KNN,
//!   epsilon-SVR, SGD, ridge, lasso, elastic net and an MLP

pub mod adaboost;
pub mod catboost;
pub mod cross_validation;
pub mod decision_tree;
pub mod extra_trees;
pub mod grid_search;
pub mod knn;
pub mod linear_models;
pub mod neural_network;
pub mod random_forest;
mod registry;
pub mod sgd;
pub mod svm;
mod weighting;
pub mod xgboost;

pub use adaboost::{AdaBoostConfig, AdaBoostLoss, AdaBoostRegressor};
pub use catboost::{CatBoostConfig, CatBoostRegressor};
pub use cross_validation::{CVSplit, KFold};
pub use decision_tree::{DecisionTreeRegressor, Splitter, TreeNode};
pub use extra_trees::{ExtraTreesConfig, ExtraTreesRegressor};
pub use grid_search::{CandidateResult, GridSearch, GridSearchResult};
pub use knn::{DistanceMetric, KNNConfig, KNNRegressor, WeightScheme};
pub use linear_models::{ElasticNetRegression, LassoRegression, LinearModelConfig, RidgeRegression};
pub use neural_network::{Activation, MLPConfig, MLPRegressor};
pub use random_forest::{MaxFeatures, RandomForestConfig, RandomForestRegressor};
pub use registry::{ModelFactory, ModelRegistry};
pub use sgd::{LearningRateSchedule, Penalty, SGDConfig, SGDLoss, SGDRegressor};
pub use svm::{KernelType, SVMConfig, SVMRegressor};
pub use weighting::{MonthThreshold, SampleWeighting, Uniform};
pub use xgboost::{XGBoostConfig, XGBoostRegressor};

use crate::config::ParamValue;
use crate::error::{Result, RunnerError};
use crate::metrics::Metric;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// A regression estimator that can be fitted and queried
pub trait Regressor: Send + Sync + fmt::Debug {
    /// Fit to `x`/`y`, optionally weighting each row
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()>;

    /// Predict one value per row of `x`
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Short name of the estimator family
    fn name(&self) -> &'static str;

    /// Fit while tracking `eval_metric` on the training data.
    ///
    /// Iterative estimators that can report per-round progress override this;
    /// the default fits unweighted and ignores the metric.
    fn fit_with_eval(&mut self, x: &Array2<f64>, y: &Array1<f64>, eval_metric: Metric, verbose: bool) -> Result<()> {
        debug!(model = self.name(), metric = %eval_metric, verbose, "No evaluation hook, fitting plainly");
        self.fit(x, y, None)
    }
}

/// Supported estimator families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelType {
    /// Second-order gradient-boosted trees (`xgb`)
    XGBoost,
    /// Symmetric-tree boosting (`cat`)
    CatBoost,
    AdaBoost,
    RandomForest,
    KNN,
    /// Epsilon-insensitive support vector regression (`svm`)
    SVM,
    SGD,
    ElasticNet,
    MLP,
    ExtraTrees,
    Lasso,
    Ridge,
}

impl ModelType {
    /// Configuration identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::XGBoost => "xgb",
            ModelType::CatBoost => "cat",
            ModelType::AdaBoost => "adaboost",
            ModelType::RandomForest => "rf",
            ModelType::KNN => "knn",
            ModelType::SVM => "svm",
            ModelType::SGD => "sgd",
            ModelType::ElasticNet => "elas",
            ModelType::MLP => "mlp",
            ModelType::ExtraTrees => "extra",
            ModelType::Lasso => "lasso",
            ModelType::Ridge => "ridge",
        }
    }

    /// Every supported family
    pub fn all() -> [ModelType; 12] {
        [
            ModelType::XGBoost,
            ModelType::CatBoost,
            ModelType::AdaBoost,
            ModelType::RandomForest,
            ModelType::KNN,
            ModelType::SVM,
            ModelType::SGD,
            ModelType::ElasticNet,
            ModelType::MLP,
            ModelType::ExtraTrees,
            ModelType::Lasso,
            ModelType::Ridge,
        ]
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        ModelType::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RunnerError::ConfigError(format!("unknown model type '{}'", s)))
    }
}

/// Check fit inputs and return the per-row weights (all ones when absent)
pub(crate) fn validate_fit_input(
    x: &Array2<f64>,
    y: &Array1<f64>,
    sample_weight: Option<&Array1<f64>>,
) -> Result<Vec<f64>> {
    check_fit_input(x, y, sample_weight, false)
}

/// Like [`validate_fit_input`], but NaN feature values are accepted as missing.
/// Used by the boosted-tree families, which learn where missing values go.
pub(crate) fn validate_fit_input_with_missing(
    x: &Array2<f64>,
    y: &Array1<f64>,
    sample_weight: Option<&Array1<f64>>,
) -> Result<Vec<f64>> {
    check_fit_input(x, y, sample_weight, true)
}

fn check_fit_input(
    x: &Array2<f64>,
    y: &Array1<f64>,
    sample_weight: Option<&Array1<f64>>,
    allow_missing: bool,
) -> Result<Vec<f64>> {
    let n_samples = x.nrows();
    if n_samples == 0 {
        return Err(RunnerError::ValidationError("cannot fit on zero rows".to_string()));
    }
    if x.ncols() == 0 {
        return Err(RunnerError::ValidationError("cannot fit on zero features".to_string()));
    }
    if n_samples != y.len() {
        return Err(RunnerError::length_mismatch(n_samples, y.len()));
    }
    if allow_missing {
        if x.iter().any(|v| v.is_infinite()) || y.iter().any(|v| !v.is_finite()) {
            return Err(RunnerError::ValidationError(
                "input contains infinite values or a NaN target".to_string(),
            ));
        }
    } else if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(RunnerError::ValidationError(
            "input contains NaN or infinite values".to_string(),
        ));
    }

    match sample_weight {
        None => Ok(vec![1.0; n_samples]),
        Some(w) => {
            if w.len() != n_samples {
                return Err(RunnerError::ShapeError {
                    expected: format!("{} sample weights", n_samples),
                    actual: format!("{} sample weights", w.len()),
                });
            }
            if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(RunnerError::ValidationError(
                    "sample weights must be finite and non-negative".to_string(),
                ));
            }
            if w.sum() <= 0.0 {
                return Err(RunnerError::ValidationError(
                    "sample weights sum to zero".to_string(),
                ));
            }
            Ok(w.to_vec())
        }
    }
}

/// Check that a prediction matrix has the width the model was fitted on
pub(crate) fn check_n_features(expected: usize, x: &Array2<f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(RunnerError::ShapeError {
            expected: format!("{} features", expected),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}

/// Parameters accepted by every family and ignored, such as thread counts and
/// verbosity switches
const IGNORED_PARAMS: &[&str] = &["n_jobs", "nthread", "verbose", "verbosity", "silent", "thread_count"];

/// Reject a parameter name a family does not understand
pub(crate) fn unknown_param(model: &str, name: &str, value: &ParamValue) -> Result<()> {
    if IGNORED_PARAMS.contains(&name) {
        debug!(model, param = name, "Ignoring parameter");
        return Ok(());
    }
    Err(RunnerError::invalid_param(
        name,
        value,
        format!("unknown parameter for {}", model),
    ))
}

/// Reject a value outside the accepted range
pub(crate) fn ensure(valid: bool, name: &str, value: impl fmt::Display, reason: &str) -> Result<()> {
    if valid {
        Ok(())
    } else {
        Err(RunnerError::invalid_param(name, value, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_model_type_roundtrip() {
        for model_type in ModelType::all() {
            let parsed: ModelType = model_type.as_str().parse().unwrap();
            assert_eq!(parsed, model_type);
            assert_eq!(model_type.to_string(), model_type.as_str());
        }
        assert!("lgbm".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_validate_fit_input() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0];
        assert_eq!(validate_fit_input(&x, &y, None).unwrap(), vec![1.0, 1.0]);

        let w = array![0.5, -1.0];
        assert!(validate_fit_input(&x, &y, Some(&w)).is_err());

        let zero = array![0.0, 0.0];
        assert!(validate_fit_input(&x, &y, Some(&zero)).is_err());

        let short = array![1.0];
        assert!(matches!(
            validate_fit_input(&x, &short, None),
            Err(RunnerError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_missing_features_only_where_allowed() {
        let x = array![[1.0], [f64::NAN]];
        let y = array![1.0, 2.0];
        assert!(validate_fit_input(&x, &y, None).is_err());
        assert_eq!(validate_fit_input_with_missing(&x, &y, None).unwrap(), vec![1.0, 1.0]);

        let inf = array![[1.0], [f64::INFINITY]];
        assert!(validate_fit_input_with_missing(&inf, &y, None).is_err());
        let nan_target = array![1.0, f64::NAN];
        assert!(validate_fit_input_with_missing(&x, &nan_target, None).is_err());
    }

    #[test]
    fn test_unknown_param() {
        assert!(unknown_param("rf", "n_jobs", &ParamValue::Int(4)).is_ok());
        assert!(matches!(
            unknown_param("rf", "depth_limit", &ParamValue::Int(4)),
            Err(RunnerError::InvalidParameter { .. })
        ));
    }
}
