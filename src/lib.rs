//! Model runner - orchestration over a family of regression estimators
//!
//! This crate picks an estimator by model type, builds it from configured
//! hyperparameters or a search grid, and drives it through fit, predict and
//! evaluate. On top of that it provides:
//! - K-fold cross-validation with out-of-fold predictions
//! - Exhaustive grid search scored by cross-validation
//! - Stacking features for second-stage models
//!
//! # Modules
//!
//! - [`config`] - `<model>` / `<model>_grid` parameter configuration
//! - [`data`] - Named tables, prediction frames and feature providers
//! - [`metrics`] - Accuracy, log loss, MAE and metric reporters
//! - [`training`] - The `Regressor` trait, model registry and twelve estimators
//! - [`runner`] - `ModelRunner` orchestration
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

pub mod config;
pub mod data;
pub mod metrics;
pub mod training;

pub mod runner;
pub mod cli;

pub use error::{Result, RunnerError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Result, RunnerError};

    // Configuration
    pub use crate::config::{HyperParams, ModelParams, ParamGrid, ParamValue, RunnerSettings};

    // Data
    pub use crate::data::{FeatureProvider, FeatureSet, Frame, PredictionFrame};

    // Metrics
    pub use crate::metrics::{ConsoleReporter, Metric, MetricReporter, RecordingReporter};

    // Training
    pub use crate::training::{
        GridSearchResult, KFold, ModelRegistry, ModelType, MonthThreshold, Regressor, SampleWeighting, Uniform,
    };

    // Orchestration
    pub use crate::runner::{ModelRunner, RunnerState, StackingFeatures};
}
