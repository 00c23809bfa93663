//! Model parameter configuration
//!
//! The configuration is a JSON object whose keys name a model type. A key
//! `<model_type>` holds a flat mapping of fixed hyperparameters; a key
//! `<model_type>_grid` holds candidate values for a grid search:
//!
//! ```json
//! {
//!     "rf": { "n_estimators": 200, "max_depth": 12 },
//!     "ridge_grid": { "alpha": [0.1, 1.0, 10.0] }
//! }
//! ```

mod params;
mod settings;

pub use params::{HyperParams, ParamGrid, ParamValue};
pub use settings::RunnerSettings;

use crate::error::{Result, RunnerError};
use crate::training::ModelType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const GRID_SUFFIX: &str = "_grid";

/// Fixed parameters and search grids for every configured model type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, serde_json::Value>")]
#[serde(into = "BTreeMap<String, serde_json::Value>")]
pub struct ModelParams {
    fixed: BTreeMap<String, HyperParams>,
    grids: BTreeMap<String, ParamGrid>,
}

impl ModelParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Save the configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Builder method to set fixed parameters for a model type
    pub fn with_fixed(mut self, model_type: ModelType, params: HyperParams) -> Self {
        self.fixed.insert(model_type.to_string(), params);
        self
    }

    /// Builder method to set a search grid for a model type
    pub fn with_grid(mut self, model_type: ModelType, grid: ParamGrid) -> Self {
        self.grids.insert(model_type.to_string(), grid);
        self
    }

    /// Fixed parameters stored under `<model_type>`
    pub fn fixed(&self, model_type: ModelType) -> Option<&HyperParams> {
        self.fixed.get(model_type.as_str())
    }

    /// Grid stored under `<model_type>_grid`
    pub fn grid(&self, model_type: ModelType) -> Option<&ParamGrid> {
        self.grids.get(model_type.as_str())
    }

    /// Whether a raw configuration key (`rf`, `rf_grid`, ...) is present
    pub fn contains_key(&self, key: &str) -> bool {
        match key.strip_suffix(GRID_SUFFIX) {
            Some(model) => self.grids.contains_key(model),
            None => self.fixed.contains_key(key),
        }
    }

    /// All configuration keys in their raw form
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.fixed.keys().cloned().collect();
        keys.extend(self.grids.keys().map(|k| format!("{}{}", k, GRID_SUFFIX)));
        keys.sort();
        keys
    }
}

impl TryFrom<BTreeMap<String, serde_json::Value>> for ModelParams {
    type Error = RunnerError;

    fn try_from(raw: BTreeMap<String, serde_json::Value>) -> Result<Self> {
        let mut config = ModelParams::new();

        for (key, value) in raw {
            if !value.is_object() {
                return Err(RunnerError::ConfigError(format!(
                    "entry '{}' must be an object of parameters",
                    key
                )));
            }

            match key.strip_suffix(GRID_SUFFIX) {
                Some(model) => {
                    let grid: ParamGrid = serde_json::from_value(value).map_err(|e| {
                        RunnerError::ConfigError(format!(
                            "grid '{}' must map parameter names to arrays of candidates: {}",
                            key, e
                        ))
                    })?;
                    config.grids.insert(model.to_string(), grid);
                }
                None => {
                    let params: HyperParams = serde_json::from_value(value).map_err(|e| {
                        RunnerError::ConfigError(format!("invalid parameters for '{}': {}", key, e))
                    })?;
                    config.fixed.insert(key, params);
                }
            }
        }

        Ok(config)
    }
}

impl From<ModelParams> for BTreeMap<String, serde_json::Value> {
    fn from(config: ModelParams) -> Self {
        let mut raw = BTreeMap::new();
        for (model, params) in config.fixed {
            raw.insert(model, serde_json::to_value(params).unwrap_or_default());
        }
        for (model, grid) in config.grids {
            raw.insert(
                format!("{}{}", model, GRID_SUFFIX),
                serde_json::to_value(grid).unwrap_or_default(),
            );
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "xgb": {"n_estimators": 50, "max_depth": 4, "learning_rate": 0.1},
        "ridge_grid": {"alpha": [0.1, 1.0, 10.0], "fit_intercept": [true, false]},
        "knn": {"n_neighbors": 3}
    }"#;

    #[test]
    fn test_parse_fixed_and_grid() {
        let config = ModelParams::from_json_str(SAMPLE).unwrap();

        let xgb = config.fixed(ModelType::XGBoost).unwrap();
        assert_eq!(xgb.get("max_depth"), Some(&ParamValue::Int(4)));

        let grid = config.grid(ModelType::Ridge).unwrap();
        assert_eq!(grid.n_combinations(), 6);
        assert!(config.fixed(ModelType::Ridge).is_none());

        assert!(config.contains_key("ridge_grid"));
        assert!(config.contains_key("knn"));
        assert!(!config.contains_key("knn_grid"));
    }

    #[test]
    fn test_grid_requires_arrays() {
        let err = ModelParams::from_json_str(r#"{"rf_grid": {"n_estimators": 10}}"#).unwrap_err();
        assert!(err.to_string().contains("rf_grid"));
    }

    #[test]
    fn test_entry_must_be_object() {
        assert!(ModelParams::from_json_str(r#"{"rf": 3}"#).is_err());
    }

    #[test]
    fn test_json_roundtrip_keeps_keys() {
        let config = ModelParams::from_json_str(SAMPLE).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back = ModelParams::from_json_str(&json).unwrap();
        assert_eq!(config, back);
        assert_eq!(back.keys(), vec!["knn", "ridge_grid", "xgb"]);
    }
}
