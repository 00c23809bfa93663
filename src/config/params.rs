//! Hyperparameter values, fixed parameter sets and search grids

use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single hyperparameter value as it appears in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Numeric value as float
    pub fn to_f64(&self, name: &str) -> Result<f64> {
        match self {
            ParamValue::Float(v) => Ok(*v),
            ParamValue::Int(v) => Ok(*v as f64),
            other => Err(RunnerError::invalid_param(name, other, "expected a number")),
        }
    }

    /// Non-negative integer value. Floats are accepted when they are whole.
    pub fn to_usize(&self, name: &str) -> Result<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Ok(*v as usize),
            ParamValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Ok(*v as usize),
            other => Err(RunnerError::invalid_param(name, other, "expected a non-negative integer")),
        }
    }

    /// Like [`ParamValue::to_usize`] but `null` maps to `None`
    pub fn to_opt_usize(&self, name: &str) -> Result<Option<usize>> {
        match self {
            ParamValue::Null => Ok(None),
            other => other.to_usize(name).map(Some),
        }
    }

    /// Seed value; `null` maps to `None`
    pub fn to_seed(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.to_opt_usize(name)?.map(|v| v as u64))
    }

    pub fn to_bool(&self, name: &str) -> Result<bool> {
        match self {
            ParamValue::Bool(v) => Ok(*v),
            other => Err(RunnerError::invalid_param(name, other, "expected a boolean")),
        }
    }

    pub fn to_str(&self, name: &str) -> Result<&str> {
        match self {
            ParamValue::String(v) => Ok(v.as_str()),
            other => Err(RunnerError::invalid_param(name, other, "expected a string")),
        }
    }

    /// A list of sizes. A bare integer is read as a one-element list.
    pub fn to_usize_list(&self, name: &str) -> Result<Vec<usize>> {
        match self {
            ParamValue::List(items) => items.iter().map(|v| v.to_usize(name)).collect(),
            other => Ok(vec![other.to_usize(name)?]),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::String(v) => write!(f, "'{}'", v),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

/// Fixed hyperparameters for one model, keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperParams(BTreeMap<String, ParamValue>);

impl HyperParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set a parameter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HyperParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{}': {}", name, value)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, ParamValue)> for HyperParams {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        HyperParams(iter.into_iter().collect())
    }
}

/// Candidate values per parameter for an exhaustive grid search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamGrid(BTreeMap<String, Vec<ParamValue>>);

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add candidate values for a parameter
    pub fn with<V: Into<ParamValue>>(mut self, name: impl Into<String>, values: Vec<V>) -> Self {
        self.0.insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<ParamValue>) {
        self.0.insert(name.into(), values);
    }

    pub fn get(&self, name: &str) -> Option<&[ParamValue]> {
        self.0.get(name).map(|v| v.as_slice())
    }

    pub fn param_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Number of parameter combinations in the grid
    pub fn n_combinations(&self) -> usize {
        self.0.values().map(|v| v.len()).product()
    }

    /// Every parameter combination. Names are visited in sorted order and the
    /// last name varies fastest.
    pub fn combinations(&self) -> Result<Vec<HyperParams>> {
        for (name, values) in &self.0 {
            if values.is_empty() {
                return Err(RunnerError::ConfigError(format!(
                    "grid parameter '{}' has no candidate values",
                    name
                )));
            }
        }

        let mut combos = vec![HyperParams::new()];
        for (name, values) in &self.0 {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    let mut extended = combo.clone();
                    extended.insert(name.clone(), value.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }
        Ok(combos)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParamGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        for (name, values) in &self.0 {
            write!(f, "  '{}': ", name)?;
            writeln!(f, "{}", ParamValue::List(values.clone()))?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_deserialize() {
        let params: HyperParams = serde_json::from_str(
            r#"{"n_estimators": 200, "learning_rate": 0.05, "loss": "square", "max_depth": null, "hidden_layer_sizes": [64, 32]}"#,
        )
        .unwrap();

        assert_eq!(params.get("n_estimators"), Some(&ParamValue::Int(200)));
        assert_eq!(params.get("learning_rate"), Some(&ParamValue::Float(0.05)));
        assert_eq!(params.get("max_depth").unwrap().to_opt_usize("max_depth").unwrap(), None);
        assert_eq!(
            params.get("hidden_layer_sizes").unwrap().to_usize_list("hidden_layer_sizes").unwrap(),
            vec![64, 32]
        );
    }

    #[test]
    fn test_conversions_reject_wrong_types() {
        assert!(ParamValue::from("abc").to_f64("alpha").is_err());
        assert!(ParamValue::Int(-3).to_usize("n").is_err());
        assert!(ParamValue::Float(2.5).to_usize("n").is_err());
        assert_eq!(ParamValue::Float(4.0).to_usize("n").unwrap(), 4);
    }

    #[test]
    fn test_grid_combinations_order() {
        let grid = ParamGrid::new()
            .with("b", vec![1i64, 2])
            .with("a", vec![0.1, 0.2, 0.3]);

        assert_eq!(grid.n_combinations(), 6);
        let combos = grid.combinations().unwrap();
        assert_eq!(combos.len(), 6);

        // "a" sorts first, so "b" varies fastest
        assert_eq!(combos[0].get("a"), Some(&ParamValue::Float(0.1)));
        assert_eq!(combos[0].get("b"), Some(&ParamValue::Int(1)));
        assert_eq!(combos[1].get("a"), Some(&ParamValue::Float(0.1)));
        assert_eq!(combos[1].get("b"), Some(&ParamValue::Int(2)));
        assert_eq!(combos[2].get("a"), Some(&ParamValue::Float(0.2)));
    }

    #[test]
    fn test_grid_empty_candidates_rejected() {
        let mut grid = ParamGrid::new();
        grid.insert("alpha", Vec::new());
        assert!(matches!(grid.combinations(), Err(RunnerError::ConfigError(_))));
    }

    #[test]
    fn test_display() {
        let params = HyperParams::new().with("alpha", 0.5).with("fit_intercept", true);
        assert_eq!(params.to_string(), "{'alpha': 0.5, 'fit_intercept': true}");
    }
}
