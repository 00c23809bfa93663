//! Per-row sample weighting applied before fitting

use crate::data::Frame;
use crate::error::{Result, RunnerError};
use ndarray::Array1;
use std::fmt;

/// Computes one weight per training row
pub trait SampleWeighting: Send + Sync + fmt::Debug {
    fn weights(&self, x: &Frame) -> Result<Array1<f64>>;
}

/// Down-weights rows whose month column falls below a threshold
#[derive(Debug, Clone, PartialEq)]
pub struct MonthThreshold {
    pub column: String,
    /// Rows with a month strictly below this get `low_weight`
    pub threshold: f64,
    pub low_weight: f64,
}

impl Default for MonthThreshold {
    fn default() -> Self {
        Self {
            column: "month".to_string(),
            threshold: 10.0,
            low_weight: 0.1,
        }
    }
}

impl MonthThreshold {
    pub fn new(column: impl Into<String>, threshold: f64, low_weight: f64) -> Result<Self> {
        if !(low_weight.is_finite() && low_weight >= 0.0) {
            return Err(RunnerError::invalid_param("low_weight", low_weight, "must be non-negative"));
        }
        Ok(Self {
            column: column.into(),
            threshold,
            low_weight,
        })
    }
}

impl SampleWeighting for MonthThreshold {
    fn weights(&self, x: &Frame) -> Result<Array1<f64>> {
        let months = x.column(&self.column)?;
        Ok(months.mapv(|m| if m < self.threshold { self.low_weight } else { 1.0 }))
    }
}

/// Every row weighs 1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Uniform;

impl SampleWeighting for Uniform {
    fn weights(&self, x: &Frame) -> Result<Array1<f64>> {
        Ok(Array1::ones(x.nrows()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn frame() -> Frame {
        Frame::new(
            vec!["f".to_string(), "month".to_string()],
            array![[1.0, 3.0], [2.0, 9.0], [3.0, 10.0], [4.0, 12.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_month_threshold() {
        let w = MonthThreshold::default().weights(&frame()).unwrap();
        assert_eq!(w, array![0.1, 0.1, 1.0, 1.0]);
    }

    #[test]
    fn test_missing_month_column() {
        let x = Frame::from_array(array![[1.0], [2.0]]);
        assert!(matches!(
            MonthThreshold::default().weights(&x),
            Err(RunnerError::FeatureNotFound(_))
        ));
    }

    #[test]
    fn test_uniform() {
        assert_eq!(Uniform.weights(&frame()).unwrap(), Array1::<f64>::ones(4));
    }

    #[test]
    fn test_negative_low_weight_rejected() {
        assert!(MonthThreshold::new("month", 10.0, -1.0).is_err());
    }
}
