//! Evaluation metrics
//!
//! Three metrics are supported: exact-match accuracy, multi-class log loss and
//! mean absolute error. Predictions are `(n, k)` matrices; a regressor's output is
//! the `(n, 1)` column vector produced by the runner.

mod reporter;

pub use reporter::{ConsoleReporter, MetricReporter, RecordingReporter};

use crate::error::{Result, RunnerError};
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Probabilities are clipped into `[EPS, 1 - EPS]` before taking logs
const LOG_LOSS_EPS: f64 = 1e-15;

/// Supported evaluation metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Accuracy,
    LogLoss,
    Mae,
}

impl Metric {
    /// Identifier used on the command line and in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::LogLoss => "logloss",
            Metric::Mae => "mae",
        }
    }

    /// Label used in report lines
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::LogLoss => "logloss",
            Metric::Mae => "mean absolute error",
        }
    }

    /// Whether larger values are better
    pub fn greater_is_better(&self) -> bool {
        matches!(self, Metric::Accuracy)
    }

    /// Raw metric value
    pub fn compute(&self, y_true: &Array1<f64>, y_pred: ArrayView2<'_, f64>) -> Result<f64> {
        match self {
            Metric::Accuracy => accuracy(y_true, y_pred),
            Metric::LogLoss => log_loss(y_true, y_pred),
            Metric::Mae => mean_absolute_error(y_true, y_pred),
        }
    }

    /// Metric value in greater-is-better form, used to rank grid candidates
    pub fn score(&self, y_true: &Array1<f64>, y_pred: ArrayView2<'_, f64>) -> Result<f64> {
        let value = self.compute(y_true, y_pred)?;
        Ok(if self.greater_is_better() { value } else { -value })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accuracy" => Ok(Metric::Accuracy),
            "logloss" => Ok(Metric::LogLoss),
            "mae" => Ok(Metric::Mae),
            other => Err(RunnerError::UnsupportedMetric(other.to_string())),
        }
    }
}

fn check_lengths(y_true: &Array1<f64>, y_pred: &ArrayView2<'_, f64>) -> Result<()> {
    if y_true.is_empty() {
        return Err(RunnerError::ValidationError(
            "cannot evaluate an empty prediction set".to_string(),
        ));
    }
    if y_true.len() != y_pred.nrows() {
        return Err(RunnerError::length_mismatch(y_true.len(), y_pred.nrows()));
    }
    if y_pred.ncols() == 0 {
        return Err(RunnerError::ShapeError {
            expected: "at least one prediction column".to_string(),
            actual: "0 columns".to_string(),
        });
    }
    Ok(())
}

/// Fraction of rows whose first prediction column equals the true value exactly
pub fn accuracy(y_true: &Array1<f64>, y_pred: ArrayView2<'_, f64>) -> Result<f64> {
    check_lengths(y_true, &y_pred)?;
    let hits = y_true
        .iter()
        .zip(y_pred.column(0).iter())
        .filter(|(t, p)| t == p)
        .count();
    Ok(hits as f64 / y_true.len() as f64)
}

/// Mean absolute difference against the first prediction column
pub fn mean_absolute_error(y_true: &Array1<f64>, y_pred: ArrayView2<'_, f64>) -> Result<f64> {
    check_lengths(y_true, &y_pred)?;
    let total: f64 = y_true
        .iter()
        .zip(y_pred.column(0).iter())
        .map(|(t, p)| (t - p).abs())
        .sum();
    Ok(total / y_true.len() as f64)
}

/// Cross-entropy of the one-hot encoded labels against predicted probabilities.
///
/// Labels are encoded over their sorted unique values. `y_pred` has one column
/// per class, or a single column read as the positive-class probability when
/// there are two classes. Rows are clipped and renormalized before the log.
pub fn log_loss(y_true: &Array1<f64>, y_pred: ArrayView2<'_, f64>) -> Result<f64> {
    check_lengths(y_true, &y_pred)?;

    let mut classes: Vec<f64> = y_true.to_vec();
    classes.sort_by(|a, b| a.total_cmp(b));
    classes.dedup();

    if classes.len() < 2 {
        return Err(RunnerError::ValidationError(format!(
            "log loss needs at least two classes in y_true, got {}",
            classes.len()
        )));
    }

    let n_classes = classes.len();
    let binary_column = n_classes == 2 && y_pred.ncols() == 1;
    if !binary_column && y_pred.ncols() != n_classes {
        return Err(RunnerError::ShapeError {
            expected: format!("{} probability columns", n_classes),
            actual: format!("{} columns", y_pred.ncols()),
        });
    }

    let mut total = 0.0;
    for (i, &label) in y_true.iter().enumerate() {
        let probs: Vec<f64> = if binary_column {
            let p = y_pred[[i, 0]];
            vec![1.0 - p, p]
        } else {
            y_pred.row(i).to_vec()
        };

        let clipped: Vec<f64> = probs
            .iter()
            .map(|p| p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS))
            .collect();
        let row_sum: f64 = clipped.iter().sum();

        let class_idx = classes
            .iter()
            .position(|&c| c == label)
            .ok_or_else(|| RunnerError::ComputationError(format!("unknown label {}", label)))?;
        total -= (clipped[class_idx] / row_sum).ln();
    }

    Ok(total / y_true.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn column(values: &[f64]) -> Array2<f64> {
        Array2::from_shape_vec((values.len(), 1), values.to_vec()).unwrap()
    }

    #[test]
    fn test_mae() {
        let y_true = array![1.0, 2.0, 3.0];
        let y_pred = column(&[1.0, 2.0, 5.0]);
        let value = Metric::Mae.compute(&y_true, y_pred.view()).unwrap();
        assert!((value - 2.0 / 3.0).abs() < 1e-12);
        assert!((Metric::Mae.score(&y_true, y_pred.view()).unwrap() + 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy() {
        let y_true = array![0.0, 1.0, 1.0, 0.0];
        let y_pred = column(&[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(accuracy(&y_true, y_pred.view()).unwrap(), 0.75);
    }

    #[test]
    fn test_log_loss_binary_column() {
        let y_true = array![0.0, 1.0];
        let y_pred = column(&[0.2, 0.7]);
        let expected = -((0.8f64).ln() + (0.7f64).ln()) / 2.0;
        assert!((log_loss(&y_true, y_pred.view()).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_log_loss_multiclass_and_clipping() {
        let y_true = array![2.0, 0.0, 1.0];
        let y_pred = array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let value = log_loss(&y_true, y_pred.view()).unwrap();
        assert!(value.is_finite());
        assert!(value < 1e-10);

        let wrong = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let value = log_loss(&y_true, wrong.view()).unwrap();
        assert!(value.is_finite());
        assert!(value > 30.0);
    }

    #[test]
    fn test_log_loss_column_mismatch() {
        let y_true = array![0.0, 1.0, 2.0];
        let y_pred = column(&[0.1, 0.2, 0.3]);
        assert!(matches!(
            log_loss(&y_true, y_pred.view()),
            Err(RunnerError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("mae".parse::<Metric>().unwrap(), Metric::Mae);
        assert_eq!("logloss".parse::<Metric>().unwrap(), Metric::LogLoss);
        assert!(matches!(
            "rmse".parse::<Metric>(),
            Err(RunnerError::UnsupportedMetric(_))
        ));
        assert_eq!(Metric::Mae.label(), "mean absolute error");
    }

    #[test]
    fn test_length_mismatch() {
        let y_true = array![1.0, 2.0];
        let y_pred = column(&[1.0]);
        assert!(mean_absolute_error(&y_true, y_pred.view()).is_err());
    }
}
