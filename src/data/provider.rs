//! Feature providers: train/target/test tables handed to the runner

use super::frame::{take_targets, Frame};
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Source of the tables a runner trains and predicts on.
///
/// `train`/`target` are the full labelled set; `x_train`/`y_train` and
/// `x_test`/`y_test` are a labelled split of it used for hold-out evaluation;
/// `test` is the unlabelled set, optionally narrowed to one month.
pub trait FeatureProvider {
    fn train(&self) -> &Frame;
    fn target(&self) -> &Array1<f64>;
    fn x_train(&self) -> &Frame;
    fn y_train(&self) -> &Array1<f64>;
    fn x_test(&self) -> &Frame;
    fn y_test(&self) -> &Array1<f64>;

    /// The unlabelled test rows under the current month filter, with their
    /// positions in the full test table
    fn test(&self) -> Result<(Frame, Vec<usize>)>;

    /// Narrow `test` to one month, or clear the filter with `None`
    fn assign_test_month(&mut self, month: Option<u32>);
}

/// In-memory feature provider, usually loaded from CSV files
#[derive(Debug, Clone)]
pub struct FeatureSet {
    train: Frame,
    target: Array1<f64>,
    x_train: Frame,
    y_train: Array1<f64>,
    x_test: Frame,
    y_test: Array1<f64>,
    test: Option<Frame>,
    month_column: String,
    current_month: Option<u32>,
}

impl FeatureSet {
    /// Build a provider. The last `holdout` fraction of the training rows
    /// becomes `x_test`/`y_test`.
    pub fn new(train: Frame, target: Array1<f64>, test: Option<Frame>, holdout: f64) -> Result<Self> {
        if train.nrows() != target.len() {
            return Err(RunnerError::length_mismatch(train.nrows(), target.len()));
        }
        if !(0.0..1.0).contains(&holdout) {
            return Err(RunnerError::invalid_param("holdout", holdout, "must be in [0, 1)"));
        }
        if let Some(test) = &test {
            if test.columns() != train.columns() {
                return Err(RunnerError::DataError(
                    "test columns do not match training columns".to_string(),
                ));
            }
        }

        let n = train.nrows();
        let n_holdout = (n as f64 * holdout) as usize;
        let n_fit = n - n_holdout;

        let fit_rows: Vec<usize> = (0..n_fit).collect();
        let holdout_rows: Vec<usize> = (n_fit..n).collect();

        Ok(Self {
            x_train: train.take_rows(&fit_rows),
            y_train: take_targets(&target, &fit_rows),
            x_test: train.take_rows(&holdout_rows),
            y_test: take_targets(&target, &holdout_rows),
            train,
            target,
            test,
            month_column: "month".to_string(),
            current_month: None,
        })
    }

    /// Load the training table (and optionally a test table) from CSV
    pub fn from_csv(
        train_path: impl AsRef<Path>,
        test_path: Option<&Path>,
        target_column: &str,
        holdout: f64,
    ) -> Result<Self> {
        let train_df = load_csv(train_path.as_ref())?;
        let target = target_from_dataframe(&train_df, target_column)?;
        let feature_cols: Vec<String> = train_df
            .get_column_names()
            .into_iter()
            .filter(|name| name.as_str() != target_column)
            .map(|s| s.to_string())
            .collect();
        let train = frame_from_dataframe(&train_df, &feature_cols)?;

        let test = match test_path {
            Some(path) => {
                let test_df = load_csv(path)?;
                Some(frame_from_dataframe(&test_df, &feature_cols)?)
            }
            None => None,
        };

        info!(
            rows = train.nrows(),
            features = train.ncols(),
            test_rows = test.as_ref().map(|t| t.nrows()).unwrap_or(0),
            "Loaded feature set"
        );
        Self::new(train, target, test, holdout)
    }

    /// Builder method to name the month column used by the test filter
    pub fn with_month_column(mut self, column: impl Into<String>) -> Self {
        self.month_column = column.into();
        self
    }

    pub fn current_month(&self) -> Option<u32> {
        self.current_month
    }
}

impl FeatureProvider for FeatureSet {
    fn train(&self) -> &Frame {
        &self.train
    }

    fn target(&self) -> &Array1<f64> {
        &self.target
    }

    fn x_train(&self) -> &Frame {
        &self.x_train
    }

    fn y_train(&self) -> &Array1<f64> {
        &self.y_train
    }

    fn x_test(&self) -> &Frame {
        &self.x_test
    }

    fn y_test(&self) -> &Array1<f64> {
        &self.y_test
    }

    fn test(&self) -> Result<(Frame, Vec<usize>)> {
        let test = self
            .test
            .as_ref()
            .ok_or_else(|| RunnerError::DataError("no test set loaded".to_string()))?;

        match self.current_month {
            Some(month) => {
                let month = month as f64;
                test.filter_rows(&self.month_column, |v| v == month)
            }
            None => Ok((test.clone(), (0..test.nrows()).collect())),
        }
    }

    fn assign_test_month(&mut self, month: Option<u32>) {
        debug!(month = ?month, "Assigning test month");
        self.current_month = month;
    }
}

/// Read a CSV file with a header row
pub fn load_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(1000))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

fn column_as_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df
        .column(name)
        .map_err(|_| RunnerError::FeatureNotFound(name.to_string()))?;
    let series_f64 = series
        .cast(&DataType::Float64)
        .map_err(|e| RunnerError::DataError(e.to_string()))?;
    let values = series_f64
        .f64()
        .map_err(|e| RunnerError::DataError(e.to_string()))?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

/// Extract the target column as a vector
pub fn target_from_dataframe(df: &DataFrame, target_column: &str) -> Result<Array1<f64>> {
    Ok(Array1::from_vec(column_as_f64(df, target_column)?))
}

/// Extract named columns into a [`Frame`]
pub fn frame_from_dataframe(df: &DataFrame, col_names: &[String]) -> Result<Frame> {
    let n_rows = df.height();
    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|name| column_as_f64(df, name))
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let values = Array2::from_shape_fn((n_rows, col_names.len()), |(r, c)| col_data[c][r]);
    Frame::new(col_names.to_vec(), values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn feature_set() -> FeatureSet {
        let train = Frame::new(
            vec!["month".to_string(), "x".to_string()],
            array![[1.0, 0.0], [2.0, 1.0], [3.0, 2.0], [4.0, 3.0], [5.0, 4.0]],
        )
        .unwrap();
        let target = array![0.0, 1.0, 2.0, 3.0, 4.0];
        let test = Frame::new(
            vec!["month".to_string(), "x".to_string()],
            array![[11.0, 5.0], [12.0, 6.0], [11.0, 7.0]],
        )
        .unwrap();
        FeatureSet::new(train, target, Some(test), 0.4).unwrap()
    }

    #[test]
    fn test_holdout_split() {
        let fs = feature_set();
        assert_eq!(fs.x_train().nrows(), 3);
        assert_eq!(fs.x_test().nrows(), 2);
        assert_eq!(fs.y_test().to_vec(), vec![3.0, 4.0]);
        assert_eq!(fs.train().nrows(), 5);
    }

    #[test]
    fn test_month_filter() {
        let mut fs = feature_set();
        let (all, positions) = fs.test().unwrap();
        assert_eq!(all.nrows(), 3);
        assert_eq!(positions, vec![0, 1, 2]);

        fs.assign_test_month(Some(11));
        let (month_rows, positions) = fs.test().unwrap();
        assert_eq!(month_rows.nrows(), 2);
        assert_eq!(positions, vec![0, 2]);

        fs.assign_test_month(None);
        assert_eq!(fs.test().unwrap().0.nrows(), 3);
    }

    #[test]
    fn test_target_length_checked() {
        let train = Frame::from_array(array![[1.0], [2.0]]);
        let result = FeatureSet::new(train, array![1.0], None, 0.0);
        assert!(matches!(result, Err(RunnerError::ShapeError { .. })));
    }

    #[test]
    fn test_missing_test_set() {
        let train = Frame::from_array(array![[1.0], [2.0]]);
        let fs = FeatureSet::new(train, array![1.0, 2.0], None, 0.0).unwrap();
        assert!(fs.test().is_err());
    }
}
