//! Prediction output aligned to source rows

use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Predictions for a set of source rows, one named column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionFrame {
    index: Vec<usize>,
    column: String,
    values: Array1<f64>,
}

impl PredictionFrame {
    pub fn new(index: Vec<usize>, column: impl Into<String>, values: Array1<f64>) -> Result<Self> {
        if index.len() != values.len() {
            return Err(RunnerError::ShapeError {
                expected: format!("{} predictions", index.len()),
                actual: format!("{} predictions", values.len()),
            });
        }
        Ok(Self {
            index,
            column: column.into(),
            values,
        })
    }

    /// An empty frame that fold outputs are appended to
    pub fn empty(column: impl Into<String>) -> Self {
        Self {
            index: Vec::new(),
            column: column.into(),
            values: Array1::zeros(0),
        }
    }

    /// Column name for a model's prediction column (`0_<model>`)
    pub fn column_name(model: &str) -> String {
        format!("0_{}", model)
    }

    pub fn index(&self) -> &[usize] {
        &self.index
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Append predictions for more rows
    pub fn append(&mut self, index: &[usize], values: &Array1<f64>) -> Result<()> {
        if index.len() != values.len() {
            return Err(RunnerError::ShapeError {
                expected: format!("{} predictions", index.len()),
                actual: format!("{} predictions", values.len()),
            });
        }
        self.index.extend_from_slice(index);
        let mut merged = self.values.to_vec();
        merged.extend(values.iter().copied());
        self.values = Array1::from_vec(merged);
        Ok(())
    }

    /// Reorder rows by ascending source index
    pub fn sort_index(&mut self) {
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by_key(|&i| self.index[i]);
        self.index = order.iter().map(|&i| self.index[i]).collect();
        self.values = order.iter().map(|&i| self.values[i]).collect();
    }

    /// Predictions as an `(n, 1)` column vector
    pub fn to_column_vector(&self) -> Array2<f64> {
        self.values.clone().insert_axis(ndarray::Axis(1))
    }

    /// Convert to a two-column DataFrame (`index`, prediction column)
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let index: Vec<u64> = self.index.iter().map(|&i| i as u64).collect();
        let values: Vec<f64> = self.values.to_vec();
        let df = DataFrame::new(vec![
            Column::new("index".into(), index),
            Column::new(self.column.as_str().into(), values),
        ])?;
        Ok(df)
    }

    /// Write the frame as CSV
    pub fn save_csv(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = std::fs::File::create(path)?;
        CsvWriter::new(&mut file).finish(&mut df)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_append_and_sort() {
        let mut frame = PredictionFrame::empty(PredictionFrame::column_name("rf"));
        frame.append(&[3, 4], &array![3.5, 4.5]).unwrap();
        frame.append(&[0, 1, 2], &array![0.5, 1.5, 2.5]).unwrap();
        frame.sort_index();

        assert_eq!(frame.column(), "0_rf");
        assert_eq!(frame.index(), &[0, 1, 2, 3, 4]);
        assert_eq!(frame.values().to_vec(), vec![0.5, 1.5, 2.5, 3.5, 4.5]);
        assert_eq!(frame.to_column_vector().dim(), (5, 1));
    }

    #[test]
    fn test_length_mismatch() {
        let mut frame = PredictionFrame::empty("p");
        assert!(frame.append(&[0, 1], &array![1.0]).is_err());
        assert!(PredictionFrame::new(vec![0], "p", array![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_to_dataframe() {
        let frame = PredictionFrame::new(vec![0, 1], "0_knn", array![1.0, 2.0]).unwrap();
        let df = frame.to_dataframe().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 2);
    }
}
