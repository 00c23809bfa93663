//! Named numeric tables

use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// A numeric table with named columns. Row positions are the row identity used
/// by fold bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl Frame {
    /// Create a frame from column names and a row-major value matrix
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(RunnerError::ShapeError {
                expected: format!("{} columns", columns.len()),
                actual: format!("{} columns", values.ncols()),
            });
        }
        Ok(Self { columns, values })
    }

    /// Create a frame with generated column names `x0, x1, ...`
    pub fn from_array(values: Array2<f64>) -> Self {
        let columns = (0..values.ncols()).map(|i| format!("x{}", i)).collect();
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| RunnerError::FeatureNotFound(name.to_string()))
    }

    /// A single column by name
    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        let idx = self.column_index(name)?;
        Ok(self.values.column(idx))
    }

    /// Rows at the given positions, in the given order
    pub fn take_rows(&self, positions: &[usize]) -> Frame {
        Frame {
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), positions),
        }
    }

    /// Rows where `predicate` holds for the named column, with their positions
    pub fn filter_rows<F>(&self, column: &str, predicate: F) -> Result<(Frame, Vec<usize>)>
    where
        F: Fn(f64) -> bool,
    {
        let col = self.column(column)?;
        let positions: Vec<usize> = col
            .iter()
            .enumerate()
            .filter(|(_, &v)| predicate(v))
            .map(|(i, _)| i)
            .collect();
        Ok((self.take_rows(&positions), positions))
    }
}

/// Gather target values at the given positions
pub fn take_targets(y: &Array1<f64>, positions: &[usize]) -> Array1<f64> {
    y.select(Axis(0), positions)
}
