//! Labeled numeric feature table.
//!
//! `FeatureFrame` is what the preprocessing plan emits and what every frame
//! estimator consumes: a dense `f64` matrix plus one label per column. Labels
//! survive preprocessing so downstream steps can check they were handed the
//! same feature layout they were fit on.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("frame has {labels} column labels but {columns} value columns")]
    ShapeMismatch { labels: usize, columns: usize },

    #[error("duplicate column label '{0}'")]
    DuplicateLabel(String),

    #[error("row index {index} out of bounds for frame with {rows} rows")]
    RowOutOfBounds { index: usize, rows: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureFrame {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self, FrameError> {
        if columns.len() != values.ncols() {
            return Err(FrameError::ShapeMismatch {
                labels: columns.len(),
                columns: values.ncols(),
            });
        }
        let mut seen = std::collections::HashSet::with_capacity(columns.len());
        for label in &columns {
            if !seen.insert(label.as_str()) {
                return Err(FrameError::DuplicateLabel(label.clone()));
            }
        }
        Ok(Self { columns, values })
    }

    /// Positional labels `x0..x{n-1}` for a bare matrix.
    pub fn positional(values: Array2<f64>) -> Self {
        let columns = (0..values.ncols()).map(|i| format!("x{i}")).collect();
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn into_array(self) -> Array2<f64> {
        self.values
    }

    /// New frame holding the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self, FrameError> {
        if let Some(&index) = rows.iter().find(|&&r| r >= self.n_rows()) {
            return Err(FrameError::RowOutOfBounds {
                index,
                rows: self.n_rows(),
            });
        }
        Ok(Self {
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), rows),
        })
    }
}
