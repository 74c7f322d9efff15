//! Time-split partitioning and the ordinal grade scale.
//!
//! The inspection dataset carries one timestamp column and one target column
//! with fixed names. `split_by_cutoff` uses the timestamp exactly once to
//! route every row to train (`< cutoff`) or test (`>= cutoff`), drops both
//! bookkeeping columns from the feature views, and returns each side sorted
//! by time so downstream forward-chaining folds can slice contiguously.

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TIMESTAMP_COLUMN: &str = "inspection_date";
pub const TARGET_COLUMN: &str = "grade";

#[derive(Debug, Error)]
pub enum DataError {
    #[error("dataset is missing required column '{0}'")]
    MissingColumn(String),

    #[error("column '{column}' has dtype {dtype}, expected a date or datetime")]
    NotTemporal { column: String, dtype: String },

    #[error("column '{column}' contains {count} null values")]
    NullValues { column: String, count: usize },

    #[error("{side} partition is empty for cutoff {cutoff}")]
    EmptyPartition { side: &'static str, cutoff: String },

    #[error("grade '{0}' is not on the fitted grade scale")]
    UnknownGrade(String),

    #[error("grade scale cannot be built from an empty target")]
    EmptyTarget,

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// One side of a time split. Rows are in ascending timestamp order and the
/// three members are row-aligned.
#[derive(Debug, Clone)]
pub struct Partition {
    pub features: DataFrame,
    pub target: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamps: Vec<i64>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TimeSplit {
    pub train: Partition,
    pub test: Partition,
    pub cutoff: DateTime<Utc>,
}

/// Split `df` into train (`ts < cutoff`) and test (`ts >= cutoff`).
pub fn split_by_cutoff(df: &DataFrame, cutoff: DateTime<Utc>) -> Result<TimeSplit, DataError> {
    let timestamps = timestamp_millis(df)?;
    let target = target_labels(df)?;
    let features = df.drop(TIMESTAMP_COLUMN)?.drop(TARGET_COLUMN)?;

    let cut = cutoff.timestamp_millis();
    let (mut train_rows, mut test_rows): (Vec<usize>, Vec<usize>) =
        (0..df.height()).partition(|&i| timestamps[i] < cut);
    // Stable: equal timestamps keep their input order.
    train_rows.sort_by_key(|&i| timestamps[i]);
    test_rows.sort_by_key(|&i| timestamps[i]);

    for (side, rows) in [("train", &train_rows), ("test", &test_rows)] {
        if rows.is_empty() {
            return Err(DataError::EmptyPartition {
                side,
                cutoff: cutoff.to_rfc3339(),
            });
        }
    }

    let build = |rows: &[usize]| -> Result<Partition, DataError> {
        Ok(Partition {
            features: take_rows(&features, rows)?,
            target: rows.iter().map(|&i| target[i].clone()).collect(),
            timestamps: rows.iter().map(|&i| timestamps[i]).collect(),
        })
    };

    tracing::debug!(
        cutoff = %cutoff,
        train = train_rows.len(),
        test = test_rows.len(),
        "time split"
    );

    Ok(TimeSplit {
        train: build(&train_rows)?,
        test: build(&test_rows)?,
        cutoff,
    })
}

/// Timestamp column as epoch milliseconds. Accepts `Date` and `Datetime`.
pub fn timestamp_millis(df: &DataFrame) -> Result<Vec<i64>, DataError> {
    let column = required_column(df, TIMESTAMP_COLUMN)?;
    if !column.dtype().is_temporal() || matches!(column.dtype(), DataType::Time | DataType::Duration(_)) {
        return Err(DataError::NotTemporal {
            column: TIMESTAMP_COLUMN.to_string(),
            dtype: column.dtype().to_string(),
        });
    }
    reject_nulls(column)?;
    let millis = column
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .cast(&DataType::Int64)?;
    Ok(millis.i64()?.into_iter().flatten().collect())
}

/// Target column rendered as strings, whatever its stored dtype.
pub fn target_labels(df: &DataFrame) -> Result<Vec<String>, DataError> {
    let column = required_column(df, TARGET_COLUMN)?;
    reject_nulls(column)?;
    let as_text = column.cast(&DataType::String)?;
    Ok(as_text
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect())
}

/// Gather rows by index, in the given order.
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame, DataError> {
    let idx: Vec<IdxSize> = rows.iter().map(|&r| r as IdxSize).collect();
    Ok(df.take(&IdxCa::from_vec("rows".into(), idx))?)
}

/// Contiguous row window `[start, start + len)`.
pub fn slice_rows(df: &DataFrame, start: usize, len: usize) -> DataFrame {
    df.slice(start as i64, len)
}

fn required_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, DataError> {
    df.column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))
}

fn reject_nulls(column: &Column) -> Result<(), DataError> {
    let count = column.null_count();
    if count > 0 {
        return Err(DataError::NullValues {
            column: column.name().to_string(),
            count,
        });
    }
    Ok(())
}

/// Ordered set of grade labels, mapping each to an ordinal code `0..len`.
///
/// Labels sort numerically when every label parses as a number, otherwise
/// lexically (so `A < B < C`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeScale {
    labels: Vec<String>,
}

impl GradeScale {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Result<Self, DataError> {
        let mut unique: Vec<String> = labels.iter().map(|s| s.as_ref().to_string()).collect();
        if unique.is_empty() {
            return Err(DataError::EmptyTarget);
        }
        unique.sort();
        unique.dedup();

        let numeric: Option<Vec<f64>> = unique.iter().map(|s| s.trim().parse::<f64>().ok()).collect();
        if let Some(keys) = numeric {
            let mut paired: Vec<(f64, String)> = keys.into_iter().zip(unique).collect();
            paired.sort_by(|a, b| a.0.total_cmp(&b.0));
            unique = paired.into_iter().map(|(_, s)| s).collect();
        }
        Ok(Self { labels: unique })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn encode_all<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>, DataError> {
        labels
            .iter()
            .map(|l| {
                self.encode(l.as_ref())
                    .ok_or_else(|| DataError::UnknownGrade(l.as_ref().to_string()))
            })
            .collect()
    }

    pub fn decode(&self, code: usize) -> Option<&str> {
        self.labels.get(code).map(String::as_str)
    }
}
