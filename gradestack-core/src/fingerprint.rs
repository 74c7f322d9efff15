//! Content fingerprints.
//!
//! - `DatasetHash`: BLAKE3 over column names, dtypes and every value.
//! - `FitFingerprint`: identity of a (column plan, input data) pair; the key
//!   under which a fitted preprocessing step is cached.

use crate::preprocess::ColumnPlan;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl DatasetHash {
    pub fn of(df: &DataFrame) -> PolarsResult<Self> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(df.height() as u64).to_le_bytes());
        for column in df.get_columns() {
            hasher.update(column.name().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(column.dtype().to_string().as_bytes());
            hasher.update(b"\x1e");
            hash_values(&mut hasher, column)?;
        }
        Ok(Self(hasher.finalize().to_hex().to_string()))
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hash_values(hasher: &mut blake3::Hasher, column: &Column) -> PolarsResult<()> {
    let dtype = column.dtype();
    if matches!(dtype, DataType::String) {
        for v in column.str()?.into_iter() {
            match v {
                Some(s) => {
                    hasher.update(&(s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
                None => {
                    hasher.update(&u64::MAX.to_le_bytes());
                }
            }
        }
    } else if dtype.is_temporal() || dtype.is_signed_integer() {
        let ints = column.cast(&DataType::Int64)?;
        for v in ints.i64()?.into_iter() {
            hasher.update(&[v.is_some() as u8]);
            hasher.update(&v.unwrap_or_default().to_le_bytes());
        }
    } else if dtype.is_unsigned_integer() {
        let ints = column.cast(&DataType::UInt64)?;
        for v in ints.u64()?.into_iter() {
            hasher.update(&[v.is_some() as u8]);
            hasher.update(&v.unwrap_or_default().to_le_bytes());
        }
    } else {
        let floats = column.cast(&DataType::Float64)?;
        for v in floats.f64()?.into_iter() {
            hasher.update(&[v.is_some() as u8]);
            hasher.update(&v.unwrap_or_default().to_bits().to_le_bytes());
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FitFingerprint(pub String);

impl FitFingerprint {
    pub fn new(plan: &ColumnPlan, data: &DatasetHash) -> Self {
        // ColumnPlan holds only strings and a unit enum, so serialization
        // cannot fail; the Debug fallback keeps this total.
        let plan_json = serde_json::to_string(plan).unwrap_or_else(|_| format!("{plan:?}"));
        let mut hasher = blake3::Hasher::new();
        hasher.update(plan_json.as_bytes());
        hasher.update(b"\x1d");
        hasher.update(data.0.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn of(plan: &ColumnPlan, df: &DataFrame) -> PolarsResult<Self> {
        Ok(Self::new(plan, &DatasetHash::of(df)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FitFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
