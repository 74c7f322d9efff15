//! Column-wise preprocessing plan.
//!
//! A `ColumnPlan` names three disjoint column groups and is pure
//! configuration: cloning one always yields a fresh, unfit plan. Fitting it
//! against training features produces a `FittedColumnPlan` holding the learned
//! statistics, which then turns any frame with the same columns into a
//! labeled `FeatureFrame`:
//!
//! - numeric columns are standardized (population mean and std from the fit
//!   data; a zero std leaves the centered value unscaled),
//! - cyclical columns pass through untouched,
//! - categorical columns are one-hot encoded over the categories seen at fit
//!   time; a category never seen maps to an all-zero block.

use crate::frame::{FeatureFrame, FrameError};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("column '{0}' is assigned to more than one column group")]
    OverlappingGroups(String),

    #[error("column '{0}' is not assigned to any column group")]
    UnassignedColumn(String),

    #[error("frame is missing planned column '{0}'")]
    MissingColumn(String),

    #[error("column '{column}' contains {count} null values")]
    NullValues { column: String, count: usize },

    #[error("column '{column}' has {count} values that failed to convert")]
    Unparseable { column: String, count: usize },

    #[error("one-hot label '{0}' is produced by two column/category pairs; use positional labels")]
    LabelCollision(String),

    #[error("cannot fit a column plan on an empty frame")]
    EmptyFrame,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// How output columns are labeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputLabels {
    /// `num__age`, `cyc__month_sin`, `cat__borough_QUEENS`.
    #[default]
    Verbose,
    /// `x0`, `x1`, ...
    Positional,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ColumnPlan {
    pub numbers: Vec<String>,
    pub cycles: Vec<String>,
    pub categories: Vec<String>,
    #[serde(default)]
    pub labels: OutputLabels,
}

impl ColumnPlan {
    pub fn new(numbers: Vec<String>, cycles: Vec<String>, categories: Vec<String>) -> Self {
        Self {
            numbers,
            cycles,
            categories,
            labels: OutputLabels::Verbose,
        }
    }

    pub fn with_labels(mut self, labels: OutputLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Every planned column, group by group.
    pub fn all_columns(&self) -> impl Iterator<Item = &String> {
        self.numbers
            .iter()
            .chain(self.cycles.iter())
            .chain(self.categories.iter())
    }

    /// Groups must not share a column.
    pub fn validate(&self) -> Result<(), PreprocessError> {
        let mut seen = HashSet::new();
        for name in self.all_columns() {
            if !seen.insert(name.as_str()) {
                return Err(PreprocessError::OverlappingGroups(name.clone()));
            }
        }
        Ok(())
    }

    /// Learn scaling statistics and category sets from `df`.
    ///
    /// `df` must hold exactly the planned columns (in any order).
    pub fn fit(&self, df: &DataFrame) -> Result<FittedColumnPlan, PreprocessError> {
        self.validate()?;
        if df.height() == 0 {
            return Err(PreprocessError::EmptyFrame);
        }
        let planned: HashSet<&str> = self.all_columns().map(String::as_str).collect();
        for name in df.get_column_names() {
            if !planned.contains(name.as_str()) {
                return Err(PreprocessError::UnassignedColumn(name.to_string()));
            }
        }

        let mut scalers = Vec::with_capacity(self.numbers.len());
        for name in &self.numbers {
            let values = numeric_values(df, name)?;
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            scalers.push(Scaler {
                column: name.clone(),
                mean,
                scale: if std > 0.0 { std } else { 1.0 },
            });
        }

        for name in &self.cycles {
            numeric_values(df, name)?;
        }

        let mut encoders = Vec::with_capacity(self.categories.len());
        for name in &self.categories {
            let mut levels = category_values(df, name)?;
            levels.sort();
            levels.dedup();
            encoders.push(OneHot {
                column: name.clone(),
                levels,
            });
        }

        let fitted = FittedColumnPlan {
            plan: self.clone(),
            scalers,
            encoders,
        };
        let mut seen = HashSet::new();
        for label in fitted.output_columns() {
            if !seen.insert(label.clone()) {
                return Err(PreprocessError::LabelCollision(label));
            }
        }
        Ok(fitted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Scaler {
    column: String,
    mean: f64,
    scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OneHot {
    column: String,
    levels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedColumnPlan {
    plan: ColumnPlan,
    scalers: Vec<Scaler>,
    encoders: Vec<OneHot>,
}

impl FittedColumnPlan {
    pub fn plan(&self) -> &ColumnPlan {
        &self.plan
    }

    /// Output labels in column order: numeric, cyclical, then one-hot blocks.
    pub fn output_columns(&self) -> Vec<String> {
        let mut verbose: Vec<String> = Vec::new();
        verbose.extend(self.scalers.iter().map(|s| format!("num__{}", s.column)));
        verbose.extend(self.plan.cycles.iter().map(|c| format!("cyc__{c}")));
        for enc in &self.encoders {
            verbose.extend(enc.levels.iter().map(|l| format!("cat__{}_{l}", enc.column)));
        }
        match self.plan.labels {
            OutputLabels::Verbose => verbose,
            OutputLabels::Positional => (0..verbose.len()).map(|i| format!("x{i}")).collect(),
        }
    }

    pub fn transform(&self, df: &DataFrame) -> Result<FeatureFrame, PreprocessError> {
        let columns = self.output_columns();
        let n = df.height();
        let mut out = Array2::<f64>::zeros((n, columns.len()));
        let mut col = 0;

        for s in &self.scalers {
            let values = numeric_values(df, &s.column)?;
            for (row, v) in values.into_iter().enumerate() {
                out[[row, col]] = (v - s.mean) / s.scale;
            }
            col += 1;
        }

        for name in &self.plan.cycles {
            let values = numeric_values(df, name)?;
            for (row, v) in values.into_iter().enumerate() {
                out[[row, col]] = v;
            }
            col += 1;
        }

        for enc in &self.encoders {
            let values = category_values(df, &enc.column)?;
            for (row, v) in values.iter().enumerate() {
                if let Ok(level) = enc.levels.binary_search(v) {
                    out[[row, col + level]] = 1.0;
                }
            }
            col += enc.levels.len();
        }

        Ok(FeatureFrame::new(columns, out)?)
    }
}

fn planned_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, PreprocessError> {
    let column = df
        .column(name)
        .map_err(|_| PreprocessError::MissingColumn(name.to_string()))?;
    let count = column.null_count();
    if count > 0 {
        return Err(PreprocessError::NullValues {
            column: name.to_string(),
            count,
        });
    }
    Ok(column)
}

/// Casting is non-strict, so a cell that fails to convert shows up as a new
/// null. Those are rejected rather than dropped, which would shift rows.
fn cast_planned(df: &DataFrame, name: &str, dtype: &DataType) -> Result<Column, PreprocessError> {
    let column = planned_column(df, name)?.cast(dtype)?;
    let count = column.null_count();
    if count > 0 {
        return Err(PreprocessError::Unparseable {
            column: name.to_string(),
            count,
        });
    }
    Ok(column)
}

fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, PreprocessError> {
    let column = cast_planned(df, name, &DataType::Float64)?;
    Ok(column.f64()?.into_iter().flatten().collect())
}

fn category_values(df: &DataFrame, name: &str) -> Result<Vec<String>, PreprocessError> {
    let column = cast_planned(df, name, &DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> ColumnPlan {
        ColumnPlan::new(
            vec!["age".into()],
            vec!["month_sin".into()],
            vec!["borough".into()],
        )
    }

    fn train_frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("age".into(), vec![1.0, 2.0, 3.0, 4.0]),
            Column::new("month_sin".into(), vec![0.5, -0.5, 0.0, 1.0]),
            Column::new("borough".into(), vec!["QUEENS", "BRONX", "QUEENS", "BROOKLYN"]),
        ])
        .unwrap()
    }

    #[test]
    fn numeric_columns_are_standardized() {
        let fitted = plan().fit(&train_frame()).unwrap();
        let out = fitted.transform(&train_frame()).unwrap();
        let age = out.values().column(0).to_owned();
        let mean = age.sum() / 4.0;
        let var = age.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cyclical_columns_pass_through() {
        let fitted = plan().fit(&train_frame()).unwrap();
        let out = fitted.transform(&train_frame()).unwrap();
        let cyc: Vec<f64> = out.values().column(1).to_vec();
        assert_eq!(cyc, vec![0.5, -0.5, 0.0, 1.0]);
    }

    #[test]
    fn output_groups_are_disjoint_and_labeled() {
        let fitted = plan().fit(&train_frame()).unwrap();
        assert_eq!(
            fitted.output_columns(),
            vec![
                "num__age",
                "cyc__month_sin",
                "cat__borough_BRONX",
                "cat__borough_BROOKLYN",
                "cat__borough_QUEENS",
            ]
        );
    }

    #[test]
    fn unseen_category_encodes_as_zeros() {
        let fitted = plan().fit(&train_frame()).unwrap();
        let unseen = DataFrame::new(vec![
            Column::new("age".into(), vec![2.5]),
            Column::new("month_sin".into(), vec![0.0]),
            Column::new("borough".into(), vec!["STATEN ISLAND"]),
        ])
        .unwrap();
        let out = fitted.transform(&unseen).unwrap();
        let row = out.values().row(0).to_vec();
        assert_eq!(&row[2..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn positional_labels_replace_names() {
        let fitted = plan()
            .with_labels(OutputLabels::Positional)
            .fit(&train_frame())
            .unwrap();
        assert_eq!(fitted.output_columns()[0], "x0");
        assert_eq!(fitted.output_columns().len(), 5);
    }

    #[test]
    fn overlapping_groups_are_rejected() {
        let bad = ColumnPlan::new(vec!["age".into()], vec![], vec!["age".into()]);
        assert!(matches!(
            bad.validate(),
            Err(PreprocessError::OverlappingGroups(c)) if c == "age"
        ));
    }

    #[test]
    fn unplanned_columns_are_rejected() {
        let mut df = train_frame();
        df.with_column(Column::new("extra".into(), vec![0.0; 4]))
            .unwrap();
        assert!(matches!(
            plan().fit(&df),
            Err(PreprocessError::UnassignedColumn(c)) if c == "extra"
        ));
    }

    #[test]
    fn clone_of_a_plan_is_unfit_configuration() {
        let p = plan();
        let _fitted = p.fit(&train_frame()).unwrap();
        assert_eq!(p.clone(), plan());
    }

    #[test]
    fn unparseable_numbers_are_rejected_not_dropped() {
        let p = ColumnPlan::new(vec!["score".into()], vec![], vec![]);
        let df = DataFrame::new(vec![Column::new("score".into(), vec!["1", "oops", "3"])]).unwrap();
        assert!(matches!(
            p.fit(&df),
            Err(PreprocessError::Unparseable { column, count: 1 }) if column == "score"
        ));

        let clean = DataFrame::new(vec![Column::new("score".into(), vec!["1", "2", "3"])]).unwrap();
        let fitted = p.fit(&clean).unwrap();
        assert!(matches!(
            fitted.transform(&df),
            Err(PreprocessError::Unparseable { count: 1, .. })
        ));
    }

    #[test]
    fn numeric_strings_parse_in_row_order() {
        let p = ColumnPlan::new(vec![], vec!["hour".into()], vec![]);
        let df = DataFrame::new(vec![Column::new("hour".into(), vec!["1", "2", "3"])]).unwrap();
        let out = p.fit(&df).unwrap().transform(&df).unwrap();
        assert_eq!(out.values().column(0).to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn colliding_one_hot_labels_fail_at_fit() {
        let p = ColumnPlan::new(vec![], vec![], vec!["a".into(), "a_b".into()]);
        let df = DataFrame::new(vec![
            Column::new("a".into(), vec!["b_c", "x"]),
            Column::new("a_b".into(), vec!["c", "y"]),
        ])
        .unwrap();
        assert!(matches!(
            p.fit(&df),
            Err(PreprocessError::LabelCollision(label)) if label == "cat__a_b_c"
        ));

        let fitted = p.with_labels(OutputLabels::Positional).fit(&df).unwrap();
        let out = fitted.transform(&df).unwrap();
        assert_eq!(out.values().dim(), (2, 4));
    }
}
