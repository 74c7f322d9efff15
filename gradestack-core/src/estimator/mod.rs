//! Estimators and the contract they share.
//!
//! Every base learner and the stacking meta-learner implement `Classifier`:
//! fit on a labeled `FeatureFrame` and ordinal codes, then predict codes or a
//! per-class score matrix whose columns follow `classes()`. Estimators that
//! only understand bare matrices implement `ArrayClassifier` instead and are
//! plugged in through `ArrayAdapter`, the pipeline's `to_array` stage.
//!
//! The three searchable families form a closed sum type: `EstimatorSpec`
//! holds a family's hyperparameters, `Estimator` holds the live model.

pub mod boosted;
pub mod ordinal_logistic;
pub mod random_forest;
pub mod ridge;
pub mod tree;

pub use boosted::{BoostedOrdinal, BoostedParams};
pub use ordinal_logistic::{OrdinalLogistic, OrdinalLogisticParams};
pub use random_forest::{ClassWeight, RandomForest, RandomForestParams};
pub use ridge::RidgeClassifier;

use crate::diagnostics::FitReport;
use crate::frame::FeatureFrame;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("{0} has not been fitted")]
    NotFitted(&'static str),

    #[error("feature layout differs from fit: expected {expected:?}, got {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("expected {expected} feature columns, got {found}")]
    WidthMismatch { expected: usize, found: usize },

    #[error("{rows} feature rows but {labels} target labels")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("linear system is singular")]
    Singular,
}

/// Fit/predict contract over labeled frames.
pub trait Classifier {
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &FeatureFrame, y: &[usize]) -> Result<FitReport, ModelError>;

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<usize>, ModelError>;

    /// One row per sample, one column per entry of `classes()`. Probabilities
    /// for probabilistic models, decision values otherwise.
    fn predict_scores(&self, x: &FeatureFrame) -> Result<Array2<f64>, ModelError>;

    /// Codes seen at fit, ascending. Empty before fit.
    fn classes(&self) -> &[usize];
}

/// Fit/predict contract over bare matrices.
pub trait ArrayClassifier {
    fn name(&self) -> &'static str;

    fn fit_array(&mut self, x: ArrayView2<'_, f64>, y: &[usize]) -> Result<FitReport, ModelError>;

    fn predict_array(&self, x: ArrayView2<'_, f64>) -> Result<Vec<usize>, ModelError>;

    fn predict_scores_array(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError>;

    fn classes(&self) -> &[usize];
}

/// Strips column labels so an `ArrayClassifier` can sit where a
/// `Classifier` is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayAdapter<E> {
    inner: E,
}

impl<E> ArrayAdapter<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: ArrayClassifier> Classifier for ArrayAdapter<E> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn fit(&mut self, x: &FeatureFrame, y: &[usize]) -> Result<FitReport, ModelError> {
        self.inner.fit_array(x.values(), y)
    }

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<usize>, ModelError> {
        self.inner.predict_array(x.values())
    }

    fn predict_scores(&self, x: &FeatureFrame) -> Result<Array2<f64>, ModelError> {
        self.inner.predict_scores_array(x.values())
    }

    fn classes(&self) -> &[usize] {
        self.inner.classes()
    }
}

/// Column labels recorded at fit and enforced at predict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct FeatureNames(Option<Vec<String>>);

impl FeatureNames {
    pub(crate) fn record(&mut self, x: &FeatureFrame) {
        self.0 = Some(x.columns().to_vec());
    }

    pub(crate) fn check(&self, x: &FeatureFrame, model: &'static str) -> Result<(), ModelError> {
        match &self.0 {
            None => Err(ModelError::NotFitted(model)),
            Some(expected) if expected.as_slice() != x.columns() => {
                Err(ModelError::FeatureMismatch {
                    expected: expected.clone(),
                    found: x.columns().to_vec(),
                })
            }
            Some(_) => Ok(()),
        }
    }
}

pub(crate) fn check_training_set(rows: usize, y: &[usize]) -> Result<(), ModelError> {
    if rows != y.len() {
        return Err(ModelError::LengthMismatch {
            rows,
            labels: y.len(),
        });
    }
    if rows == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    Ok(())
}

/// Sorted distinct codes of `y` and each sample's position among them.
pub(crate) fn rank_encode(y: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let mut classes = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    let ranks = y
        .iter()
        .map(|c| classes.binary_search(c).unwrap_or(0))
        .collect();
    (classes, ranks)
}

/// Column index of the row maximum; the first column wins ties.
pub(crate) fn argmax_rows(scores: &Array2<f64>) -> Vec<usize> {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (j, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = j;
                }
            }
            best
        })
        .collect()
}

/// The searchable model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    OrdinalLogistic,
    RandomForest,
    OrdinalBoosted,
}

impl Family {
    pub const ALL: [Family; 3] = [
        Family::OrdinalLogistic,
        Family::RandomForest,
        Family::OrdinalBoosted,
    ];

    /// Short name used for stack members and artifact columns.
    pub fn base_name(self) -> &'static str {
        match self {
            Family::OrdinalLogistic => "logit",
            Family::RandomForest => "randf",
            Family::OrdinalBoosted => "gboost",
        }
    }

    /// Whether the family needs a `to_array` stage in front of it.
    pub fn needs_array_input(self) -> bool {
        matches!(self, Family::OrdinalBoosted)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

/// One grid point: a family plus its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum EstimatorSpec {
    OrdinalLogistic(OrdinalLogisticParams),
    RandomForest(RandomForestParams),
    OrdinalBoosted(BoostedParams),
}

impl EstimatorSpec {
    pub fn family(&self) -> Family {
        match self {
            EstimatorSpec::OrdinalLogistic(_) => Family::OrdinalLogistic,
            EstimatorSpec::RandomForest(_) => Family::RandomForest,
            EstimatorSpec::OrdinalBoosted(_) => Family::OrdinalBoosted,
        }
    }

    /// Compact `key=value` rendering for logs and result tables.
    pub fn describe(&self) -> String {
        match self {
            EstimatorSpec::OrdinalLogistic(p) => {
                format!("alpha={} max_iter={} tol={}", p.alpha, p.max_iter, p.tol)
            }
            EstimatorSpec::RandomForest(p) => format!(
                "n_estimators={} max_depth={} min_samples_leaf={} class_weight={} random_state={}",
                p.n_estimators,
                p.max_depth.map_or_else(|| "none".to_string(), |d| d.to_string()),
                p.min_samples_leaf,
                p.class_weight,
                p.random_state
            ),
            EstimatorSpec::OrdinalBoosted(p) => format!(
                "n_estimators={} max_depth={} learning_rate={} reg_lambda={} random_state={}",
                p.n_estimators, p.max_depth, p.learning_rate, p.reg_lambda, p.random_state
            ),
        }
    }
}

/// A live, possibly fitted, model of one family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "snake_case")]
pub enum Estimator {
    OrdinalLogistic(OrdinalLogistic),
    RandomForest(RandomForest),
    OrdinalBoosted(ArrayAdapter<BoostedOrdinal>),
}

impl Estimator {
    /// Fresh, unfit estimator for a grid point.
    pub fn from_spec(spec: &EstimatorSpec) -> Self {
        match spec {
            EstimatorSpec::OrdinalLogistic(p) => Estimator::OrdinalLogistic(OrdinalLogistic::new(p.clone())),
            EstimatorSpec::RandomForest(p) => Estimator::RandomForest(RandomForest::new(p.clone())),
            EstimatorSpec::OrdinalBoosted(p) => {
                Estimator::OrdinalBoosted(ArrayAdapter::new(BoostedOrdinal::new(p.clone())))
            }
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Estimator::OrdinalLogistic(_) => Family::OrdinalLogistic,
            Estimator::RandomForest(_) => Family::RandomForest,
            Estimator::OrdinalBoosted(_) => Family::OrdinalBoosted,
        }
    }

    fn as_classifier(&self) -> &dyn Classifier {
        match self {
            Estimator::OrdinalLogistic(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::OrdinalBoosted(m) => m,
        }
    }

    fn as_classifier_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Estimator::OrdinalLogistic(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::OrdinalBoosted(m) => m,
        }
    }
}

impl Classifier for Estimator {
    fn name(&self) -> &'static str {
        self.as_classifier().name()
    }

    fn fit(&mut self, x: &FeatureFrame, y: &[usize]) -> Result<FitReport, ModelError> {
        self.as_classifier_mut().fit(x, y)
    }

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<usize>, ModelError> {
        self.as_classifier().predict(x)
    }

    fn predict_scores(&self, x: &FeatureFrame) -> Result<Array2<f64>, ModelError> {
        self.as_classifier().predict_scores(x)
    }

    fn classes(&self) -> &[usize] {
        self.as_classifier().classes()
    }
}
