//! Stacking ensemble over the tuned base pipelines.
//!
//! The meta-learner is a ridge classifier trained on out-of-fold base
//! scores: rows are split by unshuffled stratified K-fold, each base is fit
//! on the other folds and scores the held-out one, so no base prediction a
//! meta-learner trains on comes from a model that saw that row. Original
//! features never reach the meta-learner. Afterwards every base is refit on
//! the full partition for inference.
//!
//! Base scores are aligned to the full grade scale (a grade missing from a
//! fold's training rows yields a zero column) and labeled `{base}__{grade}`.

use ndarray::{s, Array2};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use gradestack_core::dataset::{take_rows, DataError, GradeScale};
use gradestack_core::diagnostics::WarningPolicy;
use gradestack_core::estimator::{Classifier, ModelError, RidgeClassifier};
use gradestack_core::frame::{FeatureFrame, FrameError};
use gradestack_core::preprocess::ColumnPlan;
use gradestack_core::split::{out_of_fold, stratified_folds, IndexFold, SplitError};

use crate::cache::FitCache;
use crate::pipeline::{FittedPipeline, Pipeline, PipelineError};
use crate::search::SearchResult;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("a stack needs at least one base estimator")]
    NoEstimators,

    #[error("base estimator name '{0}' is used twice")]
    DuplicateName(String),

    #[error("{rows} feature rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("meta-estimator predicted code {0}, which is not on the grade scale")]
    UnknownCode(usize),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Unfit stack: named base templates, a meta-learner and its fold count.
#[derive(Debug, Clone)]
pub struct StackedEnsemble {
    estimators: Vec<(String, Pipeline)>,
    final_estimator: RidgeClassifier,
    cv: usize,
}

impl StackedEnsemble {
    pub fn new(cv: usize) -> Self {
        Self {
            estimators: Vec::new(),
            final_estimator: RidgeClassifier::default(),
            cv,
        }
    }

    /// One base per search result, named by family. Each base gets its own
    /// unfit copy of `prep`.
    pub fn from_search(results: &[SearchResult], prep: &ColumnPlan, cv: usize) -> Self {
        let mut stack = Self::new(cv);
        for result in results {
            stack.estimators.push((
                result.family.base_name().to_string(),
                Pipeline::new(prep.clone(), result.best_spec().clone()),
            ));
        }
        stack
    }

    pub fn with_estimator(mut self, name: impl Into<String>, pipeline: Pipeline) -> Self {
        self.estimators.push((name.into(), pipeline));
        self
    }

    pub fn with_final_estimator(mut self, final_estimator: RidgeClassifier) -> Self {
        self.final_estimator = final_estimator;
        self
    }

    /// Route every base's `prep` fits through `cache`.
    pub fn with_cache(mut self, cache: FitCache) -> Self {
        for (_, pipeline) in &mut self.estimators {
            *pipeline = pipeline.clone().with_cache(cache.clone());
        }
        self
    }

    pub fn estimator_names(&self) -> Vec<&str> {
        self.estimators.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn cv(&self) -> usize {
        self.cv
    }

    /// Out-of-fold base scores the meta-learner trains on, one labeled
    /// block of `scale.len()` columns per base.
    pub fn meta_training_set(
        &self,
        x: &DataFrame,
        y: &[usize],
        scale: &GradeScale,
        warnings: WarningPolicy,
    ) -> Result<FeatureFrame, StackError> {
        self.check(x, y)?;
        let folds = stratified_folds(y, self.cv)?;
        let k = scale.len();

        let mut blocks = Vec::with_capacity(self.estimators.len());
        for (name, pipeline) in &self.estimators {
            tracing::debug!(base = %name, folds = folds.len(), "out-of-fold predictions");
            let fit_fold = |fold: &IndexFold| -> Result<Array2<f64>, StackError> {
                let train_y: Vec<usize> = fold.train.iter().map(|&r| y[r]).collect();
                let fitted = pipeline.fit(&take_rows(x, &fold.train)?, &train_y, warnings)?;
                aligned_scores(&fitted, &take_rows(x, &fold.valid)?, k)
            };
            let block = out_of_fold(x.height(), &folds, k, fit_fold)?;
            blocks.push(block);
        }

        let columns = meta_columns(&self.estimator_names(), scale);
        Ok(FeatureFrame::new(columns, hstack(&blocks, x.height(), k))?)
    }

    /// Train the meta-learner on out-of-fold scores, then refit every base
    /// on all of `x`.
    pub fn fit(
        &self,
        x: &DataFrame,
        y: &[usize],
        scale: &GradeScale,
        warnings: WarningPolicy,
    ) -> Result<StackedModel, StackError> {
        let meta = self.meta_training_set(x, y, scale, warnings)?;

        let mut final_estimator = self.final_estimator.clone();
        let report = final_estimator.fit(&meta, y)?;
        warnings.apply("final_estimator", &report);

        let mut estimators = Vec::with_capacity(self.estimators.len());
        for (name, pipeline) in &self.estimators {
            estimators.push(NamedPipeline {
                name: name.clone(),
                pipeline: pipeline.fit(x, y, warnings)?,
            });
        }

        tracing::info!(
            estimators = ?self.estimator_names(),
            cv = self.cv,
            rows = x.height(),
            "stack fitted"
        );

        Ok(StackedModel {
            scale: scale.clone(),
            estimators,
            final_estimator,
            cv: self.cv,
            meta_columns: meta.columns().to_vec(),
        })
    }

    fn check(&self, x: &DataFrame, y: &[usize]) -> Result<(), StackError> {
        if self.estimators.is_empty() {
            return Err(StackError::NoEstimators);
        }
        let mut seen = HashSet::new();
        for (name, _) in &self.estimators {
            if !seen.insert(name.as_str()) {
                return Err(StackError::DuplicateName(name.clone()));
            }
        }
        if x.height() != y.len() {
            return Err(StackError::LengthMismatch {
                rows: x.height(),
                labels: y.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedPipeline {
    pub name: String,
    pub pipeline: FittedPipeline,
}

/// A fitted stack, ready to predict grades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedModel {
    scale: GradeScale,
    estimators: Vec<NamedPipeline>,
    final_estimator: RidgeClassifier,
    cv: usize,
    meta_columns: Vec<String>,
}

impl StackedModel {
    pub fn estimator_names(&self) -> Vec<&str> {
        self.estimators.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn estimators(&self) -> &[NamedPipeline] {
        &self.estimators
    }

    pub fn final_estimator(&self) -> &RidgeClassifier {
        &self.final_estimator
    }

    /// Folds of the meta-learner's internal cross-validation.
    pub fn cv(&self) -> usize {
        self.cv
    }

    pub fn scale(&self) -> &GradeScale {
        &self.scale
    }

    /// Base scores on `x` as the meta-learner sees them.
    pub fn meta_features(&self, x: &DataFrame) -> Result<FeatureFrame, StackError> {
        let k = self.scale.len();
        let blocks = self
            .estimators
            .iter()
            .map(|e| aligned_scores(&e.pipeline, x, k))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FeatureFrame::new(
            self.meta_columns.clone(),
            hstack(&blocks, x.height(), k),
        )?)
    }

    pub fn predict_codes(&self, x: &DataFrame) -> Result<Vec<usize>, StackError> {
        let meta = self.meta_features(x)?;
        Ok(self.final_estimator.predict(&meta)?)
    }

    /// Predicted grade labels.
    pub fn predict(&self, x: &DataFrame) -> Result<Vec<String>, StackError> {
        self.predict_codes(x)?
            .into_iter()
            .map(|code| {
                self.scale
                    .decode(code)
                    .map(str::to_string)
                    .ok_or(StackError::UnknownCode(code))
            })
            .collect()
    }
}

/// Scores with one column per grade code `0..k`.
fn aligned_scores(
    fitted: &FittedPipeline,
    x: &DataFrame,
    k: usize,
) -> Result<Array2<f64>, StackError> {
    let scores = fitted.predict_scores(x)?;
    let mut out = Array2::<f64>::zeros((scores.nrows(), k));
    for (j, &code) in fitted.classes().iter().enumerate() {
        if code < k {
            out.column_mut(code).assign(&scores.column(j));
        }
    }
    Ok(out)
}

fn hstack(blocks: &[Array2<f64>], n_rows: usize, k: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((n_rows, blocks.len() * k));
    for (b, block) in blocks.iter().enumerate() {
        out.slice_mut(s![.., b * k..(b + 1) * k]).assign(block);
    }
    out
}

fn meta_columns(names: &[&str], scale: &GradeScale) -> Vec<String> {
    names
        .iter()
        .flat_map(|name| scale.labels().iter().map(move |g| format!("{name}__{g}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradestack_core::estimator::{EstimatorSpec, OrdinalLogisticParams, RandomForestParams};
    use polars::prelude::*;

    fn data(n: usize) -> (DataFrame, Vec<usize>, GradeScale) {
        let score: Vec<f64> = (0..n).map(|i| ((i * 11) % 30) as f64).collect();
        let zone: Vec<&str> = (0..n).map(|i| ["N", "S", "E"][i % 3]).collect();
        let labels: Vec<&str> = score.iter().map(|&s| ["A", "B", "C"][(s / 10.0) as usize]).collect();
        let scale = GradeScale::fit(&labels).unwrap();
        let y = scale.encode_all(&labels).unwrap();
        let df = DataFrame::new(vec![
            Column::new("score".into(), score),
            Column::new("zone".into(), zone),
        ])
        .unwrap();
        (df, y, scale)
    }

    fn plan() -> ColumnPlan {
        ColumnPlan::new(vec!["score".into()], vec![], vec!["zone".into()])
    }

    fn logit() -> Pipeline {
        Pipeline::new(
            plan(),
            EstimatorSpec::OrdinalLogistic(OrdinalLogisticParams {
                alpha: 0.1,
                max_iter: 300,
                ..OrdinalLogisticParams::default()
            }),
        )
    }

    fn forest() -> Pipeline {
        Pipeline::new(
            plan(),
            EstimatorSpec::RandomForest(RandomForestParams {
                n_estimators: 10,
                max_depth: Some(4),
                ..RandomForestParams::default()
            }),
        )
    }

    #[test]
    fn meta_learner_sees_only_out_of_fold_scores() {
        let (df, y, scale) = data(60);
        let stack = StackedEnsemble::new(3).with_estimator("logit", logit());
        let meta = stack
            .meta_training_set(&df, &y, &scale, WarningPolicy::Suppress)
            .unwrap();
        assert_eq!(meta.columns(), &["logit__A", "logit__B", "logit__C"]);

        for fold in stratified_folds(&y, 3).unwrap() {
            let train_y: Vec<usize> = fold.train.iter().map(|&r| y[r]).collect();
            let fitted = logit()
                .fit(&take_rows(&df, &fold.train).unwrap(), &train_y, WarningPolicy::Suppress)
                .unwrap();
            let expected = fitted
                .predict_scores(&take_rows(&df, &fold.valid).unwrap())
                .unwrap();
            for (i, &row) in fold.valid.iter().enumerate() {
                for j in 0..3 {
                    assert!((meta.values()[[row, j]] - expected[[i, j]]).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn fitted_stack_predicts_grade_labels() {
        let (df, y, scale) = data(90);
        let model = StackedEnsemble::new(3)
            .with_estimator("logit", logit())
            .with_estimator("randf", forest())
            .fit(&df, &y, &scale, WarningPolicy::Suppress)
            .unwrap();

        assert_eq!(model.estimator_names(), vec!["logit", "randf"]);
        assert_eq!(model.cv(), 3);
        assert_eq!(model.meta_features(&df).unwrap().n_cols(), 6);

        let predicted = model.predict(&df).unwrap();
        assert_eq!(predicted.len(), 90);
        assert!(predicted.iter().all(|g| ["A", "B", "C"].contains(&g.as_str())));
        let codes = model.predict_codes(&df).unwrap();
        let correct = codes.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct >= 60, "only {correct} of 90 correct");
    }

    #[test]
    fn empty_and_duplicate_stacks_are_rejected() {
        let (df, y, scale) = data(30);
        assert!(matches!(
            StackedEnsemble::new(3).fit(&df, &y, &scale, WarningPolicy::Suppress),
            Err(StackError::NoEstimators)
        ));
        let twice = StackedEnsemble::new(3)
            .with_estimator("logit", logit())
            .with_estimator("logit", forest());
        assert!(matches!(
            twice.fit(&df, &y, &scale, WarningPolicy::Suppress),
            Err(StackError::DuplicateName(n)) if n == "logit"
        ));
    }

    #[test]
    fn missing_grades_become_zero_columns() {
        let (df, _, _) = data(30);
        let scale = GradeScale::fit(&["A", "B", "C", "D"]).unwrap();
        let y: Vec<usize> = (0..30).map(|i| i % 2).collect();
        let fitted = logit().fit(&df, &y, WarningPolicy::Suppress).unwrap();
        let scores = aligned_scores(&fitted, &df, scale.len()).unwrap();
        assert_eq!(scores.dim(), (30, 4));
        assert!(scores.column(2).iter().all(|&v| v == 0.0));
        assert!(scores.column(3).iter().all(|&v| v == 0.0));
    }
}
