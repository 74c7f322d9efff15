//! Exhaustive grid search under forward-chaining cross-validation.
//!
//! Every grid point is fit on each fold's training window and scored by
//! quadratic-weighted kappa on the validation window that follows it. Grid
//! points run in parallel on a private rayon pool; folds of one point run in
//! sequence. The best mean score wins, and on ties the point enumerated first
//! wins. The winner is refit on the whole partition before returning.

use polars::prelude::DataFrame;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gradestack_core::dataset::slice_rows;
use gradestack_core::diagnostics::WarningPolicy;
use gradestack_core::estimator::{EstimatorSpec, Family};
use gradestack_core::grid::ParamGrid;
use gradestack_core::metrics::{quadratic_weighted_kappa, MetricError};
use gradestack_core::split::{time_series_folds, FoldSpec, SplitError};

use crate::pipeline::{FittedPipeline, Pipeline, PipelineError};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("parameter grid for {0} is empty")]
    EmptyGrid(Family),

    #[error("pipeline holds a {pipeline} estimator but the grid is for {grid}")]
    FamilyMismatch { pipeline: Family, grid: Family },

    #[error("{rows} feature rows, {labels} labels and {timestamps} timestamps")]
    Misaligned {
        rows: usize,
        labels: usize,
        timestamps: usize,
    },

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error("failed to build search worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Forward-chaining folds.
    pub n_splits: usize,
    /// Parallel workers, at least 1.
    pub workers: usize,
    pub warnings: WarningPolicy,
}

/// Cross-validated outcome of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// Position in grid enumeration order.
    pub index: usize,
    pub spec: EstimatorSpec,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    /// 1 is best.
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub family: Family,
    pub folds: Vec<FoldSpec>,
    pub candidates: Vec<CandidateScore>,
    pub best_index: usize,
    /// The winning spec refit on the whole partition.
    pub best_pipeline: FittedPipeline,
}

impl SearchResult {
    pub fn best(&self) -> &CandidateScore {
        &self.candidates[self.best_index]
    }

    pub fn best_spec(&self) -> &EstimatorSpec {
        &self.best().spec
    }

    pub fn best_score(&self) -> f64 {
        self.best().mean_score
    }
}

/// Search `grid` with `template`'s preprocessing plan.
///
/// `x`, `y` and `timestamps` are row-aligned and in ascending time order.
pub fn grid_search(
    template: &Pipeline,
    grid: &ParamGrid,
    x: &DataFrame,
    y: &[usize],
    timestamps: &[i64],
    options: &SearchOptions,
) -> Result<SearchResult, SearchError> {
    let family = grid.family();
    if template.family() != family {
        return Err(SearchError::FamilyMismatch {
            pipeline: template.family(),
            grid: family,
        });
    }
    if x.height() != y.len() || y.len() != timestamps.len() {
        return Err(SearchError::Misaligned {
            rows: x.height(),
            labels: y.len(),
            timestamps: timestamps.len(),
        });
    }
    let specs = grid.expand();
    if specs.is_empty() {
        return Err(SearchError::EmptyGrid(family));
    }

    let folds = time_series_folds(timestamps, options.n_splits)?;
    let windows: Vec<FoldWindow> = folds
        .iter()
        .map(|f| FoldWindow {
            train_x: slice_rows(x, 0, f.train_len()),
            train_y: &y[..f.train_end],
            valid_x: slice_rows(x, f.valid_start, f.valid_len()),
            valid_y: &y[f.valid_start..f.valid_end],
        })
        .collect();

    tracing::info!(
        family = %family,
        candidates = specs.len(),
        folds = folds.len(),
        workers = options.workers,
        "grid search started"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()?;
    let fold_scores: Vec<Vec<f64>> = pool.install(|| {
        specs
            .par_iter()
            .map(|spec| {
                let pipeline = template.with_estimator(spec.clone());
                let scores = windows
                    .iter()
                    .map(|w| w.score(&pipeline, options.warnings))
                    .collect::<Result<Vec<f64>, SearchError>>()?;
                tracing::debug!(family = %family, params = %spec.describe(), ?scores, "candidate scored");
                Ok(scores)
            })
            .collect::<Result<Vec<_>, SearchError>>()
    })?;

    let mut candidates: Vec<CandidateScore> = specs
        .into_iter()
        .zip(fold_scores)
        .enumerate()
        .map(|(index, (spec, scores))| {
            let (mean_score, std_score) = mean_std(&scores);
            CandidateScore {
                index,
                spec,
                fold_scores: scores,
                mean_score,
                std_score,
                rank: 0,
            }
        })
        .collect();
    assign_ranks(&mut candidates);
    let best_index = best_index(&candidates);

    let best = &candidates[best_index];
    tracing::info!(
        family = %family,
        score = best.mean_score,
        params = %best.spec.describe(),
        "grid search winner"
    );

    let best_pipeline = template
        .with_estimator(best.spec.clone())
        .fit(x, y, options.warnings)?;

    Ok(SearchResult {
        family,
        folds,
        candidates,
        best_index,
        best_pipeline,
    })
}

struct FoldWindow<'a> {
    train_x: DataFrame,
    train_y: &'a [usize],
    valid_x: DataFrame,
    valid_y: &'a [usize],
}

impl FoldWindow<'_> {
    fn score(&self, pipeline: &Pipeline, warnings: WarningPolicy) -> Result<f64, SearchError> {
        let fitted = pipeline.fit(&self.train_x, self.train_y, warnings)?;
        let predicted = fitted.predict(&self.valid_x)?;
        Ok(quadratic_weighted_kappa(self.valid_y, &predicted)?)
    }
}

/// Mean and population standard deviation.
fn mean_std(scores: &[f64]) -> (f64, f64) {
    if scores.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// First candidate holding the highest mean.
fn best_index(candidates: &[CandidateScore]) -> usize {
    let mut best = 0;
    for (i, c) in candidates.iter().enumerate() {
        if c.mean_score > candidates[best].mean_score {
            best = i;
        }
    }
    best
}

/// Descending by mean; equal means keep enumeration order.
fn assign_ranks(candidates: &mut [CandidateScore]) {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| candidates[b].mean_score.total_cmp(&candidates[a].mean_score));
    for (position, i) in order.into_iter().enumerate() {
        candidates[i].rank = position + 1;
    }
}
