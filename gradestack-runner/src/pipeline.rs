//! Preprocessing plus one estimator as a single fit/predict unit.
//!
//! `Pipeline` is the unfit template: a `ColumnPlan`, an `EstimatorSpec` and
//! an optional `FitCache`. Every `fit` builds a fresh estimator from the spec
//! and a fresh fit of the plan (or the cached fit for the same plan and
//! data), so templates can be shared freely between parallel searches.
//!
//! Stages run in order `prep`, then `to_array` for families that only take
//! bare matrices, then `estimator`.

use ndarray::Array2;
use polars::prelude::{DataFrame, PolarsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gradestack_core::diagnostics::WarningPolicy;
use gradestack_core::estimator::{Classifier, Estimator, EstimatorSpec, Family, ModelError};
use gradestack_core::fingerprint::FitFingerprint;
use gradestack_core::preprocess::{ColumnPlan, FittedColumnPlan, PreprocessError};

use crate::cache::FitCache;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("failed to fingerprint training data: {0}")]
    Fingerprint(#[from] PolarsError),

    #[error("fit cache: {0:#}")]
    Cache(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    prep: ColumnPlan,
    estimator: EstimatorSpec,
    cache: Option<FitCache>,
}

impl Pipeline {
    pub fn new(prep: ColumnPlan, estimator: EstimatorSpec) -> Self {
        Self {
            prep,
            estimator,
            cache: None,
        }
    }

    /// Reuse fitted `prep` stages through `cache`.
    pub fn with_cache(mut self, cache: FitCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Same plan and cache, different terminal estimator.
    pub fn with_estimator(&self, estimator: EstimatorSpec) -> Self {
        Self {
            prep: self.prep.clone(),
            estimator,
            cache: self.cache.clone(),
        }
    }

    pub fn prep(&self) -> &ColumnPlan {
        &self.prep
    }

    pub fn estimator(&self) -> &EstimatorSpec {
        &self.estimator
    }

    pub fn family(&self) -> Family {
        self.estimator.family()
    }

    pub fn steps(&self) -> Vec<&'static str> {
        if self.family().needs_array_input() {
            vec!["prep", "to_array", "estimator"]
        } else {
            vec!["prep", "estimator"]
        }
    }

    /// Fit on `x` (feature columns only) and ordinal codes `y`. Estimator
    /// warnings go through `warnings`; errors always propagate.
    pub fn fit(
        &self,
        x: &DataFrame,
        y: &[usize],
        warnings: WarningPolicy,
    ) -> Result<FittedPipeline, PipelineError> {
        let prep = self.fit_prep(x)?;
        let features = prep.transform(x)?;

        let mut estimator = Estimator::from_spec(&self.estimator);
        let report = estimator.fit(&features, y)?;
        warnings.apply(self.family().base_name(), &report);

        Ok(FittedPipeline { prep, estimator })
    }

    fn fit_prep(&self, x: &DataFrame) -> Result<FittedColumnPlan, PipelineError> {
        match &self.cache {
            Some(cache) => {
                let fingerprint = FitFingerprint::of(&self.prep, x)?;
                cache.get_or_fit(&fingerprint, || Ok(self.prep.fit(x)?))
            }
            None => Ok(self.prep.fit(x)?),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPipeline {
    prep: FittedColumnPlan,
    estimator: Estimator,
}

impl FittedPipeline {
    pub fn family(&self) -> Family {
        self.estimator.family()
    }

    pub fn prep(&self) -> &FittedColumnPlan {
        &self.prep
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Codes the estimator saw at fit, ascending.
    pub fn classes(&self) -> &[usize] {
        self.estimator.classes()
    }

    pub fn predict(&self, x: &DataFrame) -> Result<Vec<usize>, PipelineError> {
        let features = self.prep.transform(x)?;
        Ok(self.estimator.predict(&features)?)
    }

    /// Score columns follow `classes()`.
    pub fn predict_scores(&self, x: &DataFrame) -> Result<Array2<f64>, PipelineError> {
        let features = self.prep.transform(x)?;
        Ok(self.estimator.predict_scores(&features)?)
    }
}
