//! One training run from raw frame to written artifact.
//!
//! Order of work:
//! 1. resolve the cutoff and split the frame in time
//! 2. search each family in turn (logit, randf, gboost) and record results
//! 3. stack the three winners and fit the stack on the training partition
//! 4. score the stack on the test partition and write the artifact
//!
//! Configuration problems surface from `ModelTrainer::new`, before any data
//! is touched. Everything after that fails fast with a `TrainError`.

use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use thiserror::Error;

use gradestack_core::dataset::{split_by_cutoff, DataError, GradeScale, TimeSplit};
use gradestack_core::diagnostics::WarningPolicy;
use gradestack_core::estimator::{
    BoostedParams, EstimatorSpec, Family, OrdinalLogisticParams, RandomForestParams,
};
use gradestack_core::metrics::MetricError;
use gradestack_core::preprocess::PreprocessError;

use crate::cache::FitCache;
use crate::config::{ConfigError, Settings, TrainConfig};
use crate::ensemble::{StackError, StackedEnsemble};
use crate::persist::{ModelMetadata, ModelWriter, PersistError, TrainedModel};
use crate::pipeline::{Pipeline, PipelineError};
use crate::recorder::{CsvRecorder, EvaluationRecorder, EvaluationScores};
use crate::search::{grid_search, SearchError, SearchOptions, SearchResult};

/// Name under which the stack's own held-out scores are recorded.
pub const STACK_NAME: &str = "stack";

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("preprocessing error: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{family} search failed: {source}")]
    Search {
        family: Family,
        source: SearchError,
    },

    #[error("stacking failed: {0}")]
    Stack(#[from] StackError),

    #[error("scoring failed: {0}")]
    Metric(#[from] MetricError),

    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),

    #[error("fit cache: {0:#}")]
    Cache(anyhow::Error),

    #[error("evaluation recorder: {0:#}")]
    Recorder(anyhow::Error),
}

/// What a finished run produced.
#[derive(Debug)]
pub struct TrainReport {
    pub cutoff: DateTime<Utc>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub searches: Vec<SearchResult>,
    pub scores: Vec<EvaluationScores>,
    pub metadata: ModelMetadata,
    pub model: TrainedModel,
}

impl TrainReport {
    /// Held-out scores of the stack itself.
    pub fn stack_scores(&self) -> Option<&EvaluationScores> {
        self.scores.iter().find(|s| s.estimator == STACK_NAME)
    }
}

pub struct ModelTrainer {
    config: TrainConfig,
    settings: Settings,
    recorder: Box<dyn EvaluationRecorder>,
}

impl std::fmt::Debug for ModelTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelTrainer")
            .field("config", &self.config)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ModelTrainer {
    /// Validate `config` and prepare a run. Results are recorded as CSV in
    /// `settings.storage` unless another recorder is set.
    pub fn new(config: TrainConfig, settings: Settings) -> Result<Self, ConfigError> {
        config.validate()?;
        let recorder = Box::new(CsvRecorder::new(settings.storage.clone()));
        Ok(Self {
            config,
            settings,
            recorder,
        })
    }

    pub fn with_recorder(mut self, recorder: impl EvaluationRecorder + 'static) -> Self {
        self.recorder = Box::new(recorder);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Split `df` at the configured cutoff, resolved against `now`.
    pub fn split(&self, df: &DataFrame, now: DateTime<Utc>) -> Result<TimeSplit, TrainError> {
        let cutoff = self.config.resolve_cutoff(now)?;
        Ok(split_by_cutoff(df, cutoff)?)
    }

    /// Run the whole workflow on `df`, resolving a relative cutoff against
    /// the current time.
    pub fn train(&self, df: &DataFrame) -> Result<TrainReport, TrainError> {
        self.train_at(df, Utc::now())
    }

    pub fn train_at(&self, df: &DataFrame, now: DateTime<Utc>) -> Result<TrainReport, TrainError> {
        let split = self.split(df, now)?;
        let (train, test) = (&split.train, &split.test);
        tracing::info!(
            name = %self.config.name,
            cutoff = %split.cutoff,
            train = train.len(),
            test = test.len(),
            "training run started"
        );

        // The grade vocabulary is not a fitted statistic, so both sides feed it.
        let all_grades: Vec<&str> = train
            .target
            .iter()
            .chain(&test.target)
            .map(String::as_str)
            .collect();
        let scale = GradeScale::fit(&all_grades)?;
        let y_train = scale.encode_all(&train.target)?;
        let y_test = scale.encode_all(&test.target)?;

        let plan = self.config.column_plan();
        plan.validate()?;
        let cache = FitCache::new(&self.settings.cache_dir).map_err(TrainError::Cache)?;
        let workers = self.config.worker_count()?;

        let mut searches = Vec::with_capacity(Family::ALL.len());
        let mut scores = Vec::with_capacity(Family::ALL.len() + 1);
        for family in Family::ALL {
            let options = SearchOptions {
                n_splits: self.config.tscv_n,
                workers,
                warnings: search_warnings(family),
            };
            let template = Pipeline::new(plan.clone(), default_spec(family)).with_cache(cache.clone());
            let result = grid_search(
                &template,
                &self.config.grid(family),
                &train.features,
                &y_train,
                &train.timestamps,
                &options,
            )
            .map_err(|source| TrainError::Search { family, source })?;

            self.recorder
                .record_search(&self.config.name, &result)
                .map_err(TrainError::Recorder)?;

            let evaluation = EvaluationScores::compute(
                family.base_name(),
                &y_train,
                &result.best_pipeline.predict(&train.features)?,
                &y_test,
                &result.best_pipeline.predict(&test.features)?,
            )?;
            self.recorder
                .record_scores(&self.config.name, &evaluation)
                .map_err(TrainError::Recorder)?;

            scores.push(evaluation);
            searches.push(result);
        }

        let stack = StackedEnsemble::from_search(&searches, &plan, self.config.final_cv_n)
            .with_cache(cache.clone())
            .fit(&train.features, &y_train, &scale, WarningPolicy::Suppress)?;

        let evaluation = EvaluationScores::compute(
            STACK_NAME,
            &y_train,
            &stack.predict_codes(&train.features)?,
            &y_test,
            &stack.predict_codes(&test.features)?,
        )?;
        self.recorder
            .record_scores(&self.config.name, &evaluation)
            .map_err(TrainError::Recorder)?;
        scores.push(evaluation);

        let model = TrainedModel::Stacked(stack);
        let metadata = ModelWriter::new(&self.settings.storage).write(&model, &self.config.name)?;

        tracing::info!(
            name = %self.config.name,
            cache_hits = cache.hits(),
            cache_misses = cache.misses(),
            "training run finished"
        );

        Ok(TrainReport {
            cutoff: split.cutoff,
            train_rows: train.len(),
            test_rows: test.len(),
            searches,
            scores,
            metadata,
            model,
        })
    }
}

/// The boosted family's warnings are noise during search.
fn search_warnings(family: Family) -> WarningPolicy {
    match family {
        Family::OrdinalBoosted => WarningPolicy::Suppress,
        Family::OrdinalLogistic | Family::RandomForest => WarningPolicy::Log,
    }
}

fn default_spec(family: Family) -> EstimatorSpec {
    match family {
        Family::OrdinalLogistic => EstimatorSpec::OrdinalLogistic(OrdinalLogisticParams::default()),
        Family::RandomForest => EstimatorSpec::RandomForest(RandomForestParams::default()),
        Family::OrdinalBoosted => EstimatorSpec::OrdinalBoosted(BoostedParams::default()),
    }
}
