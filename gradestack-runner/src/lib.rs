//! Gradestack Runner: training orchestration for the inspection-grade stack.
//!
//! This crate builds on `gradestack-core` to provide:
//! - TOML run configuration and environment settings
//! - Logging setup
//! - An on-disk cache of fitted preprocessing steps
//! - Cached preprocessing + estimator pipelines
//! - Parallel grid search under forward-chaining cross-validation
//! - CSV recording of search results and held-out scores
//! - The stacking ensemble and its ridge meta-learner
//! - Compressed model artifacts with JSON metadata
//! - `ModelTrainer`, which runs all of the above in order

pub mod cache;
pub mod config;
pub mod ensemble;
pub mod logging;
pub mod persist;
pub mod pipeline;
pub mod recorder;
pub mod search;
pub mod trainer;

pub use cache::FitCache;
pub use config::{ColumnGroups, ConfigError, CutoffWindow, Grids, Settings, TrainConfig};
pub use ensemble::{NamedPipeline, StackError, StackedEnsemble, StackedModel};
pub use persist::{load_model, read_metadata, ModelMetadata, ModelWriter, PersistError, TrainedModel};
pub use pipeline::{FittedPipeline, Pipeline, PipelineError};
pub use recorder::{CsvRecorder, EvaluationRecorder, EvaluationScores};
pub use search::{grid_search, CandidateScore, SearchError, SearchOptions, SearchResult};
pub use trainer::{ModelTrainer, TrainError, TrainReport};
