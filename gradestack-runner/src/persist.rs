//! Model artifacts.
//!
//! A trained stack is written as `{storage}/{name}.model.zip`, a zip holding
//! one deflate-compressed `model.json`, next to a pretty-printed
//! `{storage}/{name}_meta.json` describing it. Both files are written to a
//! temp path and renamed into place; if either step fails neither file is
//! left behind.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use gradestack_core::estimator::{Family, RidgeClassifier};

use crate::ensemble::StackedModel;
use crate::pipeline::FittedPipeline;

/// Name of the single entry inside a model archive.
pub const MODEL_ENTRY: &str = "model.json";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("expected a stacked model with named base estimators, got a single {0} pipeline")]
    NotStacked(Family),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Anything the trainer can hand to the writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum TrainedModel {
    Single(FittedPipeline),
    Stacked(StackedModel),
}

impl TrainedModel {
    pub fn as_stacked(&self) -> Result<&StackedModel, PersistError> {
        match self {
            TrainedModel::Stacked(stack) => Ok(stack),
            TrainedModel::Single(pipeline) => Err(PersistError::NotStacked(pipeline.family())),
        }
    }
}

/// Provenance record written beside each artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_file: String,
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub train_date: String,
    pub estimators: Vec<String>,
    pub final_estimator: String,
    pub cv_folds: usize,
}

#[derive(Debug, Clone)]
pub struct ModelWriter {
    storage: PathBuf,
}

impl ModelWriter {
    pub fn new(storage: impl Into<PathBuf>) -> Self {
        Self {
            storage: storage.into(),
        }
    }

    pub fn model_path(&self, name: &str) -> PathBuf {
        self.storage.join(format!("{name}.model.zip"))
    }

    pub fn meta_path(&self, name: &str) -> PathBuf {
        self.storage.join(format!("{name}_meta.json"))
    }

    /// Write `model` under `name`. Only stacked models are accepted.
    pub fn write(&self, model: &TrainedModel, name: &str) -> Result<ModelMetadata, PersistError> {
        let stack = model.as_stacked()?;
        std::fs::create_dir_all(&self.storage).map_err(io_err(&self.storage))?;

        let model_path = self.model_path(name);
        let meta_path = self.meta_path(name);

        let model_tmp = stage(&model_path, |file| {
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .compression_level(Some(3));
            zip.start_file(MODEL_ENTRY, options)?;
            serde_json::to_writer(&mut zip, model)?;
            zip.finish()?;
            Ok(())
        })?;

        let meta = ModelMetadata {
            model_file: model_path.display().to_string(),
            train_date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            estimators: stack.estimator_names().iter().map(|s| s.to_string()).collect(),
            final_estimator: RidgeClassifier::TYPE_NAME.to_string(),
            cv_folds: stack.cv(),
        };
        let meta_tmp = match stage(&meta_path, |file| {
            let mut out = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut out, &meta)?;
            out.flush().map_err(io_err(&meta_path))
        }) {
            Ok(tmp) => tmp,
            Err(err) => {
                let _ = std::fs::remove_file(&model_tmp);
                return Err(err);
            }
        };

        // Both files are complete before either replaces an earlier artifact.
        if let Err(err) = std::fs::rename(&model_tmp, &model_path) {
            let _ = std::fs::remove_file(&model_tmp);
            let _ = std::fs::remove_file(&meta_tmp);
            return Err(PersistError::Io {
                path: model_path,
                source: err,
            });
        }
        if let Err(err) = std::fs::rename(&meta_tmp, &meta_path) {
            let _ = std::fs::remove_file(&meta_tmp);
            let _ = std::fs::remove_file(&model_path);
            return Err(PersistError::Io {
                path: meta_path,
                source: err,
            });
        }

        tracing::info!(
            model = %model_path.display(),
            meta = %meta_path.display(),
            estimators = ?meta.estimators,
            "model written"
        );
        Ok(meta)
    }
}

/// Run `fill` against a temp file next to `path` and return the temp path.
/// Nothing is left behind on failure.
fn stage<F>(path: &Path, fill: F) -> Result<PathBuf, PersistError>
where
    F: FnOnce(File) -> Result<(), PersistError>,
{
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or_default()
    ));
    let file = File::create(&tmp).map_err(io_err(&tmp))?;
    if let Err(err) = fill(file) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(tmp)
}

/// Read a model archive written by `ModelWriter`.
pub fn load_model(path: impl AsRef<Path>) -> Result<TrainedModel, PersistError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(io_err(path))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    let mut entry = archive.by_name(MODEL_ENTRY)?;
    let mut json = String::new();
    entry.read_to_string(&mut json).map_err(io_err(path))?;
    Ok(serde_json::from_str(&json)?)
}

pub fn read_metadata(path: impl AsRef<Path>) -> Result<ModelMetadata, PersistError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    Ok(serde_json::from_str(&text)?)
}
