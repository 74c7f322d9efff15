//! Side-channel records of a training run.
//!
//! The trainer hands every search result and every held-out evaluation to an
//! `EvaluationRecorder`. `CsvRecorder` writes them next to the artifacts:
//! - `{name}_{family}_grid.csv`: one row per grid point
//! - `{name}_scores.csv`: one row per evaluated estimator, appended

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use gradestack_core::metrics::{
    accuracy, mean_absolute_error, quadratic_weighted_kappa, MetricError,
};

use crate::search::SearchResult;

/// Held-out scores of one estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub estimator: String,
    pub train_kappa: f64,
    pub test_kappa: f64,
    pub test_accuracy: f64,
    /// Mean absolute distance on the grade scale.
    pub test_mae: f64,
    pub recorded_at: DateTime<Utc>,
}

impl EvaluationScores {
    pub fn compute(
        estimator: impl Into<String>,
        train_true: &[usize],
        train_pred: &[usize],
        test_true: &[usize],
        test_pred: &[usize],
    ) -> Result<Self, MetricError> {
        Ok(Self {
            estimator: estimator.into(),
            train_kappa: quadratic_weighted_kappa(train_true, train_pred)?,
            test_kappa: quadratic_weighted_kappa(test_true, test_pred)?,
            test_accuracy: accuracy(test_true, test_pred)?,
            test_mae: mean_absolute_error(test_true, test_pred)?,
            recorded_at: Utc::now(),
        })
    }
}

pub trait EvaluationRecorder: Send + Sync {
    fn record_search(&self, name: &str, result: &SearchResult) -> Result<()>;

    fn record_scores(&self, name: &str, scores: &EvaluationScores) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CsvRecorder {
    storage: PathBuf,
}

impl CsvRecorder {
    pub fn new(storage: impl Into<PathBuf>) -> Self {
        Self {
            storage: storage.into(),
        }
    }

    pub fn grid_path(&self, name: &str, family: &str) -> PathBuf {
        self.storage.join(format!("{name}_{family}_grid.csv"))
    }

    pub fn scores_path(&self, name: &str) -> PathBuf {
        self.storage.join(format!("{name}_scores.csv"))
    }

    fn ensure_storage(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage).with_context(|| {
            format!("failed to create storage dir: {}", self.storage.display())
        })
    }
}

/// Grid table as CSV: rank, index, params, mean, std, one column per fold.
pub fn export_grid_csv(result: &SearchResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec![
        "rank".to_string(),
        "index".to_string(),
        "params".to_string(),
        "mean_kappa".to_string(),
        "std_kappa".to_string(),
    ];
    header.extend((0..result.folds.len()).map(|f| format!("fold_{f}_kappa")));
    wtr.write_record(&header)?;

    for c in &result.candidates {
        let mut row = vec![
            c.rank.to_string(),
            c.index.to_string(),
            c.spec.describe(),
            format!("{:.6}", c.mean_score),
            format!("{:.6}", c.std_score),
        ];
        row.extend(c.fold_scores.iter().map(|s| format!("{s:.6}")));
        wtr.write_record(&row)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

const SCORE_HEADER: [&str; 6] = [
    "recorded_at",
    "estimator",
    "train_kappa",
    "test_kappa",
    "test_accuracy",
    "test_mae",
];

impl EvaluationRecorder for CsvRecorder {
    fn record_search(&self, name: &str, result: &SearchResult) -> Result<()> {
        self.ensure_storage()?;
        let path = self.grid_path(name, result.family.base_name());
        std::fs::write(&path, export_grid_csv(result)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), "search results recorded");
        Ok(())
    }

    fn record_scores(&self, name: &str, scores: &EvaluationScores) -> Result<()> {
        self.ensure_storage()?;
        let path = self.scores_path(name);
        let fresh = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            wtr.write_record(SCORE_HEADER)?;
        }
        wtr.write_record([
            scores.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            scores.estimator.clone(),
            format!("{:.6}", scores.train_kappa),
            format!("{:.6}", scores.test_kappa),
            format!("{:.6}", scores.test_accuracy),
            format!("{:.6}", scores.test_mae),
        ])?;
        wtr.flush()?;

        tracing::info!(
            estimator = %scores.estimator,
            train_kappa = scores.train_kappa,
            test_kappa = scores.test_kappa,
            "held-out scores"
        );
        Ok(())
    }
}

/// Read back a scores file written by `CsvRecorder`.
pub fn read_scores_csv(path: &Path) -> Result<Vec<EvaluationScores>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or_default();
        let recorded_at = chrono::NaiveDateTime::parse_from_str(field(0), "%Y-%m-%d %H:%M:%S")
            .with_context(|| format!("bad timestamp '{}'", field(0)))?
            .and_utc();
        out.push(EvaluationScores {
            estimator: field(1).to_string(),
            train_kappa: field(2).parse()?,
            test_kappa: field(3).parse()?,
            test_accuracy: field(4).parse()?,
            test_mae: field(5).parse()?,
            recorded_at,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_from_perfect_predictions() {
        let y = vec![0, 1, 2, 1];
        let s = EvaluationScores::compute("logit", &y, &y, &y, &[0, 1, 1, 1]).unwrap();
        assert_eq!(s.train_kappa, 1.0);
        assert_eq!(s.test_accuracy, 0.75);
        assert_eq!(s.test_mae, 0.25);
        assert!(s.test_kappa < 1.0);
    }

    #[test]
    fn scores_file_gets_one_header_and_appended_rows() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = CsvRecorder::new(dir.path().join("storage"));
        let y = vec![0, 1, 2];
        for name in ["logit", "randf"] {
            let s = EvaluationScores::compute(name, &y, &y, &y, &y).unwrap();
            recorder.record_scores("run", &s).unwrap();
        }

        let path = recorder.scores_path("run");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("recorded_at,estimator,"));

        let rows = read_scores_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].estimator, "randf");
        assert_eq!(rows[0].test_kappa, 1.0);
    }

    #[test]
    fn mismatched_lengths_are_metric_errors() {
        assert!(matches!(
            EvaluationScores::compute("x", &[0], &[0, 1], &[0], &[0]),
            Err(MetricError::LengthMismatch { .. })
        ));
    }
}
