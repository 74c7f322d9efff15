//! Serializable training configuration and environment settings.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use gradestack_core::estimator::Family;
use gradestack_core::grid::{BoostedGrid, ForestGrid, LogitGrid, ParamGrid};
use gradestack_core::preprocess::ColumnPlan;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no date split configured: set either `cutoff` or `hard_date`")]
    MissingDateSplit,

    #[error("`{field}` must be at least 2, got {value}")]
    TooFewFolds { field: &'static str, value: usize },

    #[error("`n_jobs` must be -1 or positive, got {0}")]
    InvalidJobs(i64),

    #[error("`name` must not be empty")]
    EmptyName,

    #[error("column '{0}' appears in more than one column group")]
    OverlappingColumns(String),

    #[error("cutoff window is out of range")]
    CutoffOutOfRange,

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Relative cutoff: the split happens this long before "now".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutoffWindow {
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
}

impl CutoffWindow {
    pub fn weeks(weeks: i64) -> Self {
        Self {
            weeks,
            ..Self::default()
        }
    }

    pub fn to_duration(&self) -> Option<Duration> {
        Duration::try_weeks(self.weeks)?
            .checked_add(&Duration::try_days(self.days)?)?
            .checked_add(&Duration::try_hours(self.hours)?)
    }
}

/// Column-group membership of the feature columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnGroups {
    pub numbers: Vec<String>,
    pub cycles: Vec<String>,
    pub categories: Vec<String>,
}

/// Search grid per family; missing tables fall back to the stock grids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grids {
    pub logit: LogitGrid,
    pub randf: ForestGrid,
    pub gboost: BoostedGrid,
}

fn default_folds() -> usize {
    3
}

fn default_n_jobs() -> i64 {
    -1
}

/// One training run.
///
/// ```toml
/// name = "grades"
/// tscv_n = 3
/// final_cv_n = 3
/// n_jobs = -1
///
/// [cutoff]
/// weeks = 12
///
/// [columns]
/// numbers = ["score", "violations"]
/// cycles = ["month_sin", "month_cos"]
/// categories = ["borough"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub name: String,

    #[serde(default)]
    pub columns: ColumnGroups,

    /// Relative cutoff; wins over `hard_date` when both are set.
    #[serde(default)]
    pub cutoff: Option<CutoffWindow>,

    /// Absolute cutoff as an RFC 3339 string.
    #[serde(default)]
    pub hard_date: Option<DateTime<Utc>>,

    /// Folds of the per-family time-series search.
    #[serde(default = "default_folds")]
    pub tscv_n: usize,

    /// Folds of the meta-learner's internal cross-validation.
    #[serde(default = "default_folds")]
    pub final_cv_n: usize,

    /// Search workers; -1 uses every core.
    #[serde(default = "default_n_jobs")]
    pub n_jobs: i64,

    #[serde(default)]
    pub grids: Grids,
}

impl TrainConfig {
    pub fn new(name: impl Into<String>, columns: ColumnGroups) -> Self {
        Self {
            name: name.into(),
            columns,
            cutoff: None,
            hard_date: None,
            tscv_n: default_folds(),
            final_cv_n: default_folds(),
            n_jobs: default_n_jobs(),
            grids: Grids::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Everything that can be checked without data.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cutoff.is_none() && self.hard_date.is_none() {
            return Err(ConfigError::MissingDateSplit);
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        for (field, value) in [("tscv_n", self.tscv_n), ("final_cv_n", self.final_cv_n)] {
            if value < 2 {
                return Err(ConfigError::TooFewFolds { field, value });
            }
        }
        self.worker_count()?;

        let mut seen = HashSet::new();
        for name in self
            .columns
            .numbers
            .iter()
            .chain(&self.columns.cycles)
            .chain(&self.columns.categories)
        {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::OverlappingColumns(name.clone()));
            }
        }
        Ok(())
    }

    /// The split timestamp, relative window first.
    pub fn resolve_cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigError> {
        match (&self.cutoff, self.hard_date) {
            (Some(window), _) => {
                let span = window.to_duration().ok_or(ConfigError::CutoffOutOfRange)?;
                now.checked_sub_signed(span)
                    .ok_or(ConfigError::CutoffOutOfRange)
            }
            (None, Some(date)) => Ok(date),
            (None, None) => Err(ConfigError::MissingDateSplit),
        }
    }

    pub fn worker_count(&self) -> Result<usize, ConfigError> {
        match self.n_jobs {
            -1 => Ok(std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)),
            n if n > 0 => Ok(n as usize),
            n => Err(ConfigError::InvalidJobs(n)),
        }
    }

    pub fn column_plan(&self) -> ColumnPlan {
        ColumnPlan::new(
            self.columns.numbers.clone(),
            self.columns.cycles.clone(),
            self.columns.categories.clone(),
        )
    }

    pub fn grid(&self, family: Family) -> ParamGrid {
        match family {
            Family::OrdinalLogistic => ParamGrid::OrdinalLogistic(self.grids.logit.clone()),
            Family::RandomForest => ParamGrid::RandomForest(self.grids.randf.clone()),
            Family::OrdinalBoosted => ParamGrid::OrdinalBoosted(self.grids.gboost.clone()),
        }
    }
}

/// Where artifacts and the fit cache live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub storage: PathBuf,
    pub cache_dir: PathBuf,
}

impl Settings {
    pub const STORAGE_VAR: &'static str = "GRADESTACK_STORAGE";
    pub const CACHE_DIR_VAR: &'static str = "GRADESTACK_CACHE_DIR";

    pub fn new(storage: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: storage.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// `GRADESTACK_STORAGE` (default `storage`) and `GRADESTACK_CACHE_DIR`
    /// (default `cache_dir`).
    pub fn from_env() -> Self {
        let var = |key: &str, fallback: &str| {
            std::env::var_os(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(fallback))
        };
        Self {
            storage: var(Self::STORAGE_VAR, "storage"),
            cache_dir: var(Self::CACHE_DIR_VAR, "cache_dir"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MINIMAL: &str = r#"
        name = "grades"

        [columns]
        numbers = ["score"]
        categories = ["borough"]
    "#;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = TrainConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.tscv_n, 3);
        assert_eq!(cfg.final_cv_n, 3);
        assert_eq!(cfg.n_jobs, -1);
        assert_eq!(cfg.grids, Grids::default());
        assert!(cfg.columns.cycles.is_empty());
    }

    #[test]
    fn neither_cutoff_nor_hard_date_is_rejected() {
        let cfg = TrainConfig::from_toml_str(MINIMAL).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingDateSplit)));
        assert!(matches!(
            cfg.resolve_cutoff(Utc::now()),
            Err(ConfigError::MissingDateSplit)
        ));
    }

    #[test]
    fn relative_cutoff_wins_over_hard_date() {
        let text = format!(
            "hard_date = \"2020-01-01T00:00:00Z\"\n{MINIMAL}\n[cutoff]\nweeks = 2\ndays = 1\n"
        );
        let cfg = TrainConfig::from_toml_str(&text).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        let cut = cfg.resolve_cutoff(now).unwrap();
        assert_eq!(cut, Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap());
    }

    #[test]
    fn hard_date_alone_is_used_verbatim() {
        let text = format!("hard_date = \"2023-06-01T00:00:00Z\"\n{MINIMAL}");
        let cfg = TrainConfig::from_toml_str(&text).unwrap();
        let cut = cfg.resolve_cutoff(Utc::now()).unwrap();
        assert_eq!(cut, Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn worker_count_follows_n_jobs() {
        let mut cfg = TrainConfig::new("x", ColumnGroups::default());
        assert!(cfg.worker_count().unwrap() >= 1);
        cfg.n_jobs = 3;
        assert_eq!(cfg.worker_count().unwrap(), 3);
        cfg.n_jobs = 0;
        assert!(matches!(cfg.worker_count(), Err(ConfigError::InvalidJobs(0))));
    }

    #[test]
    fn fold_counts_below_two_are_rejected() {
        let mut cfg = TrainConfig::new("x", ColumnGroups::default());
        cfg.hard_date = Some(Utc::now());
        cfg.final_cv_n = 1;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TooFewFolds {
                field: "final_cv_n",
                value: 1
            })
        ));
    }

    #[test]
    fn overlapping_groups_are_rejected() {
        let mut cfg = TrainConfig::new(
            "x",
            ColumnGroups {
                numbers: vec!["a".into()],
                cycles: vec!["a".into()],
                categories: vec![],
            },
        );
        cfg.cutoff = Some(CutoffWindow::weeks(1));
        assert!(matches!(cfg.validate(), Err(ConfigError::OverlappingColumns(c)) if c == "a"));
    }

    #[test]
    fn grid_overrides_parse_from_toml() {
        let text = format!("{MINIMAL}\n[grids.gboost]\nn_estimators = [10]\n");
        let cfg = TrainConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg.grids.gboost.n_estimators, vec![10]);
        assert_eq!(cfg.grids.gboost.max_depth, vec![7, 9]);
        assert_eq!(cfg.grid(Family::OrdinalBoosted).len(), 4);
    }
}
