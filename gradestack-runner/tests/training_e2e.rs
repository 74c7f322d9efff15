//! End-to-end training run on a synthetic inspection dataset.

use chrono::{TimeZone, Utc};
use gradestack_core::dataset::{TARGET_COLUMN, TIMESTAMP_COLUMN};
use gradestack_core::estimator::{ClassWeight, Family};
use gradestack_core::grid::{BoostedGrid, ForestGrid, LogitGrid};
use gradestack_runner::recorder::read_scores_csv;
use gradestack_runner::{
    load_model, read_metadata, ColumnGroups, ConfigError, Grids, ModelTrainer, Settings,
    TrainConfig, TrainedModel,
};
use polars::prelude::*;

const FIRST_DAY: i32 = 18_262; // 2020-01-01
const ROWS: usize = 1000;

/// Deterministic pseudo-noise in [0, 1).
fn noise(i: usize, salt: u64) -> f64 {
    let mut x = (i as u64).wrapping_add(salt.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    (x >> 11) as f64 / (1u64 << 53) as f64
}

fn inspections() -> DataFrame {
    let days: Vec<i32> = (0..ROWS).map(|i| FIRST_DAY + (i / 2) as i32).collect();
    let violations: Vec<f64> = (0..ROWS).map(|i| (noise(i, 1) * 10.0).floor()).collect();
    let critical: Vec<f64> = (0..ROWS).map(|i| (noise(i, 2) * 4.0).floor()).collect();
    let seats: Vec<f64> = (0..ROWS).map(|i| 20.0 + noise(i, 3) * 80.0).collect();
    let month_sin: Vec<f64> = days
        .iter()
        .map(|&d| ((d - FIRST_DAY) as f64 / 365.0 * std::f64::consts::TAU).sin())
        .collect();
    let borough: Vec<&str> = (0..ROWS)
        .map(|i| ["QUEENS", "BRONX", "KINGS", "RICHMOND"][(noise(i, 4) * 4.0) as usize])
        .collect();
    let grades: Vec<&str> = (0..ROWS)
        .map(|i| {
            let risk = violations[i] + 2.0 * critical[i];
            if risk < 5.0 {
                "A"
            } else if risk < 10.0 {
                "B"
            } else {
                "C"
            }
        })
        .collect();

    DataFrame::new(vec![
        Column::new(TIMESTAMP_COLUMN.into(), days)
            .cast(&DataType::Date)
            .unwrap(),
        Column::new(TARGET_COLUMN.into(), grades),
        Column::new("violations".into(), violations),
        Column::new("critical".into(), critical),
        Column::new("seats".into(), seats),
        Column::new("month_sin".into(), month_sin),
        Column::new("borough".into(), borough),
    ])
    .unwrap()
}

fn config() -> TrainConfig {
    let mut cfg = TrainConfig::new(
        "inspections",
        ColumnGroups {
            numbers: vec!["violations".into(), "critical".into(), "seats".into()],
            cycles: vec!["month_sin".into()],
            categories: vec!["borough".into()],
        },
    );
    // day 250 of the 500-day span
    cfg.hard_date = Some(Utc.with_ymd_and_hms(2020, 9, 7, 0, 0, 0).unwrap());
    cfg.n_jobs = 2;
    cfg.grids = Grids {
        logit: LogitGrid {
            alpha: vec![1.0],
            max_iter: vec![100],
            ..LogitGrid::default()
        },
        randf: ForestGrid {
            random_state: vec![42],
            n_estimators: vec![10],
            max_depth: vec![5],
            min_samples_leaf: vec![1],
            class_weight: vec![ClassWeight::Balanced],
        },
        gboost: BoostedGrid {
            random_state: vec![42],
            n_estimators: vec![10],
            max_depth: vec![3],
            learning_rate: vec![0.1],
            reg_lambda: vec![1.0],
        },
    };
    cfg
}

#[test]
fn full_run_writes_artifact_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path().join("storage"), dir.path().join("cache"));
    let trainer = ModelTrainer::new(config(), settings.clone()).unwrap();
    let df = inspections();

    let report = trainer.train(&df).unwrap();
    assert_eq!(report.train_rows + report.test_rows, ROWS);
    assert_eq!(report.train_rows, 500);

    let families: Vec<Family> = report.searches.iter().map(|s| s.family).collect();
    assert_eq!(families, Family::ALL.to_vec());
    for search in &report.searches {
        assert_eq!(search.candidates.len(), 1);
        assert_eq!(search.folds.len(), 3);
    }

    let model_path = settings.storage.join("inspections.model.zip");
    let meta_path = settings.storage.join("inspections_meta.json");
    assert!(model_path.exists());
    assert!(meta_path.exists());

    let meta = read_metadata(&meta_path).unwrap();
    assert_eq!(meta.estimators, vec!["logit", "randf", "gboost"]);
    assert_eq!(meta.final_estimator, "RidgeClassifier");
    assert_eq!(meta.cv_folds, 3);
    assert_eq!(meta.model_file, model_path.display().to_string());
    assert_eq!(meta, report.metadata);

    let loaded = load_model(&model_path).unwrap();
    let stack = loaded.as_stacked().unwrap();
    let predicted = stack.predict(&df).unwrap();
    assert_eq!(predicted.len(), ROWS);
    assert!(predicted.iter().all(|g| ["A", "B", "C"].contains(&g.as_str())));
    match &report.model {
        TrainedModel::Stacked(original) => {
            assert_eq!(original.predict(&df).unwrap(), predicted);
        }
        TrainedModel::Single(_) => panic!("trainer produced a single pipeline"),
    }

    let stack_scores = report.stack_scores().unwrap();
    assert!(stack_scores.test_kappa > 0.5, "stack kappa {}", stack_scores.test_kappa);
}

#[test]
fn full_run_records_grids_and_scores() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path().join("storage"), dir.path().join("cache"));
    ModelTrainer::new(config(), settings.clone())
        .unwrap()
        .train(&inspections())
        .unwrap();

    for family in ["logit", "randf", "gboost"] {
        let grid = settings.storage.join(format!("inspections_{family}_grid.csv"));
        let text = std::fs::read_to_string(&grid).unwrap();
        assert_eq!(text.lines().count(), 2, "{family} grid: {text}");
    }

    let scores = read_scores_csv(&settings.storage.join("inspections_scores.csv")).unwrap();
    let names: Vec<&str> = scores.iter().map(|s| s.estimator.as_str()).collect();
    assert_eq!(names, vec!["logit", "randf", "gboost", "stack"]);
    assert!(std::fs::read_dir(&settings.cache_dir).unwrap().count() > 0);
}

#[test]
fn config_without_date_split_is_rejected_from_toml() {
    let cfg = TrainConfig::from_toml_str(
        r#"
        name = "inspections"

        [columns]
        numbers = ["violations"]
        "#,
    )
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let err = ModelTrainer::new(cfg, Settings::new(dir.path(), dir.path())).unwrap_err();
    assert!(matches!(err, ConfigError::MissingDateSplit));
}

#[test]
fn cutoff_after_every_row_is_a_data_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.hard_date = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
    let trainer = ModelTrainer::new(cfg, Settings::new(dir.path().join("s"), dir.path().join("c")))
        .unwrap();
    let err = trainer.train(&inspections()).unwrap_err();
    assert!(err.to_string().contains("test partition is empty"), "{err}");
    assert!(!dir.path().join("s").join("inspections.model.zip").exists());
}
