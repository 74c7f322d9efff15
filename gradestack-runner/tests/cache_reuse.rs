//! The fitted `prep` stage is computed at most once per plan and data.

use gradestack_core::diagnostics::WarningPolicy;
use gradestack_core::estimator::{EstimatorSpec, OrdinalLogisticParams, RandomForestParams};
use gradestack_core::preprocess::{ColumnPlan, OutputLabels};
use gradestack_runner::{FitCache, Pipeline};
use polars::prelude::*;

fn frame() -> (DataFrame, Vec<usize>) {
    let n = 60;
    let score: Vec<f64> = (0..n).map(|i| ((i * 17) % 60) as f64).collect();
    let hour: Vec<f64> = (0..n).map(|i| ((i % 24) as f64 / 24.0).sin()).collect();
    let borough: Vec<&str> = (0..n).map(|i| ["QUEENS", "BRONX", "KINGS"][i % 3]).collect();
    let y = score.iter().map(|&s| (s / 20.0) as usize).collect();
    let df = DataFrame::new(vec![
        Column::new("score".into(), score),
        Column::new("hour_sin".into(), hour),
        Column::new("borough".into(), borough),
    ])
    .unwrap();
    (df, y)
}

fn plan() -> ColumnPlan {
    ColumnPlan::new(
        vec!["score".into()],
        vec!["hour_sin".into()],
        vec!["borough".into()],
    )
}

fn logit() -> EstimatorSpec {
    EstimatorSpec::OrdinalLogistic(OrdinalLogisticParams::default())
}

#[test]
fn second_build_is_a_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FitCache::new(dir.path()).unwrap();
    let (df, y) = frame();

    let first = Pipeline::new(plan(), logit())
        .with_cache(cache.clone())
        .fit(&df, &y, WarningPolicy::Suppress)
        .unwrap();
    let second = Pipeline::new(plan(), logit())
        .with_cache(cache.clone())
        .fit(&df, &y, WarningPolicy::Suppress)
        .unwrap();

    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.len().unwrap(), 1);
    assert_eq!(first.prep(), second.prep());
    assert_eq!(first.predict(&df).unwrap(), second.predict(&df).unwrap());
}

#[test]
fn entries_survive_a_new_cache_handle() {
    let dir = tempfile::tempdir().unwrap();
    let (df, y) = frame();

    let earlier = FitCache::new(dir.path()).unwrap();
    Pipeline::new(plan(), logit())
        .with_cache(earlier.clone())
        .fit(&df, &y, WarningPolicy::Suppress)
        .unwrap();
    assert_eq!(earlier.misses(), 1);

    let later = FitCache::new(dir.path()).unwrap();
    Pipeline::new(plan(), logit())
        .with_cache(later.clone())
        .fit(&df, &y, WarningPolicy::Suppress)
        .unwrap();
    assert_eq!(later.misses(), 0);
    assert_eq!(later.hits(), 1);
}

#[test]
fn different_data_or_plan_is_a_new_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FitCache::new(dir.path()).unwrap();
    let (df, y) = frame();

    let template = Pipeline::new(plan(), logit()).with_cache(cache.clone());
    template.fit(&df, &y, WarningPolicy::Suppress).unwrap();

    let head = df.head(Some(45));
    template.fit(&head, &y[..45], WarningPolicy::Suppress).unwrap();

    Pipeline::new(plan().with_labels(OutputLabels::Positional), logit())
        .with_cache(cache.clone())
        .fit(&df, &y, WarningPolicy::Suppress)
        .unwrap();

    assert_eq!(cache.misses(), 3);
    assert_eq!(cache.hits(), 0);
    assert_eq!(cache.len().unwrap(), 3);
}

#[test]
fn estimator_choice_does_not_split_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FitCache::new(dir.path()).unwrap();
    let (df, y) = frame();

    let template = Pipeline::new(plan(), logit()).with_cache(cache.clone());
    template.fit(&df, &y, WarningPolicy::Suppress).unwrap();
    template
        .with_estimator(EstimatorSpec::RandomForest(RandomForestParams {
            n_estimators: 5,
            ..RandomForestParams::default()
        }))
        .fit(&df, &y, WarningPolicy::Suppress)
        .unwrap();

    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 1);

    cache.clear().unwrap();
    assert!(cache.is_empty().unwrap());
}
