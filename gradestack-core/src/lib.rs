//! Gradestack Core: the building blocks of the inspection-grade models.
//!
//! This crate holds everything that does not orchestrate:
//! - Time-split partitioning and the ordinal grade scale
//! - Column-wise preprocessing into labeled feature frames
//! - Estimators behind one fit/predict contract (ordinal logistic, random
//!   forest, gradient-boosted ordinal, ridge meta-classifier)
//! - Parameter grids per estimator family
//! - Forward-chaining and stratified cross-validation splitters
//! - Quadratic-weighted kappa and friends
//! - Content fingerprints for fit caching

pub mod dataset;
pub mod diagnostics;
pub mod estimator;
pub mod fingerprint;
pub mod frame;
pub mod grid;
pub mod metrics;
pub mod preprocess;
pub mod split;
