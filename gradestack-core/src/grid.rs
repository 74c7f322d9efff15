//! Hyperparameter grids, one schema per family.
//!
//! `expand()` enumerates the cartesian product in field order with the last
//! field varying fastest. That order is the tie-break order of the search.

use crate::estimator::ordinal_logistic::DEFAULT_TOL;
use crate::estimator::{
    BoostedParams, ClassWeight, EstimatorSpec, Family, OrdinalLogisticParams, RandomForestParams,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogitGrid {
    pub alpha: Vec<f64>,
    pub max_iter: Vec<usize>,
    pub tol: Vec<f64>,
}

impl Default for LogitGrid {
    fn default() -> Self {
        Self {
            alpha: vec![1.0],
            max_iter: vec![250, 500],
            tol: vec![DEFAULT_TOL],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestGrid {
    pub random_state: Vec<u64>,
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
    pub class_weight: Vec<ClassWeight>,
}

impl Default for ForestGrid {
    fn default() -> Self {
        Self {
            random_state: vec![42],
            n_estimators: vec![100, 250],
            max_depth: vec![15],
            min_samples_leaf: vec![1, 3],
            class_weight: vec![ClassWeight::Balanced],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostedGrid {
    pub random_state: Vec<u64>,
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub reg_lambda: Vec<f64>,
}

impl Default for BoostedGrid {
    fn default() -> Self {
        Self {
            random_state: vec![42],
            n_estimators: vec![100, 200],
            max_depth: vec![7, 9],
            learning_rate: vec![0.1],
            reg_lambda: vec![0.1, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ParamGrid {
    OrdinalLogistic(LogitGrid),
    RandomForest(ForestGrid),
    OrdinalBoosted(BoostedGrid),
}

impl ParamGrid {
    pub fn family(&self) -> Family {
        match self {
            ParamGrid::OrdinalLogistic(_) => Family::OrdinalLogistic,
            ParamGrid::RandomForest(_) => Family::RandomForest,
            ParamGrid::OrdinalBoosted(_) => Family::OrdinalBoosted,
        }
    }

    pub fn expand(&self) -> Vec<EstimatorSpec> {
        let mut out = Vec::new();
        match self {
            ParamGrid::OrdinalLogistic(g) => {
                for &alpha in &g.alpha {
                    for &max_iter in &g.max_iter {
                        for &tol in &g.tol {
                            out.push(EstimatorSpec::OrdinalLogistic(OrdinalLogisticParams {
                                alpha,
                                max_iter,
                                tol,
                            }));
                        }
                    }
                }
            }
            ParamGrid::RandomForest(g) => {
                for &random_state in &g.random_state {
                    for &n_estimators in &g.n_estimators {
                        for &max_depth in &g.max_depth {
                            for &min_samples_leaf in &g.min_samples_leaf {
                                for &class_weight in &g.class_weight {
                                    out.push(EstimatorSpec::RandomForest(RandomForestParams {
                                        n_estimators,
                                        max_depth: Some(max_depth),
                                        min_samples_leaf,
                                        class_weight,
                                        random_state,
                                    }));
                                }
                            }
                        }
                    }
                }
            }
            ParamGrid::OrdinalBoosted(g) => {
                for &random_state in &g.random_state {
                    for &n_estimators in &g.n_estimators {
                        for &max_depth in &g.max_depth {
                            for &learning_rate in &g.learning_rate {
                                for &reg_lambda in &g.reg_lambda {
                                    out.push(EstimatorSpec::OrdinalBoosted(BoostedParams {
                                        n_estimators,
                                        max_depth,
                                        learning_rate,
                                        reg_lambda,
                                        random_state,
                                        ..BoostedParams::default()
                                    }));
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        match self {
            ParamGrid::OrdinalLogistic(g) => g.alpha.len() * g.max_iter.len(),
            ParamGrid::RandomForest(g) => {
                g.random_state.len()
                    * g.n_estimators.len()
                    * g.max_depth.len()
                    * g.min_samples_leaf.len()
                    * g.class_weight.len()
            }
            ParamGrid::OrdinalBoosted(g) => {
                g.random_state.len()
                    * g.n_estimators.len()
                    * g.max_depth.len()
                    * g.learning_rate.len()
                    * g.reg_lambda.len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
