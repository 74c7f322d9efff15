//! Gradient-boosted ordinal regressor.
//!
//! Boosts squared-loss regression trees on the ordinal rank of each sample,
//! starting from the mean rank. The class is the rounded, clamped regression
//! output. Only consumes bare matrices.

use super::tree::{Tree, TreeParams};
use super::{check_training_set, rank_encode, ArrayClassifier, ModelError};
use crate::diagnostics::FitReport;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

const NAME: &str = "ordinal_boosted";

fn default_min_child_samples() -> usize {
    20
}

fn default_subsample() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// L2 penalty on leaf values.
    pub reg_lambda: f64,
    pub random_state: u64,
    #[serde(default = "default_min_child_samples")]
    pub min_child_samples: usize,
    /// Row fraction drawn without replacement for each round.
    #[serde(default = "default_subsample")]
    pub subsample: f64,
}

impl Default for BoostedParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 7,
            learning_rate: 0.1,
            reg_lambda: 0.1,
            random_state: 42,
            min_child_samples: default_min_child_samples(),
            subsample: default_subsample(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedOrdinal {
    params: BoostedParams,
    base: f64,
    trees: Vec<Tree>,
    classes: Vec<usize>,
    n_features: Option<usize>,
}

impl BoostedOrdinal {
    pub fn new(params: BoostedParams) -> Self {
        Self {
            params,
            base: 0.0,
            trees: Vec::new(),
            classes: Vec::new(),
            n_features: None,
        }
    }

    pub fn params(&self) -> &BoostedParams {
        &self.params
    }

    pub fn n_rounds(&self) -> usize {
        self.trees.len()
    }

    fn check_width(&self, x: &ArrayView2<'_, f64>) -> Result<(), ModelError> {
        match self.n_features {
            None => Err(ModelError::NotFitted(NAME)),
            Some(expected) if expected != x.ncols() => Err(ModelError::WidthMismatch {
                expected,
                found: x.ncols(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Regression output clamped to the rank range.
    fn raw(&self, row: ArrayView1<'_, f64>) -> f64 {
        let lr = self.params.learning_rate;
        let value = self.base
            + self
                .trees
                .iter()
                .map(|t| lr * t.predict_row(row)[0])
                .sum::<f64>();
        value.clamp(0.0, self.classes.len().saturating_sub(1) as f64)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let p = &self.params;
        if p.n_estimators == 0 {
            return Err(ModelError::InvalidParameter("n_estimators must be positive".into()));
        }
        if p.learning_rate.is_nan() || p.learning_rate <= 0.0 {
            return Err(ModelError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                p.learning_rate
            )));
        }
        if p.reg_lambda.is_nan() || p.reg_lambda < 0.0 {
            return Err(ModelError::InvalidParameter(format!(
                "reg_lambda must be non-negative, got {}",
                p.reg_lambda
            )));
        }
        if p.subsample.is_nan() || p.subsample <= 0.0 || p.subsample > 1.0 {
            return Err(ModelError::InvalidParameter(format!(
                "subsample must be in (0, 1], got {}",
                p.subsample
            )));
        }
        Ok(())
    }
}

impl ArrayClassifier for BoostedOrdinal {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit_array(&mut self, x: ArrayView2<'_, f64>, y: &[usize]) -> Result<FitReport, ModelError> {
        check_training_set(x.nrows(), y)?;
        self.validate()?;

        let (classes, ranks) = rank_encode(y);
        let n = x.nrows();
        let target: Vec<f64> = ranks.iter().map(|&r| r as f64).collect();
        let base = target.iter().sum::<f64>() / n as f64;
        let mut fitted = vec![base; n];
        let mut residual = Array2::<f64>::zeros((n, 1));
        let weights = vec![1.0; n];

        let tree_params = TreeParams {
            max_depth: Some(self.params.max_depth),
            min_samples_leaf: self.params.min_child_samples,
            max_features: None,
            lambda: self.params.reg_lambda,
        };
        let n_sampled = ((n as f64 * self.params.subsample).round() as usize).clamp(1, n);
        let mut rng = StdRng::seed_from_u64(self.params.random_state);

        let mut report = FitReport::clean();
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for round in 0..self.params.n_estimators {
            for i in 0..n {
                residual[[i, 0]] = target[i] - fitted[i];
            }
            let rows: Vec<usize> = if n_sampled < n {
                let mut picked = rand::seq::index::sample(&mut rng, n, n_sampled).into_vec();
                picked.sort_unstable();
                picked
            } else {
                (0..n).collect()
            };

            let tree = Tree::fit(x, residual.view(), &weights, rows, &tree_params, &mut rng);
            if tree.is_stump_leaf() {
                report.warn(
                    NAME,
                    format!("stopped after {round} rounds: no further splits with positive gain"),
                );
                break;
            }
            for (i, f) in fitted.iter_mut().enumerate() {
                *f += self.params.learning_rate * tree.predict_row(x.row(i))[0];
            }
            trees.push(tree);
        }

        self.base = base;
        self.trees = trees;
        self.classes = classes;
        self.n_features = Some(x.ncols());
        Ok(report)
    }

    fn predict_array(&self, x: ArrayView2<'_, f64>) -> Result<Vec<usize>, ModelError> {
        self.check_width(&x)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| self.classes[self.raw(row).round() as usize])
            .collect())
    }

    /// Triangular soft assignment: class `k` scores `max(0, 1 - |f - k|)`.
    fn predict_scores_array(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError> {
        self.check_width(&x)?;
        let k = self.classes.len();
        let mut out = Array2::<f64>::zeros((x.nrows(), k));
        for (i, row) in x.rows().into_iter().enumerate() {
            let f = self.raw(row);
            for j in 0..k {
                out[[i, j]] = (1.0 - (f - j as f64).abs()).max(0.0);
            }
        }
        Ok(out)
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }
}
