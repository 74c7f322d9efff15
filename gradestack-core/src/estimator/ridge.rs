//! One-vs-all ridge classifier, the stacking meta-learner.

use super::{argmax_rows, check_training_set, rank_encode, Classifier, FeatureNames, ModelError};
use crate::diagnostics::FitReport;
use crate::frame::FeatureFrame;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

const NAME: &str = "ridge_classifier";

/// Targets are encoded `+1` for the sample's class and `-1` elsewhere, both
/// sides are centered, and `(X'X + alpha I) W = X'Y` is solved in closed
/// form. Scores are the per-class decision values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeClassifier {
    alpha: f64,
    coef: Array2<f64>,
    intercept: Array1<f64>,
    classes: Vec<usize>,
    features: FeatureNames,
}

impl Default for RidgeClassifier {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeClassifier {
    /// Identity recorded in artifact metadata.
    pub const TYPE_NAME: &'static str = "RidgeClassifier";

    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            coef: Array2::zeros((0, 0)),
            intercept: Array1::zeros(0),
            classes: Vec::new(),
            features: FeatureNames::default(),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Feature weights, one column per class.
    pub fn coef(&self) -> &Array2<f64> {
        &self.coef
    }

    fn decision(&self, x: &FeatureFrame) -> Result<Array2<f64>, ModelError> {
        self.features.check(x, NAME)?;
        Ok(x.values().dot(&self.coef) + &self.intercept)
    }
}

impl Classifier for RidgeClassifier {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&mut self, x: &FeatureFrame, y: &[usize]) -> Result<FitReport, ModelError> {
        check_training_set(x.n_rows(), y)?;
        if self.alpha.is_nan() || self.alpha < 0.0 {
            return Err(ModelError::InvalidParameter(format!(
                "alpha must be non-negative, got {}",
                self.alpha
            )));
        }

        let (classes, ranks) = rank_encode(y);
        let k = classes.len();
        let values = x.values();
        let (n, p) = values.dim();

        let mut targets = Array2::<f64>::from_elem((n, k), -1.0);
        for (i, &r) in ranks.iter().enumerate() {
            targets[[i, r]] = 1.0;
        }

        let x_mean = values.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
        let y_mean = targets.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(k));
        let xc = &values - &x_mean;
        let yc = &targets - &y_mean;

        let mut gram = xc.t().dot(&xc);
        for i in 0..p {
            gram[[i, i]] += self.alpha;
        }
        let rhs = xc.t().dot(&yc);
        let coef = solve(gram, rhs)?;
        let intercept = &y_mean - &x_mean.dot(&coef);

        self.coef = coef;
        self.intercept = intercept;
        self.classes = classes;
        self.features.record(x);
        Ok(FitReport::clean())
    }

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<usize>, ModelError> {
        let scores = self.decision(x)?;
        Ok(argmax_rows(&scores)
            .into_iter()
            .map(|j| self.classes[j])
            .collect())
    }

    fn predict_scores(&self, x: &FeatureFrame) -> Result<Array2<f64>, ModelError> {
        self.decision(x)
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }
}

/// Gaussian elimination with partial pivoting for `A X = B`.
fn solve(mut a: Array2<f64>, mut b: Array2<f64>) -> Result<Array2<f64>, ModelError> {
    let n = a.nrows();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-12 {
            return Err(ModelError::Singular);
        }
        if pivot != col {
            for j in 0..n {
                a.swap([col, j], [pivot, j]);
            }
            for j in 0..b.ncols() {
                b.swap([col, j], [pivot, j]);
            }
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[[row, j]] -= factor * a[[col, j]];
            }
            for j in 0..b.ncols() {
                b[[row, j]] -= factor * b[[col, j]];
            }
        }
    }
    for col in (0..n).rev() {
        for j in 0..b.ncols() {
            let mut acc = b[[col, j]];
            for k in (col + 1)..n {
                acc -= a[[col, k]] * b[[k, j]];
            }
            b[[col, j]] = acc / a[[col, col]];
        }
    }
    Ok(b)
}
