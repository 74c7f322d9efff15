//! Immediate-threshold ordinal logistic regression.
//!
//! One weight vector `w` and `K - 1` ascending cut points `theta`. For a
//! sample of rank `y` with linear score `s = w.x` the loss is
//!
//! ```text
//!   -log sigma(theta_y - s)        if y < K - 1
//!   -log sigma(s - theta_{y-1})    if y > 0
//! ```
//!
//! plus `alpha / 2 * |w|^2`, averaged over samples. Fitted by full-batch
//! gradient descent with step `1 / L`, where `L` bounds the loss curvature
//! from the mean squared row norm, so unscaled features slow the descent
//! instead of making it diverge. The rank is the number of cut points below
//! `s`.

use super::{check_training_set, rank_encode, Classifier, FeatureNames, ModelError};
use crate::diagnostics::FitReport;
use crate::frame::FeatureFrame;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

const NAME: &str = "ordinal_logistic";
pub const DEFAULT_TOL: f64 = 1e-4;

fn default_tol() -> f64 {
    DEFAULT_TOL
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalLogisticParams {
    pub alpha: f64,
    pub max_iter: usize,
    /// Stop once every gradient component is below this.
    #[serde(default = "default_tol")]
    pub tol: f64,
}

impl Default for OrdinalLogisticParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            max_iter: 250,
            tol: DEFAULT_TOL,
        }
    }
}

/// Inverse of a curvature bound on the averaged loss. Each sample adds at
/// most two logistic terms of curvature 1/4 along `(x, -1)`.
fn step_size(values: ArrayView2<'_, f64>, alpha: f64) -> f64 {
    let n = values.nrows().max(1) as f64;
    let mean_sq_norm = values.iter().map(|v| v * v).sum::<f64>() / n;
    1.0 / (0.5 * (mean_sq_norm + 1.0) + alpha / n)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalLogistic {
    params: OrdinalLogisticParams,
    coef: Array1<f64>,
    thresholds: Vec<f64>,
    classes: Vec<usize>,
    features: FeatureNames,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl OrdinalLogistic {
    pub fn new(params: OrdinalLogisticParams) -> Self {
        Self {
            params,
            coef: Array1::zeros(0),
            thresholds: Vec::new(),
            classes: Vec::new(),
            features: FeatureNames::default(),
        }
    }

    pub fn params(&self) -> &OrdinalLogisticParams {
        &self.params
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    fn rank_of(&self, s: f64) -> usize {
        self.thresholds.iter().filter(|&&t| t < s).count()
    }

    fn class_probabilities(&self, s: f64) -> Vec<f64> {
        let mut cumulative: Vec<f64> = self.thresholds.iter().map(|t| sigmoid(t - s)).collect();
        cumulative.push(1.0);
        let mut out = Vec::with_capacity(cumulative.len());
        let mut previous = 0.0;
        for c in cumulative {
            out.push((c - previous).max(0.0));
            previous = c;
        }
        out
    }

    fn scores_of(&self, x: ArrayView1<'_, f64>) -> f64 {
        x.dot(&self.coef)
    }
}

impl Classifier for OrdinalLogistic {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&mut self, x: &FeatureFrame, y: &[usize]) -> Result<FitReport, ModelError> {
        check_training_set(x.n_rows(), y)?;
        if self.params.alpha.is_nan() || self.params.alpha < 0.0 {
            return Err(ModelError::InvalidParameter(format!(
                "alpha must be non-negative, got {}",
                self.params.alpha
            )));
        }
        if self.params.max_iter == 0 {
            return Err(ModelError::InvalidParameter("max_iter must be positive".into()));
        }
        if self.params.tol.is_nan() || self.params.tol <= 0.0 {
            return Err(ModelError::InvalidParameter(format!(
                "tol must be positive, got {}",
                self.params.tol
            )));
        }

        let (classes, ranks) = rank_encode(y);
        let k = classes.len();
        let values = x.values();
        let (n, p) = values.dim();
        let nf = n as f64;
        let step = step_size(values.view(), self.params.alpha);

        let mut w = Array1::<f64>::zeros(p);
        let mut theta: Vec<f64> = (0..k.saturating_sub(1))
            .map(|j| j as f64 - (k as f64 - 2.0) / 2.0)
            .collect();
        let mut report = FitReport::clean();

        if k > 1 {
            let mut converged = false;
            for _ in 0..self.params.max_iter {
                let s = values.dot(&w);
                let mut d_s = Array1::<f64>::zeros(n);
                let mut d_theta = vec![0.0; k - 1];
                for i in 0..n {
                    let r = ranks[i];
                    if r < k - 1 {
                        let z = sigmoid(theta[r] - s[i]);
                        d_theta[r] += z - 1.0;
                        d_s[i] += 1.0 - z;
                    }
                    if r > 0 {
                        let z = sigmoid(s[i] - theta[r - 1]);
                        d_s[i] += z - 1.0;
                        d_theta[r - 1] += 1.0 - z;
                    }
                }
                let grad_w = values.t().dot(&d_s) / nf + &w * (self.params.alpha / nf);
                for g in d_theta.iter_mut() {
                    *g /= nf;
                }

                let largest = grad_w
                    .iter()
                    .chain(d_theta.iter())
                    .fold(0.0f64, |m, g| m.max(g.abs()));
                if largest < self.params.tol {
                    converged = true;
                    break;
                }

                w.scaled_add(-step, &grad_w);
                for (t, g) in theta.iter_mut().zip(&d_theta) {
                    *t -= step * g;
                }
                theta.sort_by(|a, b| a.total_cmp(b));
            }
            if !converged {
                report.warn(
                    NAME,
                    format!(
                        "gradient descent did not converge in {} iterations; increase max_iter",
                        self.params.max_iter
                    ),
                );
            }
        }

        self.coef = w;
        self.thresholds = theta;
        self.classes = classes;
        self.features.record(x);
        Ok(report)
    }

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<usize>, ModelError> {
        self.features.check(x, NAME)?;
        Ok(x.values()
            .rows()
            .into_iter()
            .map(|row| self.classes[self.rank_of(self.scores_of(row))])
            .collect())
    }

    fn predict_scores(&self, x: &FeatureFrame) -> Result<Array2<f64>, ModelError> {
        self.features.check(x, NAME)?;
        let k = self.classes.len();
        let mut out = Array2::<f64>::zeros((x.n_rows(), k));
        for (i, row) in x.values().rows().into_iter().enumerate() {
            for (j, p) in self.class_probabilities(self.scores_of(row)).into_iter().enumerate() {
                out[[i, j]] = p;
            }
        }
        Ok(out)
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }
}
