//! Bootstrap forest of Gini CART trees.

use super::tree::{Tree, TreeParams};
use super::{argmax_rows, check_training_set, rank_encode, Classifier, FeatureNames, ModelError};
use crate::diagnostics::FitReport;
use crate::frame::FeatureFrame;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

const NAME: &str = "random_forest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    /// Each class weighted `n / (n_classes * count)`.
    #[default]
    Balanced,
    None,
}

impl fmt::Display for ClassWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassWeight::Balanced => f.write_str("balanced"),
            ClassWeight::None => f.write_str("none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub class_weight: ClassWeight,
    pub random_state: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(15),
            min_samples_leaf: 1,
            class_weight: ClassWeight::Balanced,
            random_state: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: RandomForestParams,
    trees: Vec<Tree>,
    classes: Vec<usize>,
    features: FeatureNames,
}

impl RandomForest {
    pub fn new(params: RandomForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            classes: Vec::new(),
            features: FeatureNames::default(),
        }
    }

    pub fn params(&self) -> &RandomForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&mut self, x: &FeatureFrame, y: &[usize]) -> Result<FitReport, ModelError> {
        check_training_set(x.n_rows(), y)?;
        if self.params.n_estimators == 0 {
            return Err(ModelError::InvalidParameter("n_estimators must be positive".into()));
        }

        let (classes, ranks) = rank_encode(y);
        let k = classes.len();
        let values = x.values();
        let (n, p) = values.dim();

        let mut counts = vec![0usize; k];
        for &r in &ranks {
            counts[r] += 1;
        }
        let class_weight: Vec<f64> = match self.params.class_weight {
            ClassWeight::Balanced => counts
                .iter()
                .map(|&c| n as f64 / (k as f64 * c as f64))
                .collect(),
            ClassWeight::None => vec![1.0; k],
        };

        let mut one_hot = Array2::<f64>::zeros((n, k));
        for (i, &r) in ranks.iter().enumerate() {
            one_hot[[i, r]] = 1.0;
        }

        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: Some(((p as f64).sqrt().floor() as usize).max(1)),
            lambda: 0.0,
        };

        let mut seeds = StdRng::seed_from_u64(self.params.random_state);
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let mut rng = StdRng::seed_from_u64(seeds.gen());
            let mut draws = vec![0usize; n];
            for _ in 0..n {
                draws[rng.gen_range(0..n)] += 1;
            }
            let weights: Vec<f64> = draws
                .iter()
                .zip(&ranks)
                .map(|(&d, &r)| d as f64 * class_weight[r])
                .collect();
            let rows: Vec<usize> = (0..n).filter(|&i| draws[i] > 0).collect();
            trees.push(Tree::fit(
                values,
                one_hot.view(),
                &weights,
                rows,
                &tree_params,
                &mut rng,
            ));
        }

        self.trees = trees;
        self.classes = classes;
        self.features.record(x);
        Ok(FitReport::clean())
    }

    fn predict(&self, x: &FeatureFrame) -> Result<Vec<usize>, ModelError> {
        let scores = self.predict_scores(x)?;
        Ok(argmax_rows(&scores)
            .into_iter()
            .map(|j| self.classes[j])
            .collect())
    }

    /// Mean of the trees' leaf class distributions.
    fn predict_scores(&self, x: &FeatureFrame) -> Result<Array2<f64>, ModelError> {
        self.features.check(x, NAME)?;
        let k = self.classes.len();
        let mut out = Array2::<f64>::zeros((x.n_rows(), k));
        for (i, row) in x.values().rows().into_iter().enumerate() {
            for tree in &self.trees {
                for (j, v) in tree.predict_row(row).iter().enumerate() {
                    out[[i, j]] += v;
                }
            }
        }
        out /= self.trees.len().max(1) as f64;
        Ok(out)
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }
}
