//! Weighted CART regression tree over vector targets.
//!
//! One builder serves both forests and boosting. Each sample carries a
//! target vector (one-hot class membership for the forest, a single residual
//! for boosting) and a weight. A split maximizes
//!
//! ```text
//!   sum_j S_lj^2 / (W_l + lambda) + sum_j S_rj^2 / (W_r + lambda)
//! ```
//!
//! over candidate thresholds, where `S` is the weighted target sum and `W`
//! the weight sum of a child. With `lambda = 0` and one-hot targets this is
//! the Gini split; with a scalar residual it is the squared-error split with
//! an L2 leaf penalty. Leaves store `S / (W + lambda)`.

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    /// Features examined per node; `None` examines all of them.
    pub max_features: Option<usize>,
    pub lambda: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    root: Node,
}

impl Tree {
    /// Grow a tree on `rows` of `x`. Rows with zero weight should be left out
    /// by the caller.
    pub fn fit<R: Rng>(
        x: ArrayView2<'_, f64>,
        targets: ArrayView2<'_, f64>,
        weights: &[f64],
        rows: Vec<usize>,
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let mut builder = Builder {
            x,
            targets,
            weights,
            params,
            rng,
        };
        let root = builder.grow(rows, 0);
        Self { root }
    }

    /// Leaf value reached by one sample.
    pub fn predict_row(&self, sample: ArrayView1<'_, f64>) -> &[f64] {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn is_stump_leaf(&self) -> bool {
        matches!(self.root, Node::Leaf { .. })
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }

    pub fn n_leaves(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 1,
                Node::Split { left, right, .. } => walk(left) + walk(right),
            }
        }
        walk(&self.root)
    }
}

struct Builder<'x, 't, 'a, R> {
    x: ArrayView2<'x, f64>,
    targets: ArrayView2<'t, f64>,
    weights: &'a [f64],
    params: &'a TreeParams,
    rng: &'a mut R,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl<R: Rng> Builder<'_, '_, '_, R> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> Node {
        let (sums, weight) = self.totals(&rows);
        let lambda = self.params.lambda;
        let leaf = |sums: &[f64], weight: f64| Node::Leaf {
            value: sums
                .iter()
                .map(|s| if weight + lambda > 0.0 { s / (weight + lambda) } else { 0.0 })
                .collect(),
        };

        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if depth_reached || rows.len() < 2 * self.params.min_samples_leaf.max(1) {
            return leaf(&sums, weight);
        }

        let parent = score(&sums, weight, lambda);
        let Some(best) = self.best_split(&rows, parent) else {
            return leaf(&sums, weight);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[[r, best.feature]] <= best.threshold);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.grow(left, depth + 1)),
            right: Box::new(self.grow(right, depth + 1)),
        }
    }

    fn totals(&self, rows: &[usize]) -> (Vec<f64>, f64) {
        let mut sums = vec![0.0; self.targets.ncols()];
        let mut weight = 0.0;
        for &r in rows {
            let w = self.weights[r];
            weight += w;
            for (s, t) in sums.iter_mut().zip(self.targets.row(r)) {
                *s += w * t;
            }
        }
        (sums, weight)
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let p = self.x.ncols();
        match self.params.max_features {
            Some(m) if m < p => {
                let mut picked = rand::seq::index::sample(&mut *self.rng, p, m.max(1)).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..p).collect(),
        }
    }

    fn best_split(&mut self, rows: &[usize], parent: f64) -> Option<BestSplit> {
        let lambda = self.params.lambda;
        let min_leaf = self.params.min_samples_leaf.max(1);
        let width = self.targets.ncols();
        let (total_sums, total_weight) = self.totals(rows);
        let mut best: Option<BestSplit> = None;

        for feature in self.candidate_features() {
            let mut order: Vec<(f64, usize)> = rows.iter().map(|&r| (self.x[[r, feature]], r)).collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sums = vec![0.0; width];
            let mut left_weight = 0.0;
            let mut right_sums = vec![0.0; width];
            for i in 0..order.len() - 1 {
                let (value, r) = order[i];
                let w = self.weights[r];
                left_weight += w;
                for (s, t) in left_sums.iter_mut().zip(self.targets.row(r)) {
                    *s += w * t;
                }

                let next = order[i + 1].0;
                if next <= value {
                    continue;
                }
                let n_left = i + 1;
                if n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }

                for ((dst, t), l) in right_sums.iter_mut().zip(&total_sums).zip(&left_sums) {
                    *dst = t - l;
                }
                let right_weight = total_weight - left_weight;
                let candidate = score(&left_sums, left_weight, lambda)
                    + score(&right_sums, right_weight, lambda);

                if candidate - parent > MIN_GAIN
                    && best.as_ref().map_or(true, |b| candidate > b.score)
                {
                    let mut threshold = value + (next - value) / 2.0;
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        score: candidate,
                    });
                }
            }
        }
        best
    }
}

fn score(sums: &[f64], weight: f64, lambda: f64) -> f64 {
    let denom = weight + lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    sums.iter().map(|s| s * s).sum::<f64>() / denom
}
