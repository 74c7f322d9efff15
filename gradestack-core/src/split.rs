//! Cross-validation splitters.
//!
//! - `time_series_folds`: forward-chaining folds over time-sorted rows. Fold
//!   `k` trains on every row before its validation window, and the window
//!   never shares a timestamp with its training rows.
//! - `stratified_folds`: class-balanced, unshuffled K-fold used for the
//!   stacking meta-learner.
//! - `out_of_fold`: assembles per-row predictions from models that never saw
//!   the row during fitting.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SplitError {
    #[error("need at least 2 splits, got {0}")]
    TooFewSplits(usize),

    #[error("cannot make {n_splits} splits from {n_samples} samples")]
    TooFewSamples { n_samples: usize, n_splits: usize },

    #[error("timestamps must be ascending; row {0} is earlier than its predecessor")]
    Unsorted(usize),

    #[error("fold {0} has an empty validation window after separating equal timestamps")]
    FoldCollapsed(usize),

    #[error("no class has at least {n_splits} members")]
    ClassesTooSmall { n_splits: usize },

    #[error("fold {fold} returned a {rows}x{cols} block, expected {expected_rows}x{expected_cols}")]
    BlockShape {
        fold: usize,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error("row {0} was predicted by more than one fold")]
    DuplicateCoverage(usize),

    #[error("row {0} was not predicted by any fold")]
    CoverageGap(usize),
}

/// A forward-chaining fold as row ranges over time-sorted data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSpec {
    pub fold_index: usize,
    /// Training rows are `[0, train_end)`.
    pub train_end: usize,
    /// Validation start row (inclusive). Equal to `train_end`.
    pub valid_start: usize,
    /// Validation end row (exclusive).
    pub valid_end: usize,
}

impl FoldSpec {
    pub fn train_len(&self) -> usize {
        self.train_end
    }

    pub fn valid_len(&self) -> usize {
        self.valid_end - self.valid_start
    }

    pub fn to_index_fold(&self) -> IndexFold {
        IndexFold {
            fold_index: self.fold_index,
            train: (0..self.train_end).collect(),
            valid: (self.valid_start..self.valid_end).collect(),
        }
    }
}

/// A fold as explicit row indices, both lists ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFold {
    pub fold_index: usize,
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
}

/// Forward-chaining folds with `n / (n_splits + 1)` rows per validation
/// window, the windows trailing the data and the last one ending at `n`.
///
/// Each window start is pushed forward past rows sharing the previous row's
/// timestamp, so every validation timestamp is strictly later than every
/// training timestamp of its fold.
pub fn time_series_folds(timestamps: &[i64], n_splits: usize) -> Result<Vec<FoldSpec>, SplitError> {
    if n_splits < 2 {
        return Err(SplitError::TooFewSplits(n_splits));
    }
    let n = timestamps.len();
    if n_splits + 1 > n {
        return Err(SplitError::TooFewSamples {
            n_samples: n,
            n_splits,
        });
    }
    if let Some(i) = (1..n).find(|&i| timestamps[i] < timestamps[i - 1]) {
        return Err(SplitError::Unsorted(i));
    }

    let test_size = n / (n_splits + 1);
    let starts: Vec<usize> = (0..n_splits)
        .map(|k| {
            let mut start = n - (n_splits - k) * test_size;
            while start < n && timestamps[start] == timestamps[start - 1] {
                start += 1;
            }
            start
        })
        .collect();

    let mut folds = Vec::with_capacity(n_splits);
    for (k, &start) in starts.iter().enumerate() {
        let end = starts.get(k + 1).copied().unwrap_or(n);
        if start >= end {
            return Err(SplitError::FoldCollapsed(k));
        }
        folds.push(FoldSpec {
            fold_index: k,
            train_end: start,
            valid_start: start,
            valid_end: end,
        });
    }
    Ok(folds)
}

/// Class-balanced K-fold without shuffling.
///
/// Classes are ranked by first appearance; the sorted class sequence is dealt
/// round-robin to decide how many members of each class every fold gets, and
/// each class's rows are then handed out to folds in row order.
pub fn stratified_folds(y: &[usize], n_splits: usize) -> Result<Vec<IndexFold>, SplitError> {
    if n_splits < 2 {
        return Err(SplitError::TooFewSplits(n_splits));
    }
    let n = y.len();
    if n_splits > n {
        return Err(SplitError::TooFewSamples {
            n_samples: n,
            n_splits,
        });
    }

    let mut order: Vec<usize> = Vec::new();
    for &label in y {
        if !order.contains(&label) {
            order.push(label);
        }
    }
    let encoded: Vec<usize> = y
        .iter()
        .map(|l| order.iter().position(|o| o == l).unwrap_or(0))
        .collect();
    let n_classes = order.len();

    let mut counts = vec![0usize; n_classes];
    for &c in &encoded {
        counts[c] += 1;
    }
    if counts.iter().all(|&c| c < n_splits) {
        return Err(SplitError::ClassesTooSmall { n_splits });
    }
    if let Some(&smallest) = counts.iter().min() {
        if smallest < n_splits {
            tracing::warn!(
                smallest,
                n_splits,
                "least populated class has fewer members than folds"
            );
        }
    }

    let mut sorted = encoded.clone();
    sorted.sort_unstable();
    let mut allocation = vec![vec![0usize; n_classes]; n_splits];
    for (pos, &c) in sorted.iter().enumerate() {
        allocation[pos % n_splits][c] += 1;
    }

    let mut fold_of = vec![0usize; n];
    for class in 0..n_classes {
        let mut slots = (0..n_splits).flat_map(|f| std::iter::repeat(f).take(allocation[f][class]));
        for (row, _) in encoded.iter().enumerate().filter(|&(_, &c)| c == class) {
            fold_of[row] = slots.next().unwrap_or(n_splits - 1);
        }
    }

    Ok((0..n_splits)
        .map(|f| {
            let (valid, train): (Vec<usize>, Vec<usize>) = (0..n).partition(|&r| fold_of[r] == f);
            IndexFold {
                fold_index: f,
                train,
                valid,
            }
        })
        .collect())
}

/// Run `fit_predict` once per fold and scatter each returned block
/// (`valid.len()` rows by `width` columns) into its validation rows.
///
/// Fails unless every row in `0..n_rows` is predicted by exactly one fold.
pub fn out_of_fold<F, E>(
    n_rows: usize,
    folds: &[IndexFold],
    width: usize,
    mut fit_predict: F,
) -> Result<Array2<f64>, E>
where
    F: FnMut(&IndexFold) -> Result<Array2<f64>, E>,
    E: From<SplitError>,
{
    let mut out = Array2::<f64>::zeros((n_rows, width));
    let mut filled = vec![false; n_rows];

    for fold in folds {
        let block = fit_predict(fold)?;
        if block.nrows() != fold.valid.len() || block.ncols() != width {
            return Err(SplitError::BlockShape {
                fold: fold.fold_index,
                rows: block.nrows(),
                cols: block.ncols(),
                expected_rows: fold.valid.len(),
                expected_cols: width,
            }
            .into());
        }
        for (i, &row) in fold.valid.iter().enumerate() {
            if row >= n_rows {
                return Err(SplitError::CoverageGap(row).into());
            }
            if filled[row] {
                return Err(SplitError::DuplicateCoverage(row).into());
            }
            filled[row] = true;
            out.row_mut(row).assign(&block.row(i));
        }
    }

    if let Some(row) = filled.iter().position(|f| !f) {
        return Err(SplitError::CoverageGap(row).into());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_series_folds_match_trailing_windows() {
        let ts: Vec<i64> = (0..10).collect();
        let folds = time_series_folds(&ts, 3).unwrap();
        // test_size = 10 / 4 = 2, windows [4,6) [6,8) [8,10)
        let windows: Vec<(usize, usize, usize)> = folds
            .iter()
            .map(|f| (f.train_end, f.valid_start, f.valid_end))
            .collect();
        assert_eq!(windows, vec![(4, 4, 6), (6, 6, 8), (8, 8, 10)]);
    }

    #[test]
    fn equal_timestamps_never_straddle_a_boundary() {
        let ts = vec![1, 2, 3, 3, 3, 4, 5, 6, 6, 7, 8, 9];
        let folds = time_series_folds(&ts, 3).unwrap();
        for f in &folds {
            let last_train = ts[f.train_end - 1];
            assert!(ts[f.valid_start..f.valid_end].iter().all(|&t| t > last_train));
        }
        // nominal start 3 sits inside the run of 3s and moves to 5
        assert_eq!(folds[0].train_end, 5);
    }

    #[test]
    fn all_equal_timestamps_collapse() {
        let ts = vec![7; 8];
        assert_eq!(time_series_folds(&ts, 2), Err(SplitError::FoldCollapsed(0)));
    }

    #[test]
    fn unsorted_timestamps_are_rejected() {
        assert_eq!(time_series_folds(&[1, 3, 2, 4], 2), Err(SplitError::Unsorted(2)));
    }

    #[test]
    fn too_few_samples() {
        assert_eq!(
            time_series_folds(&[1, 2], 2),
            Err(SplitError::TooFewSamples {
                n_samples: 2,
                n_splits: 2
            })
        );
        assert_eq!(time_series_folds(&[1, 2, 3], 1), Err(SplitError::TooFewSplits(1)));
    }

    #[test]
    fn stratified_folds_partition_rows_and_balance_classes() {
        let y = vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 0, 1, 2];
        let folds = stratified_folds(&y, 3).unwrap();
        let mut seen = vec![0; y.len()];
        for f in &folds {
            for &r in &f.valid {
                seen[r] += 1;
            }
            assert_eq!(f.train.len() + f.valid.len(), y.len());
            for class in 0..3 {
                let n = f.valid.iter().filter(|&&r| y[r] == class).count();
                assert!((1..=2).contains(&n), "fold {} class {class}: {n}", f.fold_index);
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn stratified_folds_follow_row_order() {
        let y = vec![1, 0, 1, 0];
        let folds = stratified_folds(&y, 2).unwrap();
        assert_eq!(folds[0].valid, vec![0, 1]);
        assert_eq!(folds[1].valid, vec![2, 3]);
    }

    #[test]
    fn stratified_folds_need_one_large_enough_class() {
        assert_eq!(
            stratified_folds(&[0, 1, 2], 2),
            Err(SplitError::ClassesTooSmall { n_splits: 2 })
        );
    }

    #[test]
    fn out_of_fold_scatters_to_validation_rows() {
        let folds = stratified_folds(&[0, 1, 0, 1, 0, 1], 3).unwrap();
        let oof = out_of_fold::<_, SplitError>(6, &folds, 1, |fold| {
            let mut block = Array2::zeros((fold.valid.len(), 1));
            for (i, &r) in fold.valid.iter().enumerate() {
                block[[i, 0]] = r as f64;
            }
            Ok(block)
        })
        .unwrap();
        assert_eq!(oof.column(0).to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn out_of_fold_detects_gaps() {
        let ts: Vec<i64> = (0..6).collect();
        let folds: Vec<IndexFold> = time_series_folds(&ts, 2)
            .unwrap()
            .iter()
            .map(FoldSpec::to_index_fold)
            .collect();
        let result = out_of_fold::<_, SplitError>(6, &folds, 1, |fold| {
            Ok(Array2::zeros((fold.valid.len(), 1)))
        });
        assert_eq!(result, Err(SplitError::CoverageGap(0)));
    }
}
