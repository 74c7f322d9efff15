//! Ordinal agreement metrics over grade codes.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("cannot score an empty prediction set")]
    Empty,

    #[error("label count mismatch: {truth} true labels, {predicted} predictions")]
    LengthMismatch { truth: usize, predicted: usize },
}

fn check(y_true: &[usize], y_pred: &[usize]) -> Result<(), MetricError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricError::LengthMismatch {
            truth: y_true.len(),
            predicted: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }
    Ok(())
}

/// Cohen's kappa with quadratic weights `(i - j)^2` on ordinal codes.
///
/// 1.0 is perfect agreement, 0.0 is chance level, and fully reversed
/// predictions reach -1.0. When the expected disagreement is zero (every true
/// label and every prediction is the same single code) the score is 1.0.
pub fn quadratic_weighted_kappa(y_true: &[usize], y_pred: &[usize]) -> Result<f64, MetricError> {
    check(y_true, y_pred)?;
    let k = y_true.iter().chain(y_pred).copied().max().unwrap_or(0) + 1;
    let n = y_true.len() as f64;

    let mut observed = vec![0.0f64; k * k];
    let mut hist_true = vec![0.0f64; k];
    let mut hist_pred = vec![0.0f64; k];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        observed[t * k + p] += 1.0;
        hist_true[t] += 1.0;
        hist_pred[p] += 1.0;
    }

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..k {
        for j in 0..k {
            let w = (i as f64 - j as f64).powi(2);
            numerator += w * observed[i * k + j];
            denominator += w * hist_true[i] * hist_pred[j] / n;
        }
    }

    if denominator == 0.0 {
        return Ok(if numerator == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - numerator / denominator)
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> Result<f64, MetricError> {
    check(y_true, y_pred)?;
    let hits = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    Ok(hits as f64 / y_true.len() as f64)
}

/// Mean absolute distance between true and predicted codes.
pub fn mean_absolute_error(y_true: &[usize], y_pred: &[usize]) -> Result<f64, MetricError> {
    check(y_true, y_pred)?;
    let total: usize = y_true.iter().zip(y_pred).map(|(&t, &p)| t.abs_diff(p)).sum();
    Ok(total as f64 / y_true.len() as f64)
}
