//! Non-fatal fit diagnostics.
//!
//! Estimators never print. They hand their warnings back in a `FitReport` and
//! the caller decides, through an explicit `WarningPolicy`, whether they are
//! logged or dropped. Errors do not travel this way; they are always returned
//! as `Err`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitWarning {
    /// Which estimator raised it, e.g. `"ordinal_logistic"`.
    pub source: String,
    pub message: String,
}

impl FitWarning {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FitReport {
    pub warnings: Vec<FitWarning>,
}

impl FitReport {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, source: &str, message: impl Into<String>) {
        self.warnings.push(FitWarning::new(source, message));
    }

    pub fn merge(&mut self, other: FitReport) {
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// What to do with the warnings of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WarningPolicy {
    #[default]
    Log,
    Suppress,
}

impl WarningPolicy {
    /// Apply the policy to a finished fit. `context` names the fit in logs.
    pub fn apply(self, context: &str, report: &FitReport) {
        match self {
            WarningPolicy::Log => {
                for w in &report.warnings {
                    tracing::warn!(context, source = %w.source, "{}", w.message);
                }
            }
            WarningPolicy::Suppress => {
                if !report.is_clean() {
                    tracing::debug!(
                        context,
                        suppressed = report.warnings.len(),
                        "estimator warnings suppressed"
                    );
                }
            }
        }
    }
}
