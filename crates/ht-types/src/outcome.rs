//! Trial outcome reported by an objective back to the driver.

use serde::{Deserialize, Serialize};

/// Why a trial was excluded from the optimizer's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PruneReason {
    /// The process exited unsuccessfully. `code` is `None` when it was
    /// terminated by a signal.
    NonZeroExit { code: Option<i32> },
    /// The process succeeded but its output carried no usable objective.
    MalformedOutput { detail: String },
    /// The last token parsed as a number but was `nan` or infinite.
    NonFiniteObjective { value: String },
}

impl std::fmt::Display for PruneReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonZeroExit { code: Some(code) } => write!(f, "exited with status {code}"),
            Self::NonZeroExit { code: None } => write!(f, "terminated by signal"),
            Self::MalformedOutput { detail } => write!(f, "malformed output: {detail}"),
            Self::NonFiniteObjective { value } => write!(f, "non-finite objective {value}"),
        }
    }
}

/// Outcome of evaluating one trial: either a score (lower is better unless
/// the study says otherwise) or a pruned marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialOutcome {
    Scored(f64),
    Pruned(PruneReason),
}

impl TrialOutcome {
    /// Score an objective value, pruning `nan` and infinities.
    pub fn from_objective(value: f64) -> Self {
        if value.is_finite() {
            Self::Scored(value)
        } else {
            Self::Pruned(PruneReason::NonFiniteObjective {
                value: value.to_string(),
            })
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Scored(value) => Some(*value),
            Self::Pruned(_) => None,
        }
    }
}
