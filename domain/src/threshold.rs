//! Threshold evaluation
//!
//! Pure decision over an aggregated vote session. Same inputs always yield
//! the same verdict; the function never looks at anything beyond its
//! arguments.

use crate::meeting::config::{ThresholdConfig, ThresholdMode};
use crate::vote::entities::VoteAggregate;
use serde::{Deserialize, Serialize};

/// Verdict of a threshold evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDecision {
    pub accepted: bool,
    pub reason: String,
}

impl ThresholdDecision {
    fn accept(reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// Evaluate an aggregated vote session against the configured threshold.
///
/// Rejections carry the gate that failed: the min-round floor, an empty
/// vote set, an unsupported mode, or the score itself.
pub fn evaluate(
    threshold: &ThresholdConfig,
    round: u32,
    aggregate: &VoteAggregate,
) -> ThresholdDecision {
    if round < threshold.min_rounds {
        return ThresholdDecision::reject(format!(
            "min rounds not reached (round {} < {})",
            round, threshold.min_rounds
        ));
    }

    match threshold.mode {
        ThresholdMode::AvgScore => match aggregate.avg_score {
            None => ThresholdDecision::reject("no votes received"),
            Some(avg) if avg >= threshold.avg_score_threshold => ThresholdDecision::accept(
                format!("average score {} >= {}", avg, threshold.avg_score_threshold),
            ),
            Some(avg) => ThresholdDecision::reject(format!(
                "average score {} < {}",
                avg, threshold.avg_score_threshold
            )),
        },
        ThresholdMode::Unknown => ThresholdDecision::reject("unsupported threshold mode"),
    }
}
