//! Send/skip decision for pulses and alerts.

use serde::{Deserialize, Serialize};

use pulse_render::goal_met;
use pulse_types::{AlertCondition, Card, Notification, QueryResult, Result};

/// Why a send stopped after evaluation without dispatching anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The alert card returned no rows.
    NoResults,
    /// `skip_if_empty` pulse whose cards all came back empty.
    AllEmpty,
    GoalNotMet,
    /// The alert card's query failed, so its condition cannot be established.
    QueryFailed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::NoResults => "alert card returned no rows",
            SkipReason::AllEmpty => "all cards returned no rows",
            SkipReason::GoalNotMet => "goal condition not met",
            SkipReason::QueryFailed => "alert query failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Send,
    Skip(SkipReason),
}

/// Alerts look only at their first card.
///
/// `rows` (and an alert without a condition) fires on any row; `goal` fires
/// when the goal evaluator says so. A missing goal setting is an error.
pub fn evaluate_alert(
    notification: &Notification,
    card: &Card,
    result: Option<&QueryResult>,
) -> Result<Decision> {
    let Some(result) = result else {
        return Ok(Decision::Skip(SkipReason::QueryFailed));
    };
    if result.is_empty() {
        return Ok(Decision::Skip(SkipReason::NoResults));
    }
    match notification.alert_condition {
        AlertCondition::None | AlertCondition::Rows => Ok(Decision::Send),
        AlertCondition::Goal => {
            if goal_met(notification.alert_above_goal, card, result)? {
                Ok(Decision::Send)
            } else {
                Ok(Decision::Skip(SkipReason::GoalNotMet))
            }
        }
    }
}

/// Pulses always send unless `skip_if_empty` is set and no card has rows.
/// Failed queries count as empty.
pub fn evaluate_pulse<'a>(
    notification: &Notification,
    results: impl IntoIterator<Item = Option<&'a QueryResult>>,
) -> Decision {
    if !notification.skip_if_empty {
        return Decision::Send;
    }
    let any_rows = results
        .into_iter()
        .any(|r| r.is_some_and(|r| !r.is_empty()));
    if any_rows {
        Decision::Send
    } else {
        Decision::Skip(SkipReason::AllEmpty)
    }
}
