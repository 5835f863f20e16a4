//! Goal evaluation for `goal` alerts.

use pulse_types::{Card, ColumnRole, DisplayKind, PulseError, QueryResult, Result};

/// Coerce a JSON cell or setting into a number. Numeric strings are accepted.
pub fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `above` is met at or over the goal; `below` only strictly under it.
pub fn compare_to_goal(alert_above_goal: bool, value: f64, goal: f64) -> bool {
    if alert_above_goal {
        value >= goal
    } else {
        value < goal
    }
}

/// The goal configured in the card's visualization settings.
pub fn goal_value(card: &Card) -> Result<f64> {
    let key = card.display.goal_setting_key().ok_or_else(|| {
        PulseError::Config(format!(
            "Card {} with display {:?} does not support goals",
            card.id, card.display
        ))
    })?;
    card.setting(key).and_then(as_number).ok_or_else(|| {
        PulseError::Config(format!("Card {} has no numeric '{}' setting", card.id, key))
    })
}

/// Index of the column compared against the goal.
fn comparison_column(card: &Card, result: &QueryResult) -> Option<usize> {
    match card.display {
        DisplayKind::Progress => result
            .columns
            .iter()
            .position(|c| c.is_numeric())
            .or_else(|| (result.columns.len() == 1).then_some(0)),
        DisplayKind::Line | DisplayKind::Area | DisplayKind::Bar | DisplayKind::Combo => result
            .columns
            .iter()
            .position(|c| c.role == ColumnRole::Aggregation)
            .or_else(|| {
                card.setting("graph.metrics")
                    .and_then(|m| m.as_array())
                    .and_then(|m| m.first())
                    .and_then(|m| m.as_str())
                    .and_then(|name| result.column_index(name))
            })
            .or_else(|| result.columns.iter().rposition(|c| c.is_numeric())),
        DisplayKind::Scalar | DisplayKind::Table | DisplayKind::Row | DisplayKind::Pie => None,
    }
}

/// Row holding the value to compare: the sole row of a progress bar, or the
/// most recent point of a time series.
fn comparison_row(display: DisplayKind, result: &QueryResult) -> Option<&Vec<serde_json::Value>> {
    if display == DisplayKind::Progress {
        result.rows.first()
    } else {
        result.rows.last()
    }
}

/// Decide whether the card's result meets the alert goal.
///
/// Fails with [`PulseError::Config`] when the card has no goal configured or
/// no column can be compared to it. An empty result never meets the goal.
pub fn goal_met(alert_above_goal: bool, card: &Card, result: &QueryResult) -> Result<bool> {
    let goal = goal_value(card)?;
    let column = comparison_column(card, result).ok_or_else(|| {
        PulseError::Config(format!(
            "Unable to compare results of card {} to its goal",
            card.id
        ))
    })?;

    let Some(row) = comparison_row(card.display, result) else {
        return Ok(false);
    };
    let Some(value) = row.get(column).and_then(as_number) else {
        tracing::debug!(card = card.id, column, "Goal comparison value is not numeric");
        return Ok(false);
    };

    let met = compare_to_goal(alert_above_goal, value, goal);
    tracing::debug!(card = card.id, value, goal, above = alert_above_goal, met, "Goal evaluated");
    Ok(met)
}
