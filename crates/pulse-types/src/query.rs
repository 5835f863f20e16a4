//! Query results returned by the query execution collaborator.

use serde::{Deserialize, Serialize};

use crate::model::DisplayKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Breakout,
    Aggregation,
    #[default]
    Field,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_type: String,
    #[serde(default)]
    pub effective_type: Option<String>,
    #[serde(default)]
    pub role: ColumnRole,
}

impl Column {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Numeric per the effective type, falling back to the base type.
    pub fn is_numeric(&self) -> bool {
        let ty = self.effective_type.as_deref().unwrap_or(&self.base_type);
        matches!(
            ty,
            "type/Integer" | "type/BigInteger" | "type/Float" | "type/Decimal" | "type/Number"
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Copy of the first `max_rows` rows and `max_columns` columns.
    pub fn preview(&self, max_rows: usize, max_columns: usize) -> QueryResult {
        QueryResult {
            columns: self.columns.iter().take(max_columns).cloned().collect(),
            rows: self
                .rows
                .iter()
                .take(max_rows)
                .map(|row| row.iter().take(max_columns).cloned().collect())
                .collect(),
        }
    }

    /// Drop rows beyond `max_rows`. Returns the number of rows removed.
    pub fn truncate_rows(&mut self, max_rows: usize) -> usize {
        let removed = self.rows.len().saturating_sub(max_rows);
        self.rows.truncate(max_rows);
        removed
    }
}

/// Row limits applied to every query executed for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConstraints {
    pub max_results: usize,
    pub max_results_bare_rows: usize,
}

impl QueryConstraints {
    pub fn limit_for(&self, display: DisplayKind) -> usize {
        if display.is_bare_rows() {
            self.max_results_bare_rows.min(self.max_results)
        } else {
            self.max_results
        }
    }
}

impl Default for QueryConstraints {
    fn default() -> Self {
        Self {
            max_results: 10_000,
            max_results_bare_rows: 2_000,
        }
    }
}
