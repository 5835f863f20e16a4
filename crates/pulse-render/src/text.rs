//! Plain-text renderings of query results, used where an image is not needed.

use pulse_types::QueryResult;

/// Format a single cell for display.
pub fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// The first cell of the first row, for single-value displays.
pub fn scalar_text(result: &QueryResult) -> Option<String> {
    result
        .rows
        .first()
        .and_then(|row| row.first())
        .map(format_value)
}

/// Render rows as a markdown-style text table.
pub fn text_table(result: &QueryResult) -> String {
    let mut table = comfy_table::Table::new();
    table.load_preset(comfy_table::presets::ASCII_MARKDOWN);
    table.set_header(
        result
            .columns
            .iter()
            .map(|c| c.label().to_string())
            .collect::<Vec<_>>(),
    );
    for row in &result.rows {
        table.add_row(row.iter().map(format_value).collect::<Vec<_>>());
    }
    table.to_string()
}
