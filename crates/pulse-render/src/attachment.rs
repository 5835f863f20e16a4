//! CSV and XLSX attachments for full query results.

use pulse_types::{AttachmentFormat, Card, CardId, DisplayKind, PulseError, QueryResult, Result};

use crate::text::format_value;

/// Which attachment formats a card gets for a result of `row_count` rows.
///
/// Explicit `include_csv` / `include_xls` flags always apply. Table cards whose
/// visual was truncated get an implicit CSV, unless an XLSX is already attached.
/// A result with no rows gets no attachments at all.
pub fn attachment_formats(card: &Card, row_count: usize, truncated: bool) -> Vec<AttachmentFormat> {
    if row_count == 0 {
        return Vec::new();
    }
    let implicit_csv = card.display == DisplayKind::Table && truncated && !card.include_xls;

    let mut formats = Vec::new();
    if card.include_csv || implicit_csv {
        formats.push(AttachmentFormat::Csv);
    }
    if card.include_xls {
        formats.push(AttachmentFormat::Xls);
    }
    formats
}

/// File name derived from the card name, e.g. `weekly_revenue.csv`.
pub fn attachment_file_name(card: &Card, format: AttachmentFormat) -> String {
    let mut slug = String::with_capacity(card.name.len());
    for ch in card.name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    let stem = if slug.is_empty() { "query_result" } else { slug };
    format!("{stem}.{}", format.extension())
}

pub fn encode(card_id: CardId, format: AttachmentFormat, result: &QueryResult) -> Result<Vec<u8>> {
    match format {
        AttachmentFormat::Csv => encode_csv(card_id, result),
        AttachmentFormat::Xls => encode_xlsx(card_id, result),
    }
}

fn encode_csv(card_id: CardId, result: &QueryResult) -> Result<Vec<u8>> {
    let err = |e: &dyn std::fmt::Display| PulseError::Render {
        card: card_id,
        message: format!("CSV encoding failed: {e}"),
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(result.columns.iter().map(|c| c.label()))
        .map_err(|e| err(&e))?;
    for row in &result.rows {
        writer
            .write_record(row.iter().map(format_value))
            .map_err(|e| err(&e))?;
    }
    writer.into_inner().map_err(|e| err(&e))
}

fn encode_xlsx(card_id: CardId, result: &QueryResult) -> Result<Vec<u8>> {
    let err = |e: &dyn std::fmt::Display| PulseError::Render {
        card: card_id,
        message: format!("XLSX encoding failed: {e}"),
    };

    let mut workbook = rust_xlsxwriter::Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        for (c, column) in result.columns.iter().enumerate() {
            let col = u16::try_from(c).map_err(|e| err(&e))?;
            sheet.write_string(0, col, column.label()).map_err(|e| err(&e))?;
        }
        for (r, row) in result.rows.iter().enumerate() {
            let row_num = u32::try_from(r + 1).map_err(|e| err(&e))?;
            for (c, value) in row.iter().enumerate() {
                let col = u16::try_from(c).map_err(|e| err(&e))?;
                match value {
                    serde_json::Value::Null => {}
                    serde_json::Value::Number(n) => {
                        let number = n.as_f64().unwrap_or_default();
                        sheet.write_number(row_num, col, number).map_err(|e| err(&e))?;
                    }
                    other => {
                        sheet
                            .write_string(row_num, col, format_value(other))
                            .map_err(|e| err(&e))?;
                    }
                }
            }
        }
    }
    workbook.save_to_buffer().map_err(|e| err(&e))
}
