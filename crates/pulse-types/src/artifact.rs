//! Rendered per-card artifacts. Created and consumed within one send cycle.

use serde::{Deserialize, Serialize};

use crate::model::{CardId, DisplayKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentFormat {
    Csv,
    Xls,
}

impl AttachmentFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AttachmentFormat::Csv => "csv",
            AttachmentFormat::Xls => "xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            AttachmentFormat::Csv => "text/csv",
            AttachmentFormat::Xls => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub card_id: CardId,
    pub format: AttachmentFormat,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// The visual part of an artifact. Exactly one representation per card, so
/// an image and raw text can never both be delivered for the same card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    Image(Vec<u8>),
    Text(String),
    /// Empty-state rendering for a card whose query returned no rows.
    Empty,
    /// The card could not be rendered; `reason` is shown to the reader.
    Placeholder { reason: String },
}

/// How much of the result the visual shows when it was cut down to a preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    pub shown_rows: usize,
    pub total_rows: usize,
    pub shown_columns: usize,
    pub total_columns: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    pub card_id: CardId,
    pub card_name: String,
    pub position: u32,
    pub display: DisplayKind,
    pub content: ArtifactContent,
    pub row_count: usize,
    pub truncation: Option<Truncation>,
    pub attachments: Vec<AttachmentFile>,
    /// File names of attachments dropped for exceeding the size limit.
    pub omitted_attachments: Vec<String>,
}

impl RenderedArtifact {
    pub fn image(&self) -> Option<&[u8]> {
        match &self.content {
            ArtifactContent::Image(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn raw_text(&self) -> Option<&str> {
        match &self.content {
            ArtifactContent::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.content, ArtifactContent::Placeholder { .. })
    }

    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }
}
