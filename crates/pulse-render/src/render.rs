//! Per-card rendering into channel-appropriate artifacts.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pulse_types::{
    ArtifactContent, AttachmentFile, Card, ChannelKind, DeliveryMode, DisplayKind, PulseError,
    QueryResult, RenderedArtifact, Result, Truncation,
};

use crate::attachment::{attachment_file_name, attachment_formats, encode};
use crate::text::{scalar_text, text_table};

/// Shown in place of a card whose visual could not be produced.
pub const RENDER_FAILED_TEXT: &str = "This question could not be displayed.";

/// Shown in place of a card whose query failed or timed out.
pub const QUERY_FAILED_TEXT: &str = "This question could not be displayed because its query failed.";

// ---------------------------------------------------------------------------
// ImageRenderer (charting collaborator)
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ImageRenderer: Send + Sync {
    /// Render the result as a PNG. `Ok(None)` means the card cannot be drawn.
    async fn render_to_image(&self, card: &Card, result: &QueryResult) -> Result<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Table cards show at most this many rows; more triggers an attachment.
    pub table_preview_rows: usize,
    pub table_preview_columns: usize,
    pub max_attachment_bytes: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            table_preview_rows: 10,
            table_preview_columns: 10,
            max_attachment_bytes: 10 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// ResultRenderer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum Rendered {
    Artifact(RenderedArtifact),
    /// An alert card returned no rows; the caller suppresses it.
    NoData,
}

pub struct ResultRenderer {
    images: Arc<dyn ImageRenderer>,
    config: RenderConfig,
}

impl ResultRenderer {
    pub fn new(images: Arc<dyn ImageRenderer>, config: RenderConfig) -> Self {
        Self { images, config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render one card for one channel kind.
    ///
    /// Never fails: rendering errors produce a placeholder artifact so the
    /// remaining cards of the notification are still delivered.
    pub async fn render(
        &self,
        card: &Card,
        position: u32,
        result: &QueryResult,
        channel: ChannelKind,
        mode: DeliveryMode,
    ) -> Rendered {
        if result.is_empty() {
            if mode == DeliveryMode::Alert {
                return Rendered::NoData;
            }
            return Rendered::Artifact(artifact(card, position, ArtifactContent::Empty, 0));
        }

        let (visual, truncation) = self.visual_result(card, result);
        let content = match self.render_content(card, &visual, channel).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    card = card.id,
                    channel = %channel,
                    error = %e,
                    "Card render failed"
                );
                ArtifactContent::Placeholder {
                    reason: RENDER_FAILED_TEXT.to_string(),
                }
            }
        };

        let mut rendered = artifact(card, position, content, result.row_count());
        rendered.truncation = truncation;

        // Slack never carries file attachments.
        if channel == ChannelKind::Email {
            let (attachments, omitted) = self.attachments(card, result, truncation.is_some());
            rendered.attachments = attachments;
            rendered.omitted_attachments = omitted;
        }
        Rendered::Artifact(rendered)
    }

    /// Placeholder artifact for a card that never produced a result.
    pub fn placeholder(card: &Card, position: u32, reason: impl Into<String>) -> RenderedArtifact {
        artifact(
            card,
            position,
            ArtifactContent::Placeholder {
                reason: reason.into(),
            },
            0,
        )
    }

    /// The part of the result shown in the visual. Only tables are cut down.
    fn visual_result<'a>(
        &self,
        card: &Card,
        result: &'a QueryResult,
    ) -> (Cow<'a, QueryResult>, Option<Truncation>) {
        if card.display != DisplayKind::Table {
            return (Cow::Borrowed(result), None);
        }
        let max_rows = self.config.table_preview_rows;
        let max_columns = self.config.table_preview_columns;
        let total_rows = result.row_count();
        let total_columns = result.columns.len();
        if total_rows <= max_rows && total_columns <= max_columns {
            return (Cow::Borrowed(result), None);
        }
        let preview = result.preview(max_rows, max_columns);
        let truncation = Truncation {
            shown_rows: preview.row_count(),
            total_rows,
            shown_columns: preview.columns.len(),
            total_columns,
        };
        (Cow::Owned(preview), Some(truncation))
    }

    async fn render_content(
        &self,
        card: &Card,
        visual: &QueryResult,
        channel: ChannelKind,
    ) -> Result<ArtifactContent> {
        if channel == ChannelKind::Slack && card.display.is_textual() {
            let text = match card.display {
                DisplayKind::Scalar => scalar_text(visual).unwrap_or_default(),
                _ => text_table(visual),
            };
            return Ok(ArtifactContent::Text(text));
        }

        match self.images.render_to_image(card, visual).await? {
            Some(bytes) if !bytes.is_empty() => Ok(ArtifactContent::Image(bytes)),
            _ => Err(PulseError::Render {
                card: card.id,
                message: "image renderer produced no output".into(),
            }),
        }
    }

    fn attachments(
        &self,
        card: &Card,
        result: &QueryResult,
        truncated: bool,
    ) -> (Vec<AttachmentFile>, Vec<String>) {
        let mut files = Vec::new();
        let mut omitted = Vec::new();
        for format in attachment_formats(card, result.row_count(), truncated) {
            let file_name = attachment_file_name(card, format);
            let bytes = match encode(card.id, format, result) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        card = card.id,
                        file = %file_name,
                        error = %e,
                        "Attachment encoding failed"
                    );
                    continue;
                }
            };
            if bytes.len() > self.config.max_attachment_bytes {
                let err = PulseError::AttachmentSize {
                    name: file_name.clone(),
                    size: bytes.len(),
                    limit: self.config.max_attachment_bytes,
                };
                tracing::warn!(card = card.id, error = %err, "Attachment omitted");
                omitted.push(file_name);
                continue;
            }
            files.push(AttachmentFile {
                card_id: card.id,
                format,
                file_name,
                bytes,
            });
        }
        (files, omitted)
    }
}

fn artifact(
    card: &Card,
    position: u32,
    content: ArtifactContent,
    row_count: usize,
) -> RenderedArtifact {
    RenderedArtifact {
        card_id: card.id,
        card_name: card.name.clone(),
        position,
        display: card.display,
        content,
        row_count,
        truncation: None,
        attachments: Vec::new(),
        omitted_attachments: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
