//! Channel-specific payloads produced by the builders and consumed by dispatchers.

use std::collections::HashMap;

use serde_json::{json, Value};

use pulse_types::{CardId, ChannelKind, PulseError, Result};

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The HTML body of the message.
    Body,
    /// Referenced from the body via `cid:<content_id>`.
    Inline { content_id: String },
    Attachment,
}

#[derive(Debug, Clone)]
pub struct MimePart {
    pub content_type: mime::Mime,
    pub file_name: String,
    pub disposition: Disposition,
    pub bytes: Vec<u8>,
}

impl MimePart {
    pub fn html(body: String) -> Self {
        Self {
            content_type: mime::TEXT_HTML_UTF_8,
            file_name: "body.html".to_string(),
            disposition: Disposition::Body,
            bytes: body.into_bytes(),
        }
    }

    pub fn inline_png(content_id: String, file_name: String, bytes: Vec<u8>) -> Self {
        Self {
            content_type: mime::IMAGE_PNG,
            file_name,
            disposition: Disposition::Inline { content_id },
            bytes,
        }
    }

    pub fn attachment(content_type: mime::Mime, file_name: String, bytes: Vec<u8>) -> Self {
        Self {
            content_type,
            file_name,
            disposition: Disposition::Attachment,
            bytes,
        }
    }

    pub fn is_attachment(&self) -> bool {
        self.disposition == Disposition::Attachment
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.disposition, Disposition::Inline { .. })
    }
}

/// An email ready for transport. The first part is always the HTML body,
/// followed by inline images and then file attachments, each in card order.
#[derive(Debug, Clone)]
pub struct EmailPayload {
    pub subject: String,
    pub parts: Vec<MimePart>,
}

impl EmailPayload {
    pub fn html_body(&self) -> &str {
        self.parts
            .iter()
            .find(|p| p.disposition == Disposition::Body)
            .and_then(|p| std::str::from_utf8(&p.bytes).ok())
            .unwrap_or_default()
    }

    pub fn inline_images(&self) -> impl Iterator<Item = &MimePart> {
        self.parts.iter().filter(|p| p.is_inline())
    }

    pub fn attachments(&self) -> impl Iterator<Item = &MimePart> {
        self.parts.iter().filter(|p| p.is_attachment())
    }
}

// ---------------------------------------------------------------------------
// Slack
// ---------------------------------------------------------------------------

/// Slack rejects the whole message when any block exceeds these.
pub const HEADER_TEXT_LIMIT: usize = 150;
pub const SECTION_TEXT_LIMIT: usize = 3000;
pub const ALT_TEXT_LIMIT: usize = 2000;

const FENCE: &str = "```";

/// Cut `text` to at most `max` characters, ending in `…` when shortened.
pub fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut cut: String = text.chars().take(max - 1).collect();
    cut.push('…');
    cut
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackBody {
    /// Image bytes that must be uploaded before the message is posted.
    Upload { attachment_name: String, bytes: Vec<u8> },
    /// Raw text captured by the renderer, sent as a preformatted block.
    Preformatted(String),
    /// Plain message for empty or undisplayable cards.
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackAttachment {
    pub card_id: CardId,
    pub title: String,
    pub title_link: Option<String>,
    pub body: SlackBody,
}

impl SlackAttachment {
    pub fn upload(&self) -> Option<(&str, &[u8])> {
        match &self.body {
            SlackBody::Upload {
                attachment_name,
                bytes,
            } => Some((attachment_name, bytes)),
            _ => None,
        }
    }

    /// Slack attachment JSON. Upload bodies resolve through `uploaded`
    /// (attachment name → Slack file id) and fail if the upload never happened.
    pub fn to_json(&self, uploaded: &HashMap<String, String>) -> Result<Value> {
        let block = match &self.body {
            SlackBody::Upload {
                attachment_name, ..
            } => {
                let file_id = uploaded.get(attachment_name).ok_or_else(|| {
                    PulseError::Other(format!("Image '{attachment_name}' was not uploaded"))
                })?;
                json!({
                    "type": "image",
                    "slack_file": { "id": file_id },
                    "alt_text": truncate_with_ellipsis(&self.title, ALT_TEXT_LIMIT),
                })
            }
            SlackBody::Preformatted(text) => {
                // Two fences plus their newlines.
                let room = SECTION_TEXT_LIMIT - 2 * (FENCE.len() + 1);
                let text = truncate_with_ellipsis(text, room);
                json!({
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("{FENCE}\n{text}\n{FENCE}") }
                })
            }
            SlackBody::Message(text) => json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": truncate_with_ellipsis(text, SECTION_TEXT_LIMIT),
                }
            }),
        };

        let mut attachment = json!({
            "fallback": self.title,
            "title": self.title,
            "blocks": [block],
        });
        if let Some(link) = &self.title_link {
            attachment["title_link"] = json!(link);
        }
        Ok(attachment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackPayload {
    pub header: String,
    /// "Sent by …" line; pulses only.
    pub context: Option<String>,
    pub attachments: Vec<SlackAttachment>,
}

impl SlackPayload {
    pub fn blocks(&self) -> Vec<Value> {
        let mut blocks = vec![json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": truncate_with_ellipsis(&self.header, HEADER_TEXT_LIMIT),
                "emoji": true,
            }
        })];
        if let Some(context) = &self.context {
            blocks.push(json!({
                "type": "context",
                "elements": [{ "type": "mrkdwn", "text": context }]
            }));
        }
        blocks
    }

    pub fn attachments_json(&self, uploaded: &HashMap<String, String>) -> Result<Vec<Value>> {
        self.attachments.iter().map(|a| a.to_json(uploaded)).collect()
    }

    pub fn upload_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.upload().is_some()).count()
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Payload {
    Email(EmailPayload),
    Slack(SlackPayload),
}

impl Payload {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Payload::Email(_) => ChannelKind::Email,
            Payload::Slack(_) => ChannelKind::Slack,
        }
    }

    /// One-line description recorded in delivery results.
    pub fn summary(&self) -> String {
        match self {
            Payload::Email(email) => format!(
                "{} ({} images, {} attachments)",
                email.subject,
                email.inline_images().count(),
                email.attachments().count()
            ),
            Payload::Slack(slack) => {
                format!("{} ({} cards)", slack.header, slack.attachments.len())
            }
        }
    }
}
