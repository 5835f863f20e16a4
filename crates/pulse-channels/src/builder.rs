//! Notification builder: assembles rendered cards into channel payloads.

use std::collections::HashSet;

use pulse_types::{
    AlertCondition, ArtifactContent, AttachmentFormat, CardId, Notification, RenderedArtifact,
    Result, User,
};

use crate::payload::{EmailPayload, MimePart, SlackAttachment, SlackBody, SlackPayload};
use crate::templates::{CardBlock, EmailBody, EmailTemplates};

pub const NO_RESULTS_TEXT: &str = "No results.";
pub const MORE_RESULTS_TEXT: &str = "More results have been included as a file attachment.";
pub const TOO_LARGE_TEXT: &str = "The full results were too large to attach.";

/// Everything about the notification the builders need besides the cards.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub notification: &'a Notification,
    pub creator: &'a User,
    /// Goal of the alert card, for `goal` alerts.
    pub goal: Option<f64>,
    pub site_url: Option<&'a url::Url>,
}

impl<'a> BuildContext<'a> {
    pub fn question_url(&self, card_id: CardId) -> Option<String> {
        let base = self.site_url?;
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        base.join(&format!("question/{card_id}"))
            .ok()
            .map(String::from)
    }
}

// ---------------------------------------------------------------------------
// Titles
// ---------------------------------------------------------------------------

pub fn condition_phrase(notification: &Notification) -> &'static str {
    match notification.alert_condition {
        AlertCondition::Goal if notification.alert_above_goal => "reached its goal",
        AlertCondition::Goal => "gone below its goal",
        AlertCondition::Rows | AlertCondition::None => "results",
    }
}

/// "Pulse: <name>" or "Alert: <card> has <condition>".
pub fn notification_title(notification: &Notification, first_card: Option<&str>) -> String {
    if notification.is_alert() {
        format!(
            "Alert: {} has {}",
            first_card.unwrap_or(&notification.name),
            condition_phrase(notification)
        )
    } else {
        format!("Pulse: {}", notification.name)
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn goal_note(ctx: &BuildContext<'_>) -> Option<String> {
    let goal = ctx.goal?;
    if ctx.notification.alert_condition != AlertCondition::Goal {
        return None;
    }
    Some(format!(
        "This question has {} of {}.",
        condition_phrase(ctx.notification),
        format_number(goal)
    ))
}

fn sorted(cards: &[RenderedArtifact]) -> Vec<&RenderedArtifact> {
    let mut cards: Vec<&RenderedArtifact> = cards.iter().collect();
    cards.sort_by_key(|a| (a.position, a.card_id));
    cards
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

fn content_id(artifact: &RenderedArtifact) -> String {
    format!("card-{}-{}@pulse", artifact.card_id, artifact.position)
}

/// Cards with the same name slug to the same file name; later ones get the
/// card id appended.
fn unique_file_name(name: &str, card_id: CardId, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (name, String::new()),
    };
    let mut candidate = format!("{stem}_{card_id}{ext}");
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{stem}_{card_id}_{n}{ext}");
        n += 1;
    }
    candidate
}

/// Truncation and attachment notes; these only ever appear in email.
fn email_notes(artifact: &RenderedArtifact) -> Vec<String> {
    let mut notes = Vec::new();
    if let Some(t) = artifact.truncation {
        if t.shown_rows < t.total_rows {
            notes.push(format!("Showing first {} of {} rows.", t.shown_rows, t.total_rows));
        }
        if t.shown_columns < t.total_columns {
            notes.push(format!("Showing {} of {} columns.", t.shown_columns, t.total_columns));
        }
        if !artifact.attachments.is_empty() {
            notes.push(MORE_RESULTS_TEXT.to_string());
        }
    }
    if !artifact.omitted_attachments.is_empty() {
        notes.push(TOO_LARGE_TEXT.to_string());
    }
    notes
}

pub fn build_email(
    ctx: &BuildContext<'_>,
    cards: &[RenderedArtifact],
    templates: &EmailTemplates,
) -> Result<EmailPayload> {
    let cards = sorted(cards);
    let title = notification_title(ctx.notification, cards.first().map(|a| a.card_name.as_str()));

    let mut blocks = Vec::with_capacity(cards.len());
    let mut inline = Vec::new();
    let mut files = Vec::new();
    let mut file_names = HashSet::new();

    for (index, artifact) in cards.iter().enumerate() {
        let mut block = CardBlock {
            title: artifact.card_name.clone(),
            link: ctx.question_url(artifact.card_id),
            image_cid: None,
            text: None,
            notes: Vec::new(),
        };
        if index == 0 {
            block.notes.extend(goal_note(ctx));
        }
        block.notes.extend(email_notes(artifact));

        match &artifact.content {
            ArtifactContent::Image(bytes) => {
                let cid = content_id(artifact);
                inline.push(MimePart::inline_png(
                    cid.clone(),
                    format!("card_{}_{}.png", artifact.card_id, artifact.position),
                    bytes.clone(),
                ));
                block.image_cid = Some(cid);
            }
            ArtifactContent::Text(text) => block.text = Some(text.clone()),
            ArtifactContent::Empty => block.text = Some(NO_RESULTS_TEXT.to_string()),
            ArtifactContent::Placeholder { reason } => block.text = Some(reason.clone()),
        }

        for file in &artifact.attachments {
            let content_type: mime::Mime = match file.format {
                AttachmentFormat::Csv => mime::TEXT_CSV,
                AttachmentFormat::Xls => file
                    .format
                    .content_type()
                    .parse()
                    .unwrap_or(mime::APPLICATION_OCTET_STREAM),
            };
            files.push(MimePart::attachment(
                content_type,
                unique_file_name(&file.file_name, artifact.card_id, &mut file_names),
                file.bytes.clone(),
            ));
        }
        blocks.push(block);
    }

    let sent_by = (!ctx.notification.is_alert()).then(|| ctx.creator.common_name());
    let html = templates.render_body(&EmailBody {
        title: title.clone(),
        sent_by,
        cards: blocks,
    })?;

    let mut parts = Vec::with_capacity(1 + inline.len() + files.len());
    parts.push(MimePart::html(html));
    parts.extend(inline);
    parts.extend(files);

    Ok(EmailPayload {
        subject: title,
        parts,
    })
}

// ---------------------------------------------------------------------------
// Slack
// ---------------------------------------------------------------------------

pub fn build_slack(ctx: &BuildContext<'_>, cards: &[RenderedArtifact]) -> SlackPayload {
    let cards = sorted(cards);
    let title = notification_title(ctx.notification, cards.first().map(|a| a.card_name.as_str()));

    let attachments = cards
        .iter()
        .map(|artifact| {
            let body = match &artifact.content {
                ArtifactContent::Image(bytes) => SlackBody::Upload {
                    attachment_name: format!("card_{}_{}.png", artifact.card_id, artifact.position),
                    bytes: bytes.clone(),
                },
                ArtifactContent::Text(text) => SlackBody::Preformatted(text.clone()),
                ArtifactContent::Empty => SlackBody::Message(NO_RESULTS_TEXT.to_string()),
                ArtifactContent::Placeholder { reason } => SlackBody::Message(reason.clone()),
            };
            SlackAttachment {
                card_id: artifact.card_id,
                title: artifact.card_name.clone(),
                title_link: ctx.question_url(artifact.card_id),
                body,
            }
        })
        .collect();

    SlackPayload {
        header: format!("🔔 {title}"),
        context: (!ctx.notification.is_alert())
            .then(|| format!("Sent by {}", ctx.creator.common_name())),
        attachments,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
