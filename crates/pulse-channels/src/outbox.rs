//! Filesystem transport that writes every message to a local outbox directory.
//!
//! Each email or Slack post becomes a numbered subdirectory holding a
//! `message.json` envelope plus the raw part files, which makes sends easy
//! to inspect without a mail server or Slack workspace.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use pulse_types::Result;

use crate::payload::{Disposition, MimePart};
use crate::transport::{EmailTransport, SlackTransport};

pub struct OutboxTransport {
    dir: PathBuf,
    counter: AtomicUsize,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn next_message_dir(&self, kind: &str) -> Result<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let dir = self.dir.join(format!("{n:04}-{kind}"));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

fn disposition_name(disposition: &Disposition) -> Value {
    match disposition {
        Disposition::Body => json!("body"),
        Disposition::Inline { content_id } => json!({ "inline": content_id }),
        Disposition::Attachment => json!("attachment"),
    }
}

#[async_trait]
impl EmailTransport for OutboxTransport {
    async fn send_email(&self, to: &[String], subject: &str, parts: &[MimePart]) -> Result<()> {
        let dir = self.next_message_dir("email").await?;
        for part in parts {
            tokio::fs::write(dir.join(&part.file_name), &part.bytes).await?;
        }
        let envelope = json!({
            "to": to,
            "subject": subject,
            "parts": parts.iter().map(|p| json!({
                "file_name": p.file_name,
                "content_type": p.content_type.to_string(),
                "disposition": disposition_name(&p.disposition),
                "size": p.bytes.len(),
            })).collect::<Vec<_>>(),
        });
        tokio::fs::write(dir.join("message.json"), serde_json::to_vec_pretty(&envelope)?).await?;
        tracing::debug!(path = %dir.display(), "Email written to outbox");
        Ok(())
    }
}

#[async_trait]
impl SlackTransport for OutboxTransport {
    async fn upload_image(&self, bytes: &[u8], name: &str, _channel: &str) -> Result<String> {
        let uploads = self.dir.join("uploads");
        tokio::fs::create_dir_all(&uploads).await?;
        tokio::fs::write(uploads.join(name), bytes).await?;
        Ok(format!("uploads/{name}"))
    }

    async fn post_message(
        &self,
        channel: &str,
        blocks: &[Value],
        attachments: &[Value],
    ) -> Result<()> {
        let dir = self.next_message_dir("slack").await?;
        let message = json!({
            "channel": channel,
            "blocks": blocks,
            "attachments": attachments,
        });
        tokio::fs::write(dir.join("message.json"), serde_json::to_vec_pretty(&message)?).await?;
        tracing::debug!(path = %dir.display(), "Slack message written to outbox");
        Ok(())
    }
}
