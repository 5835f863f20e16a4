//! Per-channel delivery outcomes returned to the caller of a send.

use serde::{Deserialize, Serialize};

use crate::model::{ChannelId, ChannelKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub channel_id: ChannelId,
    pub channel_kind: ChannelKind,
    /// Slack channel or comma-joined recipient addresses.
    pub target: String,
    /// Short description of what was sent (subject or header, card count).
    pub summary: String,
    pub status: DeliveryStatus,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl DeliveryResult {
    pub fn delivered(
        channel_id: ChannelId,
        channel_kind: ChannelKind,
        target: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            channel_id,
            channel_kind,
            target: target.into(),
            summary: summary.into(),
            status: DeliveryStatus::Delivered,
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn failed(
        channel_id: ChannelId,
        channel_kind: ChannelKind,
        target: impl Into<String>,
        summary: impl Into<String>,
        error: impl ToString,
    ) -> Self {
        Self {
            channel_id,
            channel_kind,
            target: target.into(),
            summary: summary.into(),
            status: DeliveryStatus::Failed {
                error: error.to_string(),
            },
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            DeliveryStatus::Failed { error } => Some(error),
            DeliveryStatus::Delivered => None,
        }
    }
}
