//! Shared types, errors, and data model for the pulse delivery pipeline.
//!
//! This crate provides the foundational types used across all other pulse crates:
//! - `PulseError`: unified error taxonomy
//! - `Notification`, `Card`, `Channel`, `User`: read models of stored configuration
//! - `QueryResult`: rows and columns handed back by the query collaborator
//! - `RenderedArtifact`: per-card output of the renderer
//! - `DeliveryResult`: per-channel outcome of a send

pub mod artifact;
pub mod delivery;
pub mod model;
pub mod query;

pub use artifact::{ArtifactContent, AttachmentFile, AttachmentFormat, RenderedArtifact, Truncation};
pub use delivery::{DeliveryResult, DeliveryStatus};
pub use model::{
    AlertCondition, Card, CardId, CardRef, Channel, ChannelId, ChannelKind, ChannelTarget,
    DeliveryMode, DisplayKind, Notification, NotificationId, Recipient, User, UserId,
};
pub use query::{Column, ColumnRole, QueryConstraints, QueryResult};

/// Unified error type for all pulse subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    // === Fatal: abort the whole send before any side effect ===
    #[error("User {user} is not permitted to view card {card}")]
    Permission { user: UserId, card: CardId },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Recovered per card ===
    #[error("Failed to render card {card}: {message}")]
    Render { card: CardId, message: String },

    #[error("Attachment '{name}' is {size} bytes, exceeding the {limit} byte limit")]
    AttachmentSize {
        name: String,
        size: usize,
        limit: usize,
    },

    #[error("Query for card {card} failed: {message}")]
    Query { card: CardId, message: String },

    // === Recovered per channel ===
    #[error("Transport error on {channel}: {message}")]
    Transport {
        channel: String,
        message: String,
        retryable: bool,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PulseError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PulseError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns `true` if the error aborts a send outright instead of being
    /// isolated to a single card or channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PulseError::Permission { .. } | PulseError::NotFound { .. } | PulseError::Config(_)
        )
    }

    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PulseError::Timeout { .. } | PulseError::Transport { retryable: true, .. }
        )
    }
}

/// A convenience alias for `Result<T, PulseError>`.
pub type Result<T> = std::result::Result<T, PulseError>;
