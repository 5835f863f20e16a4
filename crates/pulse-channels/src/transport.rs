//! Transport collaborators: the boundary where payloads leave the process.

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pulse_types::Result;

use crate::payload::MimePart;
use crate::retry::{execute_with_retry, with_timeout, BackoffPolicy};

// ---------------------------------------------------------------------------
// Transport traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Send one message to every address in `to`.
    async fn send_email(&self, to: &[String], subject: &str, parts: &[MimePart]) -> Result<()>;
}

#[async_trait]
pub trait SlackTransport: Send + Sync {
    /// Upload an image and return the file id image blocks reference it by.
    async fn upload_image(&self, bytes: &[u8], name: &str, channel: &str) -> Result<String>;

    async fn post_message(&self, channel: &str, blocks: &[Value], attachments: &[Value])
        -> Result<()>;
}

// ---------------------------------------------------------------------------
// DeliveryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Per-call limit on every transport operation.
    pub transport_timeout_ms: u64,
    pub max_retries: usize,
    pub backoff: BackoffPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            transport_timeout_ms: 30_000,
            max_retries: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Run one transport call under the configured timeout, retrying transient failures.
pub async fn deliver<T, F, Fut>(config: &DeliveryConfig, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    execute_with_retry(
        || with_timeout(config.transport_timeout_ms, operation, f()),
        config.max_retries,
        &config.backoff,
        operation,
    )
    .await
}
