//! Slack Web API transport.

use async_trait::async_trait;
use serde_json::{json, Value};

use pulse_types::{PulseError, Result};

use crate::transport::SlackTransport;

pub const SLACK_TOKEN_ENV: &str = "SLACK_BOT_TOKEN";

// ---------------------------------------------------------------------------
// SlackWebClient
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SlackWebClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl SlackWebClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: "https://slack.com/api".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn from_env() -> Result<Self> {
        let token = std::env::var(SLACK_TOKEN_ENV)
            .map_err(|_| PulseError::Config(format!("{SLACK_TOKEN_ENV} is not set")))?;
        Ok(Self::new(token))
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), method)
    }

    async fn read(&self, method: &str, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport_error(e.to_string(), true))?;
        if !status.is_success() {
            return Err(map_error(status, &body));
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| transport_error(format!("{method}: invalid response: {e}"), false))?;
        check_ok(method, value)
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(message: String, retryable: bool) -> PulseError {
    PulseError::Transport {
        channel: "slack".into(),
        message,
        retryable,
    }
}

fn map_error(status: reqwest::StatusCode, body: &str) -> PulseError {
    let code = status.as_u16();
    let retryable = code == 429 || status.is_server_error();
    transport_error(format!("HTTP {code}: {}", body.trim()), retryable)
}

/// Slack reports most failures as `200 {"ok": false, "error": "..."}`.
fn check_ok(method: &str, value: Value) -> Result<Value> {
    if value["ok"].as_bool() == Some(true) {
        return Ok(value);
    }
    let error = value["error"].as_str().unwrap_or("unknown_error");
    Err(transport_error(
        format!("{method}: {error}"),
        error == "ratelimited" || error == "service_unavailable",
    ))
}

// ---------------------------------------------------------------------------
// SlackTransport impl
// ---------------------------------------------------------------------------

/// `files.getUploadURLExternal` answers with where to send the bytes and the
/// id the finished file will have.
fn upload_target(value: &Value) -> Result<(String, String)> {
    let url = value["upload_url"].as_str();
    let id = value["file_id"].as_str();
    match (url, id) {
        (Some(url), Some(id)) => Ok((url.to_string(), id.to_string())),
        _ => Err(transport_error(
            "files.getUploadURLExternal: response has no upload_url or file_id".into(),
            false,
        )),
    }
}

#[async_trait]
impl SlackTransport for SlackWebClient {
    async fn upload_image(&self, bytes: &[u8], name: &str, _channel: &str) -> Result<String> {
        let length = bytes.len().to_string();
        let resp = self
            .client
            .post(self.url("files.getUploadURLExternal"))
            .bearer_auth(&self.token)
            .form(&[("filename", name), ("length", length.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(e.to_string(), true))?;
        let value = self.read("files.getUploadURLExternal", resp).await?;
        let (upload_url, file_id) = upload_target(&value)?;

        let resp = self
            .client
            .post(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| transport_error(e.to_string(), true))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_error(status, &body));
        }

        // Not shared to a channel; image blocks reference it by id.
        let body = json!({ "files": [{ "id": file_id, "title": name }] });
        let resp = self
            .client
            .post(self.url("files.completeUploadExternal"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e.to_string(), true))?;
        self.read("files.completeUploadExternal", resp).await?;

        tracing::debug!(file_id = %file_id, name, "Slack file upload completed");
        Ok(file_id)
    }

    async fn post_message(
        &self,
        channel: &str,
        blocks: &[Value],
        attachments: &[Value],
    ) -> Result<()> {
        let body = json!({
            "channel": channel,
            "blocks": blocks,
            "attachments": attachments,
        });
        let resp = self
            .client
            .post(self.url("chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e.to_string(), true))?;
        self.read("chat.postMessage", resp).await.map(|_| ())
    }
}
