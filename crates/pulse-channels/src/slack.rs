//! Slack delivery channel: uploads card images, then posts one message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use pulse_types::{ChannelId, ChannelKind, DeliveryResult, RenderedArtifact, Result};

use crate::builder::{build_slack, BuildContext};
use crate::channel::{DeliveryChannel, DispatchTarget};
use crate::payload::{Payload, SlackPayload};
use crate::transport::{deliver, DeliveryConfig, SlackTransport};

pub struct SlackChannel {
    transport: Arc<dyn SlackTransport>,
    delivery: DeliveryConfig,
}

impl SlackChannel {
    pub fn new(transport: Arc<dyn SlackTransport>, delivery: DeliveryConfig) -> Self {
        Self {
            transport,
            delivery,
        }
    }

    /// Upload every image concurrently. Any failed upload fails the channel.
    async fn upload_all(
        &self,
        channel: &str,
        payload: &SlackPayload,
    ) -> Result<HashMap<String, String>> {
        let uploads = payload.attachments.iter().filter_map(|a| a.upload()).map(
            |(name, bytes)| async move {
                let file_id = deliver(&self.delivery, "upload_image", || {
                    self.transport.upload_image(bytes, name, channel)
                })
                .await?;
                tracing::debug!(attachment = name, file_id = %file_id, "Image uploaded");
                Ok::<_, pulse_types::PulseError>((name.to_string(), file_id))
            },
        );
        futures::future::join_all(uploads)
            .await
            .into_iter()
            .collect()
    }

    async fn send(&self, channel: &str, payload: &SlackPayload) -> Result<()> {
        let uploaded = self.upload_all(channel, payload).await?;
        let blocks = payload.blocks();
        let attachments = payload.attachments_json(&uploaded)?;
        deliver(&self.delivery, "post_message", || {
            self.transport.post_message(channel, &blocks, &attachments)
        })
        .await
    }
}

#[async_trait]
impl DeliveryChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    fn build_payload(&self, ctx: &BuildContext<'_>, cards: &[RenderedArtifact]) -> Result<Payload> {
        Ok(Payload::Slack(build_slack(ctx, cards)))
    }

    async fn dispatch(
        &self,
        channel_id: ChannelId,
        target: &DispatchTarget,
        payload: &Payload,
    ) -> DeliveryResult {
        let summary = payload.summary();
        let (DispatchTarget::Slack { channel }, Payload::Slack(slack)) = (target, payload) else {
            return DeliveryResult::failed(
                channel_id,
                self.kind(),
                target.to_string(),
                summary,
                "slack channel received a non-slack payload",
            );
        };

        match self.send(channel, slack).await {
            Ok(()) => {
                tracing::info!(
                    channel = channel_id,
                    slack_channel = %channel,
                    uploads = slack.upload_count(),
                    "Slack message posted"
                );
                DeliveryResult::delivered(channel_id, self.kind(), channel.clone(), summary)
            }
            Err(e) => {
                tracing::error!(channel = channel_id, error = %e, "Slack delivery failed");
                DeliveryResult::failed(channel_id, self.kind(), channel.clone(), summary, e)
            }
        }
    }
}
