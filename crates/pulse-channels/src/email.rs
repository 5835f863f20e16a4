//! Email delivery channel.

use std::sync::Arc;

use async_trait::async_trait;

use pulse_types::{ChannelId, ChannelKind, DeliveryResult, RenderedArtifact, Result};

use crate::builder::{build_email, BuildContext};
use crate::channel::{DeliveryChannel, DispatchTarget};
use crate::payload::Payload;
use crate::templates::EmailTemplates;
use crate::transport::{deliver, DeliveryConfig, EmailTransport};

pub struct EmailChannel {
    transport: Arc<dyn EmailTransport>,
    templates: EmailTemplates,
    delivery: DeliveryConfig,
}

impl EmailChannel {
    pub fn new(transport: Arc<dyn EmailTransport>, delivery: DeliveryConfig) -> Result<Self> {
        Ok(Self {
            transport,
            templates: EmailTemplates::new()?,
            delivery,
        })
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn build_payload(&self, ctx: &BuildContext<'_>, cards: &[RenderedArtifact]) -> Result<Payload> {
        build_email(ctx, cards, &self.templates).map(Payload::Email)
    }

    async fn dispatch(
        &self,
        channel_id: ChannelId,
        target: &DispatchTarget,
        payload: &Payload,
    ) -> DeliveryResult {
        let summary = payload.summary();
        let (DispatchTarget::Email { addresses }, Payload::Email(email)) = (target, payload) else {
            return DeliveryResult::failed(
                channel_id,
                self.kind(),
                target.to_string(),
                summary,
                "email channel received a non-email payload",
            );
        };

        if addresses.is_empty() {
            tracing::warn!(channel = channel_id, "Email channel has no recipients");
            return DeliveryResult::failed(
                channel_id,
                self.kind(),
                "",
                summary,
                "no recipients",
            );
        }

        let sent = deliver(&self.delivery, "send_email", || {
            self.transport
                .send_email(addresses, &email.subject, &email.parts)
        })
        .await;

        match sent {
            Ok(()) => {
                tracing::info!(
                    channel = channel_id,
                    recipients = addresses.len(),
                    "Email delivered"
                );
                DeliveryResult::delivered(channel_id, self.kind(), target.to_string(), summary)
            }
            Err(e) => {
                tracing::error!(channel = channel_id, error = %e, "Email delivery failed");
                DeliveryResult::failed(channel_id, self.kind(), target.to_string(), summary, e)
            }
        }
    }
}
