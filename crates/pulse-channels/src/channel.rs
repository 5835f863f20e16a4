//! Delivery channel trait, dynamic dispatch wrapper, and channel registry.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use pulse_types::{ChannelId, ChannelKind, DeliveryResult, RenderedArtifact, Result};

use crate::builder::BuildContext;
use crate::payload::Payload;

// ---------------------------------------------------------------------------
// DispatchTarget
// ---------------------------------------------------------------------------

/// A channel's destination with recipients already resolved to addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    Email { addresses: Vec<String> },
    Slack { channel: String },
}

impl DispatchTarget {
    pub fn kind(&self) -> ChannelKind {
        match self {
            DispatchTarget::Email { .. } => ChannelKind::Email,
            DispatchTarget::Slack { .. } => ChannelKind::Slack,
        }
    }
}

impl fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchTarget::Email { addresses } => f.write_str(&addresses.join(", ")),
            DispatchTarget::Slack { channel } => f.write_str(channel),
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryChannel trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Assemble this channel kind's payload from rendered cards.
    fn build_payload(&self, ctx: &BuildContext<'_>, cards: &[RenderedArtifact]) -> Result<Payload>;

    /// Send the payload to the target. Failures are reported in the result,
    /// never raised, so one channel cannot stop the others.
    async fn dispatch(
        &self,
        channel_id: ChannelId,
        target: &DispatchTarget,
        payload: &Payload,
    ) -> DeliveryResult;
}

// ---------------------------------------------------------------------------
// DynChannel: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynChannel(Box<dyn DeliveryChannel>);

impl DynChannel {
    pub fn new(channel: impl DeliveryChannel + 'static) -> Self {
        Self(Box::new(channel))
    }

    pub fn kind(&self) -> ChannelKind {
        self.0.kind()
    }

    pub fn build_payload(
        &self,
        ctx: &BuildContext<'_>,
        cards: &[RenderedArtifact],
    ) -> Result<Payload> {
        self.0.build_payload(ctx, cards)
    }

    pub async fn dispatch(
        &self,
        channel_id: ChannelId,
        target: &DispatchTarget,
        payload: &Payload,
    ) -> DeliveryResult {
        if target.kind() != payload.kind() || target.kind() != self.kind() {
            return DeliveryResult::failed(
                channel_id,
                self.kind(),
                target.to_string(),
                payload.summary(),
                format!(
                    "{} channel cannot deliver a {} payload to a {} target",
                    self.kind(),
                    payload.kind(),
                    target.kind()
                ),
            );
        }
        self.0.dispatch(channel_id, target, payload).await
    }
}

// ---------------------------------------------------------------------------
// ChannelRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelKind, DynChannel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: impl DeliveryChannel + 'static) {
        self.channels.insert(channel.kind(), DynChannel::new(channel));
    }

    pub fn get(&self, kind: ChannelKind) -> Option<&DynChannel> {
        self.channels.get(&kind)
    }

    pub fn has(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<_> = self.channels.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
