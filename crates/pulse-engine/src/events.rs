//! Send lifecycle states and the event stream observers subscribe to.
//!
//! Emits [`PulseEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (audit logs, metrics, a UI) can follow a send without
//! coupling to the orchestrator internals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pulse_types::{CardId, ChannelId, ChannelKind, NotificationId};

use crate::condition::SkipReason;

/// `Loaded → Authorized → Evaluated → Rendered → Dispatched → Finalized`,
/// with `Aborted` reachable from any state before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    Loaded,
    Authorized,
    Evaluated,
    Rendered,
    Dispatched,
    Finalized,
    Aborted,
}

impl SendState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SendState::Finalized | SendState::Aborted)
    }

    /// Move to `next` unless the send already ended. Returns whether the
    /// state changed.
    pub fn advance(&mut self, next: SendState) -> bool {
        if self.is_terminal() {
            return false;
        }
        *self = next;
        true
    }
}

impl std::fmt::Display for SendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SendState::Loaded => "loaded",
            SendState::Authorized => "authorized",
            SendState::Evaluated => "evaluated",
            SendState::Rendered => "rendered",
            SendState::Dispatched => "dispatched",
            SendState::Finalized => "finalized",
            SendState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Events emitted during a send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PulseEvent {
    SendStarted {
        send_id: Uuid,
        notification: NotificationId,
    },
    StateChanged {
        send_id: Uuid,
        state: SendState,
    },
    /// The card's query failed or timed out; it renders as a placeholder.
    CardQueryFailed {
        send_id: Uuid,
        card: CardId,
        error: String,
    },
    CardRendered {
        send_id: Uuid,
        card: CardId,
        channel_kind: ChannelKind,
        placeholder: bool,
    },
    ChannelDispatched {
        send_id: Uuid,
        channel: ChannelId,
        channel_kind: ChannelKind,
        success: bool,
        error: Option<String>,
    },
    SendSkipped {
        send_id: Uuid,
        reason: SkipReason,
    },
    SendAborted {
        send_id: Uuid,
        error: String,
    },
    NotificationDeleted {
        send_id: Uuid,
        notification: NotificationId,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PulseEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers. Dropped if nobody listens.
    pub fn emit(&self, event: PulseEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PulseEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
