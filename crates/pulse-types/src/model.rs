//! Read models for stored notification configuration.

use serde::{Deserialize, Serialize};

pub type NotificationId = u64;
pub type CardId = u64;
pub type UserId = u64;
pub type ChannelId = u64;

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Scheduled digest of one or more cards.
    Pulse,
    /// Conditional notification tied to a single card.
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    #[default]
    None,
    Rows,
    Goal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub name: String,
    pub mode: DeliveryMode,
    pub creator_id: UserId,
    #[serde(default)]
    pub skip_if_empty: bool,
    #[serde(default)]
    pub alert_condition: AlertCondition,
    #[serde(default)]
    pub alert_first_only: bool,
    #[serde(default)]
    pub alert_above_goal: bool,
    #[serde(default)]
    pub cards: Vec<CardRef>,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl Notification {
    pub fn is_alert(&self) -> bool {
        self.mode == DeliveryMode::Alert
    }

    /// Card references sorted by position. Storage order is never trusted.
    pub fn ordered_cards(&self) -> Vec<CardRef> {
        let mut cards = self.cards.clone();
        cards.sort_by_key(|c| (c.position, c.card_id));
        cards
    }

    /// Enabled channels sorted by id.
    pub fn ordered_channels(&self) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self.channels.iter().filter(|c| c.enabled).collect();
        channels.sort_by_key(|c| c.id);
        channels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRef {
    pub card_id: CardId,
    pub position: u32,
}

// ---------------------------------------------------------------------------
// Card
// ---------------------------------------------------------------------------

/// Closed set of display types a card can be rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayKind {
    Scalar,
    Progress,
    Table,
    Line,
    Area,
    Bar,
    Combo,
    Row,
    Pie,
}

impl DisplayKind {
    /// Display types plotted over a time (or ordinal) axis.
    pub fn is_time_series(self) -> bool {
        matches!(
            self,
            DisplayKind::Line | DisplayKind::Area | DisplayKind::Bar | DisplayKind::Combo
        )
    }

    /// Display types whose content can be delivered as plain text instead of an image.
    pub fn is_textual(self) -> bool {
        matches!(self, DisplayKind::Scalar | DisplayKind::Table)
    }

    /// Visualization setting holding the goal for this display, if it supports one.
    pub fn goal_setting_key(self) -> Option<&'static str> {
        match self {
            DisplayKind::Progress => Some("progress.goal"),
            k if k.is_time_series() => Some("graph.goal_value"),
            _ => None,
        }
    }

    /// Raw-row displays are bounded by the bare-row constraint.
    pub fn is_bare_rows(self) -> bool {
        matches!(self, DisplayKind::Table)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    pub display: DisplayKind,
    /// Opaque query definition handed to the query collaborator.
    #[serde(default)]
    pub query: serde_json::Value,
    #[serde(default)]
    pub visualization_settings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub include_csv: bool,
    #[serde(default)]
    pub include_xls: bool,
}

impl Card {
    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.visualization_settings.get(key)
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl User {
    /// "First Last", falling back to the email address.
    pub fn common_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() {
            self.email.clone()
        } else {
            parts.join(" ")
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Slack,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Email => f.write_str("email"),
            ChannelKind::Slack => f.write_str("slack"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
    User { user_id: UserId },
    Address { email: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel_type", rename_all = "snake_case")]
pub enum ChannelTarget {
    Email { recipients: Vec<Recipient> },
    Slack { channel: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub target: ChannelTarget,
}

fn default_enabled() -> bool {
    true
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self.target {
            ChannelTarget::Email { .. } => ChannelKind::Email,
            ChannelTarget::Slack { .. } => ChannelKind::Slack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification_json() -> serde_json::Value {
        serde_json::json!({
            "id": 1,
            "name": "Weekly sales",
            "mode": "pulse",
            "creator_id": 3,
            "cards": [
                {"card_id": 20, "position": 1},
                {"card_id": 10, "position": 0}
            ],
            "channels": [
                {"id": 5, "channel_type": "slack", "channel": "#sales"},
                {"id": 2, "channel_type": "email", "recipients": [
                    {"user_id": 3},
                    {"email": "ops@example.com"}
                ]},
                {"id": 9, "enabled": false, "channel_type": "slack", "channel": "#muted"}
            ]
        })
    }

    #[test]
    fn notification_deserializes_with_defaults() {
        let n: Notification = serde_json::from_value(notification_json()).unwrap();
        assert_eq!(n.mode, DeliveryMode::Pulse);
        assert!(!n.skip_if_empty);
        assert_eq!(n.alert_condition, AlertCondition::None);
        assert!(!n.is_alert());
    }

    #[test]
    fn ordered_cards_sorts_by_position() {
        let n: Notification = serde_json::from_value(notification_json()).unwrap();
        let ids: Vec<CardId> = n.ordered_cards().iter().map(|c| c.card_id).collect();
        assert_eq!(ids, vec![10, 20]);
    }

    #[test]
    fn ordered_channels_skips_disabled_and_sorts() {
        let n: Notification = serde_json::from_value(notification_json()).unwrap();
        let channels = n.ordered_channels();
        let ids: Vec<ChannelId> = channels.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 5]);
        assert_eq!(channels[0].kind(), ChannelKind::Email);
        assert_eq!(channels[1].kind(), ChannelKind::Slack);
    }

    #[test]
    fn recipients_deserialize_untagged() {
        let n: Notification = serde_json::from_value(notification_json()).unwrap();
        let email = n.channels.iter().find(|c| c.id == 2).unwrap();
        match &email.target {
            ChannelTarget::Email { recipients } => {
                assert!(matches!(recipients[0], Recipient::User { user_id: 3 }));
                let Recipient::Address { email } = &recipients[1] else {
                    panic!("expected address recipient, got {:?}", recipients[1]);
                };
                assert_eq!(email, "ops@example.com");
            }
            other => panic!("expected email target, got {other:?}"),
        }
    }

    #[test]
    fn goal_setting_keys() {
        assert_eq!(DisplayKind::Progress.goal_setting_key(), Some("progress.goal"));
        assert_eq!(DisplayKind::Line.goal_setting_key(), Some("graph.goal_value"));
        assert_eq!(DisplayKind::Combo.goal_setting_key(), Some("graph.goal_value"));
        assert_eq!(DisplayKind::Table.goal_setting_key(), None);
        assert_eq!(DisplayKind::Pie.goal_setting_key(), None);
    }

    #[test]
    fn display_kind_classes() {
        assert!(DisplayKind::Scalar.is_textual());
        assert!(DisplayKind::Table.is_textual());
        assert!(!DisplayKind::Line.is_textual());
        assert!(DisplayKind::Bar.is_time_series());
        assert!(!DisplayKind::Row.is_time_series());
    }

    #[test]
    fn common_name_falls_back_to_email() {
        let named = User {
            id: 1,
            email: "ada@example.com".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
        };
        assert_eq!(named.common_name(), "Ada Lovelace");

        let anonymous = User {
            id: 2,
            email: "bot@example.com".into(),
            first_name: None,
            last_name: Some(" ".into()),
        };
        assert_eq!(anonymous.common_name(), "bot@example.com");
    }
}
