//! Payload builders, delivery channels, and transports.
//!
//! The builder turns a notification's rendered cards into one payload per
//! channel kind. Channels hand those payloads to a transport: the Slack Web
//! API, a local outbox directory, or any other [`EmailTransport`] /
//! [`SlackTransport`] implementation.

pub mod builder;
pub mod channel;
pub mod email;
pub mod outbox;
pub mod payload;
pub mod retry;
pub mod slack;
pub mod slack_web;
pub mod templates;
pub mod transport;

pub use builder::{build_email, build_slack, notification_title, BuildContext};
pub use channel::{ChannelRegistry, DeliveryChannel, DispatchTarget, DynChannel};
pub use email::EmailChannel;
pub use outbox::OutboxTransport;
pub use payload::{
    Disposition, EmailPayload, MimePart, Payload, SlackAttachment, SlackBody, SlackPayload,
};
pub use retry::{execute_with_retry, with_timeout, BackoffPolicy};
pub use slack::SlackChannel;
pub use slack_web::SlackWebClient;
pub use templates::EmailTemplates;
pub use transport::{deliver, DeliveryConfig, EmailTransport, SlackTransport};
