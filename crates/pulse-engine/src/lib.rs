//! Pulse orchestrator.
//!
//! [`PulseSender`] drives one notification send: it loads the notification,
//! checks the creator's permissions, runs each card's query, decides whether
//! the pulse or alert fires, renders, builds and dispatches per channel, and
//! deletes one-shot alerts afterwards.

pub mod collaborators;
pub mod condition;
pub mod engine;
pub mod events;
pub mod memory_store;

pub use collaborators::{CardPermissions, NotificationStore, QueryRunner};
pub use condition::{evaluate_alert, evaluate_pulse, Decision, SkipReason};
pub use engine::{PulseSender, SendConfig, SendOptions, SendReport};
pub use events::{EventEmitter, PulseEvent, SendState};
pub use memory_store::{CannedResult, Fixture, Grant, MemoryStore};
