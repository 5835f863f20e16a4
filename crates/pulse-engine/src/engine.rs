//! Pulse orchestrator: one send of one notification, end to end.
//!
//! A send walks `Loaded → Authorized → Evaluated → Rendered → Dispatched →
//! Finalized`. Everything that can abort the send (missing records,
//! permissions, goal configuration, payload assembly) happens before the
//! first dispatch, so a send either reaches every channel or none of them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use pulse_channels::{
    with_timeout, BuildContext, ChannelRegistry, DeliveryConfig, DispatchTarget, DynChannel,
    Payload,
};
use pulse_render::{
    goal_value, ImageRenderer, RenderConfig, Rendered, ResultRenderer, QUERY_FAILED_TEXT,
};
use pulse_types::{
    AlertCondition, Card, CardId, CardRef, Channel, ChannelKind, ChannelTarget, DeliveryMode,
    DeliveryResult, Notification, NotificationId, PulseError, QueryConstraints, QueryResult,
    Recipient, RenderedArtifact, Result, User,
};

use crate::collaborators::{CardPermissions, NotificationStore, QueryRunner};
use crate::condition::{evaluate_alert, evaluate_pulse, Decision, SkipReason};
use crate::events::{EventEmitter, PulseEvent, SendState};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    /// System-wide row limits, overridable per send.
    pub constraints: QueryConstraints,
    pub render: RenderConfig,
    /// Transport timeouts and retries for the channels built from this config.
    pub delivery: DeliveryConfig,
    pub query_timeout_ms: u64,
    /// Base URL for deep links back to each question.
    pub site_url: Option<url::Url>,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            constraints: QueryConstraints::default(),
            render: RenderConfig::default(),
            delivery: DeliveryConfig::default(),
            query_timeout_ms: 60_000,
            site_url: None,
        }
    }
}

/// Per-send overrides of the system configuration.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub constraints: Option<QueryConstraints>,
}

/// Outcome of one send.
#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub send_id: Uuid,
    pub notification_id: NotificationId,
    pub state: SendState,
    pub skipped: Option<SkipReason>,
    /// A one-shot alert was removed from the store.
    pub deleted: bool,
    /// Cards whose query failed or timed out and went out as placeholders.
    pub failed_cards: Vec<CardId>,
    pub deliveries: Vec<DeliveryResult>,
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

/// A card with its query outcome. `result` is `None` when the query failed.
struct CardRun {
    card: Card,
    position: u32,
    result: Option<QueryResult>,
}

/// A channel whose handler and recipients were resolved before dispatch.
struct PlannedDispatch<'a> {
    channel: &'a Channel,
    handler: &'a DynChannel,
    target: DispatchTarget,
}

// ---------------------------------------------------------------------------
// PulseSender
// ---------------------------------------------------------------------------

pub struct PulseSender {
    store: Arc<dyn NotificationStore>,
    queries: Arc<dyn QueryRunner>,
    permissions: Arc<dyn CardPermissions>,
    renderer: ResultRenderer,
    channels: ChannelRegistry,
    config: SendConfig,
    events: EventEmitter,
}

impl PulseSender {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        queries: Arc<dyn QueryRunner>,
        permissions: Arc<dyn CardPermissions>,
        images: Arc<dyn ImageRenderer>,
        channels: ChannelRegistry,
        config: SendConfig,
    ) -> Self {
        Self {
            store,
            queries,
            permissions,
            renderer: ResultRenderer::new(images, config.render.clone()),
            channels,
            config,
            events: EventEmitter::default(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn config(&self) -> &SendConfig {
        &self.config
    }

    /// Send a notification with the system configuration and return the
    /// per-channel delivery results.
    pub async fn send_notification(&self, id: NotificationId) -> Result<Vec<DeliveryResult>> {
        Ok(self
            .send_with_options(id, &SendOptions::default())
            .await?
            .deliveries)
    }

    pub async fn send_with_options(
        &self,
        id: NotificationId,
        options: &SendOptions,
    ) -> Result<SendReport> {
        let send_id = Uuid::new_v4();
        let span = tracing::info_span!("send", notification = id, send_id = %send_id);
        async {
            self.events.emit(PulseEvent::SendStarted {
                send_id,
                notification: id,
            });
            tracing::info!("Send started");

            let mut state = SendState::Loaded;
            match self.run(send_id, id, options, &mut state).await {
                Ok(report) => {
                    tracing::info!(
                        state = %report.state,
                        deliveries = report.deliveries.len(),
                        deleted = report.deleted,
                        "Send finished"
                    );
                    Ok(report)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Send aborted");
                    self.transition(send_id, &mut state, SendState::Aborted);
                    self.events.emit(PulseEvent::SendAborted {
                        send_id,
                        error: e.to_string(),
                    });
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn transition(&self, send_id: Uuid, current: &mut SendState, next: SendState) {
        if !current.advance(next) {
            tracing::debug!(state = %current, ignored = %next, "Send already ended");
            return;
        }
        tracing::debug!(state = %next, "State changed");
        self.events.emit(PulseEvent::StateChanged {
            send_id,
            state: next,
        });
    }

    async fn run(
        &self,
        send_id: Uuid,
        id: NotificationId,
        options: &SendOptions,
        state: &mut SendState,
    ) -> Result<SendReport> {
        let constraints = options.constraints.unwrap_or(self.config.constraints);
        let mut report = SendReport {
            send_id,
            notification_id: id,
            state: SendState::Loaded,
            skipped: None,
            deleted: false,
            failed_cards: Vec::new(),
            deliveries: Vec::new(),
        };

        // Loaded
        let (notification, creator, cards) = self.load(id).await?;
        self.transition(send_id, state, SendState::Loaded);

        // Authorized
        self.authorize(&creator, &cards).await?;
        self.transition(send_id, state, SendState::Authorized);

        // Evaluated
        let cards = if notification.is_alert() {
            cards.into_iter().take(1).collect()
        } else {
            cards
        };
        let runs = self.execute_queries(send_id, cards, &constraints).await?;
        report.failed_cards = runs
            .iter()
            .filter(|run| run.result.is_none())
            .map(|run| run.card.id)
            .collect();
        let decision = decide(&notification, &runs)?;
        self.transition(send_id, state, SendState::Evaluated);

        if let Decision::Skip(reason) = decision {
            tracing::info!(%reason, "Send skipped");
            self.events.emit(PulseEvent::SendSkipped { send_id, reason });
            self.transition(send_id, state, SendState::Finalized);
            report.state = *state;
            report.skipped = Some(reason);
            return Ok(report);
        }

        // Rendered: payloads and targets are complete before any dispatch.
        let channels = notification.ordered_channels();
        let goal = (notification.is_alert() && notification.alert_condition == AlertCondition::Goal)
            .then(|| runs.first())
            .flatten()
            .and_then(|run| goal_value(&run.card).ok());
        let ctx = BuildContext {
            notification: &notification,
            creator: &creator,
            goal,
            site_url: self.config.site_url.as_ref(),
        };

        let kinds: BTreeSet<ChannelKind> = channels.iter().map(|c| c.kind()).collect();
        let mut payloads: HashMap<ChannelKind, Payload> = HashMap::new();
        for kind in kinds {
            let handler = self.handler(kind)?;
            let artifacts = self
                .render_cards(send_id, notification.mode, &runs, kind)
                .await;
            payloads.insert(kind, handler.build_payload(&ctx, &artifacts)?);
        }

        let mut plan = Vec::with_capacity(channels.len());
        for channel in channels {
            plan.push(PlannedDispatch {
                channel,
                handler: self.handler(channel.kind())?,
                target: self.resolve_target(channel).await?,
            });
        }
        self.transition(send_id, state, SendState::Rendered);

        // Dispatched
        for dispatch in plan {
            let kind = dispatch.channel.kind();
            let Some(payload) = payloads.get(&kind) else {
                continue;
            };
            let result = dispatch
                .handler
                .dispatch(dispatch.channel.id, &dispatch.target, payload)
                .await;
            self.events.emit(PulseEvent::ChannelDispatched {
                send_id,
                channel: dispatch.channel.id,
                channel_kind: kind,
                success: result.is_success(),
                error: result.error().map(str::to_string),
            });
            report.deliveries.push(result);
        }
        self.transition(send_id, state, SendState::Dispatched);

        // Finalized
        report.deleted = self
            .finalize(send_id, &notification, &report.deliveries)
            .await;
        self.transition(send_id, state, SendState::Finalized);
        report.state = *state;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn load(&self, id: NotificationId) -> Result<(Notification, User, Vec<(CardRef, Card)>)> {
        let notification = self
            .store
            .notification(id)
            .await?
            .ok_or_else(|| PulseError::not_found("Notification", id))?;
        let creator = self
            .store
            .user(notification.creator_id)
            .await?
            .ok_or_else(|| PulseError::not_found("User", notification.creator_id))?;

        let mut cards = Vec::with_capacity(notification.cards.len());
        for card_ref in notification.ordered_cards() {
            let card = self
                .store
                .card(card_ref.card_id)
                .await?
                .ok_or_else(|| PulseError::not_found("Card", card_ref.card_id))?;
            cards.push((card_ref, card));
        }
        tracing::debug!(
            cards = cards.len(),
            channels = notification.channels.len(),
            mode = ?notification.mode,
            "Notification loaded"
        );
        Ok((notification, creator, cards))
    }

    /// Every card must be visible to the creator; one failure aborts the send.
    async fn authorize(&self, creator: &User, cards: &[(CardRef, Card)]) -> Result<()> {
        for (_, card) in cards {
            if !self.permissions.can_view(creator, card).await? {
                tracing::warn!(card = card.id, user = creator.id, "Creator may not view card");
                return Err(PulseError::Permission {
                    user: creator.id,
                    card: card.id,
                });
            }
        }
        Ok(())
    }

    /// Run every card's query concurrently. Results keep the input order.
    ///
    /// A failed or timed-out query leaves its card without a result; a fatal
    /// error from the runner (permission, missing record, configuration)
    /// aborts the send.
    async fn execute_queries(
        &self,
        send_id: Uuid,
        cards: Vec<(CardRef, Card)>,
        constraints: &QueryConstraints,
    ) -> Result<Vec<CardRun>> {
        let outcomes = join_all(cards.into_iter().map(|(card_ref, card)| async move {
            let outcome = self.run_query(&card, constraints).await;
            (card_ref.position, card, outcome)
        }))
        .await;

        let mut runs = Vec::with_capacity(outcomes.len());
        for (position, card, outcome) in outcomes {
            let result = match outcome {
                Ok(result) => Some(result),
                Err(e) if e.is_fatal() => {
                    tracing::error!(card = card.id, error = %e, "Query failed fatally");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(card = card.id, error = %e, "Query failed");
                    self.events.emit(PulseEvent::CardQueryFailed {
                        send_id,
                        card: card.id,
                        error: e.to_string(),
                    });
                    None
                }
            };
            runs.push(CardRun {
                card,
                position,
                result,
            });
        }
        Ok(runs)
    }

    async fn run_query(&self, card: &Card, constraints: &QueryConstraints) -> Result<QueryResult> {
        let operation = format!("query for card {}", card.id);
        let outcome = with_timeout(
            self.config.query_timeout_ms,
            &operation,
            self.queries.run(card, constraints),
        )
        .await;

        let mut result = outcome?;
        let limit = constraints.limit_for(card.display);
        let removed = result.truncate_rows(limit);
        if removed > 0 {
            tracing::warn!(card = card.id, limit, removed, "Result exceeded row limit, truncated");
        }
        tracing::debug!(card = card.id, rows = result.row_count(), "Query finished");
        Ok(result)
    }

    async fn render_cards(
        &self,
        send_id: Uuid,
        mode: DeliveryMode,
        runs: &[CardRun],
        kind: ChannelKind,
    ) -> Vec<RenderedArtifact> {
        let rendered = join_all(runs.iter().map(|run| async move {
            match &run.result {
                Some(result) => {
                    match self
                        .renderer
                        .render(&run.card, run.position, result, kind, mode)
                        .await
                    {
                        Rendered::Artifact(artifact) => Some(artifact),
                        Rendered::NoData => None,
                    }
                }
                None => Some(ResultRenderer::placeholder(
                    &run.card,
                    run.position,
                    QUERY_FAILED_TEXT,
                )),
            }
        }))
        .await;

        let artifacts: Vec<RenderedArtifact> = rendered.into_iter().flatten().collect();
        for artifact in &artifacts {
            tracing::debug!(
                card = artifact.card_id,
                channel_kind = %kind,
                placeholder = artifact.is_placeholder(),
                truncated = artifact.is_truncated(),
                attachments = artifact.attachments.len(),
                "Card rendered"
            );
            self.events.emit(PulseEvent::CardRendered {
                send_id,
                card: artifact.card_id,
                channel_kind: kind,
                placeholder: artifact.is_placeholder(),
            });
        }
        artifacts
    }

    fn handler(&self, kind: ChannelKind) -> Result<&DynChannel> {
        self.channels
            .get(kind)
            .ok_or_else(|| PulseError::Config(format!("No delivery channel registered for {kind}")))
    }

    /// Resolve user recipients to addresses, de-duplicated case-insensitively
    /// in first-seen order.
    async fn resolve_target(&self, channel: &Channel) -> Result<DispatchTarget> {
        let recipients = match &channel.target {
            ChannelTarget::Slack { channel: slack } => {
                return Ok(DispatchTarget::Slack {
                    channel: slack.clone(),
                })
            }
            ChannelTarget::Email { recipients } => recipients,
        };

        let mut seen = HashSet::new();
        let mut addresses = Vec::new();
        for recipient in recipients {
            let address = match recipient {
                Recipient::Address { email } => email.trim().to_string(),
                Recipient::User { user_id } => match self.store.user(*user_id).await? {
                    Some(user) => user.email,
                    None => {
                        tracing::warn!(
                            channel = channel.id,
                            user = user_id,
                            "Recipient user not found, skipping"
                        );
                        continue;
                    }
                },
            };
            if !address.is_empty() && seen.insert(address.to_lowercase()) {
                addresses.push(address);
            }
        }
        Ok(DispatchTarget::Email { addresses })
    }

    /// Delete a one-shot alert that fired and reached at least one channel.
    async fn finalize(
        &self,
        send_id: Uuid,
        notification: &Notification,
        deliveries: &[DeliveryResult],
    ) -> bool {
        if !(notification.is_alert() && notification.alert_first_only) {
            return false;
        }
        if !deliveries.iter().any(DeliveryResult::is_success) {
            tracing::info!("One-shot alert kept, no delivery succeeded");
            return false;
        }
        match self.store.delete_notification(notification.id).await {
            Ok(()) => {
                tracing::info!("One-shot alert deleted");
                self.events.emit(PulseEvent::NotificationDeleted {
                    send_id,
                    notification: notification.id,
                });
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to delete one-shot alert");
                false
            }
        }
    }
}

/// Alerts are decided by their first card, pulses by all of them.
fn decide(notification: &Notification, runs: &[CardRun]) -> Result<Decision> {
    if notification.is_alert() {
        match runs.first() {
            Some(run) => evaluate_alert(notification, &run.card, run.result.as_ref()),
            None => Ok(Decision::Skip(SkipReason::NoResults)),
        }
    } else {
        Ok(evaluate_pulse(
            notification,
            runs.iter().map(|run| run.result.as_ref()),
        ))
    }
}
