//! End-to-end sends through `PulseSender` with recording fakes for every
//! external collaborator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use pulse_channels::builder::MORE_RESULTS_TEXT;
use pulse_channels::{
    BackoffPolicy, ChannelRegistry, DeliveryConfig, EmailChannel, EmailTransport, MimePart,
    SlackChannel, SlackTransport,
};
use pulse_engine::{
    MemoryStore, NotificationStore, PulseEvent, PulseSender, QueryRunner, SendConfig, SendOptions,
    SendState, SkipReason,
};
use pulse_render::{ImageRenderer, QUERY_FAILED_TEXT};
use pulse_types::{
    AlertCondition, Card, CardId, CardRef, Channel, ChannelKind, ChannelTarget, Column,
    ColumnRole, DeliveryMode, DisplayKind, Notification, PulseError, QueryConstraints,
    QueryResult, Recipient, Result, User,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Deterministic image renderer: bytes depend only on the card and the data.
struct FakeImages;

#[async_trait]
impl ImageRenderer for FakeImages {
    async fn render_to_image(&self, card: &Card, result: &QueryResult) -> Result<Option<Vec<u8>>> {
        let mut bytes = format!("PNG card={} rows={}", card.id, result.row_count()).into_bytes();
        bytes.extend(serde_json::to_vec(&result.rows)?);
        Ok(Some(bytes))
    }
}

#[derive(Debug, Clone)]
struct SentEmail {
    to: Vec<String>,
    subject: String,
    parts: Vec<MimePart>,
}

impl SentEmail {
    fn html(&self) -> String {
        String::from_utf8(self.parts[0].bytes.clone()).unwrap()
    }

    fn attachment_names(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter(|p| p.is_attachment())
            .map(|p| p.file_name.clone())
            .collect()
    }

    fn inline_names(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter(|p| p.is_inline())
            .map(|p| p.file_name.clone())
            .collect()
    }
}

#[derive(Default)]
struct RecordingEmail {
    sent: Mutex<Vec<SentEmail>>,
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send_email(&self, to: &[String], subject: &str, parts: &[MimePart]) -> Result<()> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_vec(),
            subject: subject.to_string(),
            parts: parts.to_vec(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSlack {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    posts: Mutex<Vec<(String, Vec<Value>, Vec<Value>)>>,
    fail_posts: bool,
}

#[async_trait]
impl SlackTransport for RecordingSlack {
    async fn upload_image(&self, bytes: &[u8], name: &str, _channel: &str) -> Result<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((name.to_string(), bytes.to_vec()));
        Ok(format!("F_{name}"))
    }

    async fn post_message(
        &self,
        channel: &str,
        blocks: &[Value],
        attachments: &[Value],
    ) -> Result<()> {
        if self.fail_posts {
            return Err(PulseError::Transport {
                channel: "slack".into(),
                message: "channel_not_found".into(),
                retryable: false,
            });
        }
        self.posts
            .lock()
            .unwrap()
            .push((channel.to_string(), blocks.to_vec(), attachments.to_vec()));
        Ok(())
    }
}

/// Returns a fixed number of rows regardless of the constraints it is given.
struct UnboundedQueries {
    rows: usize,
}

#[async_trait]
impl QueryRunner for UnboundedQueries {
    async fn run(&self, _card: &Card, _constraints: &QueryConstraints) -> Result<QueryResult> {
        Ok(table_result(self.rows))
    }
}

struct SlowQueries;

#[async_trait]
impl QueryRunner for SlowQueries {
    async fn run(&self, _card: &Card, _constraints: &QueryConstraints) -> Result<QueryResult> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(table_result(1))
    }
}

/// A warehouse that refuses the creator's query outright.
struct DeniedQueries;

#[async_trait]
impl QueryRunner for DeniedQueries {
    async fn run(&self, card: &Card, _constraints: &QueryConstraints) -> Result<QueryResult> {
        Err(PulseError::Permission {
            user: CREATOR,
            card: card.id,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const CREATOR: u64 = 1;
const RECIPIENT: u64 = 2;
const NOTIFICATION: u64 = 100;

fn users() -> Vec<User> {
    vec![
        User {
            id: CREATOR,
            email: "ada@example.com".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
        },
        User {
            id: RECIPIENT,
            email: "bob@example.com".into(),
            first_name: Some("Bob".into()),
            last_name: None,
        },
    ]
}

fn card(id: CardId, name: &str, display: DisplayKind) -> Card {
    Card {
        id,
        name: name.into(),
        display,
        query: json!({ "source-table": id }),
        visualization_settings: Default::default(),
        include_csv: false,
        include_xls: false,
    }
}

fn column(name: &str, base_type: &str, role: ColumnRole) -> Column {
    Column {
        name: name.into(),
        display_name: None,
        base_type: base_type.into(),
        effective_type: None,
        role,
    }
}

fn table_result(rows: usize) -> QueryResult {
    QueryResult {
        columns: vec![
            column("id", "type/Integer", ColumnRole::Field),
            column("name", "type/Text", ColumnRole::Field),
        ],
        rows: (0..rows)
            .map(|i| vec![json!(i + 1), json!(format!("row {}", i + 1))])
            .collect(),
    }
}

fn metric_result(values: &[f64]) -> QueryResult {
    QueryResult {
        columns: vec![column("sum", "type/Float", ColumnRole::Aggregation)],
        rows: values.iter().map(|v| vec![json!(v)]).collect(),
    }
}

fn email_channel(id: u64) -> Channel {
    Channel {
        id,
        enabled: true,
        target: ChannelTarget::Email {
            recipients: vec![
                Recipient::User { user_id: RECIPIENT },
                Recipient::Address {
                    email: "ops@example.com".into(),
                },
            ],
        },
    }
}

fn slack_channel(id: u64) -> Channel {
    Channel {
        id,
        enabled: true,
        target: ChannelTarget::Slack {
            channel: "#metrics".into(),
        },
    }
}

fn pulse(cards: &[(CardId, u32)]) -> Notification {
    Notification {
        id: NOTIFICATION,
        name: "Daily KPIs".into(),
        mode: DeliveryMode::Pulse,
        creator_id: CREATOR,
        skip_if_empty: false,
        alert_condition: AlertCondition::None,
        alert_first_only: false,
        alert_above_goal: false,
        cards: cards
            .iter()
            .map(|&(card_id, position)| CardRef { card_id, position })
            .collect(),
        channels: vec![email_channel(1), slack_channel(2)],
    }
}

fn alert(card_id: CardId, condition: AlertCondition) -> Notification {
    Notification {
        mode: DeliveryMode::Alert,
        alert_condition: condition,
        ..pulse(&[(card_id, 0)])
    }
}

/// A store with the users, the notification, and every card granted to the creator.
async fn store_with(
    notification: Notification,
    cards: Vec<(Card, QueryResult)>,
) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for user in users() {
        store.insert_user(user).await;
    }
    for (card, result) in cards {
        store.grant(CREATOR, card.id).await;
        store.set_result(card.id, result).await;
        store.insert_card(card).await;
    }
    store.insert_notification(notification).await;
    store
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryStore>,
    email: Arc<RecordingEmail>,
    slack: Arc<RecordingSlack>,
    sender: PulseSender,
}

fn delivery() -> DeliveryConfig {
    DeliveryConfig {
        transport_timeout_ms: 1_000,
        max_retries: 0,
        backoff: BackoffPolicy::None,
    }
}

fn registry(email: &Arc<RecordingEmail>, slack: &Arc<RecordingSlack>) -> ChannelRegistry {
    let mut channels = ChannelRegistry::new();
    channels.register(EmailChannel::new(email.clone(), delivery()).unwrap());
    channels.register(SlackChannel::new(slack.clone(), delivery()));
    channels
}

fn harness_with(
    store: Arc<MemoryStore>,
    queries: Arc<dyn QueryRunner>,
    slack: RecordingSlack,
    config: SendConfig,
) -> Harness {
    let email = Arc::new(RecordingEmail::default());
    let slack = Arc::new(slack);
    let sender = PulseSender::new(
        store.clone(),
        queries,
        store.clone(),
        Arc::new(FakeImages),
        registry(&email, &slack),
        config,
    );
    Harness {
        store,
        email,
        slack,
        sender,
    }
}

fn harness(store: Arc<MemoryStore>) -> Harness {
    harness_with(
        store.clone(),
        store,
        RecordingSlack::default(),
        SendConfig {
            site_url: Some(url::Url::parse("https://bi.example.com/").unwrap()),
            ..SendConfig::default()
        },
    )
}

impl Harness {
    fn emails(&self) -> Vec<SentEmail> {
        self.email.sent.lock().unwrap().clone()
    }

    fn slack_posts(&self) -> Vec<(String, Vec<Value>, Vec<Value>)> {
        self.slack.posts.lock().unwrap().clone()
    }

    fn dispatch_count(&self) -> usize {
        self.emails().len() + self.slack_posts().len() + self.slack.uploads.lock().unwrap().len()
    }
}

// ---------------------------------------------------------------------------
// Goal alerts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn goal_alert_truth_table() {
    // (alert_above_goal, value, goal, fires)
    let cases = [
        (true, 101.0, 100.0, true),
        (true, 100.0, 100.0, true),
        (true, 99.0, 100.0, false),
        (false, 99.0, 100.0, true),
        (false, 100.0, 100.0, false),
        (false, 101.0, 100.0, false),
    ];

    for (above, value, goal, fires) in cases {
        let mut progress = card(10, "Revenue", DisplayKind::Progress);
        progress
            .visualization_settings
            .insert("progress.goal".into(), json!(goal));
        let mut notification = alert(10, AlertCondition::Goal);
        notification.alert_above_goal = above;

        let h = harness(store_with(notification, vec![(progress, metric_result(&[value]))]).await);
        let report = h
            .sender
            .send_with_options(NOTIFICATION, &SendOptions::default())
            .await
            .unwrap();

        assert_eq!(
            !report.deliveries.is_empty(),
            fires,
            "above={above} value={value} goal={goal}"
        );
        if fires {
            let subject = h.emails()[0].subject.clone();
            let phrase = if above { "reached its goal" } else { "gone below its goal" };
            assert_eq!(subject, format!("Alert: Revenue has {phrase}"));
        } else {
            assert_eq!(report.skipped, Some(SkipReason::GoalNotMet));
            assert_eq!(h.dispatch_count(), 0);
        }
    }
}

#[tokio::test]
async fn goal_alert_on_time_series_uses_latest_value() {
    let mut line = card(10, "Signups", DisplayKind::Line);
    line.visualization_settings
        .insert("graph.goal_value".into(), json!(50));
    let mut notification = alert(10, AlertCondition::Goal);
    notification.alert_above_goal = true;

    // Early points are over the goal, the most recent one is not.
    let cards = vec![(line, metric_result(&[80.0, 60.0, 40.0]))];
    let h = harness(store_with(notification, cards).await);
    let report = h
        .sender
        .send_with_options(NOTIFICATION, &SendOptions::default())
        .await
        .unwrap();
    assert_eq!(report.skipped, Some(SkipReason::GoalNotMet));
}

#[tokio::test]
async fn goal_alert_without_goal_setting_is_config_error() {
    let progress = card(10, "Revenue", DisplayKind::Progress);
    let h = harness(
        store_with(
            alert(10, AlertCondition::Goal),
            vec![(progress, metric_result(&[5.0]))],
        )
        .await,
    );
    let err = h.sender.send_notification(NOTIFICATION).await.unwrap_err();
    assert!(matches!(err, PulseError::Config(_)));
    assert_eq!(h.dispatch_count(), 0);
}

// ---------------------------------------------------------------------------
// Rendering determinism and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rendering_is_idempotent_across_sends() {
    let bar = card(10, "Orders by week", DisplayKind::Bar);
    let h = harness(store_with(pulse(&[(10, 0)]), vec![(bar, table_result(3))]).await);

    h.sender.send_notification(NOTIFICATION).await.unwrap();
    h.sender.send_notification(NOTIFICATION).await.unwrap();

    let emails = h.emails();
    assert_eq!(emails.len(), 2);
    let image = |e: &SentEmail| e.parts.iter().find(|p| p.is_inline()).unwrap().bytes.clone();
    assert_eq!(image(&emails[0]), image(&emails[1]));

    let uploads = h.slack.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].1, uploads[1].1);
}

#[tokio::test]
async fn cards_are_delivered_in_position_order() {
    // Stored out of order on purpose.
    let mut notification = pulse(&[(20, 1), (10, 0)]);
    notification.channels.reverse();
    let mut second = card(20, "Refunds", DisplayKind::Line);
    second.include_csv = true;
    let mut first = card(10, "Orders", DisplayKind::Bar);
    first.include_csv = true;

    let h = harness(
        store_with(
            notification,
            vec![(second, table_result(2)), (first, table_result(3))],
        )
        .await,
    );
    h.sender.send_notification(NOTIFICATION).await.unwrap();

    let email = &h.emails()[0];
    assert_eq!(email.inline_names(), vec!["card_10_0.png", "card_20_1.png"]);
    assert_eq!(email.attachment_names(), vec!["orders.csv", "refunds.csv"]);
    let html = email.html();
    assert!(html.find("Orders").unwrap() < html.find("Refunds").unwrap());

    let posts = h.slack_posts();
    let attachments = &posts[0].2;
    assert_eq!(attachments[0]["title"], "Orders");
    assert_eq!(attachments[1]["title"], "Refunds");
    assert_eq!(attachments[0]["title_link"], "https://bi.example.com/question/10");
}

// ---------------------------------------------------------------------------
// Truncation and attachments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn table_under_preview_threshold_has_no_attachment() {
    let table = card(10, "Orders", DisplayKind::Table);
    let h = harness(store_with(pulse(&[(10, 0)]), vec![(table, table_result(9))]).await);
    h.sender.send_notification(NOTIFICATION).await.unwrap();

    let email = &h.emails()[0];
    assert_eq!(email.inline_names().len(), 1);
    assert!(email.attachment_names().is_empty());
    assert!(!email.html().contains(MORE_RESULTS_TEXT));
}

#[tokio::test]
async fn table_over_preview_threshold_attaches_csv_in_email_only() {
    let table = card(10, "Orders", DisplayKind::Table);
    let h = harness(store_with(pulse(&[(10, 0)]), vec![(table, table_result(11))]).await);
    h.sender.send_notification(NOTIFICATION).await.unwrap();

    let email = &h.emails()[0];
    assert_eq!(email.inline_names().len(), 1);
    assert_eq!(email.attachment_names(), vec!["orders.csv"]);
    assert!(email.html().contains(MORE_RESULTS_TEXT));

    let csv = email.parts.iter().find(|p| p.is_attachment()).unwrap();
    assert_eq!(String::from_utf8_lossy(&csv.bytes).lines().count(), 12);

    let posts = h.slack_posts();
    assert_eq!(posts.len(), 1);
    let slack_json = serde_json::to_string(&posts[0]).unwrap();
    assert!(!slack_json.contains("More results"));
    // Tables go to Slack as text, never as an upload.
    assert!(h.slack.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn xls_replaces_implicit_csv() {
    let mut table = card(10, "Orders", DisplayKind::Table);
    table.include_xls = true;
    let h = harness(store_with(pulse(&[(10, 0)]), vec![(table, table_result(25))]).await);
    h.sender.send_notification(NOTIFICATION).await.unwrap();
    assert_eq!(h.emails()[0].attachment_names(), vec!["orders.xlsx"]);
}

#[tokio::test]
async fn empty_result_gets_no_attachments() {
    let mut table = card(10, "Orders", DisplayKind::Table);
    table.include_csv = true;
    table.include_xls = true;
    let h = harness(store_with(pulse(&[(10, 0)]), vec![(table, table_result(0))]).await);
    h.sender.send_notification(NOTIFICATION).await.unwrap();

    let email = &h.emails()[0];
    assert!(email.attachment_names().is_empty());
    assert!(email.inline_names().is_empty());
    assert!(email.html().contains("No results."));
}

#[tokio::test]
async fn row_limit_override_caps_results_before_rendering() {
    let mut table = card(10, "Orders", DisplayKind::Table);
    table.include_csv = true;
    let store = store_with(pulse(&[(10, 0)]), vec![(table, table_result(0))]).await;
    let h = harness_with(
        store,
        Arc::new(UnboundedQueries { rows: 50 }),
        RecordingSlack::default(),
        SendConfig::default(),
    );

    let options = SendOptions {
        constraints: Some(QueryConstraints {
            max_results: 1_000,
            max_results_bare_rows: 5,
        }),
    };
    h.sender
        .send_with_options(NOTIFICATION, &options)
        .await
        .unwrap();

    let email = &h.emails()[0];
    let csv = email.parts.iter().find(|p| p.is_attachment()).unwrap();
    // Header plus five capped rows.
    assert_eq!(String::from_utf8_lossy(&csv.bytes).lines().count(), 6);
}

// ---------------------------------------------------------------------------
// Skip and one-shot rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skip_if_empty_pulse_with_only_empty_cards_dispatches_nothing() {
    let mut notification = pulse(&[(10, 0), (20, 1)]);
    notification.skip_if_empty = true;
    let h = harness(
        store_with(
            notification,
            vec![
                (card(10, "Orders", DisplayKind::Table), table_result(0)),
                (card(20, "Refunds", DisplayKind::Bar), table_result(0)),
            ],
        )
        .await,
    );

    let report = h
        .sender
        .send_with_options(NOTIFICATION, &SendOptions::default())
        .await
        .unwrap();
    assert_eq!(report.skipped, Some(SkipReason::AllEmpty));
    assert_eq!(report.state, SendState::Finalized);
    assert!(report.deliveries.is_empty());
    assert_eq!(h.dispatch_count(), 0);
}

#[tokio::test]
async fn skip_if_empty_pulse_with_some_rows_sends() {
    let mut notification = pulse(&[(10, 0), (20, 1)]);
    notification.skip_if_empty = true;
    let h = harness(
        store_with(
            notification,
            vec![
                (card(10, "Orders", DisplayKind::Table), table_result(0)),
                (card(20, "Refunds", DisplayKind::Bar), table_result(2)),
            ],
        )
        .await,
    );
    let deliveries = h.sender.send_notification(NOTIFICATION).await.unwrap();
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|d| d.is_success()));
}

#[tokio::test]
async fn one_shot_alert_with_data_is_deleted() {
    let mut notification = alert(10, AlertCondition::Rows);
    notification.alert_first_only = true;
    let h = harness(
        store_with(
            notification,
            vec![(card(10, "Errors", DisplayKind::Table), table_result(3))],
        )
        .await,
    );

    let report = h
        .sender
        .send_with_options(NOTIFICATION, &SendOptions::default())
        .await
        .unwrap();
    assert!(report.deleted);
    assert!(h.store.notification(NOTIFICATION).await.unwrap().is_none());
    assert_eq!(h.emails()[0].subject, "Alert: Errors has results");
}

#[tokio::test]
async fn one_shot_alert_without_data_is_kept() {
    let mut notification = alert(10, AlertCondition::Rows);
    notification.alert_first_only = true;
    let h = harness(
        store_with(
            notification,
            vec![(card(10, "Errors", DisplayKind::Table), table_result(0))],
        )
        .await,
    );

    let report = h
        .sender
        .send_with_options(NOTIFICATION, &SendOptions::default())
        .await
        .unwrap();
    assert!(!report.deleted);
    assert_eq!(report.skipped, Some(SkipReason::NoResults));
    assert!(h.store.notification(NOTIFICATION).await.unwrap().is_some());
    assert_eq!(h.dispatch_count(), 0);
}

#[tokio::test]
async fn recurring_alert_is_never_deleted() {
    let h = harness(
        store_with(
            alert(10, AlertCondition::Rows),
            vec![(card(10, "Errors", DisplayKind::Table), table_result(3))],
        )
        .await,
    );
    let report = h
        .sender
        .send_with_options(NOTIFICATION, &SendOptions::default())
        .await
        .unwrap();
    assert!(!report.deleted);
    assert!(h.store.notification(NOTIFICATION).await.unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_permission_aborts_before_any_dispatch() {
    let store = store_with(
        pulse(&[(10, 0), (20, 1)]),
        vec![(card(10, "Orders", DisplayKind::Table), table_result(3))],
    )
    .await;
    // Card 20 exists but the creator was never granted it.
    store.insert_card(card(20, "Salaries", DisplayKind::Table)).await;
    store.set_result(20, table_result(3)).await;

    let h = harness(store);
    let mut events = h.sender.events().subscribe();
    let err = h.sender.send_notification(NOTIFICATION).await.unwrap_err();

    assert!(matches!(err, PulseError::Permission { user: CREATOR, card: 20 }));
    assert_eq!(h.dispatch_count(), 0);

    let mut aborted = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PulseEvent::SendAborted { .. }) {
            aborted = true;
        }
        assert!(!matches!(event, PulseEvent::ChannelDispatched { .. }));
    }
    assert!(aborted);
}

#[tokio::test]
async fn unknown_notification_is_not_found() {
    let h = harness(Arc::new(MemoryStore::new()));
    let err = h.sender.send_notification(404).await.unwrap_err();
    assert!(matches!(err, PulseError::NotFound { entity: "Notification", .. }));
}

#[tokio::test]
async fn missing_card_is_not_found() {
    let cards = vec![(card(10, "Orders", DisplayKind::Table), table_result(1))];
    let store = store_with(pulse(&[(10, 0), (99, 1)]), cards).await;
    let h = harness(store);
    let err = h.sender.send_notification(NOTIFICATION).await.unwrap_err();
    assert!(matches!(err, PulseError::NotFound { entity: "Card", .. }));
    assert_eq!(h.dispatch_count(), 0);
}

#[tokio::test]
async fn failing_channel_does_not_block_the_others() {
    let store = store_with(
        pulse(&[(10, 0)]),
        vec![(card(10, "Orders", DisplayKind::Bar), table_result(3))],
    )
    .await;
    let h = harness_with(
        store.clone(),
        store,
        RecordingSlack {
            fail_posts: true,
            ..Default::default()
        },
        SendConfig::default(),
    );

    let deliveries = h.sender.send_notification(NOTIFICATION).await.unwrap();
    assert_eq!(deliveries.len(), 2);
    let email = deliveries.iter().find(|d| d.channel_kind == ChannelKind::Email).unwrap();
    let slack = deliveries.iter().find(|d| d.channel_kind == ChannelKind::Slack).unwrap();
    assert!(email.is_success());
    assert!(slack.error().unwrap().contains("channel_not_found"));
    assert_eq!(h.emails().len(), 1);
}

#[tokio::test]
async fn failed_slack_keeps_one_shot_alert_only_if_nothing_succeeded() {
    let mut notification = alert(10, AlertCondition::Rows);
    notification.alert_first_only = true;
    notification.channels = vec![slack_channel(2)];
    let store = store_with(
        notification,
        vec![(card(10, "Errors", DisplayKind::Table), table_result(3))],
    )
    .await;
    let h = harness_with(
        store.clone(),
        store,
        RecordingSlack {
            fail_posts: true,
            ..Default::default()
        },
        SendConfig::default(),
    );

    let report = h
        .sender
        .send_with_options(NOTIFICATION, &SendOptions::default())
        .await
        .unwrap();
    assert!(!report.deleted);
    assert!(h.store.notification(NOTIFICATION).await.unwrap().is_some());
}

#[tokio::test]
async fn slow_query_renders_placeholder_for_pulse() {
    let store = store_with(
        pulse(&[(10, 0)]),
        vec![(card(10, "Orders", DisplayKind::Bar), table_result(1))],
    )
    .await;
    let h = harness_with(
        store,
        Arc::new(SlowQueries),
        RecordingSlack::default(),
        SendConfig {
            query_timeout_ms: 20,
            ..SendConfig::default()
        },
    );

    let mut events = h.sender.events().subscribe();
    let report = h
        .sender
        .send_with_options(NOTIFICATION, &SendOptions::default())
        .await
        .unwrap();
    assert!(report.deliveries.iter().all(|d| d.is_success()));
    assert_eq!(report.failed_cards, vec![10]);
    assert!(h.emails()[0].html().contains(QUERY_FAILED_TEXT));
    assert!(h.slack.uploads.lock().unwrap().is_empty());

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PulseEvent::CardQueryFailed { card, error, .. } = event {
            failed.push(card);
            assert!(error.contains("timed out"), "unexpected error: {error}");
        }
    }
    assert_eq!(failed, vec![10]);
}

#[tokio::test]
async fn fatal_query_error_aborts_before_any_dispatch() {
    let store = store_with(
        pulse(&[(10, 0)]),
        vec![(card(10, "Orders", DisplayKind::Table), table_result(1))],
    )
    .await;
    let h = harness_with(
        store,
        Arc::new(DeniedQueries),
        RecordingSlack::default(),
        SendConfig::default(),
    );
    let mut events = h.sender.events().subscribe();

    let err = h.sender.send_notification(NOTIFICATION).await.unwrap_err();
    assert!(matches!(err, PulseError::Permission { card: 10, .. }));
    assert_eq!(h.dispatch_count(), 0);

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PulseEvent::StateChanged { state, .. } = event {
            states.push(state);
        }
        assert!(!matches!(event, PulseEvent::CardQueryFailed { .. }));
    }
    assert_eq!(
        states,
        vec![SendState::Loaded, SendState::Authorized, SendState::Aborted]
    );
}

#[tokio::test]
async fn slow_query_suppresses_alert() {
    let store = store_with(
        alert(10, AlertCondition::Rows),
        vec![(card(10, "Errors", DisplayKind::Table), table_result(1))],
    )
    .await;
    let h = harness_with(
        store,
        Arc::new(SlowQueries),
        RecordingSlack::default(),
        SendConfig {
            query_timeout_ms: 20,
            ..SendConfig::default()
        },
    );
    let report = h
        .sender
        .send_with_options(NOTIFICATION, &SendOptions::default())
        .await
        .unwrap();
    assert_eq!(report.skipped, Some(SkipReason::QueryFailed));
    assert_eq!(h.dispatch_count(), 0);
}

#[tokio::test]
async fn unregistered_channel_kind_aborts_before_dispatch() {
    let store = store_with(
        pulse(&[(10, 0)]),
        vec![(card(10, "Orders", DisplayKind::Bar), table_result(1))],
    )
    .await;
    let email = Arc::new(RecordingEmail::default());
    let mut channels = ChannelRegistry::new();
    channels.register(EmailChannel::new(email.clone(), delivery()).unwrap());
    let sender = PulseSender::new(
        store.clone(),
        store.clone(),
        store,
        Arc::new(FakeImages),
        channels,
        SendConfig::default(),
    );

    let err = sender.send_notification(NOTIFICATION).await.unwrap_err();
    assert!(matches!(err, PulseError::Config(_)));
    assert!(email.sent.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Recipients, headers and events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recipients_resolve_and_deduplicate() {
    let mut notification = pulse(&[(10, 0)]);
    notification.channels = vec![Channel {
        id: 1,
        enabled: true,
        target: ChannelTarget::Email {
            recipients: vec![
                Recipient::User { user_id: RECIPIENT },
                Recipient::Address {
                    email: "BOB@example.com".into(),
                },
                Recipient::User { user_id: 404 },
                Recipient::Address {
                    email: "ops@example.com".into(),
                },
            ],
        },
    }];
    let h = harness(
        store_with(
            notification,
            vec![(card(10, "Orders", DisplayKind::Bar), table_result(1))],
        )
        .await,
    );
    h.sender.send_notification(NOTIFICATION).await.unwrap();
    assert_eq!(h.emails()[0].to, vec!["bob@example.com", "ops@example.com"]);
}

#[tokio::test]
async fn email_channel_without_recipients_fails_alone() {
    let mut notification = pulse(&[(10, 0)]);
    notification.channels = vec![
        Channel {
            id: 1,
            enabled: true,
            target: ChannelTarget::Email { recipients: vec![] },
        },
        slack_channel(2),
    ];
    let h = harness(
        store_with(
            notification,
            vec![(card(10, "Orders", DisplayKind::Bar), table_result(1))],
        )
        .await,
    );
    let deliveries = h.sender.send_notification(NOTIFICATION).await.unwrap();
    assert_eq!(deliveries[0].error(), Some("no recipients"));
    assert!(deliveries[1].is_success());
}

#[tokio::test]
async fn disabled_channels_are_skipped() {
    let mut notification = pulse(&[(10, 0)]);
    notification.channels[1].enabled = false;
    let h = harness(
        store_with(
            notification,
            vec![(card(10, "Orders", DisplayKind::Bar), table_result(1))],
        )
        .await,
    );
    let deliveries = h.sender.send_notification(NOTIFICATION).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert!(h.slack_posts().is_empty());
}

#[tokio::test]
async fn pulse_slack_header_names_the_sender() {
    let h = harness(
        store_with(
            pulse(&[(10, 0)]),
            vec![(card(10, "Orders", DisplayKind::Bar), table_result(1))],
        )
        .await,
    );
    h.sender.send_notification(NOTIFICATION).await.unwrap();

    let posts = h.slack_posts();
    let (channel, blocks, attachments) = &posts[0];
    assert_eq!(channel, "#metrics");
    assert_eq!(blocks[0]["text"]["text"], "🔔 Pulse: Daily KPIs");
    assert_eq!(blocks[1]["elements"][0]["text"], "Sent by Ada Lovelace");
    assert_eq!(attachments[0]["blocks"][0]["slack_file"]["id"], "F_card_10_0.png");
    assert!(h.emails()[0].html().contains("Sent by Ada Lovelace"));
}

#[tokio::test]
async fn events_follow_the_state_machine() {
    let h = harness(
        store_with(
            pulse(&[(10, 0)]),
            vec![(card(10, "Orders", DisplayKind::Bar), table_result(1))],
        )
        .await,
    );
    let mut rx = h.sender.events().subscribe();
    h.sender.send_notification(NOTIFICATION).await.unwrap();

    let mut states = Vec::new();
    let mut started = false;
    let mut dispatched = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            PulseEvent::SendStarted { notification, .. } => {
                assert_eq!(notification, NOTIFICATION);
                started = true;
            }
            PulseEvent::StateChanged { state, .. } => states.push(state),
            PulseEvent::ChannelDispatched { success, .. } => {
                assert!(success);
                dispatched += 1;
            }
            _ => {}
        }
    }
    assert!(started);
    assert_eq!(dispatched, 2);
    assert_eq!(
        states,
        vec![
            SendState::Loaded,
            SendState::Authorized,
            SendState::Evaluated,
            SendState::Rendered,
            SendState::Dispatched,
            SendState::Finalized,
        ]
    );
}
