//! CLI binary for sending pulses and alerts from a JSON fixture.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use pulse_channels::{
    ChannelRegistry, EmailChannel, OutboxTransport, SlackChannel, SlackTransport, SlackWebClient,
};
use pulse_engine::{Fixture, MemoryStore, PulseSender, SendConfig, SendOptions};
use pulse_render::ImageRenderer;
use pulse_types::{Card, ChannelTarget, QueryConstraints, QueryResult};

#[derive(Parser)]
#[command(name = "pulse", version, about = "Send pulses and alerts from a JSON fixture")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one notification
    Send {
        /// Fixture with users, cards, notifications, grants and canned results
        #[arg(short, long)]
        fixture: PathBuf,

        /// Id of the notification to send
        #[arg(short, long)]
        notification: u64,

        /// JSON send configuration (defaults apply to missing fields)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write Slack messages to this directory too, instead of the Slack API
        #[arg(short, long)]
        outbox: Option<PathBuf>,

        /// Cap every query at this many rows for this send
        #[arg(long)]
        max_rows: Option<usize>,
    },

    /// List the notifications in a fixture
    Inspect {
        #[arg(short, long)]
        fixture: PathBuf,
    },
}

/// Email always goes here unless `--outbox` names another directory.
const DEFAULT_OUTBOX: &str = ".pulse/outbox";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Send {
            fixture,
            notification,
            config,
            outbox,
            max_rows,
        } => {
            cmd_send(&fixture, notification, config.as_deref(), outbox.as_deref(), max_rows).await?;
        }
        Commands::Inspect { fixture } => {
            cmd_inspect(&fixture).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SendConfig> {
    let Some(path) = path else {
        return Ok(SendConfig::default());
    };
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&source)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

/// The Slack Web API when a token is configured and no outbox was asked
/// for; the outbox otherwise.
fn slack_transport(outbox: &Arc<OutboxTransport>, force_outbox: bool) -> Arc<dyn SlackTransport> {
    let fallback: Arc<dyn SlackTransport> = outbox.clone();
    if force_outbox {
        return fallback;
    }
    match SlackWebClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(
                error = %e,
                dir = %outbox.dir().display(),
                "Slack API unavailable, writing Slack messages to outbox"
            );
            fallback
        }
    }
}

fn build_sender(
    store: Arc<MemoryStore>,
    config: SendConfig,
    outbox: Arc<OutboxTransport>,
    slack: Arc<dyn SlackTransport>,
) -> anyhow::Result<PulseSender> {
    let mut channels = ChannelRegistry::new();
    channels.register(EmailChannel::new(outbox, config.delivery.clone())?);
    channels.register(SlackChannel::new(slack, config.delivery.clone()));

    Ok(PulseSender::new(
        store.clone(),
        store.clone(),
        store,
        Arc::new(BlankImages),
        channels,
        config,
    ))
}

async fn cmd_send(
    fixture: &Path,
    notification: u64,
    config: Option<&Path>,
    outbox: Option<&Path>,
    max_rows: Option<usize>,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let store = Arc::new(MemoryStore::from_fixture(Fixture::load(fixture).await?));

    let outbox_dir = outbox.unwrap_or_else(|| Path::new(DEFAULT_OUTBOX));
    let outbox_transport = Arc::new(OutboxTransport::new(outbox_dir));
    let slack = slack_transport(&outbox_transport, outbox.is_some());
    let sender = build_sender(store, config, outbox_transport, slack)?;

    let options = SendOptions {
        constraints: max_rows.map(|n| QueryConstraints {
            max_results: n,
            max_results_bare_rows: n,
        }),
    };
    let report = sender.send_with_options(notification, &options).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.deliveries.iter().any(|d| !d.is_success()) {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_inspect(fixture: &Path) -> anyhow::Result<()> {
    let store = MemoryStore::from_fixture(Fixture::load(fixture).await?);
    let notifications = store.notifications().await;
    if notifications.is_empty() {
        println!("No notifications");
        return Ok(());
    }

    for n in notifications {
        let mode = if n.is_alert() { "alert" } else { "pulse" };
        println!("#{} [{}] {} (creator {})", n.id, mode, n.name, n.creator_id);
        if n.is_alert() {
            println!(
                "  condition={:?} first_only={} above_goal={}",
                n.alert_condition, n.alert_first_only, n.alert_above_goal
            );
        } else if n.skip_if_empty {
            println!("  skip_if_empty");
        }
        for card in n.ordered_cards() {
            println!("  card {} @ {}", card.card_id, card.position);
        }
        for channel in &n.channels {
            let target = match &channel.target {
                ChannelTarget::Email { recipients } => format!("{} recipients", recipients.len()),
                ChannelTarget::Slack { channel } => channel.clone(),
            };
            let state = if channel.enabled { "" } else { " (disabled)" };
            println!("  {} channel {}: {}{}", channel.kind(), channel.id, target, state);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// BlankImages
// ---------------------------------------------------------------------------

/// 1x1 transparent PNG.
const BLANK_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// Stands in for a charting service: every chart is the same blank image,
/// so the outbox shows where each card's visual would go.
struct BlankImages;

#[async_trait]
impl ImageRenderer for BlankImages {
    async fn render_to_image(
        &self,
        card: &Card,
        result: &QueryResult,
    ) -> pulse_types::Result<Option<Vec<u8>>> {
        tracing::debug!(card = card.id, rows = result.row_count(), "Rendering blank chart");
        Ok(Some(BLANK_PNG.to_vec()))
    }
}
