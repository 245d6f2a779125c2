//! Send one notification from the command line.
//!
//! ```text
//! empath-notify --realm ticket --category created --target '#42' \
//!     --summary 'Printer on fire' --session alice ops@example.com
//! ```

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use empath_notify::{
    EmailConfig, EmailDistributor, Event, Recipient, TRANSPORT,
    delivery::DeliveryQueue,
    format::TextFormatter,
    logging,
    session::MemorySessionStore,
};

/// Distribute a notification email for one event
#[derive(Parser, Debug)]
#[command(name = "empath-notify")]
#[command(about = "Send a notification email for one event", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Realm of the event, e.g. `ticket`
    #[arg(long)]
    realm: String,

    /// What happened, e.g. `created`
    #[arg(long)]
    category: String,

    /// What it happened to, e.g. `#42`
    #[arg(long)]
    target: String,

    /// One line summary, used as the subject
    #[arg(long, default_value = "")]
    summary: String,

    #[arg(long)]
    author: Option<String>,

    /// Extra `name=value` fields shown in the body
    #[arg(short, long = "attribute", value_parser = parse_attribute)]
    attributes: Vec<(String, String)>,

    /// Authenticated session names to resolve to addresses
    #[arg(short, long = "session")]
    sessions: Vec<String>,

    /// Address the session given by `--session` at the same position
    #[arg(long = "session-email")]
    session_emails: Vec<String>,

    /// Recipient addresses
    recipients: Vec<String>,
}

fn parse_attribute(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .ok_or_else(|| format!("expected name=value, got '{value}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let config = EmailConfig::from_path(&config_path)?;

    let sessions = MemorySessionStore::new();
    for (name, email) in cli.sessions.iter().zip(&cli.session_emails) {
        sessions.set_email(name.as_str(), true, email.as_str());
    }

    let distributor = EmailDistributor::builder(config)
        .formatter(Arc::new(TextFormatter))
        .session_store(Arc::new(sessions))
        .build()?;

    let event = cli
        .attributes
        .into_iter()
        .fold(
            Event::new(cli.realm, cli.category, cli.target).with_summary(cli.summary),
            |event, (name, value)| event.with_attribute(name, value),
        );
    let event = match cli.author {
        Some(author) => event.with_author(author),
        None => event,
    };

    let recipients = cli
        .sessions
        .into_iter()
        .map(|name| Recipient::session(name, true))
        .chain(cli.recipients.into_iter().map(Recipient::address))
        .collect::<Vec<_>>();

    let report = distributor
        .distribute(TRANSPORT, &recipients, &event)
        .await?;

    if distributor.config().use_threaded_delivery {
        DeliveryQueue::global()?.flush().await?;
    }

    tracing::info!(
        "Handed {} message(s) for {} recipient(s) to delivery",
        report.messages(),
        report.recipients()
    );

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `EMPATH_NOTIFY_CONFIG` environment variable
/// 2. ./empath-notify.toml (current working directory)
/// 3. /etc/empath/empath-notify.toml (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("EMPATH_NOTIFY_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "EMPATH_NOTIFY_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./empath-notify.toml"),
        PathBuf::from("/etc/empath/empath-notify.toml"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - EMPATH_NOTIFY_CONFIG environment variable\n{paths_tried}"
    )
}
