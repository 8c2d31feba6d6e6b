//! Replays a recorded connector event log through the audit core and prints
//! the finalized report as JSON.
//!
//! The log has one JSON event per line:
//!
//! ```text
//! {"type":"fetch-end","resource":"https://example.com/","kind":"html","request":{"url":"https://example.com/"},"response":{"statusCode":200}}
//! {"type":"traverse-end","resource":"https://example.com/"}
//! ```
//!
//! A line that cannot be parsed is treated as a connector failure and
//! aborts the run with whatever was reported so far.

mod rules;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hint_core::{
    ConnectorError, Event, FetchCache, HintConfig, HttpTransport, Orchestrator, Severity,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "hint-replay", about = "Replay a connector event log and print the report")]
struct Args {
    /// URL of the audited page
    target: String,

    /// JSON-lines event log, `-` for stdin
    #[arg(long, short)]
    events: PathBuf,

    /// Configuration file (JSON)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Per-request fetch timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Fail fetches needing more redirects than this
    #[arg(long)]
    redirect_limit: Option<usize>,

    #[arg(long)]
    user_agent: Option<String>,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the report
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hint_core=debug,hint_replay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HintConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HintConfig::new(),
    };

    let raw = read_event_log(&args.events)?;
    let events = parse_event_log(&raw);
    tracing::info!(page = %args.target, events = events.len(), "Replaying event log");

    let mut transport = HttpTransport::try_new(Duration::from_secs(args.timeout_secs))
        .context("Failed to create HTTP client")?;
    if let Some(user_agent) = &args.user_agent {
        transport = transport.with_user_agent(user_agent);
    }

    let mut fetch = FetchCache::new(transport);
    if let Some(limit) = args.redirect_limit {
        fetch = fetch.with_redirect_limit(limit);
    }

    let mut orchestrator = Orchestrator::from_fetch_cache(config, fetch);
    for rule in rules::builtin() {
        orchestrator.add_rule(rule);
    }

    let report = orchestrator
        .run(&args.target, futures::stream::iter(events))
        .await
        .context("Audit run failed")?;

    if let Some(reason) = orchestrator.abort_reason() {
        tracing::warn!(reason = %reason, "Run was aborted; report is partial");
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");

    if report.max_severity() == Some(Severity::Error) {
        std::process::exit(1);
    }

    Ok(())
}

fn read_event_log(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        return std::io::read_to_string(std::io::stdin())
            .context("Failed to read events from stdin");
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event log {}", path.display()))
}

/// One item per non-blank line; unparseable lines become connector errors.
fn parse_event_log(raw: &str) -> Vec<std::result::Result<Event, ConnectorError>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<Event>(line).map_err(|e| {
                ConnectorError::new(format!("invalid event on line {}: {e}", index + 1))
            })
        })
        .collect()
}
