//! outreach-reply - answer inbound direct messages
//!
//! Polls the inbox of each selected account and sends one canned reply per
//! unanswered thread. Which message was last answered per thread is
//! persisted, so restarts never double-reply.

use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use liboutreach::accounts::AccountRegistry;
use liboutreach::config::Config;
use liboutreach::connector::mock::MockConnector;
use liboutreach::connector::TemplateReplier;
use liboutreach::events::{Event, EventBus};
use liboutreach::logging::{LogFormat, LoggingConfig};
use liboutreach::proxy::{HttpProbe, ProxyAssigner};
use liboutreach::responder::{AutoResponder, ReplyStateStore};
use liboutreach::session::{ClientHandle, SessionResolver, SessionStore, SessionValidator};
use liboutreach::{OutreachError, Result};

#[derive(Parser, Debug)]
#[command(name = "outreach-reply")]
#[command(version)]
#[command(about = "Poll account inboxes and answer new threads")]
#[command(long_about = "\
outreach-reply - answer inbound direct messages

DESCRIPTION:
    Runs an inbox poller per account. Each sweep fetches the most recent
    threads and sends one reply to every thread whose newest message is
    from the other side and has not been answered before. Answered message
    ids are persisted, so restarting the daemon never double-replies.

    An account whose session fails is paused on its own; the other pollers
    keep running.

USAGE:
    # Poll every active account once a minute
    outreach-reply

    # One account, faster sweeps, custom reply text
    outreach-reply --account ana --interval 20s \\
        --reply 'thanks for reaching out, will get back to you soon!'

SIGNALS:
    SIGTERM, SIGINT - graceful stop (current sweep finishes)

CONFIGURATION:
    Configuration file: ~/.config/outreach/config.toml
    Data directory:     ~/.local/share/outreach

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Session error
    3 - Invalid input
")]
struct Cli {
    /// Account alias to poll (repeatable; default: all active)
    #[arg(long = "account", value_name = "ALIAS")]
    accounts: Vec<String>,

    /// Poll interval, e.g. '45s' or '2m' (overrides config)
    #[arg(long, value_name = "DURATION")]
    interval: Option<String>,

    /// Reply text (overrides the configured fallback)
    #[arg(long, value_name = "TEXT")]
    reply: Option<String>,

    /// Threads fetched per sweep (overrides config)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Log output format
    #[arg(long, default_value = "text", value_name = "FORMAT")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Validator for loopback runs: any readable artifact is live
struct ArtifactOnly;

#[async_trait]
impl SessionValidator for ArtifactOnly {
    async fn validate(
        &self,
        _handle: &ClientHandle,
    ) -> std::result::Result<(), liboutreach::error::SessionError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load().unwrap_or_else(|_| Config::default_config());
    config.validate()?;
    let data_dir = config.data_dir();

    let registry = AccountRegistry::new()?;
    let accounts = if cli.accounts.is_empty() {
        let active = registry.active();
        if active.is_empty() {
            return Err(OutreachError::InvalidInput(
                "no active accounts registered".to_string(),
            ));
        }
        active
    } else {
        registry.resolve(&cli.accounts)?
    };

    let poll_interval = match &cli.interval {
        Some(text) => text.parse::<humantime::Duration>().map_err(|e| {
            OutreachError::InvalidInput(format!("invalid interval '{}': {}", text, e))
        })?.into(),
        None => Duration::from_secs(config.responder.poll_interval_secs),
    };
    let reply_text = cli
        .reply
        .clone()
        .unwrap_or_else(|| config.responder.fallback_reply.clone());

    let events = EventBus::new(256);
    let proxies = Arc::new(
        ProxyAssigner::new(
            Arc::new(HttpProbe::new(Duration::from_secs(
                config.proxy.probe_timeout_secs,
            ))),
            Duration::from_secs(config.proxy.sticky_minutes * 60),
            config.proxy.required,
        )
        .with_events(events.clone()),
    );
    let resolver = SessionResolver::new(
        SessionStore::new(&data_dir),
        Arc::new(ArtifactOnly),
        proxies,
        registry,
        config.proxy.default_url.clone(),
    );

    let responder = AutoResponder::new(
        resolver,
        Arc::new(MockConnector::new()),
        Arc::new(TemplateReplier::new(reply_text)),
        ReplyStateStore::open(data_dir.join("reply_state.json")),
        events.clone(),
        poll_interval,
        cli.threads.unwrap_or(config.responder.threads_per_sweep),
    );

    let cancel = CancellationToken::new();
    setup_signal_handlers(cancel.clone())?;
    let progress = tokio::spawn(print_progress(events.subscribe()));

    info!(
        interval = ?poll_interval,
        "Responder running, Ctrl-C to stop"
    );
    let summary = responder.run(accounts, cancel).await?;
    progress.abort();

    println!();
    println!(
        "Responder stopped: {} replies across {} accounts in {}s",
        summary.replied,
        summary.accounts,
        summary.duration.as_secs()
    );

    Ok(())
}

/// SIGINT/SIGTERM trip the cancellation token
fn setup_signal_handlers(cancel: CancellationToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| OutreachError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            cancel.cancel();
        }
    });

    Ok(())
}

async fn print_progress(mut events: liboutreach::events::EventReceiver) {
    while let Ok(event) = events.recv().await {
        match event {
            Event::ReplySent { account, thread_id } => {
                println!("  @{}: replied in thread {}", account, thread_id);
            }
            Event::ResponderAccountPaused { account, reason } => {
                println!("  @{}: poller paused ({})", account, reason);
            }
            _ => {}
        }
    }
}
