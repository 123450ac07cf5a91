//! outreach-send - run a paced direct-message campaign
//!
//! Loads a named target list, fans out one worker per account, and sends
//! with jittered pacing under a global concurrency cap. Every attempt is
//! recorded to the append-only ledger, which also deduplicates targets
//! across runs.

use async_trait::async_trait;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use liboutreach::accounts::AccountRegistry;
use liboutreach::config::Config;
use liboutreach::connector::mock::MockConnector;
use liboutreach::connector::{DecisionPort, FailureDecision};
use liboutreach::engine::{CampaignSpec, DispatchEngine};
use liboutreach::events::{Event, EventBus};
use liboutreach::governor::{DelayWindow, RateGovernor};
use liboutreach::ledger::ContactLedger;
use liboutreach::logging::{LoggingConfig, LogFormat};
use liboutreach::proxy::{HttpProbe, ProxyAssigner};
use liboutreach::session::{ClientHandle, SessionResolver, SessionStore, SessionValidator};
use liboutreach::targets::TargetLists;
use liboutreach::{OutreachError, Result};

#[derive(Parser, Debug)]
#[command(name = "outreach-send")]
#[command(version)]
#[command(about = "Run a paced direct-message campaign across accounts")]
#[command(long_about = "\
outreach-send - run a paced direct-message campaign

DESCRIPTION:
    Sends one message to each handle in a named target list, spread across
    the selected accounts. Sends are paced with a jittered per-account delay
    and a global concurrency cap, and every attempt lands in the append-only
    ledger so re-runs never contact the same handle twice.

    When an account hits a session or verification problem the run stops at
    a prompt: continue without that account, or pause everything.

USAGE:
    # Send the 'warm' list from every active account
    outreach-send --list warm --message 'hey, saw your profile!'

    # Specific accounts, capped at 2 concurrent sends
    outreach-send --list warm --account ana --account bo \\
        --concurrency 2 --message-file messages.txt

SIGNALS:
    SIGTERM, SIGINT - graceful stop (in-flight sends finish)

CONFIGURATION:
    Configuration file: ~/.config/outreach/config.toml
    Data directory:     ~/.local/share/outreach

EXIT CODES:
    0 - Clean finish or pause
    1 - Runtime error
    2 - Session error
    3 - Invalid input
")]
struct Cli {
    /// Name of the target list under <data_dir>/lists/
    #[arg(long, value_name = "NAME")]
    list: String,

    /// Account alias to send from (repeatable; default: all active)
    #[arg(long = "account", value_name = "ALIAS")]
    accounts: Vec<String>,

    /// Message template (repeatable; one is picked at random per send)
    #[arg(long = "message", value_name = "TEXT")]
    messages: Vec<String>,

    /// File with one message template per non-empty line
    #[arg(long, value_name = "PATH")]
    message_file: Option<String>,

    /// Max accounts sending at the same time (overrides config)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Minimum seconds between sends per account (overrides config)
    #[arg(long, value_name = "SECONDS")]
    delay_min: Option<u64>,

    /// Maximum seconds between sends per account (overrides config)
    #[arg(long, value_name = "SECONDS")]
    delay_max: Option<u64>,

    /// Max successful sends per account this run
    #[arg(long, value_name = "N")]
    max_per_account: Option<usize>,

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

/// Blocking stdin prompt for per-account failures
struct StdinDecision;

#[async_trait]
impl DecisionPort for StdinDecision {
    async fn decide(&self, account: &str, reason: &str) -> FailureDecision {
        let account = account.to_string();
        let reason = reason.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            eprintln!();
            eprintln!("@{} needs attention: {}", account, reason);
            eprintln!("  [1] Continue without this account");
            eprintln!("  [2] Pause everything");
            loop {
                eprint!("> ");
                let _ = std::io::stderr().flush();
                let mut line = String::new();
                if std::io::stdin().read_line(&mut line).is_err() {
                    return FailureDecision::PauseAll;
                }
                match line.trim() {
                    "1" => return FailureDecision::ContinueWithoutAccount,
                    "2" => return FailureDecision::PauseAll,
                    _ => eprintln!("Please answer 1 or 2."),
                }
            }
        })
        .await;
        answer.unwrap_or(FailureDecision::PauseAll)
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

    let mut messages = cli.messages.clone();
    if let Some(path) = &cli.message_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OutreachError::InvalidInput(format!("cannot read {}: {}", path, e)))?;
        messages.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from),
        );
    }
    if messages.is_empty() {
        return Err(OutreachError::InvalidInput(
            "no message templates given (use --message or --message-file)".to_string(),
        ));
    }

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

    let targets = TargetLists::new(&data_dir).load(&cli.list)?;
    if targets.is_empty() {
        return Err(OutreachError::InvalidInput(format!(
            "target list '{}' is empty",
            cli.list
        )));
    }

    let window = DelayWindow::new(
        cli.delay_min.unwrap_or(config.dispatch.delay_min_secs),
        cli.delay_max.unwrap_or(config.dispatch.delay_max_secs),
    )?;
    let concurrency = cli
        .concurrency
        .unwrap_or(config.dispatch.max_concurrent_sends)
        .max(1);

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

    let engine = DispatchEngine::new(
        resolver,
        Arc::new(MockConnector::new()),
        Arc::new(StdinDecision),
        ContactLedger::open(data_dir.join("sent_log.jsonl"))?,
        RateGovernor::new(
            window,
            concurrency,
            Duration::from_secs(config.dispatch.backoff_ceiling_secs),
        ),
        events.clone(),
        config.dispatch.send_retry_attempts,
    );

    let cancel = CancellationToken::new();
    setup_signal_handlers(cancel.clone())?;
    let progress = tokio::spawn(print_progress(events.subscribe()));

    let spec = CampaignSpec {
        accounts,
        targets,
        messages,
        max_per_account: cli.max_per_account.or(config.dispatch.max_per_account),
    };
    let summary = engine.run(spec, cancel).await?;
    progress.abort();

    println!();
    println!(
        "Campaign {}: {} sent, {} failed in {}s",
        if summary.paused { "paused" } else { "finished" },
        summary.sent,
        summary.failed,
        summary.duration.as_secs()
    );
    for report in &summary.reports {
        println!(
            "  @{}: {} sent, {} failed ({})",
            report.account, report.sent, report.failed, report.final_state
        );
    }

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
            Event::CampaignStarted { accounts, pending } => {
                println!("Sending to {} targets from {} accounts", pending, accounts.len());
            }
            Event::SendRecorded {
                account,
                target,
                ok,
                detail,
            } => {
                if ok {
                    println!("  @{} -> @{}: sent", account, target);
                } else {
                    println!(
                        "  @{} -> @{}: failed ({})",
                        account,
                        target,
                        detail.unwrap_or_default()
                    );
                }
            }
            Event::ProxyFallback { account, .. } => {
                println!("  @{}: proxy unreachable, using direct connection", account);
            }
            Event::AccountSkipped { account, reason } => {
                println!("  @{}: skipped ({})", account, reason);
            }
            Event::CampaignPaused { reason } => {
                println!("Campaign paused: {}", reason);
            }
            _ => {}
        }
    }
}
