mod api;
mod config;
mod error;
mod event;
mod extract;
mod manager;
mod notify;
mod paths;
mod poll;
mod state;
mod status;
mod transition;
mod watch;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::ManagerError;
use crate::extract::{Extractor, PatternExtractor};
use crate::manager::WatchManager;
use crate::notify::Dispatcher;
use crate::poll::{CacheTokens, PollClient, PollOutcome};
use crate::state::StateStore;
use crate::status::{DaemonState, DaemonStatus};
use crate::watch::{WatchContext, WatchSpec};

const TEST_MESSAGE: &str = "This is a test alert from pollwatch. If you received it, notifications work.";

#[derive(Parser)]
#[command(name = "pollwatch", version, about = "Watches live-poll pages and alerts when an activity opens")]
struct Cli {
    /// Config file (defaults to <config dir>/pollwatch/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch every configured target until Ctrl+C.
    Run,
    /// Like `run`, and also serve the management API.
    Serve,
    /// Fetch a page once and print what the extractor sees.
    Probe { url: String },
    /// Send one test message through the configured channel.
    NotifyTest {
        #[arg(long)]
        message: Option<String>,
        /// Recipient; repeatable. Defaults to every configured recipient.
        #[arg(long = "to")]
        to: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = cli.config.clone().unwrap_or_else(paths::config_file_path);
    let mut config = config::load_or_default(&config_path)?;
    config.apply_env(|name| std::env::var(name).ok());

    match cli.command {
        Command::Run => run(config, false).await,
        Command::Serve => run(config, true).await,
        Command::Probe { url } => probe(&config, &url).await,
        Command::NotifyTest { message, to } => notify_test(&config, message, to).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config, serve: bool) -> Result<()> {
    // Watches can be registered over the API in serve mode, so none are required.
    let settings = config.validate(!serve).context("invalid configuration")?;

    let extractor = PatternExtractor::new(config.global.profile)
        .context("failed to compile extraction patterns")?;
    let poller = PollClient::new(&config.http).context("failed to build HTTP client")?;
    let notifier = notify::build_notifier(settings, http_timeout(&config))
        .context("failed to build notification client")?;
    let dispatcher = Dispatcher::new(notifier, config.global.delivery_timeout());

    let state_path = config.global.state_file.clone().unwrap_or_else(paths::state_file_path);
    let status_path = config.global.status_file.clone().unwrap_or_else(paths::status_file_path);
    let store = Arc::new(StateStore::new(state_path));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        channel = dispatcher.channel(),
        interval_secs = config.global.poll_interval_secs,
        state = %store.path().display(),
        "pollwatch starting"
    );

    let ctx = Arc::new(WatchContext {
        poller,
        extractor: Arc::new(extractor),
        dispatcher,
        store,
        interval: config.global.poll_interval(),
        notify_on_down: config.global.notify_on_down,
    });
    let manager = Arc::new(WatchManager::new(ctx));

    // ── Watches ───────────────────────────────────────────────────────────────
    for watch in &config.watches {
        let spec = WatchSpec::new(&watch.target, watch.recipients.clone())?;
        match manager.start_spec(spec).await {
            Ok(_) => {}
            Err(ManagerError::Conflict(id)) => {
                warn!(watch = %id, target = %watch.target, "duplicate watch in config; ignoring");
            }
            Err(e) => return Err(e.into()),
        }
    }

    // ── Management API ────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let api_task = if serve {
        let listener = tokio::net::TcpListener::bind(config.server.bind.as_str())
            .await
            .with_context(|| format!("failed to bind management API on {}", config.server.bind))?;
        Some(tokio::spawn(api::serve(
            listener,
            Arc::clone(&manager),
            shutdown.clone(),
        )))
    } else {
        None
    };

    // ── Status loop ───────────────────────────────────────────────────────────
    let mut current_status = DaemonStatus::new();
    let mut ticker = tokio::time::interval(config.global.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for Ctrl+C; shutting down");
                }
                break;
            }
            _ = ticker.tick() => {
                current_status.update(manager.list().await);
                status::write_status(&status_path, &current_status);
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    info!("shutting down");
    current_status.state = DaemonState::Stopping;
    status::write_status(&status_path, &current_status);

    manager.shutdown().await;
    shutdown.cancel();
    if let Some(task) = api_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "management API stopped with an error"),
            Err(e) => warn!(error = %e, "management API task failed"),
        }
    }

    current_status.state = DaemonState::Idle;
    current_status.watches = manager.list().await;
    status::write_status(&status_path, &current_status);
    info!("pollwatch stopped");
    Ok(())
}

async fn probe(config: &Config, raw: &str) -> Result<()> {
    let target = config::parse_target(raw)?;
    let poller = PollClient::new(&config.http).context("failed to build HTTP client")?;
    let extractor = PatternExtractor::new(config.global.profile)
        .context("failed to compile extraction patterns")?;

    match poller.poll(&target, &CacheTokens::default()).await? {
        PollOutcome::NotModified => println!("{target}: not modified"),
        PollOutcome::Fresh { body, status, tokens } => {
            let extraction = extractor.extract(&body);
            println!("target:        {target}");
            println!("status:        {status}");
            println!("bytes:         {}", body.len());
            println!("etag:          {}", tokens.etag.as_deref().unwrap_or("-"));
            println!("last-modified: {}", tokens.last_modified.as_deref().unwrap_or("-"));
            println!("activity id:   {}", extraction.activity_id.as_deref().unwrap_or("-"));
            println!("accepting:     {}", extraction.accepting);
            println!("title:         {}", extraction.title.as_deref().unwrap_or("-"));
        }
    }
    Ok(())
}

async fn notify_test(config: &Config, message: Option<String>, to: Vec<String>) -> Result<()> {
    let settings = config.validate(false).context("invalid configuration")?;
    let notifier = notify::build_notifier(settings, http_timeout(config))
        .context("failed to build notification client")?;
    let dispatcher = Dispatcher::new(notifier, config.global.delivery_timeout());

    let recipients = if to.is_empty() {
        let mut all: Vec<String> = Vec::new();
        for r in config.watches.iter().flat_map(|w| w.recipients.iter()) {
            let r = r.trim();
            if !r.is_empty() && !all.iter().any(|seen| seen == r) {
                all.push(r.to_string());
            }
        }
        all
    } else {
        to
    };
    if recipients.is_empty() {
        bail!("no recipients: pass --to or configure a watch");
    }

    let message = message.unwrap_or_else(|| TEST_MESSAGE.to_string());
    let outcomes = dispatcher.dispatch(&message, &recipients).await;
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("{}: delivered via {}", outcome.recipient, dispatcher.channel()),
            Err(e) => {
                failed += 1;
                println!("{}: FAILED ({e})", outcome.recipient);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} deliveries failed", outcomes.len());
    }
    Ok(())
}

fn http_timeout(config: &Config) -> Duration {
    Duration::from_secs(config.http.timeout_secs)
}
