// SPDX-License-Identifier: GPL-3.0-or-later
mod wiring;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use encore_application::{execute_cleanup, plan_duplicate_cleanup};
use encore_config::{load_validated, TelemetryConfig};
use encore_infrastructure::{ImportListSink, JsonFileSink, LibraryRepository};
use encore_providers::CompletionProvider;
use encore_scheduler::Scheduler;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pause between Lidarr delete calls during duplicate cleanup.
const CLEANUP_PAUSE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(
    name = "encore",
    about = "AI music recommendations as a Lidarr import list",
    version
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "ENCORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one recommendation cycle and write the import list
    Fetch {
        /// Write the list here instead of output.path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the items to stdout as JSON
        #[arg(long)]
        print: bool,
    },
    /// Refresh the import list on the configured interval until interrupted
    Run,
    /// Check connectivity and list models for every configured provider
    TestProviders,
    /// Remove duplicate artists such as "Artist (2)" from Lidarr
    CleanupDuplicates {
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_validated(cli.config.as_deref())?;
    init_tracing(&config.telemetry);

    match cli.command {
        Command::Fetch { output, print } => {
            let path = output.unwrap_or_else(|| config.output.path.clone());
            fetch(&config, path, print).await
        }
        Command::Run => run(&config).await,
        Command::TestProviders => test_providers(&config).await,
        Command::CleanupDuplicates { dry_run } => cleanup_duplicates(&config, dry_run).await,
    }
}

fn init_tracing(telemetry: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    if telemetry.json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true).with_level(true))
            .init();
    }
}

async fn fetch(config: &encore_config::AppConfig, path: PathBuf, print: bool) -> Result<()> {
    let service = wiring::import_list_service(config)?;
    let sink = JsonFileSink::new(path);
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        interrupt.cancel();
    });

    let report = service.refresh(&sink, &cancel).await?;
    if let Some(outcome) = &report.outcome {
        info!(
            target: "cli",
            attempts = outcome.attempts,
            stop_reason = %outcome.stop_reason,
            duplicates = outcome.duplicates_filtered,
            in_library = outcome.library_filtered,
            "recommendation cycle finished"
        );
    }
    info!(
        target: "cli",
        items = report.items.len(),
        path = %sink.path().display(),
        "import list written"
    );

    if print {
        println!("{}", serde_json::to_string_pretty(&report.items)?);
    }
    Ok(())
}

async fn run(config: &encore_config::AppConfig) -> Result<()> {
    let service = Arc::new(wiring::import_list_service(config)?);
    let sink: Arc<dyn ImportListSink> = Arc::new(JsonFileSink::new(config.output.path.clone()));

    let scheduler = Scheduler::new(config.scheduler.clone());
    let status = scheduler.register_refresh(service, sink).await;

    let cancel = CancellationToken::new();
    let handles = scheduler.start(cancel.clone()).await;
    info!(
        target: "cli",
        interval_secs = config.scheduler.refresh_interval_secs,
        output = %config.output.path.display(),
        "encore running"
    );

    shutdown_signal().await;
    cancel.cancel();
    for handle in handles {
        if let Err(err) = handle.await {
            warn!(target: "cli", error = %err, "job task ended abnormally");
        }
    }

    let last = status
        .lock()
        .map(|guard| guard.clone())
        .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
    if let Some(last) = last {
        info!(target: "cli", completed_at = %last.completed_at, items = last.items, "last successful refresh");
    }
    Ok(())
}

async fn test_providers(config: &encore_config::AppConfig) -> Result<()> {
    let clients = wiring::provider_clients(config)?;
    let mut reachable = 0;

    for client in &clients {
        let provider = client.kind().as_str();
        match client.list_models().await {
            Ok(models) => {
                reachable += 1;
                let configured = client.model();
                let available = models.iter().any(|model| model == configured);
                info!(
                    target: "cli",
                    provider,
                    model = configured,
                    models = models.len(),
                    model_available = available,
                    "provider reachable"
                );
            }
            Err(err) => {
                error!(target: "cli", provider, error = %err, "provider unreachable");
            }
        }
    }

    let health: Vec<_> = clients.iter().map(|client| client.health()).collect();
    println!("{}", serde_json::to_string_pretty(&health)?);

    if reachable == 0 {
        anyhow::bail!("none of the {} configured providers is reachable", clients.len());
    }
    Ok(())
}

async fn cleanup_duplicates(config: &encore_config::AppConfig, dry_run: bool) -> Result<()> {
    let lidarr = wiring::lidarr_client(config)?;
    let artists = lidarr
        .list_artists()
        .await
        .context("failed to list Lidarr artists")?;

    let plan = plan_duplicate_cleanup(&artists);
    if plan.is_empty() {
        info!(target: "cli", artists = artists.len(), "no duplicate artists found");
        return Ok(());
    }

    for group in &plan.groups {
        let removing: Vec<_> = group.remove.iter().map(|a| a.name.as_str()).collect();
        info!(target: "cli", keep = %group.keep.name, remove = ?removing, "duplicate group");
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        interrupt.cancel();
    });

    let report = execute_cleanup(&lidarr, &plan, dry_run, CLEANUP_PAUSE, &cancel).await;
    info!(
        target: "cli",
        planned = report.planned,
        removed = report.removed,
        failed = report.failed,
        dry_run = report.dry_run,
        "duplicate cleanup finished"
    );
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => {},
                    _ = terminate.recv() => {},
                }
            }
            _ => {
                warn!(target: "cli", "signal handlers unavailable, falling back to ctrl-c");
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!(target: "cli", error = %err, "failed to wait for ctrl-c");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target: "cli", error = %err, "failed to wait for ctrl-c");
        }
    }

    info!(target: "cli", "shutdown signal received");
}
