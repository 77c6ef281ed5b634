use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use stt_adapters::Credentials;
use stt_render::{render_chunks, window_title, RenderOptions, RenderStyle, ViewPreset};
use stt_storage::EventStore;
use stt_sync::{RefreshOrchestrator, SyncConfig};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stt")]
#[command(about = "Standup ticket tracker: aggregate and report comedy ticket sales")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one refresh cycle across all enabled sources.
    Refresh,
    /// Refresh on the configured interval (and cron triggers) until Ctrl-C.
    Run,
    /// Print upcoming events as size-bounded text chunks.
    List {
        #[arg(long, conflicts_with = "preset")]
        days: Option<u32>,
        #[arg(long, default_value_t = ViewPreset::All)]
        preset: ViewPreset,
        #[arg(long)]
        compact: bool,
    },
    /// Create the schema if it does not exist yet.
    Migrate,
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries rendered chunks; logs go to stderr.
    if env_bool("STT_LOG_JSON", false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Title and query window for `list`; an explicit `--days` wins over the preset.
fn list_view(days: Option<u32>, preset: ViewPreset) -> (String, Option<Duration>) {
    match days {
        Some(days) => (
            window_title(i64::from(days)),
            Some(Duration::days(i64::from(days))),
        ),
        None => (preset.title(), preset.window()),
    }
}

async fn refresh(config: &SyncConfig) -> Result<()> {
    let orchestrator = RefreshOrchestrator::from_config(config, &Credentials::from_env()).await?;
    let result = orchestrator.run_cycle_now().await;
    orchestrator.store().close().await;
    let summary = result.context("refresh cycle failed")?;

    let failed: Vec<String> = summary
        .failed_sources()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!(
        "refresh complete: cycle_id={} inserted={} updated={} failed=[{}]",
        summary.cycle_id,
        summary.inserted,
        summary.updated,
        failed.join(",")
    );
    Ok(())
}

async fn run(config: &SyncConfig) -> Result<()> {
    let orchestrator =
        Arc::new(RefreshOrchestrator::from_config(config, &Credentials::from_env()).await?);
    let mut scheduler = orchestrator.maybe_build_scheduler(config).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(crons = ?config.sync_crons, "cron triggers started");
    }

    info!(
        interval_secs = config.refresh_interval.as_secs(),
        sources = ?orchestrator.sources(),
        "periodic refresh started"
    );
    tokio::select! {
        _ = orchestrator.run_periodic(config.refresh_interval) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            info!("shutdown requested");
        }
    }

    if let Some(sched) = scheduler.as_mut() {
        sched.shutdown().await.context("stopping scheduler")?;
    }
    orchestrator.store().close().await;
    Ok(())
}

async fn list(config: &SyncConfig, days: Option<u32>, preset: ViewPreset, compact: bool) -> Result<()> {
    let store = EventStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    let now = Utc::now();
    let (title, window) = list_view(days, preset);
    let stored = store.list_events(now, window).await;
    store.close().await;
    let stored = stored.context("querying events")?;

    let style = if compact {
        RenderStyle::Compact
    } else {
        RenderStyle::Detailed
    };
    let options = RenderOptions::default()
        .with_max_chunk_chars(config.max_message_chars)
        .with_utc_offset_hours(config.display_utc_offset_hours)
        .with_style(style);
    let chunks = render_chunks(&title, stored.iter().map(|s| &s.event), now, &options);
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        println!("{}", chunk.trim_end());
    }
    Ok(())
}

async fn migrate(config: &SyncConfig) -> Result<()> {
    let store = EventStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    store.migrate().await.context("applying schema")?;
    let count = store.count().await?;
    store.close().await;
    println!("schema ready: {} ({count} events)", config.database_url);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Refresh) {
        Commands::Refresh => refresh(&config).await,
        Commands::Run => run(&config).await,
        Commands::List {
            days,
            preset,
            compact,
        } => list(&config, days, preset, compact).await,
        Commands::Migrate => migrate(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_is_the_default_command() {
        let cli = Cli::try_parse_from(["stt"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn list_accepts_presets_and_compact_style() {
        let cli = Cli::try_parse_from(["stt", "list", "--preset", "7", "--compact"]).unwrap();
        let Some(Commands::List {
            days,
            preset,
            compact,
        }) = cli.command
        else {
            panic!("expected list");
        };
        assert_eq!(days, None);
        assert_eq!(preset, ViewPreset::Next7Days);
        assert!(compact);
    }

    #[test]
    fn days_and_preset_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["stt", "list", "--days", "5", "--preset", "3"]).is_err());
        assert!(Cli::try_parse_from(["stt", "list", "--preset", "14"]).is_err());
    }

    #[test]
    fn explicit_days_override_the_preset_window() {
        let (title, window) = list_view(Some(10), ViewPreset::All);
        assert_eq!(title, "Next 10 days");
        assert_eq!(window, Some(Duration::days(10)));

        let (title, window) = list_view(None, ViewPreset::All);
        assert_eq!(title, "All events");
        assert_eq!(window, None);
    }
}
