use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use stt_adapters::{adapter_for_source, Credentials, SourceAdapter, SourceSettings};
use stt_core::Source;
use stt_storage::Transport;
use tokio::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source: Source,
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub settings: SourceSettings,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Builds one adapter per enabled source. Any misconfiguration is fatal so the
/// process never starts with a silently missing provider.
pub fn build_adapters(
    registry: &SourceRegistry,
    credentials: &Credentials,
    transport: Arc<dyn Transport>,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut seen = BTreeSet::new();
    let mut adapters = Vec::new();
    for entry in registry.enabled() {
        if !seen.insert(entry.source) {
            bail!("source {} is enabled more than once", entry.source);
        }
        let adapter = adapter_for_source(
            entry.source,
            entry.base_url.as_deref(),
            &entry.settings,
            credentials,
            Arc::clone(&transport),
        )
        .with_context(|| format!("configuring adapter for {}", entry.source))?;
        adapters.push(adapter);
    }
    Ok(adapters)
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub sources_file: PathBuf,
    pub refresh_interval: Duration,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub sync_crons: Vec<String>,
    pub max_message_chars: usize,
    pub display_utc_offset_hours: i32,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://stt.db".to_string()),
            sources_file: lookup("STT_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sources.yaml")),
            refresh_interval: Duration::from_secs(
                parsed("STT_REFRESH_INTERVAL_SECS").unwrap_or(7200),
            ),
            http_timeout_secs: parsed("STT_HTTP_TIMEOUT_SECS").unwrap_or(30),
            user_agent: lookup("STT_USER_AGENT").unwrap_or_else(|| "stt-bot/0.1".to_string()),
            scheduler_enabled: lookup("STT_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_crons: lookup("STT_SYNC_CRONS")
                .map(|v| {
                    v.split(';')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            max_message_chars: parsed("STT_MAX_MESSAGE_CHARS")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(3800),
            display_utc_offset_hours: lookup("STT_DISPLAY_UTC_OFFSET_HOURS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(3),
        }
    }
}
