use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use stt_adapters::{AdapterContext, Credentials, SourceAdapter};
use stt_core::{Source, SourceBatch};
use stt_storage::{EventStore, HttpClientConfig, HttpFetcher, StoreError, Transport};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{build_adapters, SourceRegistry, SyncConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdapterOutcome {
    Succeeded {
        source: Source,
        events: usize,
    },
    Failed {
        source: Source,
        transient: bool,
        error: String,
    },
}

impl AdapterOutcome {
    pub fn source(&self) -> Source {
        match self {
            AdapterOutcome::Succeeded { source, .. } | AdapterOutcome::Failed { source, .. } => {
                *source
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, AdapterOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<AdapterOutcome>,
    pub inserted: usize,
    pub updated: usize,
}

impl CycleSummary {
    pub fn failed_sources(&self) -> Vec<Source> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(AdapterOutcome::source)
            .collect()
    }
}

/// Runs every registered adapter and commits their batches in one reconciliation.
pub struct RefreshOrchestrator {
    store: EventStore,
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl RefreshOrchestrator {
    pub fn new(store: EventStore, adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { store, adapters }
    }

    /// Wires store, HTTP client, registry and credentials from configuration.
    pub async fn from_config(config: &SyncConfig, credentials: &Credentials) -> Result<Self> {
        let registry = SourceRegistry::load(&config.sources_file).await?;
        let http: Arc<dyn Transport> = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?);
        let adapters = build_adapters(&registry, credentials, http)?;
        let store = EventStore::connect(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?;
        info!(
            sources = adapters.len(),
            registry = %config.sources_file.display(),
            "refresh orchestrator ready"
        );
        Ok(Self::new(store, adapters))
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn sources(&self) -> Vec<Source> {
        self.adapters.iter().map(|a| a.source()).collect()
    }

    pub async fn run_cycle_now(&self) -> Result<CycleSummary, StoreError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One reconciliation cycle with `now` as the past-event cutoff.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleSummary, StoreError> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("refresh_cycle", %cycle_id);
        self.cycle(cycle_id, now).instrument(span).await
    }

    async fn cycle(&self, cycle_id: Uuid, now: DateTime<Utc>) -> Result<CycleSummary, StoreError> {
        let started_at = Utc::now();
        let ctx = AdapterContext { cycle_id, now };

        // One task per adapter so a panic stays inside its own source.
        let handles: Vec<_> = self
            .adapters
            .iter()
            .map(|adapter| {
                let adapter = Arc::clone(adapter);
                let ctx = ctx.clone();
                let source = adapter.source();
                let span = info_span!("adapter_fetch", %cycle_id, source = %source);
                let handle =
                    tokio::spawn(async move { adapter.fetch(&ctx).await }.instrument(span));
                (source, handle)
            })
            .collect();

        let mut batches = Vec::with_capacity(handles.len());
        let mut outcomes = Vec::with_capacity(handles.len());
        for (source, handle) in handles {
            match handle.await {
                Ok(Ok(events)) => {
                    info!(source = %source, events = events.len(), "adapter fetched");
                    outcomes.push(AdapterOutcome::Succeeded {
                        source,
                        events: events.len(),
                    });
                    batches.push(SourceBatch::new(source, events));
                }
                Ok(Err(err)) => {
                    warn!(source = %source, transient = err.is_transient(), error = %err, "adapter failed");
                    outcomes.push(AdapterOutcome::Failed {
                        source,
                        transient: err.is_transient(),
                        error: err.to_string(),
                    });
                }
                Err(join_err) => {
                    warn!(source = %source, error = %join_err, "adapter task aborted");
                    outcomes.push(AdapterOutcome::Failed {
                        source,
                        transient: false,
                        error: format!("adapter task aborted: {join_err}"),
                    });
                }
            }
        }

        let reconciled = self.store.reconcile(&batches).await?;
        let finished_at = Utc::now();
        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        info!(
            inserted = reconciled.inserted,
            updated = reconciled.updated,
            failed,
            "refresh cycle committed"
        );

        Ok(CycleSummary {
            cycle_id,
            started_at,
            finished_at,
            outcomes,
            inserted: reconciled.inserted,
            updated: reconciled.updated,
        })
    }

    /// Runs a cycle, then sleeps `interval`, forever. A failed cycle is logged
    /// and the loop carries on.
    pub async fn run_periodic(&self, interval: Duration) {
        loop {
            match self.run_cycle_now().await {
                Ok(summary) => info!(
                    cycle_id = %summary.cycle_id,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    failed_sources = ?summary.failed_sources(),
                    "periodic refresh finished"
                ),
                Err(err) => error!(error = %err, "periodic refresh failed"),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Cron triggers on top of the periodic loop; `None` when disabled.
    pub async fn maybe_build_scheduler(
        self: &Arc<Self>,
        config: &SyncConfig,
    ) -> Result<Option<JobScheduler>> {
        if !config.scheduler_enabled || config.sync_crons.is_empty() {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for cron in &config.sync_crons {
            let orchestrator = Arc::clone(self);
            let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move {
                    match orchestrator.run_cycle_now().await {
                        Ok(summary) => info!(
                            cycle_id = %summary.cycle_id,
                            inserted = summary.inserted,
                            updated = summary.updated,
                            "scheduled refresh finished"
                        ),
                        Err(err) => error!(error = %err, "scheduled refresh failed"),
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }
}
