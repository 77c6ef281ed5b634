//! Refresh orchestration: configuration, the source registry, and the cycle
//! driver that fans out to adapters and commits one reconciliation per run.

mod config;
mod orchestrator;

pub use config::{build_adapters, SourceConfig, SourceRegistry, SyncConfig};
pub use orchestrator::{AdapterOutcome, CycleSummary, RefreshOrchestrator};

pub const CRATE_NAME: &str = "stt-sync";
