//! Persistence + HTTP transport for STT.
//!
//! [`EventStore`] is the reconciliation store (SQLite via sqlx) and
//! [`HttpFetcher`] is the shared, explicitly owned HTTP client that source
//! adapters reach through the [`Transport`] trait.

mod http;
mod store;

pub use http::{
    classify_status, FailureDisposition, FetchError, FetchedResponse, HttpClientConfig,
    HttpFetcher, HttpRequest, Transport,
};
pub use store::{format_timestamp, EventStore, ReconcileSummary, StoreError};

pub const CRATE_NAME: &str = "stt-storage";
