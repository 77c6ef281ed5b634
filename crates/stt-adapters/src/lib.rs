//! Source adapter contract plus the Yandex, GoStandUp and Timepad adapters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use stt_core::{CanonicalEvent, Source};
use stt_storage::{FailureDisposition, FetchError, HttpRequest, Transport};
use thiserror::Error;
use uuid::Uuid;

pub mod gostandup;
pub mod json;
pub mod time;
pub mod timepad;
pub mod yandex;

pub use gostandup::GoStandUpAdapter;
pub use json::parse_lenient_json;
pub use time::parse_provider_datetime;
pub use timepad::TimepadAdapter;
pub use yandex::{auth_signature, HashCase, YandexAdapter};

pub const CRATE_NAME: &str = "stt-adapters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub cycle_id: Uuid,
    /// Reference instant for the cycle; events strictly before it are dropped.
    pub now: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            now,
        }
    }
}

/// Normalized `(sold, total)` pair; `total == 0` means capacity is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TicketCounts {
    pub sold: u32,
    pub total: u32,
}

impl TicketCounts {
    pub fn new(sold: u32, total: u32) -> Self {
        Self { sold, total }
    }

    pub(crate) fn add(&mut self, other: TicketCounts) {
        self.sold = self.sold.saturating_add(other.sold);
        self.total = self.total.saturating_add(other.total);
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transient network failure: {0}")]
    TransientNetwork(String),
    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),
    #[error("adapter configuration error: {0}")]
    Configuration(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::TransientNetwork(_))
    }
}

impl From<FetchError> for AdapterError {
    fn from(err: FetchError) -> Self {
        match err.disposition() {
            FailureDisposition::Transient => AdapterError::TransientNetwork(err.to_string()),
            FailureDisposition::Permanent => AdapterError::UpstreamProtocol(err.to_string()),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Fetches the provider's current upcoming events in canonical form.
    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<CanonicalEvent>, AdapterError>;
}

/// Provider-specific knobs from `sources.yaml`; unused fields are ignored per provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    pub city_id: Option<i64>,
    pub auth_hash_case: Option<HashCase>,
    pub page_size: Option<u32>,
    pub max_pages: Option<u32>,
}

/// Secrets are read from the environment only, never from the registry file.
#[derive(Clone, Default)]
pub struct Credentials {
    pub yandex_login: Option<String>,
    pub yandex_password: Option<String>,
    pub gostandup_token: Option<String>,
    pub timepad_token: Option<String>,
    pub timepad_org_id: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("yandex_login", &self.yandex_login)
            .field("yandex_password", &mask(&self.yandex_password))
            .field("gostandup_token", &mask(&self.gostandup_token))
            .field("timepad_token", &mask(&self.timepad_token))
            .field("timepad_org_id", &self.timepad_org_id)
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            yandex_login: get("YANDEX_API_LOGIN"),
            yandex_password: get("YANDEX_API_PASSWORD"),
            gostandup_token: get("GOSTANDUP_BEARER_TOKEN"),
            timepad_token: get("TIMEPAD_BEARER_TOKEN"),
            timepad_org_id: get("TIMEPAD_ORG_ID"),
        }
    }
}

pub(crate) fn require(value: &Option<String>, var: &str) -> Result<String, AdapterError> {
    value
        .clone()
        .ok_or_else(|| AdapterError::Configuration(format!("{var} is not set")))
}

/// Builds the adapter registered for `source`, failing fast on missing credentials.
pub fn adapter_for_source(
    source: Source,
    base_url: Option<&str>,
    settings: &SourceSettings,
    credentials: &Credentials,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn SourceAdapter>, AdapterError> {
    let adapter: Arc<dyn SourceAdapter> = match source {
        Source::Yandex => Arc::new(YandexAdapter::new(
            transport,
            base_url.unwrap_or(yandex::DEFAULT_BASE_URL),
            require(&credentials.yandex_login, "YANDEX_API_LOGIN")?,
            require(&credentials.yandex_password, "YANDEX_API_PASSWORD")?,
            settings.city_id.unwrap_or(yandex::DEFAULT_CITY_ID),
            settings.auth_hash_case.unwrap_or_default(),
        )),
        Source::GoStandUp => Arc::new(GoStandUpAdapter::new(
            transport,
            base_url.unwrap_or(gostandup::DEFAULT_BASE_URL),
            require(&credentials.gostandup_token, "GOSTANDUP_BEARER_TOKEN")?,
        )),
        Source::Timepad => Arc::new(
            TimepadAdapter::new(
                transport,
                base_url.unwrap_or(timepad::DEFAULT_BASE_URL),
                require(&credentials.timepad_token, "TIMEPAD_BEARER_TOKEN")?,
                require(&credentials.timepad_org_id, "TIMEPAD_ORG_ID")?,
            )
            .with_paging(
                settings.page_size.unwrap_or(timepad::DEFAULT_PAGE_SIZE),
                settings.max_pages.unwrap_or(timepad::DEFAULT_MAX_PAGES),
            ),
        ),
    };
    Ok(adapter)
}

pub(crate) async fn get_json(
    transport: &dyn Transport,
    request: HttpRequest,
) -> Result<JsonValue, AdapterError> {
    let response = transport.get(request).await?;
    parse_lenient_json(&response.body)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use stt_storage::{FetchError, FetchedResponse, HttpRequest, Transport};

    pub fn fixture(source: &str, name: &str) -> String {
        let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "..", "..", "fixtures", source, name]
            .iter()
            .collect();
        std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("reading {}: {err}", path.display()))
    }

    /// Replays queued responses in order and records every request it sees.
    #[derive(Default)]
    pub struct StubTransport {
        responses: Mutex<VecDeque<Result<String, FetchError>>>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl StubTransport {
        pub fn with_bodies<I, S>(bodies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let stub = Self::default();
            for body in bodies {
                stub.push(Ok(body.into()));
            }
            stub
        }

        pub fn push(&self, response: Result<String, FetchError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        pub fn recorded(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn get(&self, request: HttpRequest) -> Result<FetchedResponse, FetchError> {
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected request to {url}"));
            next.map(|body| FetchedResponse {
                status: 200,
                final_url: url,
                body,
            })
        }
    }
}
