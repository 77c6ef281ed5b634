//! Yandex Afisha CRM: `crm.event.list` for sessions, then `crm.report.event`
//! for sales figures keyed by event id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use md5::Md5;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha1::{Digest, Sha1};
use stt_core::{CanonicalEvent, Source};
use stt_storage::{HttpRequest, Transport};
use tracing::debug;

use crate::json::{json_count, json_i64, json_id, json_str, required_items, snippet};
use crate::time::parse_provider_datetime;
use crate::{get_json, AdapterContext, AdapterError, SourceAdapter, TicketCounts};

pub const DEFAULT_BASE_URL: &str = "https://api.tickets.yandex.net/api/crm/";
pub const DEFAULT_CITY_ID: i64 = 34_348_482;

const ACTION_EVENT_LIST: &str = "crm.event.list";
const ACTION_EVENT_REPORT: &str = "crm.report.event";
const REPORT_BATCH_SIZE: usize = 100;
const ACTIVE_STATUS: i64 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashCase {
    #[default]
    Lower,
    Upper,
}

impl HashCase {
    fn apply(self, hex: String) -> String {
        match self {
            HashCase::Lower => hex,
            HashCase::Upper => hex.to_ascii_uppercase(),
        }
    }
}

/// `LOGIN:sha1(md5hex(PASSWORD) + TS):TS`, both digests rendered in `case`.
pub fn auth_signature(login: &str, password: &str, timestamp: i64, case: HashCase) -> String {
    let password_md5 = case.apply(hex::encode(Md5::digest(password.as_bytes())));
    let signed = case.apply(hex::encode(Sha1::digest(
        format!("{password_md5}{timestamp}").as_bytes(),
    )));
    format!("{login}:{signed}:{timestamp}")
}

/// Sums report rows per `event_id`: `sold += tickets_sold`,
/// `total += tickets_sold + tickets_available`.
pub fn merge_report_rows<'a>(
    rows: impl IntoIterator<Item = &'a JsonValue>,
) -> HashMap<String, TicketCounts> {
    let mut stats: HashMap<String, TicketCounts> = HashMap::new();
    for row in rows {
        let Some(event_id) = json_id(row, "event_id") else {
            continue;
        };
        let sold = json_count(row, &["tickets_sold"]).unwrap_or(0);
        let available = json_count(row, &["tickets_available"]).unwrap_or(0);
        stats
            .entry(event_id)
            .or_default()
            .add(TicketCounts::new(sold, sold.saturating_add(available)));
    }
    stats
}

fn check_envelope(action: &str, body: &JsonValue) -> Result<(), AdapterError> {
    let ok = match body.get("status") {
        Some(JsonValue::String(s)) => s.trim() == "0",
        Some(JsonValue::Number(n)) => n.as_i64() == Some(0),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(AdapterError::UpstreamProtocol(format!(
            "yandex {action} rejected: {}",
            snippet(&body.to_string())
        )))
    }
}

pub fn event_url(external_id: &str) -> String {
    format!("https://afisha.yandex.ru/events/{external_id}")
}

pub struct YandexAdapter {
    transport: Arc<dyn Transport>,
    endpoint: String,
    login: String,
    password: String,
    city_id: i64,
    hash_case: HashCase,
}

impl YandexAdapter {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: &str,
        login: String,
        password: String,
        city_id: i64,
        hash_case: HashCase,
    ) -> Self {
        Self {
            transport,
            endpoint: format!("{}/", base_url.trim_end_matches('/')),
            login,
            password,
            city_id,
            hash_case,
        }
    }

    async fn call(&self, action: &str, extra: &[(&str, String)]) -> Result<JsonValue, AdapterError> {
        // Signature is bound to the request time, so it is rebuilt per call.
        let timestamp = Utc::now().timestamp();
        let mut request = HttpRequest::get(self.endpoint.clone())
            .with_query("action", action)
            .with_query(
                "auth",
                auth_signature(&self.login, &self.password, timestamp, self.hash_case),
            )
            .with_query("city_id", self.city_id)
            .with_query("format", "json");
        for (name, value) in extra {
            request = request.with_query(*name, value);
        }

        let body = get_json(self.transport.as_ref(), request).await?;
        check_envelope(action, &body)?;
        Ok(body)
    }
}

struct Session {
    external_id: String,
    name: String,
    date: chrono::DateTime<Utc>,
}

#[async_trait]
impl SourceAdapter for YandexAdapter {
    fn source(&self) -> Source {
        Source::Yandex
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<CanonicalEvent>, AdapterError> {
        let listing = self.call(ACTION_EVENT_LIST, &[]).await?;
        let items = required_items(&listing, &["result"], ACTION_EVENT_LIST)?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let (mut closed, mut past, mut malformed) = (0usize, 0usize, 0usize);
        for item in items {
            if json_i64(item, &["status"]) != Some(ACTIVE_STATUS) {
                closed += 1;
                continue;
            }
            let (Some(external_id), Some(date)) = (
                json_id(item, "id"),
                json_str(item, &["date"]).and_then(parse_provider_datetime),
            ) else {
                malformed += 1;
                continue;
            };
            if date < ctx.now {
                past += 1;
                continue;
            }
            sessions.push(Session {
                external_id,
                name: json_str(item, &["name"]).unwrap_or_default().to_string(),
                date,
            });
        }

        let ids: Vec<&str> = sessions.iter().map(|s| s.external_id.as_str()).collect();
        let mut report_rows = Vec::new();
        for batch in ids.chunks(REPORT_BATCH_SIZE) {
            let report = self
                .call(ACTION_EVENT_REPORT, &[("event_ids", batch.join(","))])
                .await?;
            report_rows.extend(
                required_items(&report, &["result"], ACTION_EVENT_REPORT)?
                    .into_iter()
                    .cloned(),
            );
        }
        let stats = merge_report_rows(&report_rows);

        debug!(
            kept = sessions.len(),
            closed, past, malformed, "yandex sessions normalized"
        );

        Ok(sessions
            .into_iter()
            .map(|session| {
                let counts = stats
                    .get(&session.external_id)
                    .copied()
                    .unwrap_or_default();
                let url = event_url(&session.external_id);
                CanonicalEvent::new(Source::Yandex, session.external_id, session.name, session.date)
                    .with_tickets(counts.sold, counts.total)
                    .with_url(Some(url))
            })
            .collect())
    }
}
