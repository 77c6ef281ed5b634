//! Timepad v1: paginated organization listing, with a per-event registration
//! lookup for events that expose no ticket types.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use stt_core::{CanonicalEvent, Source};
use stt_storage::{HttpRequest, Transport};
use tracing::{debug, warn};

use crate::json::{json_count, json_id, json_str, required_items};
use crate::time::parse_provider_datetime;
use crate::{get_json, AdapterContext, AdapterError, SourceAdapter, TicketCounts};

pub const DEFAULT_BASE_URL: &str = "https://api.timepad.ru/v1";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_PAGES: u32 = 20;

const LISTING_FIELDS: &str = "dates,starts_at,ticket_types";

/// Sums `sold` and `total` (falling back to `count`) across ticket types.
pub fn ticket_type_counts(types: &[JsonValue]) -> TicketCounts {
    types.iter().fold(TicketCounts::default(), |mut acc, ticket| {
        let sold = json_count(ticket, &["sold"]).unwrap_or(0);
        let total = json_count(ticket, &["total"])
            .filter(|n| *n > 0)
            .or_else(|| json_count(ticket, &["count"]))
            .unwrap_or(0);
        acc.add(TicketCounts::new(sold, total));
        acc
    })
}

/// Reads `registration.places`, which is either a list (first entry wins) or
/// a single object.
pub fn registration_counts(registration: &JsonValue) -> TicketCounts {
    let places = match registration.get("places") {
        Some(JsonValue::Array(list)) => list.first(),
        Some(place @ JsonValue::Object(_)) => Some(place),
        _ => None,
    };
    let Some(place) = places else {
        return TicketCounts::default();
    };

    let first_nonzero = |keys: [&str; 2]| {
        keys.into_iter()
            .filter_map(|key| json_count(place, &[key]))
            .find(|n| *n > 0)
            .unwrap_or(0)
    };
    TicketCounts::new(
        first_nonzero(["registered", "count"]),
        first_nonzero(["limit", "capacity"]),
    )
}

/// `dates[0].start`, then `dates[0].date`, then `starts_at`.
pub fn event_start(event: &JsonValue) -> Option<DateTime<Utc>> {
    let first_date = event
        .get("dates")
        .and_then(JsonValue::as_array)
        .and_then(|dates| dates.first());
    first_date
        .and_then(|d| json_str(d, &["start"]).or_else(|| json_str(d, &["date"])))
        .or_else(|| json_str(event, &["starts_at"]))
        .and_then(parse_provider_datetime)
}

pub struct TimepadAdapter {
    transport: Arc<dyn Transport>,
    base_url: String,
    token: String,
    organization_id: String,
    page_size: u32,
    max_pages: u32,
}

impl TimepadAdapter {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: &str,
        token: String,
        organization_id: String,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            organization_id,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_paging(mut self, page_size: u32, max_pages: u32) -> Self {
        self.page_size = page_size.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    fn event_url(&self, event: &JsonValue, external_id: &str) -> String {
        json_str(event, &["url"])
            .or_else(|| json_str(event, &["site_url"]))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/events/{external_id}", self.base_url))
    }

    async fn list_all(&self) -> Result<Vec<JsonValue>, AdapterError> {
        let mut values = Vec::new();
        let mut skip: u32 = 0;
        for page in 0..self.max_pages {
            let request = HttpRequest::get(format!("{}/events.json", self.base_url))
                .with_bearer(&self.token)
                .with_query("organization_ids", &self.organization_id)
                .with_query("fields", LISTING_FIELDS)
                .with_query("limit", self.page_size)
                .with_query("skip", skip)
                .with_query("sort", "+starts_at");
            let body = get_json(self.transport.as_ref(), request).await?;

            let batch = required_items(&body, &["values"], "timepad listing")?;
            let received = u32::try_from(batch.len()).unwrap_or(u32::MAX);
            values.extend(batch.into_iter().cloned());
            skip = skip.saturating_add(received);

            let reported_total = json_count(&body, &["total"]);
            if received < self.page_size || reported_total.is_some_and(|total| skip >= total) {
                return Ok(values);
            }
            if page + 1 == self.max_pages {
                warn!(
                    pages = self.max_pages,
                    fetched = skip,
                    reported_total,
                    "timepad page cap reached, listing truncated"
                );
            }
        }
        Ok(values)
    }

    async fn registration(&self, external_id: &str) -> Result<TicketCounts, AdapterError> {
        let request = HttpRequest::get(format!("{}/events/{external_id}.json", self.base_url))
            .with_bearer(&self.token)
            .with_query("fields", "registration");
        let detail = get_json(self.transport.as_ref(), request).await?;
        Ok(detail
            .get("registration")
            .map(registration_counts)
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceAdapter for TimepadAdapter {
    fn source(&self) -> Source {
        Source::Timepad
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<CanonicalEvent>, AdapterError> {
        let listing = self.list_all().await?;

        let mut events = Vec::new();
        let (mut past, mut undated, mut registrations) = (0usize, 0usize, 0usize);
        for item in &listing {
            let Some(external_id) = json_id(item, "id") else {
                continue;
            };
            let Some(date) = event_start(item) else {
                undated += 1;
                continue;
            };
            if date < ctx.now {
                past += 1;
                continue;
            }

            let types = item
                .get("ticket_types")
                .and_then(JsonValue::as_array)
                .filter(|types| !types.is_empty());
            let counts = match types {
                Some(types) => ticket_type_counts(types),
                None => {
                    registrations += 1;
                    self.registration(&external_id).await?
                }
            };

            let name = json_str(item, &["name"])
                .or_else(|| json_str(item, &["title"]))
                .unwrap_or_default();
            let url = self.event_url(item, &external_id);
            events.push(
                CanonicalEvent::new(Source::Timepad, external_id, name, date)
                    .with_tickets(counts.sold, counts.total)
                    .with_url(Some(url)),
            );
        }

        debug!(
            listed = listing.len(),
            kept = events.len(),
            past,
            undated,
            registrations,
            "timepad events normalized"
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, StubTransport};
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> AdapterContext {
        AdapterContext::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    fn adapter(stub: Arc<StubTransport>, page_size: u32) -> TimepadAdapter {
        TimepadAdapter::new(stub, "https://tp.test/v1/", "tp-token".into(), "42".into())
            .with_paging(page_size, 5)
    }

    #[test]
    fn ticket_types_are_summed_with_count_fallback() {
        let types = [
            json!({"sold": 10, "total": 50}),
            json!({"sold": 5, "count": 20}),
            json!({"sold": 1, "total": 0, "count": 4}),
            json!({}),
        ];
        assert_eq!(ticket_type_counts(&types), TicketCounts::new(16, 74));
    }

    #[test]
    fn registration_places_may_be_a_list_or_an_object() {
        let listed = json!({"places": [{"registered": 7, "limit": 30}, {"registered": 99}]});
        assert_eq!(registration_counts(&listed), TicketCounts::new(7, 30));

        let single = json!({"places": {"registered": 0, "count": 3, "capacity": 15}});
        assert_eq!(registration_counts(&single), TicketCounts::new(3, 15));

        assert_eq!(registration_counts(&json!({"places": []})), TicketCounts::default());
        assert_eq!(registration_counts(&json!({})), TicketCounts::default());
    }

    #[test]
    fn start_date_falls_back_through_known_fields() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 4, 16, 0, 0).unwrap();
        let by_start = json!({"dates": [{"start": "2026-03-04T19:00:00+0300"}]});
        let by_date = json!({"dates": [{"date": "2026-03-04T19:00:00+03:00"}]});
        let by_starts_at = json!({"dates": [], "starts_at": "2026-03-04T16:00:00Z"});
        assert_eq!(event_start(&by_start), Some(expected));
        assert_eq!(event_start(&by_date), Some(expected));
        assert_eq!(event_start(&by_starts_at), Some(expected));
        assert_eq!(event_start(&json!({"dates": null})), None);
    }

    #[tokio::test]
    async fn listing_is_paged_and_falls_back_to_registration() {
        let stub = Arc::new(StubTransport::with_bodies([
            fixture("timepad", "events_page1.json"),
            fixture("timepad", "events_page2.json"),
            fixture("timepad", "registration_7002.json"),
        ]));
        let events = adapter(stub.clone(), 2).fetch(&ctx()).await.unwrap();

        let summary: Vec<_> = events
            .iter()
            .map(|e| (e.external_id.as_str(), e.tickets_sold, e.tickets_total))
            .collect();
        assert_eq!(summary, vec![("7001", 15, 70), ("7002", 12, 40)]);
        assert_eq!(events[0].name, "Comedy Battle");
        assert_eq!(events[1].name, "Improv Jam");
        assert_eq!(events[1].url.as_deref(), Some("https://club.timepad.ru/event/7002/"));

        let requests = stub.recorded();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].url, "https://tp.test/v1/events.json");
        assert_eq!(requests[0].query_value("organization_ids"), Some("42"));
        assert_eq!(requests[0].query_value("skip"), Some("0"));
        assert_eq!(requests[1].query_value("skip"), Some("2"));
        assert_eq!(requests[2].url, "https://tp.test/v1/events/7002.json");
        assert_eq!(requests[2].query_value("fields"), Some("registration"));
        assert_eq!(requests[2].header_value("authorization"), Some("Bearer tp-token"));
    }

    #[tokio::test]
    async fn short_page_ends_pagination_and_url_is_synthesized() {
        let stub = Arc::new(StubTransport::with_bodies([json!({
            "values": [{
                "id": 8001,
                "name": "Solo Hour",
                "starts_at": "2026-03-02T18:00:00+03:00",
                "ticket_types": [{"sold": 2, "count": 10}]
            }]
        })
        .to_string()]));
        let events = adapter(stub.clone(), 100).fetch(&ctx()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].url.as_deref(), Some("https://tp.test/v1/events/8001"));
        assert_eq!(stub.recorded().len(), 1);
    }

    #[tokio::test]
    async fn page_cap_bounds_the_number_of_requests() {
        let full_page = json!({
            "total": 1000,
            "values": [
                {"id": 1, "starts_at": "2020-01-01T00:00:00Z"},
                {"id": 2, "starts_at": "2020-01-01T00:00:00Z"}
            ]
        })
        .to_string();
        let stub = Arc::new(StubTransport::with_bodies(vec![full_page; 3]));
        let events = TimepadAdapter::new(stub.clone(), DEFAULT_BASE_URL, "t".into(), "42".into())
            .with_paging(2, 3)
            .fetch(&ctx())
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(stub.recorded().len(), 3);
    }

    #[tokio::test]
    async fn error_object_instead_of_a_listing_is_a_protocol_error() {
        let stub = Arc::new(StubTransport::with_bodies([json!({
            "response_status": {"error_code": 403, "message": "Forbidden"}
        })
        .to_string()]));
        let err = adapter(stub.clone(), 100).fetch(&ctx()).await.unwrap_err();
        assert!(matches!(err, AdapterError::UpstreamProtocol(ref m) if m.contains("403")));
        assert_eq!(stub.recorded().len(), 1);
    }

    #[tokio::test]
    async fn explicit_empty_listing_is_an_empty_success() {
        let stub = Arc::new(StubTransport::with_bodies([r#"{"total":0,"values":[]}"#]));
        let events = adapter(stub, 100).fetch(&ctx()).await.unwrap();
        assert!(events.is_empty());
    }
}
