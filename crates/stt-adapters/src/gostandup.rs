//! GoStandUp organizer API: a single bearer-authenticated listing.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use stt_core::{CanonicalEvent, Source};
use stt_storage::{HttpRequest, Transport};
use tracing::debug;

use crate::json::{json_count, json_id, json_str, required_items};
use crate::time::parse_provider_datetime;
use crate::{get_json, AdapterContext, AdapterError, SourceAdapter, TicketCounts};

pub const DEFAULT_BASE_URL: &str = "https://gostandup.ru/api/org";

/// Reads `tickets.seats` when it carries a capacity, otherwise `tickets.amount`.
pub fn ticket_counts(tickets: &JsonValue) -> TicketCounts {
    let seats_total = json_count(tickets, &["seats", "total"]).unwrap_or(0);
    if seats_total > 0 {
        return TicketCounts::new(
            json_count(tickets, &["seats", "sold"]).unwrap_or(0),
            seats_total,
        );
    }
    TicketCounts::new(
        json_count(tickets, &["amount", "sold"]).unwrap_or(0),
        json_count(tickets, &["amount", "total"]).unwrap_or(0),
    )
}

pub fn event_url(event: &JsonValue, external_id: &str) -> String {
    json_str(event, &["link"])
        .or_else(|| json_str(event, &["url"]))
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://gostandup.ru/event/{external_id}"))
}

pub struct GoStandUpAdapter {
    transport: Arc<dyn Transport>,
    base_url: String,
    token: String,
}

impl GoStandUpAdapter {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str, token: String) -> Self {
        Self {
            transport,
            base_url: base_url.to_string(),
            token,
        }
    }
}

#[async_trait]
impl SourceAdapter for GoStandUpAdapter {
    fn source(&self) -> Source {
        Source::GoStandUp
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<CanonicalEvent>, AdapterError> {
        let request = HttpRequest::get(self.base_url.clone()).with_bearer(&self.token);
        let listing = get_json(self.transport.as_ref(), request).await?;
        let items = required_items(&listing, &["events"], "gostandup listing")?;

        let mut events = Vec::new();
        let (mut past, mut malformed) = (0usize, 0usize);
        for item in items {
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

            let counts = item
                .get("tickets")
                .map(ticket_counts)
                .unwrap_or_default();
            let name = json_str(item, &["title"])
                .or_else(|| json_str(item, &["name"]))
                .unwrap_or_default();
            let url = event_url(item, &external_id);
            events.push(
                CanonicalEvent::new(Source::GoStandUp, external_id, name, date)
                    .with_tickets(counts.sold, counts.total)
                    .with_url(Some(url)),
            );
        }

        debug!(kept = events.len(), past, malformed, "gostandup events normalized");
        Ok(events)
    }
}
