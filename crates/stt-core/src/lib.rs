//! Core domain model for STT: the canonical event exchanged between source
//! adapters, the reconciliation store and the renderer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "stt-core";

/// Ticketing provider an event was reported by.
///
/// Adding a provider means adding a variant here and registering an adapter for
/// it; reconciliation, querying and rendering only use the string forms below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Yandex,
    #[serde(rename = "GOSTANDUP")]
    GoStandUp,
    Timepad,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Yandex, Source::GoStandUp, Source::Timepad];

    /// Stable identifier used as the persisted `source` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Yandex => "YANDEX",
            Source::GoStandUp => "GOSTANDUP",
            Source::Timepad => "TIMEPAD",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Source::Yandex => "Yandex",
            Source::GoStandUp => "GoStandUp",
            Source::Timepad => "Timepad",
        }
    }

    pub fn short_label(&self) -> &'static str {
        match self {
            Source::Yandex => "YA",
            Source::GoStandUp => "GO",
            Source::Timepad => "TP",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown source `{}`", self.0)
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// Normalized, provider-agnostic event produced by an adapter.
///
/// `(source, external_id)` is the natural key. `date` is always UTC and
/// `tickets_total == 0` means the capacity is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub source: Source,
    pub external_id: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub tickets_sold: u32,
    pub tickets_total: u32,
    pub url: Option<String>,
}

impl CanonicalEvent {
    pub fn new(
        source: Source,
        external_id: impl Into<String>,
        name: impl AsRef<str>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            external_id: external_id.into(),
            name: name.as_ref().trim().to_string(),
            date,
            tickets_sold: 0,
            tickets_total: 0,
            url: None,
        }
    }

    pub fn with_tickets(mut self, sold: u32, total: u32) -> Self {
        self.tickets_sold = sold;
        self.tickets_total = total;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url.filter(|u| !u.trim().is_empty());
        self
    }

    /// Sold share of capacity, `None` when the capacity is unknown.
    pub fn sold_ratio(&self) -> Option<f64> {
        if self.tickets_total == 0 {
            None
        } else {
            Some(f64::from(self.tickets_sold) / f64::from(self.tickets_total))
        }
    }
}

/// Canonical event as persisted by the reconciliation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub event: CanonicalEvent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Output of one adapter for one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBatch {
    pub source: Source,
    pub events: Vec<CanonicalEvent>,
}

impl SourceBatch {
    pub fn new(source: Source, events: Vec<CanonicalEvent>) -> Self {
        Self { source, events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 19, 0, 0).single().unwrap()
    }

    #[test]
    fn name_is_trimmed_on_construction() {
        let ev = CanonicalEvent::new(Source::Timepad, "42", "  Open Mic \n", ts());
        assert_eq!(ev.name, "Open Mic");
    }

    #[test]
    fn sold_ratio_is_undefined_for_zero_capacity() {
        let ev = CanonicalEvent::new(Source::Yandex, "1", "Show", ts()).with_tickets(17, 0);
        assert_eq!(ev.sold_ratio(), None);

        let ev = ev.with_tickets(25, 100);
        assert_eq!(ev.sold_ratio(), Some(0.25));
    }

    #[test]
    fn blank_urls_are_dropped() {
        let ev = CanonicalEvent::new(Source::GoStandUp, "7", "Show", ts()).with_url(Some("  ".into()));
        assert_eq!(ev.url, None);
    }

    #[test]
    fn source_round_trips_through_its_persisted_form() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert_eq!("gostandup".parse::<Source>().unwrap(), Source::GoStandUp);
        assert!("ticketmaster".parse::<Source>().is_err());
    }

    #[test]
    fn source_serializes_as_uppercase_identifier() {
        let json = serde_json::to_string(&Source::GoStandUp).unwrap();
        assert_eq!(json, "\"GOSTANDUP\"");
        let back: Source = serde_json::from_str("\"TIMEPAD\"").unwrap();
        assert_eq!(back, Source::Timepad);
    }
}
