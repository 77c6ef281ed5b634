use chrono::{DateTime, Utc};
use serde::Serialize;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    High,
    Medium,
    Mild,
    Low,
}

impl Urgency {
    pub fn marker(self) -> &'static str {
        match self {
            Urgency::High => "🔴",
            Urgency::Medium => "🟠",
            Urgency::Mild => "🟡",
            Urgency::Low => "🟢",
        }
    }
}

/// Fractional days from `now` to `date`; negative once the event has started.
pub fn days_until(now: DateTime<Utc>, date: DateTime<Utc>) -> f64 {
    (date - now).num_seconds() as f64 / SECONDS_PER_DAY
}

/// Each time band has its own sold-ratio threshold; an undefined ratio
/// (unknown capacity) is always `Low`.
pub fn classify(days_until: f64, sold_ratio: Option<f64>) -> Urgency {
    let Some(ratio) = sold_ratio else {
        return Urgency::Low;
    };
    let (band, threshold) = if days_until < 3.0 {
        (Urgency::High, 0.70)
    } else if days_until < 7.0 {
        (Urgency::Medium, 0.50)
    } else if days_until < 14.0 {
        (Urgency::Mild, 0.30)
    } else {
        return Urgency::Low;
    };
    if ratio < threshold {
        band
    } else {
        Urgency::Low
    }
}
