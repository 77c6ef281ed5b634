//! Urgency classification and size-bounded text rendering of stored events.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;

mod chunks;
mod urgency;

pub use chunks::{
    offset_from_hours, pack_chunks, render_chunks, render_event_block, RenderOptions,
    RenderStyle, DEFAULT_MAX_CHUNK_CHARS, DEFAULT_UTC_OFFSET_HOURS, NOTHING_FOUND,
};
pub use urgency::{classify, days_until, Urgency};

pub const CRATE_NAME: &str = "stt-render";

/// Canned query windows offered to end users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewPreset {
    #[default]
    All,
    Next21Days,
    Next7Days,
    Next3Days,
}

impl ViewPreset {
    pub const ALL: [ViewPreset; 4] = [
        ViewPreset::All,
        ViewPreset::Next21Days,
        ViewPreset::Next7Days,
        ViewPreset::Next3Days,
    ];

    pub fn days(self) -> Option<i64> {
        match self {
            ViewPreset::All => None,
            ViewPreset::Next21Days => Some(21),
            ViewPreset::Next7Days => Some(7),
            ViewPreset::Next3Days => Some(3),
        }
    }

    pub fn window(self) -> Option<Duration> {
        self.days().map(Duration::days)
    }

    pub fn title(self) -> String {
        match self.days() {
            None => "All events".to_string(),
            Some(days) => window_title(days),
        }
    }
}

pub fn window_title(days: i64) -> String {
    if days == 1 {
        "Next 1 day".to_string()
    } else {
        format!("Next {days} days")
    }
}

impl fmt::Display for ViewPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            ViewPreset::All => "all",
            ViewPreset::Next21Days => "21",
            ViewPreset::Next7Days => "7",
            ViewPreset::Next3Days => "3",
        };
        f.write_str(key)
    }
}

impl FromStr for ViewPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViewPreset::ALL
            .into_iter()
            .find(|preset| preset.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown preset {s:?}, expected one of all, 21, 7, 3"))
    }
}
