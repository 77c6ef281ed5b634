use chrono::{DateTime, FixedOffset, Offset, Utc};
use stt_core::{CanonicalEvent, Source};
use tracing::warn;

use crate::urgency::{classify, days_until};

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 3800;
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 3;
pub const NOTHING_FOUND: &str = "No events found.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderStyle {
    /// Marker and source on one line, then name, local time and sales.
    #[default]
    Detailed,
    /// One line per event.
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub max_chunk_chars: usize,
    pub display_offset: FixedOffset,
    pub style: RenderStyle,
    pub empty_notice: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            display_offset: offset_from_hours(DEFAULT_UTC_OFFSET_HOURS),
            style: RenderStyle::Detailed,
            empty_notice: NOTHING_FOUND.to_string(),
        }
    }
}

impl RenderOptions {
    pub fn with_utc_offset_hours(mut self, hours: i32) -> Self {
        self.display_offset = offset_from_hours(hours);
        self
    }

    pub fn with_style(mut self, style: RenderStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars;
        self
    }
}

/// Out-of-range offsets fall back to UTC.
pub fn offset_from_hours(hours: i32) -> FixedOffset {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

fn unit(source: Source) -> &'static str {
    match source {
        Source::Timepad => "registrations",
        _ => "tickets",
    }
}

pub fn render_event_block(
    event: &CanonicalEvent,
    now: DateTime<Utc>,
    options: &RenderOptions,
) -> String {
    let urgency = classify(days_until(now, event.date), event.sold_ratio());
    let local = event.date.with_timezone(&options.display_offset);
    match options.style {
        RenderStyle::Detailed => format!(
            "{} {}\n{}\n{}\n{}/{}\n\n",
            urgency.marker(),
            event.source.label(),
            event.name,
            local.format("%Y-%m-%d %H:%M"),
            event.tickets_sold,
            event.tickets_total,
        ),
        RenderStyle::Compact => format!(
            "{} {} {} ({}) — {}/{} {}\n",
            urgency.marker(),
            event.name,
            local.format("%d/%m"),
            event.source.short_label(),
            event.tickets_sold,
            event.tickets_total,
            unit(event.source),
        ),
    }
}

/// Packs whole blocks behind `header` into chunks of at most `max_chars`
/// Unicode scalar values. A block is never split; one that cannot fit even
/// alone gets a chunk of its own.
pub fn pack_chunks<I, S>(header: &str, blocks: I, max_chars: usize, empty_notice: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let header_chars = header.chars().count();
    let mut chunks = Vec::new();
    let mut current = String::from(header);
    let mut current_chars = header_chars;
    let mut current_blocks = 0usize;

    for block in blocks {
        let block = block.as_ref();
        if block.trim().is_empty() {
            continue;
        }
        let block_chars = block.chars().count();

        if current_blocks > 0 && current_chars + block_chars > max_chars {
            chunks.push(std::mem::replace(&mut current, String::from(header)));
            current_chars = header_chars;
            current_blocks = 0;
        }
        if header_chars + block_chars > max_chars {
            warn!(
                block_chars,
                max_chars, "event block exceeds the chunk ceiling, sending it alone"
            );
        }

        current.push_str(block);
        current_chars += block_chars;
        current_blocks += 1;
    }

    if current_blocks > 0 {
        chunks.push(current);
    }
    if chunks.is_empty() {
        chunks.push(empty_notice.to_string());
    }
    chunks
}

/// Renders `events` (already filtered and ordered) under `title`.
pub fn render_chunks<'a, I>(
    title: &str,
    events: I,
    now: DateTime<Utc>,
    options: &RenderOptions,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a CanonicalEvent>,
{
    let header = format!("{title}\n\n");
    let blocks = events
        .into_iter()
        .map(|event| render_event_block(event, now, options));
    pack_chunks(&header, blocks, options.max_chunk_chars, &options.empty_notice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn event(source: Source, name: &str, in_hours: i64, sold: u32, total: u32) -> CanonicalEvent {
        CanonicalEvent::new(source, name, name, now() + Duration::hours(in_hours))
            .with_tickets(sold, total)
    }

    #[test]
    fn two_full_blocks_then_overflow() {
        let header = "h".repeat(10);
        let blocks = vec!["a".repeat(40), "b".repeat(40), "c".repeat(40)];
        let chunks = pack_chunks(&header, &blocks, 100, NOTHING_FOUND);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{header}{}{}", blocks[0], blocks[1]));
        assert_eq!(chunks[1], format!("{header}{}", blocks[2]));
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn empty_input_is_a_single_notice() {
        let chunks = pack_chunks("Header\n\n", Vec::<String>::new(), 100, NOTHING_FOUND);
        assert_eq!(chunks, vec![NOTHING_FOUND.to_string()]);

        let blank = pack_chunks("Header\n\n", ["  \n", ""], 100, NOTHING_FOUND);
        assert_eq!(blank, vec![NOTHING_FOUND.to_string()]);
    }

    #[test]
    fn oversize_block_gets_its_own_chunk() {
        let blocks = ["x".repeat(20), "y".repeat(150), "z".repeat(20)];
        let chunks = pack_chunks("H\n", &blocks, 100, NOTHING_FOUND);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1], format!("H\n{}", blocks[1]));
        assert!(chunks.iter().all(|c| c != "H\n"));
    }

    #[test]
    fn ceiling_counts_characters_not_bytes() {
        // 30 chars but 60 bytes each.
        let blocks = ["ж".repeat(30), "ж".repeat(30), "ж".repeat(30)];
        let chunks = pack_chunks("", &blocks, 90, NOTHING_FOUND);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn detailed_block_layout() {
        let options = RenderOptions::default();
        let block = render_event_block(
            &event(Source::Yandex, "Friday Night", 48, 69, 100),
            now(),
            &options,
        );
        // 12:00 UTC shown at +03:00.
        assert_eq!(block, "🔴 Yandex\nFriday Night\n2026-03-03 15:00\n69/100\n\n");
    }

    #[test]
    fn compact_block_uses_short_labels_and_units() {
        let options = RenderOptions::default().with_style(RenderStyle::Compact);
        let timepad = render_event_block(
            &event(Source::Timepad, "Improv Jam", 24 * 20, 12, 40),
            now(),
            &options,
        );
        assert_eq!(timepad, "🟢 Improv Jam 21/03 (TP) — 12/40 registrations\n");

        let gostandup = render_event_block(
            &event(Source::GoStandUp, "Open Mic", 24 * 5, 10, 100),
            now(),
            &options,
        );
        assert_eq!(gostandup, "🟠 Open Mic 06/03 (GO) — 10/100 tickets\n");
    }

    #[test]
    fn unknown_capacity_renders_low() {
        let block = render_event_block(
            &event(Source::GoStandUp, "Secret Show", 5, 0, 0),
            now(),
            &RenderOptions::default(),
        );
        assert!(block.starts_with("🟢 GoStandUp\n"));
    }

    #[test]
    fn render_chunks_repeats_the_title_per_chunk() {
        let events: Vec<_> = (0..50)
            .map(|i| event(Source::Yandex, &format!("Show number {i}"), 24 * 30 + i, 1, 10))
            .collect();
        let options = RenderOptions::default().with_max_chunk_chars(300);
        let chunks = render_chunks("All events", &events, now(), &options);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.starts_with("All events\n\n"));
            assert!(chunk.chars().count() <= 300);
        }
        let rendered: usize = chunks.iter().map(|c| c.matches("Show number").count()).sum();
        assert_eq!(rendered, 50);
    }

    #[test]
    fn invalid_offset_falls_back_to_utc() {
        assert_eq!(offset_from_hours(3).local_minus_utc(), 10_800);
        assert_eq!(offset_from_hours(99).local_minus_utc(), 0);
    }
}
