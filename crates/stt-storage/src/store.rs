use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use stt_core::{CanonicalEvent, Source, SourceBatch, StoredEvent};
use thiserror::Error;
use tracing::debug;

/// Offset-free UTC, fixed width, so that text comparison in SQL matches
/// chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const EVENT_COLUMNS: &str =
    "id, source, external_id, name, date, tickets_sold, tickets_total, url, created_at, updated_at";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::CorruptRow(format!("{column}={raw:?}: {e}")))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt stored row: {0}")]
    CorruptRow(String),
    #[error("event {external_id} reports source {event_source} inside a {batch_source} batch")]
    SourceMismatch {
        batch_source: Source,
        event_source: Source,
        external_id: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Reconciliation store: one row per `(source, external_id)`.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    /// Opens (creating if needed) the database and applies the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        // An in-memory database lives and dies with its single connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                date TEXT NOT NULL,
                tickets_sold INTEGER NOT NULL,
                tickets_total INTEGER NOT NULL,
                url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_source_external
             ON events(source, external_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_date ON events(date)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Upserts every batch inside one transaction, committed once at the end.
    ///
    /// Rows are matched on `(source, external_id)`; a match gets its mutable
    /// fields replaced and `updated_at` bumped, otherwise a row is inserted.
    /// Nothing is written if any batch fails validation or any statement fails.
    pub async fn reconcile(&self, batches: &[SourceBatch]) -> Result<ReconcileSummary, StoreError> {
        for batch in batches {
            if let Some(stray) = batch.events.iter().find(|ev| ev.source != batch.source) {
                return Err(StoreError::SourceMismatch {
                    batch_source: batch.source,
                    event_source: stray.source,
                    external_id: stray.external_id.clone(),
                });
            }
        }

        let now = format_timestamp(Utc::now());
        let mut summary = ReconcileSummary::default();
        let mut tx = self.pool.begin().await?;

        for batch in batches {
            for event in &batch.events {
                let date = format_timestamp(event.date);
                let updated = sqlx::query(
                    r#"
                    UPDATE events
                       SET name = ?1,
                           date = ?2,
                           tickets_sold = ?3,
                           tickets_total = ?4,
                           url = ?5,
                           updated_at = ?6
                     WHERE source = ?7
                       AND external_id = ?8
                    "#,
                )
                .bind(&event.name)
                .bind(&date)
                .bind(i64::from(event.tickets_sold))
                .bind(i64::from(event.tickets_total))
                .bind(event.url.as_deref())
                .bind(&now)
                .bind(event.source.as_str())
                .bind(&event.external_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if updated > 0 {
                    summary.updated += 1;
                    continue;
                }

                sqlx::query(
                    r#"
                    INSERT INTO events
                        (source, external_id, name, date, tickets_sold, tickets_total, url, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                    "#,
                )
                .bind(event.source.as_str())
                .bind(&event.external_id)
                .bind(&event.name)
                .bind(&date)
                .bind(i64::from(event.tickets_sold))
                .bind(i64::from(event.tickets_total))
                .bind(event.url.as_deref())
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                summary.inserted += 1;
            }
        }

        tx.commit().await?;
        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            "reconcile committed"
        );
        Ok(summary)
    }

    /// Events starting at or after `now` (and no later than `now + window`),
    /// earliest first.
    pub async fn list_events(
        &self,
        now: DateTime<Utc>,
        window: Option<Duration>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let from = format_timestamp(now);
        let until = window.and_then(|w| now.checked_add_signed(w));

        let rows = match until {
            Some(until) => {
                let sql = format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                      WHERE date >= ?1 AND date <= ?2
                      ORDER BY date ASC, id ASC"
                );
                sqlx::query(&sql)
                    .bind(from)
                    .bind(format_timestamp(until))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                      WHERE date >= ?1
                      ORDER BY date ASC, id ASC"
                );
                sqlx::query(&sql).bind(from).fetch_all(&self.pool).await?
            }
        };

        rows.iter().map(row_to_stored_event).collect()
    }

    pub async fn all_events(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY source ASC, external_id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_stored_event).collect()
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        usize::try_from(count)
            .map_err(|_| StoreError::CorruptRow(format!("event count {count} is negative")))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_stored_event(row: &SqliteRow) -> Result<StoredEvent, StoreError> {
    let source_raw: String = row.try_get("source")?;
    let source = source_raw
        .parse::<Source>()
        .map_err(|e| StoreError::CorruptRow(e.to_string()))?;
    let date_raw: String = row.try_get("date")?;
    let created_raw: String = row.try_get("created_at")?;
    let updated_raw: String = row.try_get("updated_at")?;

    Ok(StoredEvent {
        id: row.try_get("id")?,
        event: CanonicalEvent {
            source,
            external_id: row.try_get("external_id")?,
            name: row.try_get("name")?,
            date: parse_timestamp("date", &date_raw)?,
            tickets_sold: ticket_count(row, "tickets_sold")?,
            tickets_total: ticket_count(row, "tickets_total")?,
            url: row.try_get("url")?,
        },
        created_at: parse_timestamp("created_at", &created_raw)?,
        updated_at: parse_timestamp("updated_at", &updated_raw)?,
    })
}

fn ticket_count(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|_| StoreError::CorruptRow(format!("{column}={raw}")))
}
