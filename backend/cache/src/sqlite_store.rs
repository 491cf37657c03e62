//! SQLite-backed result cache.
//!
//! Two tables: `parsed_tasks` with a unique `(image_hash, engine, model)` key
//! and `hints_cache` keyed by `(image_hash, engine, model, level)`.
//! Timestamps are stored as unix seconds.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::store::ResultCache;
use crate::types::{CacheStats, HintCacheRow, ParseCacheRow};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS parsed_tasks (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at          INTEGER NOT NULL,
        chat_id             INTEGER,
        media_group_id      TEXT,
        image_hash          TEXT NOT NULL,
        engine              TEXT NOT NULL,
        model               TEXT NOT NULL,
        parse_json          TEXT NOT NULL,
        accepted            INTEGER NOT NULL DEFAULT 0,
        accept_reason       TEXT,
        confirmation_needed INTEGER NOT NULL DEFAULT 0,
        confidence          REAL NOT NULL DEFAULT 0,
        UNIQUE (image_hash, engine, model)
    );
    CREATE INDEX IF NOT EXISTS idx_parsed_tasks_created ON parsed_tasks(created_at);
    CREATE TABLE IF NOT EXISTS hints_cache (
        image_hash  TEXT NOT NULL,
        engine      TEXT NOT NULL,
        model       TEXT NOT NULL,
        level       INTEGER NOT NULL CHECK (level BETWEEN 1 AND 3),
        hint_json   TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        PRIMARY KEY (image_hash, engine, model, level)
    );
    CREATE INDEX IF NOT EXISTS idx_hints_cache_created ON hints_cache(created_at);";

const PARSE_COLUMNS: &str = "id, created_at, chat_id, media_group_id, image_hash, engine, model, \
     parse_json, accepted, accept_reason, confirmation_needed, confidence";

pub struct SqliteResultCache {
    conn: Mutex<Connection>,
}

impl SqliteResultCache {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open cache database at {}", path.as_ref().display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL journal")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize cache schema")?;

        info!(path = %path.as_ref().display(), "Result cache opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

/// Oldest `created_at` still fresh for `max_age`; zero disables the check.
fn cutoff(max_age: Duration) -> i64 {
    if max_age.is_zero() {
        return i64::MIN;
    }
    Utc::now()
        .timestamp()
        .saturating_sub(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX))
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_parse(row: &Row<'_>) -> rusqlite::Result<ParseCacheRow> {
    Ok(ParseCacheRow {
        id: row.get(0)?,
        created_at: from_unix(row.get(1)?),
        chat_id: row.get(2)?,
        media_group_id: row.get(3)?,
        image_hash: row.get(4)?,
        engine: row.get(5)?,
        model: row.get(6)?,
        parse_json: row.get(7)?,
        accepted: row.get(8)?,
        accept_reason: row.get(9)?,
        confirmation_needed: row.get(10)?,
        confidence: row.get(11)?,
    })
}

#[async_trait]
impl ResultCache for SqliteResultCache {
    async fn upsert_parse(&self, row: &ParseCacheRow) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO parsed_tasks (created_at, chat_id, media_group_id, image_hash, engine, model,
                                       parse_json, accepted, accept_reason, confirmation_needed, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (image_hash, engine, model) DO UPDATE SET
                 created_at = excluded.created_at,
                 chat_id = excluded.chat_id,
                 media_group_id = excluded.media_group_id,
                 parse_json = excluded.parse_json,
                 accepted = excluded.accepted,
                 accept_reason = excluded.accept_reason,
                 confirmation_needed = excluded.confirmation_needed,
                 confidence = excluded.confidence",
            params![
                row.created_at.timestamp(),
                row.chat_id,
                row.media_group_id,
                row.image_hash,
                row.engine,
                row.model,
                row.parse_json,
                row.accepted,
                row.accept_reason,
                row.confirmation_needed,
                row.confidence,
            ],
        )
        .context("Failed to upsert parsed task")?;
        debug!(image_hash = %row.image_hash, engine = %row.engine, accepted = row.accepted, "Upserted parse row");
        Ok(())
    }

    async fn find_parse(
        &self,
        image_hash: &str,
        engine: &str,
        model: &str,
        max_age: Duration,
    ) -> Result<Option<ParseCacheRow>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {PARSE_COLUMNS} FROM parsed_tasks
             WHERE image_hash = ?1 AND engine = ?2 AND model = ?3 AND created_at >= ?4"
        );
        let row = conn
            .query_row(&sql, params![image_hash, engine, model, cutoff(max_age)], row_to_parse)
            .optional()
            .context("Failed to read parsed task")?;
        Ok(row)
    }

    async fn mark_parse_accepted(
        &self,
        image_hash: &str,
        engine: &str,
        model: &str,
        reason: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE parsed_tasks SET accepted = 1, accept_reason = ?4, confirmation_needed = 0
                 WHERE image_hash = ?1 AND engine = ?2 AND model = ?3",
                params![image_hash, engine, model, reason],
            )
            .context("Failed to mark parse accepted")?;
        Ok(changed > 0)
    }

    async fn upsert_hint(&self, row: &HintCacheRow) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO hints_cache (image_hash, engine, model, level, hint_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (image_hash, engine, model, level) DO UPDATE SET
                 hint_json = excluded.hint_json,
                 created_at = excluded.created_at",
            params![
                row.image_hash,
                row.engine,
                row.model,
                row.level,
                row.hint_json,
                row.created_at.timestamp(),
            ],
        )
        .context("Failed to upsert hint")?;
        debug!(image_hash = %row.image_hash, level = row.level, "Upserted hint row");
        Ok(())
    }

    async fn find_hint(
        &self,
        image_hash: &str,
        engine: &str,
        model: &str,
        level: u8,
        max_age: Duration,
    ) -> Result<Option<HintCacheRow>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT image_hash, engine, model, level, hint_json, created_at FROM hints_cache
                 WHERE image_hash = ?1 AND engine = ?2 AND model = ?3 AND level = ?4 AND created_at >= ?5",
                params![image_hash, engine, model, level, cutoff(max_age)],
                |row| {
                    Ok(HintCacheRow {
                        image_hash: row.get(0)?,
                        engine: row.get(1)?,
                        model: row.get(2)?,
                        level: row.get(3)?,
                        hint_json: row.get(4)?,
                        created_at: from_unix(row.get(5)?),
                    })
                },
            )
            .optional()
            .context("Failed to read hint")?;
        Ok(row)
    }

    async fn purge_parse(&self, older_than: Duration) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM parsed_tasks WHERE created_at < ?1",
                params![cutoff(older_than)],
            )
            .context("Failed to purge parsed tasks")?;
        info!(removed, "Purged parsed tasks");
        Ok(removed)
    }

    async fn purge_hints(&self, older_than: Duration) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM hints_cache WHERE created_at < ?1",
                params![cutoff(older_than)],
            )
            .context("Failed to purge hints")?;
        info!(removed, "Purged hints");
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().await;
        let (parse_rows, accepted_parse_rows): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(accepted), 0) FROM parsed_tasks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let hint_rows: i64 = conn.query_row("SELECT COUNT(*) FROM hints_cache", [], |row| row.get(0))?;
        Ok(CacheStats {
            parse_rows: parse_rows.max(0) as u64,
            accepted_parse_rows: accepted_parse_rows.max(0) as u64,
            hint_rows: hint_rows.max(0) as u64,
        })
    }
}
