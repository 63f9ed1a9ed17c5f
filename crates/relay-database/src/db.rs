//! Database connection and query operations.

use crate::{migrations, DatabaseError, DatabaseResult, NewOutboundMessage, OutboundMessage, PendingStats};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use relay_core::{ChatClass, MediaKind};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use tracing::debug;

const MESSAGE_COLUMNS: &str = "sequence, id, chat_id, chat_class, content, media_kind, file_ref, \
     due_at, attempts, dispatched, ready, ready_at, created_at, dispatched_at, last_error";

/// Database wrapper with query methods.
///
/// The connection sits behind a mutex so one `Database` can be shared
/// between the dispatch loop and its tick hook.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        // WAL mode doesn't apply to in-memory databases
        conn.execute_batch(
            "
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ==========================================
    // Ingestion
    // ==========================================

    /// Insert a new message. It becomes ready `preparation_delay_ms` from now
    /// and is due immediately once ready.
    pub fn insert_message(
        &self,
        message: &NewOutboundMessage,
        preparation_delay_ms: u64,
    ) -> DatabaseResult<OutboundMessage> {
        let now_ms = now_timestamp_ms();
        let delay = i64::try_from(preparation_delay_ms).unwrap_or(i64::MAX);
        let ready_at = now_ms.saturating_add(delay);
        let created_at = format_datetime(Utc::now());

        self.conn.lock().execute(
            "INSERT INTO outbound_messages
                (id, chat_id, chat_class, content, media_kind, file_ref, due_at, attempts, dispatched, ready, ready_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, 0, ?8, ?9)",
            params![
                message.id,
                message.chat_id,
                message.chat_class.as_str(),
                message.content,
                message.media_kind.as_str(),
                message.file_ref,
                now_ms,
                ready_at,
                created_at,
            ],
        )?;

        debug!(
            message_id = %message.id,
            chat_id = %message.chat_id,
            chat_class = %message.chat_class,
            ready_at,
            "Message enqueued"
        );

        self.get_message(&message.id)?
            .ok_or_else(|| DatabaseError::NotFound("Message not found after insert".to_string()))
    }

    /// Get a message by ID.
    pub fn get_message(&self, id: &str) -> DatabaseResult<Option<OutboundMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM outbound_messages WHERE id = ?1"
        ))?;

        let result = stmt.query_row(params![id], map_message);
        match result {
            Ok(message) => Ok(Some(message)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Flip `ready` on every undispatched message whose preparation delay
    /// has elapsed. Returns the number of messages promoted.
    pub fn promote_ready(&self, now: i64) -> DatabaseResult<usize> {
        let promoted = self.conn.lock().execute(
            "UPDATE outbound_messages
             SET ready = 1
             WHERE dispatched = 0 AND ready = 0 AND ready_at <= ?1",
            params![now],
        )?;
        if promoted > 0 {
            debug!(promoted, "Messages promoted to ready");
        }
        Ok(promoted)
    }

    // ==========================================
    // Dispatch
    // ==========================================

    pub(crate) fn select_due(
        &self,
        now: i64,
        exclude_ids: &[String],
        limit: usize,
    ) -> DatabaseResult<Vec<OutboundMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // The exclusion set is bound as one JSON array so its size never
        // counts against SQLite's host parameter limit.
        let excluded = serde_json::to_string(exclude_ids)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM outbound_messages
             WHERE dispatched = 0 AND ready = 1 AND due_at <= ?1
               AND id NOT IN (SELECT value FROM json_each(?2))
             ORDER BY due_at ASC, sequence ASC
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![now, excluded, limit], map_message)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub(crate) fn set_dispatched(&self, id: &str) -> DatabaseResult<bool> {
        let now = format_datetime(Utc::now());
        let changed = self.conn.lock().execute(
            "UPDATE outbound_messages
             SET dispatched = 1, dispatched_at = ?2, last_error = NULL
             WHERE id = ?1 AND dispatched = 0",
            params![id, now],
        )?;
        Ok(changed > 0)
    }

    pub(crate) fn set_retry(
        &self,
        id: &str,
        attempts: u32,
        due_at: i64,
        last_error: Option<&str>,
    ) -> DatabaseResult<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE outbound_messages
             SET attempts = ?2, due_at = ?3, last_error = ?4
             WHERE id = ?1 AND dispatched = 0",
            params![id, attempts, due_at, last_error],
        )?;
        Ok(changed > 0)
    }

    pub(crate) fn set_due_at(&self, id: &str, due_at: i64) -> DatabaseResult<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE outbound_messages
             SET due_at = ?2
             WHERE id = ?1 AND dispatched = 0",
            params![id, due_at],
        )?;
        Ok(changed > 0)
    }

    // ==========================================
    // Maintenance
    // ==========================================

    /// Backlog counts relative to `now`.
    pub fn pending_stats(&self, now: i64) -> DatabaseResult<PendingStats> {
        let conn = self.conn.lock();
        let stats = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN dispatched = 0 AND ready = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN dispatched = 0 AND ready = 1 AND due_at > ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN dispatched = 0 AND ready = 1 AND due_at <= ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN dispatched = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN dispatched = 0 AND attempts > 0 THEN 1 ELSE 0 END), 0)
             FROM outbound_messages",
            params![now],
            |row| {
                Ok(PendingStats {
                    not_ready: row.get(0)?,
                    waiting: row.get(1)?,
                    due: row.get(2)?,
                    dispatched: row.get(3)?,
                    retrying: row.get(4)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Delete dispatched messages delivered before `cutoff`. Undispatched
    /// rows are never purged here.
    pub fn purge_dispatched_before(&self, cutoff: DateTime<Utc>) -> DatabaseResult<usize> {
        let purged = self.conn.lock().execute(
            "DELETE FROM outbound_messages
             WHERE dispatched = 1 AND dispatched_at IS NOT NULL AND dispatched_at < ?1",
            params![format_datetime(cutoff)],
        )?;
        debug!(purged, "Dispatched messages purged");
        Ok(purged)
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<OutboundMessage> {
    Ok(OutboundMessage {
        sequence: row.get(0)?,
        id: row.get(1)?,
        chat_id: row.get(2)?,
        chat_class: ChatClass::from_str(&row.get::<_, String>(3)?),
        content: row.get(4)?,
        media_kind: MediaKind::from_str(&row.get::<_, String>(5)?),
        file_ref: row.get(6)?,
        due_at: row.get(7)?,
        attempts: row.get(8)?,
        dispatched: row.get(9)?,
        ready: row.get(10)?,
        ready_at: row.get(11)?,
        created_at: parse_datetime(12, &row.get::<_, String>(12)?)?,
        dispatched_at: row
            .get::<_, Option<String>>(13)?
            .map(|s| parse_datetime(13, &s))
            .transpose()?,
        last_error: row.get(14)?,
    })
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn now_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}
