//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(DatabaseError::Migration(format!(
            "database schema v{current_version} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbound_messages(conn)?;
    }
    if current_version < 2 {
        migrate_v2_delivery_tracking(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: pending-message table.
fn migrate_v1_outbound_messages(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbound messages");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbound_messages (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            chat_id TEXT NOT NULL,
            chat_class TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            media_kind TEXT NOT NULL DEFAULT 'text',
            file_ref TEXT,
            due_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            dispatched INTEGER NOT NULL DEFAULT 0,
            ready INTEGER NOT NULL DEFAULT 0,
            ready_at INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outbound_messages_eligible
            ON outbound_messages(dispatched, ready, due_at);
        ",
    )?;

    record_migration(conn, 1, "outbound_messages")
}

/// V2: when a message was delivered and why its last attempt failed.
fn migrate_v2_delivery_tracking(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: delivery tracking");

    conn.execute_batch(
        "
        ALTER TABLE outbound_messages ADD COLUMN dispatched_at TEXT;
        ALTER TABLE outbound_messages ADD COLUMN last_error TEXT;

        CREATE INDEX IF NOT EXISTS idx_outbound_messages_dispatched_at
            ON outbound_messages(dispatched, dispatched_at);
        ",
    )?;

    record_migration(conn, 2, "delivery_tracking")
}
