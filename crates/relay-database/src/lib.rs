//! SQLite persistence for the relay's pending-message table.
//!
//! This crate provides:
//! - The `outbound_messages` table and its migrations
//! - Ingestion helpers (`insert_message`, `promote_ready`)
//! - Maintenance queries (`pending_stats`, `purge_dispatched_before`)
//! - The [`PendingStore`] trait consumed by the dispatch loop, implemented
//!   for [`Database`]
//!
//! ```ignore
//! let db = Database::open(&paths.database_file())?;
//! let message = db.insert_message(&NewOutboundMessage::text("42", ChatClass::Direct, "hi"), 1_000)?;
//! db.promote_ready(now_ms)?;
//! let due = db.query_due(now_ms, 30).await?;
//! ```

mod db;
mod error;
mod migrations;
mod models;
mod store;

pub use db::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use migrations::run_migrations;
pub use models::*;
pub use store::PendingStore;
