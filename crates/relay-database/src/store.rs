//! The pending-message store contract used by the dispatch loop.

use crate::{Database, DatabaseResult, OutboundMessage};
use async_trait::async_trait;

/// Durable table of messages awaiting dispatch.
///
/// Queries return only eligible rows (`dispatched = false`, `ready = true`,
/// `due_at <= now`) ordered by `due_at` then insertion order. Every mutation
/// leaves dispatched rows untouched and reports whether a row changed.
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Up to `limit` eligible messages.
    async fn query_due(&self, now: i64, limit: usize) -> DatabaseResult<Vec<OutboundMessage>>;

    /// Up to `limit` eligible messages whose id is not in `exclude_ids`.
    async fn query_due_excluding(
        &self,
        now: i64,
        exclude_ids: &[String],
        limit: usize,
    ) -> DatabaseResult<Vec<OutboundMessage>>;

    /// Terminal transition. Idempotent: a second call returns `false`.
    async fn mark_dispatched(&self, id: &str) -> DatabaseResult<bool>;

    /// Record a failed send.
    async fn update_retry(
        &self,
        id: &str,
        attempts: u32,
        due_at: i64,
        last_error: Option<&str>,
    ) -> DatabaseResult<bool>;

    /// Push a rate-limited message to a later tick.
    async fn defer_due_at(&self, id: &str, due_at: i64) -> DatabaseResult<bool>;
}

#[async_trait]
impl PendingStore for Database {
    async fn query_due(&self, now: i64, limit: usize) -> DatabaseResult<Vec<OutboundMessage>> {
        self.select_due(now, &[], limit)
    }

    async fn query_due_excluding(
        &self,
        now: i64,
        exclude_ids: &[String],
        limit: usize,
    ) -> DatabaseResult<Vec<OutboundMessage>> {
        self.select_due(now, exclude_ids, limit)
    }

    async fn mark_dispatched(&self, id: &str) -> DatabaseResult<bool> {
        self.set_dispatched(id)
    }

    async fn update_retry(
        &self,
        id: &str,
        attempts: u32,
        due_at: i64,
        last_error: Option<&str>,
    ) -> DatabaseResult<bool> {
        self.set_retry(id, attempts, due_at, last_error)
    }

    async fn defer_due_at(&self, id: &str, due_at: i64) -> DatabaseResult<bool> {
        self.set_due_at(id, due_at)
    }
}
