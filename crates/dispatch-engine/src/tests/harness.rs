//! Test harness for dispatcher tests.
//!
//! Provides:
//! - MemoryStore: an in-memory PendingStore with an operation log and
//!   failure injection
//! - ScriptedTransport: a Transport whose outcome per message id is scripted
//!   and which records every send and the peak number of concurrent sends

use crate::Dispatcher;
use async_trait::async_trait;
use chrono::Utc;
use outbound_transport::{SendOutcome, Transport};
use parking_lot::Mutex;
use relay_core::{ChatClass, DispatchConfig, MediaKind};
use relay_database::{DatabaseError, DatabaseResult, OutboundMessage, PendingStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Build a ready, undispatched message with id `m{sequence}`.
pub fn msg(sequence: i64, chat_id: &str, class: ChatClass, due_at: i64) -> OutboundMessage {
    OutboundMessage {
        sequence,
        id: format!("m{sequence}"),
        chat_id: chat_id.to_string(),
        chat_class: class,
        content: format!("message {sequence}"),
        media_kind: MediaKind::Text,
        file_ref: None,
        due_at,
        attempts: 0,
        dispatched: false,
        ready: true,
        ready_at: 0,
        created_at: Utc::now(),
        dispatched_at: None,
        last_error: None,
    }
}

/// A store operation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    QueryDue { now: i64, limit: usize },
    QueryDueExcluding { now: i64, excluded: usize, limit: usize },
    MarkDispatched { id: String },
    UpdateRetry { id: String, attempts: u32, due_at: i64 },
    DeferDueAt { id: String, due_at: i64 },
}

impl StoreOp {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::MarkDispatched { .. } | Self::UpdateRetry { .. } | Self::DeferDueAt { .. }
        )
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::MarkDispatched { id }
            | Self::UpdateRetry { id, .. }
            | Self::DeferDueAt { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Which store call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Query,
    MarkDispatched,
    UpdateRetry,
    DeferDueAt,
}

/// In-memory pending-message store.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<OutboundMessage>>,
    ops: Mutex<Vec<StoreOp>>,
    fail: Mutex<Option<FailPoint>>,
}

impl MemoryStore {
    pub fn new(rows: Vec<OutboundMessage>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    pub fn get(&self, id: &str) -> OutboundMessage {
        self.rows
            .lock()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no message {id}"))
    }

    pub fn all(&self) -> Vec<OutboundMessage> {
        self.rows.lock().clone()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    pub fn mutations(&self) -> Vec<StoreOp> {
        self.ops().into_iter().filter(StoreOp::is_mutation).collect()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().clear();
    }

    pub fn fail_on(&self, point: FailPoint) {
        *self.fail.lock() = Some(point);
    }

    fn check(&self, point: FailPoint) -> DatabaseResult<()> {
        if *self.fail.lock() == Some(point) {
            return Err(DatabaseError::InvalidData(format!("injected {point:?} failure")));
        }
        Ok(())
    }

    fn eligible(&self, now: i64, exclude: &HashSet<&str>, limit: usize) -> Vec<OutboundMessage> {
        let mut due: Vec<OutboundMessage> = self
            .rows
            .lock()
            .iter()
            .filter(|m| !m.dispatched && m.ready && m.due_at <= now)
            .filter(|m| !exclude.contains(m.id.as_str()))
            .cloned()
            .collect();
        due.sort_by_key(|m| (m.due_at, m.sequence));
        due.truncate(limit);
        due
    }

    fn update<F>(&self, id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut OutboundMessage),
    {
        let mut rows = self.rows.lock();
        match rows.iter_mut().find(|m| m.id == id && !m.dispatched) {
            Some(row) => {
                apply(row);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PendingStore for MemoryStore {
    async fn query_due(&self, now: i64, limit: usize) -> DatabaseResult<Vec<OutboundMessage>> {
        self.ops.lock().push(StoreOp::QueryDue { now, limit });
        self.check(FailPoint::Query)?;
        Ok(self.eligible(now, &HashSet::new(), limit))
    }

    async fn query_due_excluding(
        &self,
        now: i64,
        exclude_ids: &[String],
        limit: usize,
    ) -> DatabaseResult<Vec<OutboundMessage>> {
        self.ops.lock().push(StoreOp::QueryDueExcluding {
            now,
            excluded: exclude_ids.len(),
            limit,
        });
        self.check(FailPoint::Query)?;
        let exclude: HashSet<&str> = exclude_ids.iter().map(String::as_str).collect();
        Ok(self.eligible(now, &exclude, limit))
    }

    async fn mark_dispatched(&self, id: &str) -> DatabaseResult<bool> {
        self.ops.lock().push(StoreOp::MarkDispatched { id: id.to_string() });
        self.check(FailPoint::MarkDispatched)?;
        Ok(self.update(id, |row| {
            row.dispatched = true;
            row.dispatched_at = Some(Utc::now());
            row.last_error = None;
        }))
    }

    async fn update_retry(
        &self,
        id: &str,
        attempts: u32,
        due_at: i64,
        last_error: Option<&str>,
    ) -> DatabaseResult<bool> {
        self.ops.lock().push(StoreOp::UpdateRetry {
            id: id.to_string(),
            attempts,
            due_at,
        });
        self.check(FailPoint::UpdateRetry)?;
        Ok(self.update(id, |row| {
            row.attempts = attempts;
            row.due_at = due_at;
            row.last_error = last_error.map(str::to_string);
        }))
    }

    async fn defer_due_at(&self, id: &str, due_at: i64) -> DatabaseResult<bool> {
        self.ops.lock().push(StoreOp::DeferDueAt {
            id: id.to_string(),
            due_at,
        });
        self.check(FailPoint::DeferDueAt)?;
        Ok(self.update(id, |row| row.due_at = due_at))
    }
}

/// Transport with scripted outcomes.
#[derive(Default)]
pub struct ScriptedTransport {
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    sent: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every send of `id` fails.
    pub fn fail(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    /// Sends of `id` succeed again.
    pub fn recover(&self, id: &str) {
        self.failing.lock().remove(id);
    }

    /// Sends of `id` never complete.
    pub fn hang(&self, id: &str) {
        self.hanging.lock().insert(id.to_string());
    }

    /// Every send takes `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Ids passed to `send`, in call order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        self.sent.lock().push(message.id.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if self.hanging.lock().contains(&message.id) {
            std::future::pending::<()>().await;
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().contains(&message.id) {
            SendOutcome::failed("scripted failure")
        } else {
            SendOutcome::Delivered
        }
    }
}

/// Dispatcher over the given store and transport.
pub fn dispatcher(
    store: &Arc<MemoryStore>,
    transport: &Arc<ScriptedTransport>,
    config: DispatchConfig,
) -> Dispatcher {
    Dispatcher::new(store.clone(), transport.clone(), config).unwrap()
}
