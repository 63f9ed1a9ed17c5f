//! Row types for the pending-message table.

use chrono::{DateTime, Utc};
use relay_core::{ChatClass, MediaKind};
use serde::{Deserialize, Serialize};

/// A message awaiting (or past) dispatch.
///
/// Visible to the dispatch loop iff `!dispatched && ready && due_at <= now`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Insertion order; the tie-breaker when `due_at` values are equal.
    pub sequence: i64,
    pub id: String,
    pub chat_id: String,
    pub chat_class: ChatClass,
    pub content: String,
    pub media_kind: MediaKind,
    pub file_ref: Option<String>,
    /// Epoch milliseconds.
    pub due_at: i64,
    /// Failed sends so far.
    pub attempts: u32,
    pub dispatched: bool,
    pub ready: bool,
    /// Epoch milliseconds at which preparation completes.
    pub ready_at: i64,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Input for inserting a new message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboundMessage {
    pub id: String,
    pub chat_id: String,
    pub chat_class: ChatClass,
    pub content: String,
    pub media_kind: MediaKind,
    pub file_ref: Option<String>,
}

impl NewOutboundMessage {
    /// A text message with a fresh id.
    pub fn text(chat_id: impl Into<String>, chat_class: ChatClass, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            chat_class,
            content: content.into(),
            media_kind: MediaKind::Text,
            file_ref: None,
        }
    }

    /// Attach a media payload; `content` becomes the caption.
    pub fn with_media(mut self, media_kind: MediaKind, file_ref: impl Into<String>) -> Self {
        self.media_kind = media_kind;
        self.file_ref = Some(file_ref.into());
        self
    }
}

/// Backlog counts at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStats {
    /// Undispatched, still in preparation.
    pub not_ready: i64,
    /// Ready but scheduled in the future (deferred or backing off).
    pub waiting: i64,
    /// Ready and due now.
    pub due: i64,
    pub dispatched: i64,
    /// Undispatched with at least one failed attempt.
    pub retrying: i64,
}
