//! Queue maintenance commands: enqueue, promote, stats, purge.

use super::open_database;
use chrono::Utc;
use relay_core::{ChatClass, Config, CoreError, MediaKind, Paths};
use relay_database::{NewOutboundMessage, OutboundMessage, PendingStats};
use tracing::info;

/// A message to queue from the command line.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub chat_id: String,
    pub chat_class: ChatClass,
    pub media_kind: MediaKind,
    pub file_ref: Option<String>,
    pub content: String,
}

/// Insert a message. It becomes eligible once the configured preparation
/// delay has passed.
pub fn enqueue(
    config: &Config,
    paths: &Paths,
    request: EnqueueRequest,
) -> Result<OutboundMessage, Box<dyn std::error::Error>> {
    if request.chat_class == ChatClass::Unknown {
        return Err(CoreError::Config("chat class must be direct, group or channel".into()).into());
    }
    if request.chat_id.trim().is_empty() {
        return Err(CoreError::Config("chat id must not be empty".into()).into());
    }

    let mut message = NewOutboundMessage::text(request.chat_id, request.chat_class, request.content);
    if request.media_kind.has_file() {
        let Some(file_ref) = request.file_ref else {
            return Err(CoreError::Config(format!(
                "{} messages need a file reference",
                request.media_kind
            ))
            .into());
        };
        message = message.with_media(request.media_kind, file_ref);
    }

    let db = open_database(paths)?;
    let stored = db.insert_message(&message, config.ingest.preparation_delay_ms)?;
    info!(
        message_id = %stored.id,
        chat_id = %stored.chat_id,
        chat_class = %stored.chat_class,
        media_kind = %stored.media_kind,
        "Message queued"
    );
    Ok(stored)
}

/// Run the preparation transition once.
pub fn promote(paths: &Paths) -> Result<usize, Box<dyn std::error::Error>> {
    let db = open_database(paths)?;
    Ok(db.promote_ready(Utc::now().timestamp_millis())?)
}

pub fn stats(paths: &Paths) -> Result<PendingStats, Box<dyn std::error::Error>> {
    let db = open_database(paths)?;
    Ok(db.pending_stats(Utc::now().timestamp_millis())?)
}

/// Delete dispatched messages delivered more than `older_than_days` ago.
pub fn purge(paths: &Paths, older_than_days: u32) -> Result<usize, Box<dyn std::error::Error>> {
    let db = open_database(paths)?;
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
    let purged = db.purge_dispatched_before(cutoff)?;
    info!(purged, older_than_days, "Purge complete");
    Ok(purged)
}
