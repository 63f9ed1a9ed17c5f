//! Outbound transport for relayed messages.
//!
//! The dispatch loop only sees the [`Transport`] trait: one call per message,
//! answering delivered or failed. [`HttpTransport`] implements it against a
//! Bot-API style endpoint.

mod error;
mod http;

pub use error::{TransportError, TransportResult};
pub use http::{method_for, HttpTransport};

use async_trait::async_trait;
use relay_database::OutboundMessage;

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Failed { reason: String },
}

impl SendOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Performs the network send of a single message.
///
/// Implementations never return errors: every problem is a
/// [`SendOutcome::Failed`] and the caller reschedules the message.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome;
}
