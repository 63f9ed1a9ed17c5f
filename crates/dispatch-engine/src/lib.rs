//! # Dispatch Engine
//!
//! Rate-limited dispatch of stored chat messages to an outbound transport.
//!
//! ```text
//! ┌───────────────┐  due batch   ┌──────────────┐  selected  ┌─────────────┐
//! │ PendingStore  │─────────────▶│  Dispatcher  │───────────▶│  Transport  │
//! │ (SQLite)      │◀─────────────│  (per tick)  │◀───────────│  (HTTP)     │
//! └───────────────┘  outcomes,   └──────┬───────┘  outcomes  └─────────────┘
//!                    deferrals          │
//!                                ┌──────▼───────┐
//!                                │ rate_limiter │  pure
//!                                │ backoff      │  pure
//!                                └──────────────┘
//! ```
//!
//! - **[`rate_limiter`]**: groups a batch by chat and keeps at most the
//!   class ceiling per chat per tick. Unknown classes get ceiling zero.
//! - **[`backoff`]**: `min(2^attempts, cap)` minutes between retries.
//! - **[`Dispatcher`]**: the tick loop, including fill-up of an under-full
//!   batch and concurrent sends with a per-send timeout.
//!
//! Delivery is at-least-once: a crash between a successful send and the
//! store update re-sends the message on the next run.

pub mod backoff;
mod dispatcher;
mod error;
pub mod rate_limiter;

pub use dispatcher::{Dispatcher, RunSummary, TickHook, TickReport};
pub use error::{DispatchError, DispatchResult};
pub use rate_limiter::{partition, partition_with_usage, Partition};

#[cfg(test)]
mod tests;
