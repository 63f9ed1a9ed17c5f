//! Behavioural tests for the dispatch loop.
//!
//! - `harness.rs`  - In-memory store and scripted transport
//! - `tick.rs`     - Rate limiting and deferral within one tick
//! - `fill_up.rs`  - Backfilling an under-full batch
//! - `outcomes.rs` - Success, failure, backoff, timeouts and store errors
//! - `run_loop.rs` - Tick alignment, budget and tick hook
//! - `sqlite.rs`   - The loop against the SQLite store

pub(crate) mod harness;
