//! Core types, configuration, and utilities for the relay.

mod config;
mod error;
mod logging;
mod paths;
mod types;

pub use config::{
    Config, DeferralPolicy, DispatchConfig, IngestConfig, TransportConfig, DEFAULT_API_BASE_URL,
    DEFAULT_LOG_LEVEL,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
pub use types::{ChatClass, MediaKind};
