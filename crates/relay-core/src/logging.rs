//! Logging initialization for the relay binaries.
//!
//! Structured JSONL goes to `<base_dir>/logs/relay.jsonl`; compact lines are
//! mirrored to stderr for foreground runs.

use crate::{CoreResult, Paths};

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// ```ignore
/// init_logging("info", &paths)?;
/// tracing::info!("Dispatcher started");
/// ```
pub fn init_logging(level: &str, paths: &Paths) -> CoreResult<()> {
    observability::init_with_config(observability::LogConfig {
        service_name: "relay-dispatcher".into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
        ..Default::default()
    })?;
    Ok(())
}
