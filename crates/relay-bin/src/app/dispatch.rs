//! Invocation windows: one-shot `run` and the back-to-back `serve` loop.

use super::open_database;
use dispatch_engine::{DispatchError, Dispatcher, RunSummary};
use outbound_transport::HttpTransport;
use relay_core::{Config, Paths};
use relay_database::Database;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Build a dispatcher over the database and the HTTP transport. Every tick
/// first promotes messages whose preparation delay has elapsed.
pub(crate) fn build_dispatcher(
    config: &Config,
    db: Arc<Database>,
) -> Result<Dispatcher, Box<dyn std::error::Error>> {
    let transport = Arc::new(HttpTransport::new(&config.transport)?);
    let hook_db = db.clone();
    let dispatcher = Dispatcher::new(db, transport, config.dispatch.clone())?
        .with_tick_hook(move |now| {
            hook_db
                .promote_ready(now)
                .map(|_| ())
                .map_err(DispatchError::from)
        });
    Ok(dispatcher)
}

/// Run a single invocation window. `budget` defaults to the configured
/// window length.
pub async fn run_window(
    config: &Config,
    paths: &Paths,
    budget: Option<Duration>,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let db = Arc::new(open_database(paths)?);
    let dispatcher = build_dispatcher(config, db)?;
    let budget = budget.unwrap_or_else(|| config.dispatch.run_window());

    info!(budget_ms = budget.as_millis() as u64, "Invocation window starting");
    Ok(dispatcher.run(budget).await?)
}

/// Run invocation windows back to back until Ctrl-C.
pub async fn serve(config: &Config, paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    let db = Arc::new(open_database(paths)?);
    let dispatcher = build_dispatcher(config, db)?;

    info!(
        window_ms = config.dispatch.run_window_ms,
        tick_ms = config.dispatch.tick_interval_ms,
        "Relay dispatcher serving"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };
    let windows = serve_until(&dispatcher, config.dispatch.run_window(), shutdown).await;

    info!(windows, "Relay dispatcher stopped");
    Ok(())
}

/// Repeat windows until `shutdown` resolves. A failed window is logged and
/// the next one starts after one tick interval. Returns the number of
/// windows started.
pub(crate) async fn serve_until<F>(dispatcher: &Dispatcher, window: Duration, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    let tick = dispatcher.config().tick_interval();
    let mut windows = 0usize;
    tokio::pin!(shutdown);

    loop {
        windows += 1;
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            result = dispatcher.run(window) => match result {
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Invocation window failed");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(tick) => {}
                    }
                }
            },
        }
    }

    windows
}

/// JSON view of a window summary for the CLI.
pub fn summary_json(summary: &RunSummary) -> serde_json::Value {
    serde_json::json!({
        "ticks": summary.ticks,
        "idle_ticks": summary.idle_ticks,
        "selected": summary.selected,
        "deferred": summary.deferred,
        "sent": summary.sent,
        "failed": summary.failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::TransportConfig;

    fn config_with_token() -> Config {
        Config {
            transport: TransportConfig {
                bot_token: Some("123:abc".to_string()),
                ..TransportConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_build_dispatcher_requires_token() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let result = build_dispatcher(&Config::default(), db);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_dispatcher_rejects_invalid_dispatch_config() {
        let mut config = config_with_token();
        config.dispatch.global_ceiling = 0;
        let db = Arc::new(Database::open_in_memory().unwrap());
        assert!(build_dispatcher(&config, db).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_until_repeats_windows_until_shutdown() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = build_dispatcher(&config_with_token(), db).unwrap();

        let shutdown = tokio::time::sleep(Duration::from_millis(5_500));
        let windows = serve_until(&dispatcher, Duration::from_secs(2), shutdown).await;

        assert!(windows >= 3, "expected at least 3 windows, got {windows}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_until_stops_immediately_on_ready_shutdown() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = build_dispatcher(&config_with_token(), db).unwrap();

        let windows = serve_until(&dispatcher, Duration::from_secs(2), async {}).await;

        assert_eq!(windows, 1);
    }

    #[test]
    fn test_summary_json_fields() {
        let summary = RunSummary {
            ticks: 3,
            idle_ticks: 1,
            selected: 4,
            deferred: 2,
            sent: 3,
            failed: 1,
        };
        let json = summary_json(&summary);
        assert_eq!(json["ticks"], 3);
        assert_eq!(json["sent"], 3);
        assert_eq!(json["failed"], 1);
    }
}
