//! Relay dispatcher - drains the outbound queue under per-chat rate limits.

mod app;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use relay_core::{init_logging, ChatClass, Config, MediaKind, Paths};

/// Relay dispatcher command-line interface.
#[derive(Debug, Parser)]
#[command(name = "relay-dispatcher")]
#[command(about = "Store-and-forward dispatcher for queued chat messages")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, database, logs). Defaults to ~/.relay
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one invocation window
    Run {
        /// Window length in milliseconds (defaults to the configured window)
        #[arg(long)]
        budget_ms: Option<u64>,
    },
    /// Run invocation windows back to back until interrupted
    Serve,
    /// Queue a message for dispatch
    Enqueue {
        #[arg(long)]
        chat_id: String,

        /// direct, group or channel
        #[arg(long)]
        chat_class: String,

        #[arg(long, default_value = "text")]
        media_kind: String,

        /// Media file id or URL, required for non-text messages
        #[arg(long)]
        file_ref: Option<String>,

        content: String,
    },
    /// Mark prepared messages ready for dispatch
    Promote,
    /// Print backlog statistics as JSON
    Stats,
    /// Delete dispatched messages older than the given age
    Purge {
        #[arg(long, default_value_t = 7)]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, &paths)?;

    match cli.command {
        Some(Commands::Run { budget_ms }) => {
            let budget = budget_ms.map(Duration::from_millis);
            let summary = app::run_window(&config, &paths, budget).await?;
            println!("{}", serde_json::to_string_pretty(&app::summary_json(&summary))?);
        }
        None | Some(Commands::Serve) => {
            app::serve(&config, &paths).await?;
        }
        Some(Commands::Enqueue {
            chat_id,
            chat_class,
            media_kind,
            file_ref,
            content,
        }) => {
            let request = app::EnqueueRequest {
                chat_id,
                chat_class: ChatClass::from_str(&chat_class),
                media_kind: MediaKind::from_str(&media_kind),
                file_ref,
                content,
            };
            let message = app::enqueue(&config, &paths, request)?;
            println!("{}", message.id);
        }
        Some(Commands::Promote) => {
            let promoted = app::promote(&paths)?;
            println!("Promoted {} message(s)", promoted);
        }
        Some(Commands::Stats) => {
            let stats = app::stats(&paths)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Some(Commands::Purge { older_than_days }) => {
            let purged = app::purge(&paths, older_than_days)?;
            println!("Purged {} message(s)", purged);
        }
    }

    Ok(())
}
