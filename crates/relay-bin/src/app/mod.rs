//! Application wiring for the dispatcher binary.

mod dispatch;
mod queue;

pub use dispatch::{run_window, serve, summary_json};
pub use queue::{enqueue, promote, purge, stats, EnqueueRequest};

use relay_core::Paths;
use relay_database::Database;

/// Open the relay database, creating the base directory if needed.
fn open_database(paths: &Paths) -> Result<Database, Box<dyn std::error::Error>> {
    paths.ensure_dirs()?;
    Ok(Database::open(&paths.database_file())?)
}
