//! rpm-lockfile-cached entry point.

use rpm_lockfile_cli::cached::{execute, CachedArgs};
use rpm_lockfile_cli::logging;

#[tokio::main]
async fn main() {
    let args = CachedArgs::parse_mixed(std::env::args()).unwrap_or_else(|e| e.exit());
    logging::init(false);

    if let Err(e) = execute(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
