//! rpm-lockfile entry point.

use clap::Parser;

use rpm_lockfile_cli::commands::{dispatch, Cli};
use rpm_lockfile_cli::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
