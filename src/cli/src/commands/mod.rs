//! CLI definition and dispatch.

mod lock;
mod schema;

use clap::Parser;

pub use lock::LockArgs;

/// Generate an RPM lockfile from rpms.in.yaml.
#[derive(Parser)]
#[command(name = "rpm-lockfile", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub lock: LockArgs,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Print schema for the input file to stdout
    #[arg(long)]
    pub print_schema: bool,
}

/// Run the command selected by `cli`.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.print_schema {
        return schema::execute();
    }
    lock::execute(cli.lock).await
}
