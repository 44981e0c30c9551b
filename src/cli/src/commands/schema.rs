//! `--print-schema`.

use rpm_lockfile_core::config::input_schema;
use rpm_lockfile_runtime::OriginRegistry;

pub fn execute() -> Result<(), Box<dyn std::error::Error>> {
    let schemas = OriginRegistry::builtin().schemas();
    let schema = input_schema(&schemas);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
