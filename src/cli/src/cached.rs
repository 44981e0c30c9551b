//! Result-caching wrapper around `rpm-lockfile`.
//!
//! The cache key covers the extra arguments and the input file bytes, so
//! identical invocations reuse a previously generated lockfile.

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};
use sha2::{Digest, Sha256};
use tokio::process::Command;

use rpm_lockfile_core::config::{default_cache_dir, DEFAULT_INPUT_FILE, DEFAULT_OUTPUT_FILE};
use rpm_lockfile_runtime::process::display_command;

use crate::commands::Cli;

/// Environment variable naming the wrapped command.
pub const CMD_ENV: &str = "RPM_LOCKFILE_CMD";

/// Command run on a cache miss when `RPM_LOCKFILE_CMD` is unset.
pub const DEFAULT_CMD: &str = "rpm-lockfile";

/// Run rpm-lockfile, reusing cached results for identical inputs.
///
/// Any argument the wrapper does not own is passed through to rpm-lockfile
/// in its original position, wherever it appears on the command line.
#[derive(Parser, Debug)]
#[command(
    name = "rpm-lockfile-cached",
    version,
    about,
    override_usage = "rpm-lockfile-cached [INPUT_FILE] [--outfile <OUTFILE>] [RPM_LOCKFILE_ARGS]..."
)]
pub struct CachedArgs {
    /// Input file
    #[arg(value_name = "INPUT_FILE", default_value = DEFAULT_INPUT_FILE)]
    pub infile: PathBuf,

    /// Where to write the lockfile
    #[arg(long, default_value = DEFAULT_OUTPUT_FILE)]
    pub outfile: PathBuf,

    /// Passed through to rpm-lockfile; part of the cache key
    #[arg(skip)]
    pub extra: Vec<String>,
}

impl CachedArgs {
    /// Pick the wrapper's own arguments out of `args` (program name first)
    /// and keep everything else, in order, as `extra`.
    pub fn parse_mixed<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let value_flags = passthrough_value_flags();
        let mut args = args.into_iter().map(Into::into);
        let mut own: Vec<String> = args.next().into_iter().collect();
        let mut extra = Vec::new();
        let mut have_infile = false;

        while let Some(arg) = args.next() {
            if arg == "--outfile" {
                own.push(arg);
                own.extend(args.next());
            } else if arg.starts_with("--outfile=")
                || matches!(arg.as_str(), "-h" | "--help" | "-V" | "--version")
            {
                own.push(arg);
            } else if arg.len() > 1 && arg.starts_with('-') {
                let takes_value = value_flags.contains(&arg);
                extra.push(arg);
                if takes_value {
                    extra.extend(args.next());
                }
            } else if !have_infile {
                have_infile = true;
                own.push(arg);
            } else {
                extra.push(arg);
            }
        }

        let mut parsed = Self::try_parse_from(own)?;
        parsed.extra = extra;
        Ok(parsed)
    }
}

/// rpm-lockfile flags that consume the following argument as their value.
fn passthrough_value_flags() -> Vec<String> {
    let cli = Cli::command();
    let mut flags = Vec::new();
    for arg in cli
        .get_arguments()
        .filter(|arg| !arg.is_positional() && arg.get_action().takes_values())
    {
        flags.extend(arg.get_long().map(|long| format!("--{}", long)));
        flags.extend(arg.get_short().map(|short| format!("-{}", short)));
    }
    flags
}

/// sha256 over the extra arguments joined by NUL, a NUL, then the input.
pub fn cache_key(extra: &[String], input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(extra.join("\0").as_bytes());
    hasher.update(b"\0");
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Location of the cached result for `key`.
pub fn cache_file(cache_root: &Path, key: &str) -> PathBuf {
    cache_root.join("results").join(format!("{}.yaml", key))
}

pub async fn execute(args: CachedArgs) -> Result<(), Box<dyn std::error::Error>> {
    let program = std::env::var(CMD_ENV).unwrap_or_else(|_| DEFAULT_CMD.to_string());
    execute_with(&args, &default_cache_dir(), &program).await
}

/// Like [`execute`] with explicit cache root and wrapped command.
pub async fn execute_with(
    args: &CachedArgs,
    cache_root: &Path,
    program: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = tokio::fs::read(&args.infile)
        .await
        .map_err(|e| format!("Failed to read {}: {}", args.infile.display(), e))?;
    let key = cache_key(&args.extra, &input);
    tracing::info!("Using {} as cache key", key);

    let cached = cache_file(cache_root, &key);
    if let Some(parent) = cached.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if !cached.exists() {
        tracing::info!("Cached results do not exist, running resolver");
        let mut cmd = Command::new(program);
        cmd.arg(&args.infile)
            .arg("--outfile")
            .arg(&cached)
            .args(&args.extra);
        tracing::info!("$ {}", display_command(&cmd));
        let status = cmd
            .status()
            .await
            .map_err(|e| format!("Failed to run {}: {}", program, e))?;
        if !status.success() {
            // A partial result must not be reused.
            let _ = tokio::fs::remove_file(&cached).await;
            return Err(format!("{} failed with {}", program, status).into());
        }
    }

    tracing::info!("Copying cache results to {}", args.outfile.display());
    tokio::fs::copy(&cached, &args.outfile).await?;
    Ok(())
}
