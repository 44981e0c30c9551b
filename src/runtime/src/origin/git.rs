//! Single-file git checkout.
//!
//! Repository URLs may embed access tokens, so neither the URL nor the
//! commands are ever logged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::vars::expand_env;

use crate::process::run_quiet;

/// A file inside a temporary checkout; the checkout is removed on drop.
#[derive(Debug)]
pub struct CheckedOutFile {
    _checkout: Option<TempDir>,
    path: PathBuf,
}

impl CheckedOutFile {
    pub fn new(checkout: TempDir, file: &str) -> Self {
        let path = checkout.path().join(file);
        Self {
            _checkout: Some(checkout),
            path,
        }
    }

    /// A file that already exists on disk and is not owned by the handle.
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            _checkout: None,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Fetches one file of a git repository at a given ref.
#[async_trait]
pub trait GitFetcher: Send + Sync {
    async fn fetch_file(&self, repo_url: &str, gitref: &str, file: &str) -> Result<CheckedOutFile>;
}

/// [`GitFetcher`] using the `git` executable with a shallow fetch.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitFetcher for GitCli {
    async fn fetch_file(&self, repo_url: &str, gitref: &str, file: &str) -> Result<CheckedOutFile> {
        let checkout = tempfile::Builder::new()
            .prefix("rpm-lockfile-checkout-")
            .tempdir()?;
        tracing::info!(gitref, dir = %checkout.path().display(), "Extracting commit from git repository");

        // `$VAR` references let tokens come from the environment.
        let url = expand_env(repo_url);
        let steps: [(&str, Vec<&str>); 4] = [
            ("init", vec!["init", "--quiet"]),
            ("remote add", vec!["remote", "add", "origin", url.as_str()]),
            ("fetch", vec!["fetch", "--quiet", "--depth=1", "origin", gitref]),
            ("checkout", vec!["checkout", "--quiet", "FETCH_HEAD"]),
        ];

        for (step, args) in steps {
            let mut cmd = Command::new(&self.program);
            cmd.args(&args).current_dir(checkout.path());
            let output = run_quiet(&mut cmd)
                .await
                .map_err(|e| LockError::GitError(format!("Failed to run git {}: {}", step, e)))?;
            if !output.status.success() {
                // stderr may echo the URL, so only the exit code is reported.
                return Err(LockError::GitError(format!(
                    "git {} failed for ref {} (exit {})",
                    step,
                    gitref,
                    output.status.code().unwrap_or(-1)
                )));
            }
        }

        Ok(CheckedOutFile::new(checkout, file))
    }
}
