//! Client for the external dependency resolver.
//!
//! The resolver is a helper executable reading one JSON request on stdin
//! and printing one JSON response on stdout.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use rpm_lockfile_core::config::{DEFAULT_RESOLVER, RESOLVER_ENV};
use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::lockfile::{ModuleMetadataRecord, PackageRecord};
use rpm_lockfile_core::repository::Repository;

use crate::process::{display_command, stderr_tail};

/// Input of one resolution run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub arch: String,
    pub installroot: PathBuf,
    pub repos: Vec<Repository>,
    pub packages: BTreeSet<String>,
    pub reinstall: BTreeSet<String>,
    pub upgrade: BTreeSet<String>,
    pub module_enable: BTreeSet<String>,
    pub module_disable: BTreeSet<String>,
    pub allow_erasing: bool,
    /// `None` keeps the package manager default.
    pub install_weak_deps: Option<bool>,
    pub no_sources: bool,
}

/// What the resolver would install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResolveResponse {
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
    #[serde(default)]
    pub sources: Vec<PackageRecord>,
    #[serde(default)]
    pub module_metadata: Vec<ModuleMetadataRecord>,
}

#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveResponse>;
}

/// [`DependencyResolver`] running a helper command.
#[derive(Debug, Clone)]
pub struct SubprocessResolver {
    program: String,
}

impl SubprocessResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `$RPM_LOCKFILE_RESOLVER`, or the default helper name.
    pub fn from_env() -> Self {
        Self::new(std::env::var(RESOLVER_ENV).unwrap_or_else(|_| DEFAULT_RESOLVER.to_string()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl DependencyResolver for SubprocessResolver {
    async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveResponse> {
        let err = |message: String| LockError::ResolverError {
            arch: request.arch.clone(),
            message,
        };
        let payload = serde_json::to_vec(request)?;

        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        tracing::info!("$ {}", display_command(&cmd));

        let mut child = cmd
            .spawn()
            .map_err(|e| err(format!("Failed to run {}: {}", self.program, e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| err(format!("Failed to send request: {}", e)))?;
            // Dropping stdin closes the pipe so the helper sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| err(format!("Failed to wait for {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(err(stderr_tail(&output)));
        }

        let response: ResolveResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| err(format!("Invalid resolver output: {}", e)))?;
        tracing::debug!(
            packages = response.packages.len(),
            sources = response.sources.len(),
            "Resolver finished"
        );
        Ok(response)
    }
}
