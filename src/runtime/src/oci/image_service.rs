//! Registry access through the `skopeo` CLI.
//!
//! Two operations are needed: `inspect` (digest and labels) and `copy`
//! (materialize layers in a local `dir:` layout). Inspect results are
//! memoized for the lifetime of the service.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::process::Command;

use rpm_lockfile_core::error::{LockError, Result};

use super::reference::resolve_pull_reference;
use crate::process::{run_logged, stderr_tail};

/// Architecture names the image tooling uses instead of the RPM ones.
const ARCH_ALIASES: [(&str, &str); 2] = [("x86_64", "amd64"), ("aarch64", "arm64")];

/// Map an RPM architecture to the registry naming; unknown names pass through.
pub fn translate_arch(arch: &str) -> &str {
    ARCH_ALIASES
        .iter()
        .find(|(rpm, _)| *rpm == arch)
        .map(|(_, oci)| *oci)
        .unwrap_or(arch)
}

/// Subset of `skopeo inspect` output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "Digest")]
    pub digest: String,
    #[serde(rename = "Labels", default, deserialize_with = "nullable_labels")]
    pub labels: BTreeMap<String, String>,
}

fn nullable_labels<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Access to container images in remote registries.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Digest and labels of `image_ref`, optionally for a specific architecture.
    async fn inspect(&self, image_ref: &str, arch: Option<&str>) -> Result<ImageInfo>;

    /// Copy the image for `arch` (registry naming) into `dest` as a `dir:` layout.
    async fn copy(&self, image_ref: &str, arch: &str, dest: &Path) -> Result<()>;
}

/// [`ImageService`] backed by the `skopeo` executable.
pub struct Skopeo {
    program: String,
    inspected: DashMap<(String, Option<String>), ImageInfo>,
}

impl Skopeo {
    pub fn new() -> Self {
        Self::with_program("skopeo")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            inspected: DashMap::new(),
        }
    }
}

impl Default for Skopeo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageService for Skopeo {
    async fn inspect(&self, image_ref: &str, arch: Option<&str>) -> Result<ImageInfo> {
        let key = (image_ref.to_string(), arch.map(str::to_string));
        if let Some(info) = self.inspected.get(&key) {
            return Ok(info.clone());
        }

        let pull_ref = resolve_pull_reference(image_ref)?;
        let mut cmd = Command::new(&self.program);
        if let Some(arch) = arch {
            cmd.arg(format!("--override-arch={}", translate_arch(arch)));
        }
        cmd.arg("inspect").arg(format!("docker://{}", pull_ref));

        let output = run_logged(&mut cmd)
            .await
            .map_err(|e| LockError::ImageError(format!("Failed to run {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(LockError::ImageError(format!(
                "Failed to inspect {}: {}",
                pull_ref,
                stderr_tail(&output)
            )));
        }

        let info: ImageInfo = serde_json::from_slice(&output.stdout)?;
        self.inspected.insert(key, info.clone());
        Ok(info)
    }

    async fn copy(&self, image_ref: &str, arch: &str, dest: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(format!("--override-arch={}", arch))
            .arg("copy")
            .arg(format!("docker://{}", image_ref))
            .arg(format!("dir:{}", dest.display()));

        let output = run_logged(&mut cmd)
            .await
            .map_err(|e| LockError::ImageError(format!("Failed to run {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(LockError::ImageError(format!(
                "Failed to copy {}: {}",
                image_ref,
                stderr_tail(&output)
            )));
        }
        Ok(())
    }
}
