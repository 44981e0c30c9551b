//! Base rpmdb provisioning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::process::Command;

use rpm_lockfile_core::error::{LockError, Result};

use crate::cache::{copy_dir_recursive, RpmdbCache};
use crate::oci::reference::ImageSpec;
use crate::process::{run_logged, stderr_tail};

/// Where the pre-installed package state comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpmdbSource {
    /// Nothing installed.
    Empty,
    /// The running system's rpmdb; only meaningful for the host architecture.
    LocalSystem,
    /// The rpmdb shipped in a container image.
    Image(ImageSpec),
}

/// Temporary installation root, removed on drop.
#[derive(Debug)]
pub struct ProvisionedRoot {
    dir: TempDir,
}

impl ProvisionedRoot {
    fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("rpm-lockfile-root-").tempdir()?;
        std::fs::create_dir_all(dir.path().join("var/lib/dnf"))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Produces a fresh [`ProvisionedRoot`] per architecture run.
pub struct RpmdbProvisioner {
    source: RpmdbSource,
    cache: Option<Arc<RpmdbCache>>,
    host_root: PathBuf,
    dbpath: String,
}

impl RpmdbProvisioner {
    pub fn empty() -> Self {
        Self {
            source: RpmdbSource::Empty,
            cache: None,
            host_root: PathBuf::from("/"),
            dbpath: String::new(),
        }
    }

    /// Copy `<host_root>/<dbpath>` (normally `/` and the local rpm dbpath).
    pub fn local_system(dbpath: impl Into<String>) -> Self {
        Self {
            source: RpmdbSource::LocalSystem,
            cache: None,
            host_root: PathBuf::from("/"),
            dbpath: dbpath.into(),
        }
    }

    pub fn image(image: ImageSpec, cache: Arc<RpmdbCache>) -> Self {
        Self {
            source: RpmdbSource::Image(image),
            cache: Some(cache),
            host_root: PathBuf::from("/"),
            dbpath: String::new(),
        }
    }

    pub fn with_host_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.host_root = root.into();
        self
    }

    pub fn source(&self) -> &RpmdbSource {
        &self.source
    }

    /// Create a root for `arch`. The directory is removed when the returned
    /// handle is dropped, on success and error paths alike.
    pub async fn provision(&self, arch: &str) -> Result<ProvisionedRoot> {
        let root = ProvisionedRoot::new()?;

        match &self.source {
            RpmdbSource::Empty => {}
            RpmdbSource::LocalSystem => {
                let src = self.host_root.join(&self.dbpath);
                let dst = root.path().join(&self.dbpath);
                tracing::debug!(src = %src.display(), "Copying local rpmdb");
                tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst))
                    .await
                    .map_err(|e| LockError::CacheError(format!("Copy task failed: {}", e)))??;
            }
            RpmdbSource::Image(image) if image.is_scratch() => {
                tracing::warn!(
                    "Image with rpmdb was expected, but got `scratch` instead. \
                     Did you want to enable context.bare or use a different base image?"
                );
            }
            RpmdbSource::Image(image) => {
                let cache = self.cache.as_ref().ok_or_else(|| {
                    LockError::CacheError("Image rpmdb requested without a cache".to_string())
                })?;
                cache.acquire(arch, image, root.path()).await?;
            }
        }

        Ok(root)
    }
}

/// Ask the local rpm where it keeps its database, relative to `/`.
pub async fn detect_local_dbpath() -> Result<String> {
    let mut cmd = Command::new("rpm");
    cmd.arg("--eval").arg("%_dbpath");
    let output = run_logged(&mut cmd)
        .await
        .map_err(|e| LockError::ConfigError(format!("Failed to run rpm: {}", e)))?;
    if !output.status.success() {
        return Err(LockError::ConfigError(format!(
            "Failed to query rpm dbpath: {}",
            stderr_tail(&output)
        )));
    }
    Ok(parse_dbpath(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_dbpath(stdout: &str) -> String {
    stdout.trim().trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeImageService, FixedUsage};
    use std::fs;

    #[test]
    fn test_parse_dbpath() {
        assert_eq!(parse_dbpath("/usr/lib/sysimage/rpm\n"), "usr/lib/sysimage/rpm");
        assert_eq!(parse_dbpath("/var/lib/rpm"), "var/lib/rpm");
    }

    #[tokio::test]
    async fn test_empty_root_has_dnf_placeholder() {
        let provisioner = RpmdbProvisioner::empty();
        let root = provisioner.provision("x86_64").await.unwrap();
        assert!(root.path().join("var/lib/dnf").is_dir());
        assert!(!root.path().join("var/lib/rpm").exists());
    }

    #[tokio::test]
    async fn test_root_removed_on_drop() {
        let root = RpmdbProvisioner::empty().provision("x86_64").await.unwrap();
        let path = root.path().to_path_buf();
        assert!(path.exists());
        drop(root);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_local_system_copies_rpmdb() {
        let host = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(host.path().join("var/lib/rpm")).unwrap();
        fs::write(host.path().join("var/lib/rpm/rpmdb.sqlite"), b"host").unwrap();

        let provisioner = RpmdbProvisioner::local_system("var/lib/rpm").with_host_root(host.path());
        let root = provisioner.provision("x86_64").await.unwrap();

        assert_eq!(
            fs::read(root.path().join("var/lib/rpm/rpmdb.sqlite")).unwrap(),
            b"host"
        );
    }

    #[tokio::test]
    async fn test_image_source_uses_cache() {
        let tmp = tempfile::TempDir::new().unwrap();
        let images = Arc::new(FakeImageService::new().with_image(
            "quay.io/org/base:1",
            "sha256:beef",
            &[("var/lib/rpm/Packages", b"img")],
        ));
        let cache = Arc::new(
            RpmdbCache::new(tmp.path(), images, "var/lib/rpm")
                .with_disk_usage(Arc::new(FixedUsage(Some(1)))),
        );
        let provisioner =
            RpmdbProvisioner::image(ImageSpec::parse("quay.io/org/base:1").unwrap(), cache);

        let root = provisioner.provision("s390x").await.unwrap();

        assert_eq!(fs::read(root.path().join("var/lib/rpm/Packages")).unwrap(), b"img");
        assert!(tmp.path().join("rpmdbs/s390x/sha256:beef").exists());
    }

    #[tokio::test]
    async fn test_scratch_image_is_empty_and_offline() {
        let tmp = tempfile::TempDir::new().unwrap();
        let images = Arc::new(FakeImageService::new());
        let cache = Arc::new(RpmdbCache::new(tmp.path(), images.clone(), "var/lib/rpm"));
        let provisioner = RpmdbProvisioner::image(ImageSpec::parse("scratch").unwrap(), cache);

        let root = provisioner.provision("x86_64").await.unwrap();

        assert!(root.path().join("var/lib/dnf").is_dir());
        assert_eq!(images.inspect_count(), 0);
        assert!(images.copied().is_empty());
    }
}
