//! Content-addressed cache of extracted rpmdb trees.
//!
//! Entries live at `<root>/rpmdbs/<arch>/<digest>/`. An entry is populated in
//! a private staging directory next to it and then renamed into place, so a
//! directory at the final path is always complete. Concurrent populators
//! (tasks or processes) race on the rename; losers discard their copy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rpm_lockfile_core::error::{LockError, Result};

use super::copy_dir_recursive;
use crate::oci::image_service::ImageService;
use crate::oci::layers::extract_rpmdb;
use crate::oci::reference::ImageSpec;

/// Filesystem usage (percent) at or above which an entry is dropped after use.
pub const USAGE_THRESHOLD: u8 = 80;

/// Reports how full the filesystem holding a path is.
pub trait DiskUsage: Send + Sync {
    /// Usage in percent, `None` when it can not be determined.
    fn usage_percent(&self, path: &Path) -> Option<u8>;
}

/// [`DiskUsage`] via `statvfs(3)`, rounded up like `df`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsUsage;

impl DiskUsage for StatvfsUsage {
    fn usage_percent(&self, path: &Path) -> Option<u8> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
        // SAFETY: statvfs is plain old data; all-zero is a valid value.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is NUL-terminated and stat is a valid out pointer.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return None;
        }

        let used = (stat.f_blocks as u128).saturating_sub(stat.f_bfree as u128);
        let total = used + stat.f_bavail as u128;
        if total == 0 {
            return None;
        }
        Some(((used * 100).div_ceil(total)).min(100) as u8)
    }
}

/// Per-architecture rpmdb cache.
pub struct RpmdbCache {
    root: PathBuf,
    images: Arc<dyn ImageService>,
    usage: Arc<dyn DiskUsage>,
    dbpath: String,
}

impl RpmdbCache {
    /// `dbpath` is the local package manager's rpmdb location relative to `/`.
    pub fn new(root: impl Into<PathBuf>, images: Arc<dyn ImageService>, dbpath: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            images,
            usage: Arc::new(StatvfsUsage),
            dbpath: dbpath.into(),
        }
    }

    pub fn with_disk_usage(mut self, usage: Arc<dyn DiskUsage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of the entry for (`arch`, `digest`).
    pub fn entry_path(&self, arch: &str, digest: &str) -> PathBuf {
        self.root.join("rpmdbs").join(arch).join(digest)
    }

    /// Make the rpmdb of `image` for `arch` available in `dest`.
    ///
    /// Resolves the digest when the reference has none, populates the cache
    /// entry on a miss, merges the entry into `dest` and finally applies
    /// disk-pressure eviction to the entry. Returns the entry path, which may
    /// no longer exist if it was evicted.
    pub async fn acquire(&self, arch: &str, image: &ImageSpec, dest: &Path) -> Result<PathBuf> {
        let digest = match &image.digest {
            Some(digest) => digest.clone(),
            None => {
                self.images
                    .inspect(&image.full_reference(), Some(arch))
                    .await?
                    .digest
            }
        };
        // Pull by digest so a tag moving between inspect and copy can not
        // mix two images.
        let pinned = image.pinned(&digest);
        let entry = self.entry_path(arch, &digest);

        if entry.exists() {
            tracing::info!(arch, digest = %digest, "Using already downloaded rpmdb");
        } else {
            self.populate(arch, &pinned, &digest, &entry).await?;
        }

        let src = entry.clone();
        let dst = dest.to_path_buf();
        tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst))
            .await
            .map_err(|e| LockError::CacheError(format!("Copy task failed: {}", e)))??;

        self.maybe_evict(&entry);
        Ok(entry)
    }

    async fn populate(&self, arch: &str, image: &ImageSpec, digest: &str, entry: &Path) -> Result<()> {
        let parent = entry
            .parent()
            .ok_or_else(|| LockError::CacheError(format!("Invalid cache path {}", entry.display())))?;
        std::fs::create_dir_all(parent).map_err(|e| {
            LockError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                parent.display(),
                e
            ))
        })?;

        let staging = tempfile::Builder::new()
            .prefix(&format!("{}.{}.", digest, std::process::id()))
            .tempdir_in(parent)
            .map_err(|e| {
                LockError::CacheError(format!(
                    "Failed to create staging directory in {}: {}",
                    parent.display(),
                    e
                ))
            })?;

        extract_rpmdb(
            self.images.as_ref(),
            &image.full_reference(),
            arch,
            staging.path(),
            &self.dbpath,
        )
        .await?;

        let staging_path = staging.into_path();
        match std::fs::rename(&staging_path, entry) {
            Ok(()) => {
                tracing::info!(arch, digest, path = %entry.display(), "Cached rpmdb");
                Ok(())
            }
            Err(e) if is_populated(entry) => {
                tracing::debug!(
                    arch,
                    digest,
                    error = %e,
                    "Another process populated the cache first, discarding our copy"
                );
                let _ = std::fs::remove_dir_all(&staging_path);
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging_path);
                Err(LockError::CacheError(format!(
                    "Failed to move {} to {}: {}",
                    staging_path.display(),
                    entry.display(),
                    e
                )))
            }
        }
    }

    /// Delete `entry` when its filesystem is at or above [`USAGE_THRESHOLD`].
    ///
    /// A concurrent reader of the same entry is not protected; a later
    /// acquire simply repopulates.
    pub fn maybe_evict(&self, entry: &Path) -> bool {
        let Some(usage) = self.usage.usage_percent(entry) else {
            tracing::debug!(path = %entry.display(), "Failed to check free storage size");
            return false;
        };
        if usage < USAGE_THRESHOLD {
            return false;
        }

        tracing::info!(usage, path = %entry.display(), "Storage is nearly full, cleaning up cached rpmdb");
        match std::fs::remove_dir_all(entry) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(path = %entry.display(), error = %e, "Failed to remove cached rpmdb");
                false
            }
        }
    }
}

fn is_populated(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
