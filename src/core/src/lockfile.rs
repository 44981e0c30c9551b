//! Lockfile records and deterministic document assembly.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Current lockfile format version.
pub const LOCKFILE_VERSION: u32 = 1;

/// Vendor tag written into every lockfile.
pub const LOCKFILE_VENDOR: &str = "redhat";

/// A resolved binary or source package.
///
/// Field order is the sort order: url, repoid, size, checksum, name, evr,
/// sourcerpm.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageRecord {
    pub url: String,
    pub repoid: String,
    pub size: u64,
    /// `algorithm:hex`
    pub checksum: String,
    pub name: String,
    /// `[epoch:]version-release`
    pub evr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourcerpm: Option<String>,
}

/// Modular repodata a resolved package depends on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleMetadataRecord {
    pub url: String,
    pub repoid: String,
    pub size: u64,
    pub checksum: String,
}

/// Resolution result for one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchResult {
    pub arch: String,
    pub packages: Vec<PackageRecord>,
    #[serde(rename = "source")]
    pub sources: Vec<PackageRecord>,
    pub module_metadata: Vec<ModuleMetadataRecord>,
}

impl ArchResult {
    /// Build a result with deduplicated, sorted package lists and module
    /// metadata sorted by URL.
    pub fn new<P, S, M>(arch: impl Into<String>, packages: P, sources: S, module_metadata: M) -> Self
    where
        P: IntoIterator<Item = PackageRecord>,
        S: IntoIterator<Item = PackageRecord>,
        M: IntoIterator<Item = ModuleMetadataRecord>,
    {
        let packages: BTreeSet<PackageRecord> = packages.into_iter().collect();
        let sources: BTreeSet<PackageRecord> = sources.into_iter().collect();
        let mut module_metadata: Vec<ModuleMetadataRecord> = module_metadata.into_iter().collect();
        module_metadata.sort_by(|a, b| a.url.cmp(&b.url));

        Self {
            arch: arch.into(),
            packages: packages.into_iter().collect(),
            sources: sources.into_iter().collect(),
            module_metadata,
        }
    }
}

/// The persisted lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockfileDocument {
    pub lockfile_version: u32,
    pub lockfile_vendor: String,
    #[serde(rename = "arches")]
    pub arches: Vec<ArchResult>,
}

impl LockfileDocument {
    /// Order results by architecture name, independent of completion order.
    pub fn assemble(mut results: Vec<ArchResult>) -> Self {
        results.sort_by(|a, b| a.arch.cmp(&b.arch));
        Self {
            lockfile_version: LOCKFILE_VERSION,
            lockfile_vendor: LOCKFILE_VENDOR.to_string(),
            arches: results,
        }
    }

    /// Render as YAML with an explicit document start marker.
    pub fn to_yaml(&self) -> Result<String> {
        let body = serde_yaml::to_string(self)?;
        if body.starts_with("---") {
            Ok(body)
        } else {
            Ok(format!("---\n{}", body))
        }
    }

    /// Write the document via a sibling temp file and rename.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let data = self.to_yaml()?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rpms.lock.yaml".to_string());
        let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));
        std::fs::write(&tmp_path, &data)?;
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}
