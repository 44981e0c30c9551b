//! Package lists from declarative manifests.
//!
//! - rpm-ostree treefiles (`include`, `arch-include`, `packages`,
//!   `packages-<arch>`, `repo-packages`)
//! - the `flatpak:` section of `container.yaml`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::package::{ArchFilter, OneOrMany};

/// File holding the flatpak package list, next to the input file.
pub const FLATPAK_CONTAINER_YAML: &str = "container.yaml";

/// Packages a treefile (and everything it includes) installs on `arch`.
pub fn read_treefile_packages(arch: &str, treefile: &Path) -> Result<BTreeSet<String>> {
    let mut packages = BTreeSet::new();
    let mut stack = Vec::new();
    collect_treefile(arch, treefile, &mut stack, &mut packages)?;
    Ok(packages)
}

fn collect_treefile(
    arch: &str,
    treefile: &Path,
    stack: &mut Vec<PathBuf>,
    packages: &mut BTreeSet<String>,
) -> Result<()> {
    if stack.iter().any(|p| p == treefile) {
        return Err(LockError::ConfigError(format!(
            "Treefile {} includes itself",
            treefile.display()
        )));
    }
    let content = std::fs::read_to_string(treefile).map_err(|e| {
        LockError::ConfigError(format!("Failed to read treefile {}: {}", treefile.display(), e))
    })?;
    let data: serde_yaml::Value = serde_yaml::from_str(&content)?;
    let dir = treefile.parent().unwrap_or_else(|| Path::new("."));

    stack.push(treefile.to_path_buf());

    let mut includes = Vec::new();
    if let Some(include) = data.get("include") {
        includes.extend(strings(include, treefile, "include")?);
    }
    if let Some(arch_include) = data.get("arch-include").and_then(|m| m.get(arch)) {
        includes.extend(strings(arch_include, treefile, "arch-include")?);
    }
    for include in includes {
        collect_treefile(arch, &dir.join(include), stack, packages)?;
    }

    for key in ["packages".to_string(), format!("packages-{}", arch)] {
        if let Some(entries) = data.get(key.as_str()) {
            for entry in strings(entries, treefile, &key)? {
                packages.extend(entry.split_whitespace().map(str::to_string));
            }
        }
    }

    if let Some(serde_yaml::Value::Sequence(repo_packages)) = data.get("repo-packages") {
        for entry in repo_packages {
            if let Some(entries) = entry.get("packages") {
                for e in strings(entries, treefile, "repo-packages")? {
                    packages.extend(e.split_whitespace().map(str::to_string));
                }
            }
        }
    }

    stack.pop();
    Ok(())
}

fn strings(value: &serde_yaml::Value, treefile: &Path, key: &str) -> Result<Vec<String>> {
    let parsed: OneOrMany = serde_yaml::from_value(value.clone()).map_err(|e| {
        LockError::ConfigError(format!("{}: invalid {}: {}", treefile.display(), key, e))
    })?;
    Ok(parsed.into_vec())
}

#[derive(Deserialize, Default)]
struct ContainerYaml {
    #[serde(default)]
    flatpak: FlatpakSection,
}

#[derive(Deserialize, Default)]
struct FlatpakSection {
    #[serde(default)]
    packages: Vec<FlatpakPackage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlatpakPackage {
    Name(String),
    Filtered {
        name: String,
        #[serde(default)]
        platforms: ArchFilter,
    },
}

/// Packages of the flatpak section in `container_yaml` that apply to `arch`.
pub fn read_flatpak_packages(arch: &str, container_yaml: &Path) -> Result<BTreeSet<String>> {
    let content = std::fs::read_to_string(container_yaml).map_err(|e| {
        LockError::ConfigError(format!("Failed to read {}: {}", container_yaml.display(), e))
    })?;
    let data: ContainerYaml = serde_yaml::from_str(&content)?;

    Ok(data
        .flatpak
        .packages
        .into_iter()
        .filter_map(|package| match package {
            FlatpakPackage::Name(name) => Some(name),
            FlatpakPackage::Filtered { name, platforms } => platforms.matches(arch).then_some(name),
        })
        .collect())
}
