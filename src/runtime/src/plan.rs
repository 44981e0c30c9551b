//! Turning the input file and command line into per-architecture jobs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sysinfo::System;

use rpm_lockfile_core::config::{relative_to, ContainerfileSelector, InputConfig};
use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::package::filter_for_arch;

use crate::cache::RpmdbCache;
use crate::manifest::{read_flatpak_packages, read_treefile_packages, FLATPAK_CONTAINER_YAML};
use crate::oci::containerfile::{extract_from_selector, find_containerfile};
use crate::oci::reference::ImageSpec;
use crate::rootfs::RpmdbProvisioner;

/// Command line choices that override or extend the input file.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub containerfile: Option<PathBuf>,
    pub image: Option<String>,
    pub local_system: bool,
    pub bare: bool,
    pub rpm_ostree_treefile: Option<PathBuf>,
    pub flatpak: bool,
    pub arches: Vec<String>,
    pub allowerasing: bool,
}

/// Installed state the resolution starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseState {
    LocalSystem,
    Empty,
    Image(ImageSpec),
}

/// Extra packages coming from a declarative manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageManifest {
    None,
    Treefile(PathBuf),
    Flatpak(PathBuf),
}

/// Package sets for one architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchJob {
    pub arch: String,
    pub packages: BTreeSet<String>,
    pub reinstall: BTreeSet<String>,
    pub upgrade: BTreeSet<String>,
    pub module_enable: BTreeSet<String>,
    pub module_disable: BTreeSet<String>,
}

/// Everything needed to run the resolution for all architectures.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub base: BaseState,
    pub manifest: PackageManifest,
    pub jobs: Vec<ArchJob>,
    pub allow_erasing: bool,
    pub no_sources: bool,
    pub install_weak_deps: Option<bool>,
}

impl RunPlan {
    /// `config_dir` resolves paths from the input file, `cwd` those from the
    /// command line and Containerfile discovery.
    pub fn build(
        config: &InputConfig,
        config_dir: &Path,
        cwd: &Path,
        options: &PlanOptions,
        host_arch: &str,
    ) -> Result<Self> {
        let context = &config.context;
        let arches = select_arches(&options.arches, &config.arches, host_arch);

        let local = options.local_system || context.local_system;
        if local && arches != [host_arch.to_string()] {
            return Err(LockError::ConfigError(format!(
                "Only current architecture ({}) can be resolved against local system.",
                host_arch
            )));
        }

        let treefile = options
            .rpm_ostree_treefile
            .as_ref()
            .map(|p| cwd.join(p))
            .or_else(|| {
                context
                    .rpm_ostree_treefile
                    .as_deref()
                    .map(|p| relative_to(config_dir, p))
            });

        let base = if local {
            BaseState::LocalSystem
        } else if options.bare || context.bare || treefile.is_some() {
            BaseState::Empty
        } else {
            BaseState::Image(ImageSpec::parse(&base_image(config, config_dir, cwd, options)?)?)
        };

        let manifest = match treefile {
            Some(path) => PackageManifest::Treefile(path),
            None if options.flatpak || context.flatpak => {
                PackageManifest::Flatpak(config_dir.join(FLATPAK_CONTAINER_YAML))
            }
            None => PackageManifest::None,
        };

        let mut jobs = Vec::with_capacity(arches.len());
        for arch in arches {
            let mut packages = filter_for_arch(&config.packages, &arch);
            match &manifest {
                PackageManifest::Treefile(path) => packages.extend(read_treefile_packages(&arch, path)?),
                PackageManifest::Flatpak(path) => packages.extend(read_flatpak_packages(&arch, path)?),
                PackageManifest::None => {}
            }
            jobs.push(ArchJob {
                packages,
                reinstall: filter_for_arch(&config.reinstall_packages, &arch),
                upgrade: filter_for_arch(&config.upgrade_packages, &arch),
                module_enable: filter_for_arch(&config.module_enable, &arch),
                module_disable: filter_for_arch(&config.module_disable, &arch),
                arch,
            });
        }

        Ok(Self {
            base,
            manifest,
            jobs,
            allow_erasing: options.allowerasing || config.allowerasing,
            no_sources: config.no_sources,
            install_weak_deps: config.install_weak_deps,
        })
    }

    pub fn arches(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.arch.as_str()).collect()
    }

    /// Provisioner for the base state; `cache` is only used for images.
    pub fn provisioner(&self, cache: Arc<RpmdbCache>, dbpath: &str) -> RpmdbProvisioner {
        match &self.base {
            BaseState::LocalSystem => RpmdbProvisioner::local_system(dbpath),
            BaseState::Empty => RpmdbProvisioner::empty(),
            BaseState::Image(image) => RpmdbProvisioner::image(image.clone(), cache),
        }
    }
}

/// Explicit image, else the base image of the configured or discovered
/// Containerfile.
fn base_image(
    config: &InputConfig,
    config_dir: &Path,
    cwd: &Path,
    options: &PlanOptions,
) -> Result<String> {
    if let Some(image) = options.image.as_ref().or(config.context.image.as_ref()) {
        return Ok(image.clone());
    }

    let configured = config.context.containerfile.as_ref();
    let selector = match (&options.containerfile, configured) {
        (Some(path), configured) => ContainerfileSelector {
            file: cwd.join(path).display().to_string(),
            ..configured.cloned().unwrap_or_default()
        },
        (None, Some(selector)) => selector.clone(),
        (None, None) => {
            let found = find_containerfile(cwd).ok_or_else(|| {
                LockError::ConfigError(
                    "No base image configured and no Containerfile or Dockerfile found".to_string(),
                )
            })?;
            ContainerfileSelector::file(found.display().to_string())
        }
    };

    let image = extract_from_selector(config_dir, &selector)?;
    tracing::info!(image = %image, containerfile = %selector.file, "Using base image");
    Ok(image)
}

/// `--arch` values, else the input file's `arches`, else the host; sorted
/// and deduplicated.
pub fn select_arches(cli: &[String], config: &[String], host_arch: &str) -> Vec<String> {
    let chosen: BTreeSet<String> = if !cli.is_empty() {
        cli.iter().cloned().collect()
    } else if !config.is_empty() {
        config.iter().cloned().collect()
    } else {
        std::iter::once(host_arch.to_string()).collect()
    };
    chosen.into_iter().collect()
}

/// Machine hardware name as reported by `uname -m`.
pub fn host_arch() -> String {
    System::cpu_arch().unwrap_or_else(|| std::env::consts::ARCH.to_string())
}
