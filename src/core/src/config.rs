//! Input file model (`rpms.in.yaml`) and its JSON schema.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;

use crate::error::{LockError, Result};
use crate::package::PackageSpec;

/// Default input file name.
pub const DEFAULT_INPUT_FILE: &str = "rpms.in.yaml";

/// Default output file name.
pub const DEFAULT_OUTPUT_FILE: &str = "rpms.lock.yaml";

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "RPM_LOCKFILE_CACHE_DIR";

/// Environment variable naming the resolver helper executable.
pub const RESOLVER_ENV: &str = "RPM_LOCKFILE_RESOLVER";

/// Resolver helper used when `RPM_LOCKFILE_RESOLVER` is unset.
pub const DEFAULT_RESOLVER: &str = "rpm-lockfile-dnf-resolver";

/// Parsed input file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InputConfig {
    /// Source type -> declarations, in file order.
    pub content_origin: serde_yaml::Mapping,
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
    #[serde(default)]
    pub reinstall_packages: Vec<PackageSpec>,
    #[serde(default)]
    pub upgrade_packages: Vec<PackageSpec>,
    #[serde(default)]
    pub module_enable: Vec<PackageSpec>,
    #[serde(default)]
    pub module_disable: Vec<PackageSpec>,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub allowerasing: bool,
    #[serde(default)]
    pub no_sources: bool,
    /// Unset leaves the package manager's own default.
    #[serde(default)]
    pub install_weak_deps: Option<bool>,
}

impl InputConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let config: InputConfig = serde_yaml::from_str(content)
            .map_err(|e| LockError::ConfigError(e.to_string()))?;
        config.context.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LockError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }
}

/// Base filesystem state selection from the input file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContextConfig {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub containerfile: Option<ContainerfileSelector>,
    #[serde(default)]
    pub rpm_ostree_treefile: Option<String>,
    #[serde(default)]
    pub local_system: bool,
    #[serde(default)]
    pub bare: bool,
    #[serde(default)]
    pub flatpak: bool,
}

impl ContextConfig {
    /// At most one base state; `flatpak` only next to image, containerfile or bare.
    pub fn validate(&self) -> Result<()> {
        let mut chosen = Vec::new();
        if self.image.is_some() {
            chosen.push("image");
        }
        if self.containerfile.is_some() {
            chosen.push("containerfile");
        }
        if self.rpm_ostree_treefile.is_some() {
            chosen.push("rpmOstreeTreefile");
        }
        if self.local_system {
            chosen.push("localSystem");
        }
        if self.bare {
            chosen.push("bare");
        }

        if chosen.len() > 1 {
            return Err(LockError::ConfigError(format!(
                "context: {} are mutually exclusive",
                chosen.join(", ")
            )));
        }
        if self.flatpak && (self.rpm_ostree_treefile.is_some() || self.local_system) {
            return Err(LockError::ConfigError(format!(
                "context: flatpak can not be combined with {}",
                chosen.join(", ")
            )));
        }
        Ok(())
    }
}

/// Which Containerfile to scan and which stage to pick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "ContainerfileDecl")]
pub struct ContainerfileSelector {
    pub file: String,
    pub stage_num: Option<u32>,
    pub stage_name: Option<String>,
    pub image_pattern: Option<String>,
}

impl ContainerfileSelector {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn has_filters(&self) -> bool {
        self.stage_num.is_some() || self.stage_name.is_some() || self.image_pattern.is_some()
    }

    /// Path of the Containerfile, relative paths resolved against `base`.
    pub fn path(&self, base: &Path) -> PathBuf {
        relative_to(base, &self.file)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContainerfileDecl {
    Path(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        file: String,
        #[serde(default)]
        stage_num: Option<u32>,
        #[serde(default)]
        stage_name: Option<String>,
        #[serde(default)]
        image_pattern: Option<String>,
    },
}

impl From<ContainerfileDecl> for ContainerfileSelector {
    fn from(decl: ContainerfileDecl) -> Self {
        match decl {
            ContainerfileDecl::Path(file) => Self::file(file),
            ContainerfileDecl::Detailed {
                file,
                stage_num,
                stage_name,
                image_pattern,
            } => Self {
                file,
                stage_num,
                stage_name,
                image_pattern,
            },
        }
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn relative_to(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Cache root: `$RPM_LOCKFILE_CACHE_DIR`, else `<user cache dir>/rpm-lockfile`.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("rpm-lockfile")
}

/// Schema fragment for Containerfile references, shared with content origins.
pub fn containerfile_schema() -> serde_json::Value {
    json!({
        "oneOf": [
            {"type": "string"},
            {
                "type": "object",
                "properties": {
                    "file": {"type": "string"},
                    "stageNum": {"type": "number"},
                    "stageName": {"type": "string"},
                    "imagePattern": {"type": "string"},
                },
                "additionalProperties": false,
                "required": ["file"],
            },
        ],
    })
}

/// JSON schema of the input file; `origins` maps source type to the schema
/// of a single declaration.
pub fn input_schema(origins: &[(&str, serde_json::Value)]) -> serde_json::Value {
    let origin_props: serde_json::Map<String, serde_json::Value> = origins
        .iter()
        .map(|(name, schema)| {
            (
                name.to_string(),
                json!({"type": "array", "items": schema}),
            )
        })
        .collect();

    let pkg_list = json!({"type": "array", "items": {"$ref": "#/$defs/pkg"}});

    json!({
        "$schema": "http://json-schema.org/draft-04/schema#",
        "$defs": {
            "strings": {
                "oneOf": [
                    {"type": "string"},
                    {"type": "array", "items": {"type": "string"}},
                ],
            },
            "pkg": {
                "oneOf": [
                    {"type": "string"},
                    {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "arches": {
                                "type": "object",
                                "properties": {
                                    "only": {"$ref": "#/$defs/strings"},
                                    "not": {"$ref": "#/$defs/strings"},
                                },
                                "additionalProperties": false,
                            },
                        },
                        "required": ["name"],
                    },
                ],
            },
        },
        "type": "object",
        "properties": {
            "packages": pkg_list,
            "reinstallPackages": pkg_list,
            "upgradePackages": pkg_list,
            "moduleEnable": pkg_list,
            "moduleDisable": pkg_list,
            "arches": {"type": "array", "items": {"type": "string"}},
            "contentOrigin": {"type": "object", "properties": origin_props},
            "context": {
                "type": "object",
                "anyOf": [
                    {
                        "additionalProperties": false,
                        "properties": {
                            "image": {"type": "string"},
                            "flatpak": {"type": "boolean"},
                        },
                    },
                    {
                        "additionalProperties": false,
                        "properties": {
                            "containerfile": containerfile_schema(),
                            "flatpak": {"type": "boolean"},
                        },
                    },
                    {
                        "additionalProperties": false,
                        "properties": {"rpmOstreeTreefile": {"type": "string"}},
                    },
                    {
                        "additionalProperties": false,
                        "properties": {"localSystem": {"type": "boolean"}},
                    },
                    {
                        "additionalProperties": false,
                        "properties": {
                            "bare": {"type": "boolean"},
                            "flatpak": {"type": "boolean"},
                        },
                    },
                ],
            },
            "allowerasing": {"type": "boolean"},
            "noSources": {"type": "boolean"},
            "installWeakDeps": {"type": "boolean"},
        },
        "required": ["contentOrigin"],
        "additionalProperties": false,
    })
}
