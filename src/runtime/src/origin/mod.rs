//! Content origins: where repository definitions come from.
//!
//! Each origin type turns the declarations listed under its key in
//! `contentOrigin` into [`Repository`] records. Types are looked up in an
//! [`OriginRegistry`], a name -> factory table populated at startup.
//!
//! ```text
//! contentOrigin:
//!   repos:      [...]   -> RepoOrigin
//!   repofiles:  [...]   -> RepoFileOrigin
//!   composes:   [...]   -> ComposeOrigin
//! ```

pub mod composes;
pub mod git;
pub mod repofiles;
pub mod repos;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use rpm_lockfile_core::config::ContainerfileSelector;
use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::repository::Repository;

use crate::oci::containerfile::extract_from_selector;
use crate::oci::image_service::ImageService;
pub use composes::ComposeOrigin;
pub use git::{CheckedOutFile, GitCli, GitFetcher};
pub use repofiles::RepoFileOrigin;
pub use repos::RepoOrigin;

/// Environment variable with the compose tracking service base URL.
pub const CTS_URL_ENV: &str = "CTS_URL";

/// Connect timeout for repo file and compose service requests.
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Overall timeout for repo file and compose service requests.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// A source of repository definitions.
#[async_trait]
pub trait ContentOrigin: Send + Sync {
    /// Turn the declarations of this origin type into repositories, in
    /// declaration order.
    async fn collect(&self, declarations: &[serde_yaml::Value]) -> Result<Vec<Repository>>;
}

/// Collaborators and settings shared by all origins.
#[derive(Clone)]
pub struct OriginContext {
    /// Directory of the input file; relative paths resolve against it.
    pub config_dir: PathBuf,
    pub images: Arc<dyn ImageService>,
    pub git: Arc<dyn GitFetcher>,
    pub http: reqwest::Client,
    /// Compose tracking service base URL, without trailing `/`.
    pub cts_url: Option<String>,
}

impl OriginContext {
    pub fn new(config_dir: impl Into<PathBuf>, images: Arc<dyn ImageService>) -> Result<Self> {
        Ok(Self {
            config_dir: config_dir.into(),
            images,
            git: Arc::new(GitCli::new()),
            http: http_client()?,
            cts_url: std::env::var(CTS_URL_ENV)
                .ok()
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    pub fn with_git(mut self, git: Arc<dyn GitFetcher>) -> Self {
        self.git = git;
        self
    }

    pub fn with_cts_url(mut self, url: Option<String>) -> Self {
        self.cts_url = url.map(|u| u.trim_end_matches('/').to_string());
        self
    }
}

/// HTTP client with the short timeouts used for metadata fetches.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("rpm-lockfile/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LockError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// GET `url` and return the body, mapping transport and status errors.
pub(crate) async fn http_get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    tracing::debug!(url, "Fetching");
    let http_err = |e: reqwest::Error| LockError::HttpError {
        url: url.to_string(),
        message: e.to_string(),
    };
    client
        .get(url)
        .send()
        .await
        .map_err(http_err)?
        .error_for_status()
        .map_err(http_err)?
        .text()
        .await
        .map_err(http_err)
}

/// Build an origin from the shared context.
pub type OriginFactory = fn(&OriginContext) -> Result<Box<dyn ContentOrigin>>;

/// Schema of a single declaration for `--print-schema`.
pub type OriginSchema = fn() -> serde_json::Value;

/// Registered origin types, in registration order.
pub struct OriginRegistry {
    entries: Vec<(&'static str, OriginFactory, OriginSchema)>,
}

impl OriginRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// `repos`, `repofiles` and `composes`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("composes", ComposeOrigin::factory, ComposeOrigin::schema);
        registry.register("repofiles", RepoFileOrigin::factory, RepoFileOrigin::schema);
        registry.register("repos", RepoOrigin::factory, RepoOrigin::schema);
        registry
    }

    /// Add or replace an origin type.
    pub fn register(&mut self, name: &'static str, factory: OriginFactory, schema: OriginSchema) {
        self.entries.retain(|(n, _, _)| *n != name);
        self.entries.push((name, factory, schema));
    }

    pub fn factory(&self, name: &str) -> Option<OriginFactory> {
        self.entries
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, factory, _)| *factory)
    }

    pub fn schemas(&self) -> Vec<(&'static str, serde_json::Value)> {
        self.entries
            .iter()
            .map(|(name, _, schema)| (*name, schema()))
            .collect()
    }
}

impl Default for OriginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Collect repositories from every origin in `origins`, preserving the
/// order of keys in the input file.
pub async fn collect_content_origins(
    registry: &OriginRegistry,
    ctx: &OriginContext,
    origins: &serde_yaml::Mapping,
) -> Result<Vec<Repository>> {
    let mut repos = Vec::new();

    for (key, value) in origins {
        let name = key
            .as_str()
            .ok_or_else(|| LockError::ConfigError(format!("Invalid content origin key: {:?}", key)))?;
        let factory = registry
            .factory(name)
            .ok_or_else(|| LockError::UnknownContentOrigin(name.to_string()))?;
        let declarations = match value {
            serde_yaml::Value::Sequence(items) => items.as_slice(),
            serde_yaml::Value::Null => &[],
            _ => {
                return Err(LockError::ConfigError(format!(
                    "contentOrigin.{} must be a list",
                    name
                )))
            }
        };

        let origin = factory(ctx)?;
        let collected = origin.collect(declarations).await?;
        tracing::debug!(origin = name, count = collected.len(), "Collected repositories");
        repos.extend(collected);
    }

    Ok(repos)
}

/// `varsFromImage` / `varsFromContainerfile` keys of a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarsSource {
    #[serde(default)]
    pub vars_from_image: Option<String>,
    #[serde(default)]
    pub vars_from_containerfile: Option<ContainerfileSelector>,
}

impl VarsSource {
    /// Remove the vars keys from a declaration mapping.
    pub fn take_from(map: &mut serde_yaml::Mapping) -> Result<Self> {
        let mut vars = serde_yaml::Mapping::new();
        for key in ["varsFromImage", "varsFromContainerfile"] {
            if let Some(value) = map.remove(key) {
                vars.insert(serde_yaml::Value::from(key), value);
            }
        }
        serde_yaml::from_value(serde_yaml::Value::Mapping(vars))
            .map_err(|e| LockError::ConfigError(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars_from_image.is_none() && self.vars_from_containerfile.is_none()
    }

    /// Image labels to substitute; Containerfile labels win on collisions.
    pub async fn resolve(&self, ctx: &OriginContext) -> Result<BTreeMap<String, String>> {
        let mut vars = BTreeMap::new();
        if let Some(image) = &self.vars_from_image {
            vars.extend(ctx.images.inspect(image, None).await?.labels);
        }
        if let Some(selector) = &self.vars_from_containerfile {
            let image = extract_from_selector(&ctx.config_dir, selector)?;
            vars.extend(ctx.images.inspect(&image, None).await?.labels);
        }
        Ok(vars)
    }
}

/// Render a YAML scalar (or list of scalars) as a repository option value.
pub(crate) fn yaml_to_option(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().filter_map(yaml_to_option).collect();
            Some(parts.join(" "))
        }
        _ => None,
    }
}
