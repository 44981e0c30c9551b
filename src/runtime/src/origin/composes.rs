//! Compose origin (`contentOrigin.composes`).
//!
//! Composes are looked up in a compose tracking service (CTS) either by id
//! or as the latest compose matching a set of filters. Each variant of the
//! compose becomes one repository.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::package::OneOrMany;
use rpm_lockfile_core::repository::{Repository, UrlSource};

use super::{http_get_text, ContentOrigin, OriginContext, CTS_URL_ENV};

/// Filters accepted by the CTS compose listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComposeFilters {
    pub release_short: Option<String>,
    pub release_version: Option<String>,
    pub release_type: Option<String>,
    pub tag: Option<OneOrMany>,
}

impl ComposeFilters {
    /// Query pairs; list filters repeat their key.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        for (key, value) in [
            ("release_short", &self.release_short),
            ("release_version", &self.release_version),
            ("release_type", &self.release_type),
        ] {
            if let Some(value) = value {
                query.push((key, value.clone()));
            }
        }
        if let Some(tags) = &self.tag {
            for tag in tags.clone().into_vec() {
                query.push(("tag", tag));
            }
        }
        query
    }
}

/// How a compose is selected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ComposeDecl")]
pub enum ComposeSelector {
    Id(String),
    Latest(ComposeFilters),
}

/// `{id: ...}` or `{latest: {...}}` as written in the input file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ComposeDecl {
    id: Option<String>,
    latest: Option<ComposeFilters>,
}

impl TryFrom<ComposeDecl> for ComposeSelector {
    type Error = String;

    fn try_from(decl: ComposeDecl) -> std::result::Result<Self, Self::Error> {
        match (decl.id, decl.latest) {
            (Some(id), None) => Ok(Self::Id(id)),
            (None, Some(filters)) => Ok(Self::Latest(filters)),
            (Some(_), Some(_)) => Err("`id` and `latest` are mutually exclusive".to_string()),
            (None, None) => Err("expected one of `id` or `latest`".to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ComposeRecord {
    compose_url: String,
}

#[derive(Deserialize)]
struct ComposeList {
    items: Vec<ComposeRecord>,
}

#[derive(Deserialize)]
struct ComposeInfo {
    payload: ComposePayload,
}

#[derive(Deserialize)]
struct ComposePayload {
    compose: ComposeId,
    #[serde(default)]
    variants: BTreeMap<String, Variant>,
}

#[derive(Deserialize)]
struct ComposeId {
    id: String,
}

#[derive(Deserialize)]
struct Variant {
    uid: String,
    #[serde(default)]
    paths: VariantPaths,
}

#[derive(Default, Deserialize)]
struct VariantPaths {
    #[serde(default)]
    repository: BTreeMap<String, String>,
}

/// Repositories of composes tracked by CTS.
pub struct ComposeOrigin {
    ctx: OriginContext,
    cts_url: String,
}

impl ComposeOrigin {
    /// Fails when no CTS URL is configured.
    pub fn new(ctx: OriginContext) -> Result<Self> {
        let cts_url = ctx
            .cts_url
            .clone()
            .ok_or_else(|| LockError::MissingConfiguration(CTS_URL_ENV.to_string()))?;
        Ok(Self { ctx, cts_url })
    }

    pub fn factory(ctx: &OriginContext) -> Result<Box<dyn ContentOrigin>> {
        Ok(Box::new(Self::new(ctx.clone())?))
    }

    pub fn schema() -> serde_json::Value {
        json!({
            "anyOf": [
                {
                    "type": "object",
                    "properties": {"id": {"type": "string"}},
                    "required": ["id"],
                    "additionalProperties": false,
                },
                {
                    "type": "object",
                    "properties": {
                        "latest": {
                            "type": "object",
                            "properties": {
                                "release_short": {"type": "string"},
                                "release_version": {"type": "string"},
                                "release_type": {"type": "string"},
                                "tag": {
                                    "oneOf": [
                                        {"type": "string"},
                                        {"type": "array", "items": {"type": "string"}}
                                    ]
                                },
                            },
                        }
                    },
                    "required": ["latest"],
                    "additionalProperties": false,
                },
            ]
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = http_get_text(&self.ctx.http, url).await?;
        serde_json::from_str(&body)
            .map_err(|e| LockError::InconsistentComposeMetadata(format!("{}: {}", url, e)))
    }

    async fn compose_url(&self, selector: &ComposeSelector) -> Result<String> {
        match selector {
            ComposeSelector::Id(id) => {
                let record: ComposeRecord = self
                    .get_json(&format!("{}/api/1/composes/{}", self.cts_url, id))
                    .await?;
                Ok(record.compose_url)
            }
            ComposeSelector::Latest(filters) => {
                let query = filters.query();
                let url = reqwest::Url::parse_with_params(
                    &format!("{}/api/1/composes/", self.cts_url),
                    query.iter().map(|(k, v)| (*k, v.as_str())),
                )
                .map_err(|e| LockError::ConfigError(format!("Invalid CTS URL: {}", e)))?;
                let list: ComposeList = self.get_json(url.as_str()).await?;
                list.items
                    .into_iter()
                    .next()
                    .map(|record| record.compose_url)
                    .ok_or_else(|| {
                        LockError::InconsistentComposeMetadata(
                            "no compose matches the filters".to_string(),
                        )
                    })
            }
        }
    }

    async fn collect_from_url(&self, compose_url: &str) -> Result<Vec<Repository>> {
        let compose_url = compose_url.trim_end_matches('/');
        let compose_path = format!("{}/compose", compose_url);
        let info: ComposeInfo = self
            .get_json(&format!("{}/metadata/composeinfo.json", compose_path))
            .await?;
        tracing::info!(compose = %info.payload.compose.id, "Collecting compose repositories");

        let mut repos = Vec::new();
        for (name, variant) in &info.payload.variants {
            let paths: BTreeSet<String> = variant
                .paths
                .repository
                .iter()
                .map(|(arch, path)| path.replace(arch.as_str(), "$basearch"))
                .collect();
            let mut paths = paths.into_iter();
            let (Some(path), None) = (paths.next(), paths.next()) else {
                return Err(LockError::InconsistentComposeMetadata(format!(
                    "variant {} of {} has differing repository paths",
                    name, info.payload.compose.id
                )));
            };
            repos.push(Repository::new(
                format!("{}-{}-rpms", info.payload.compose.id, variant.uid),
                UrlSource::Baseurl(vec![format!("{}/{}", compose_path, path)]),
            ));
        }
        Ok(repos)
    }
}

#[async_trait]
impl ContentOrigin for ComposeOrigin {
    async fn collect(&self, declarations: &[serde_yaml::Value]) -> Result<Vec<Repository>> {
        let mut repos = Vec::new();
        for declaration in declarations {
            let selector: ComposeSelector = serde_yaml::from_value(declaration.clone())
                .map_err(|e| LockError::ConfigError(format!("Invalid compose declaration: {}", e)))?;
            let compose_url = self.compose_url(&selector).await?;
            repos.extend(self.collect_from_url(&compose_url).await?);
        }
        Ok(repos)
    }
}
