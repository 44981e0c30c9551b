//! Inline repository declarations (`contentOrigin.repos`).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use rpm_lockfile_core::config::containerfile_schema;
use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::repository::{split_baseurl, Repository};
use rpm_lockfile_core::vars::substitute;

use super::{yaml_to_option, ContentOrigin, OriginContext, VarsSource};

/// Repositories declared directly in the input file.
pub struct RepoOrigin {
    ctx: OriginContext,
}

impl RepoOrigin {
    pub fn new(ctx: OriginContext) -> Self {
        Self { ctx }
    }

    pub fn factory(ctx: &OriginContext) -> Result<Box<dyn ContentOrigin>> {
        Ok(Box::new(Self::new(ctx.clone())))
    }

    pub fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "repoid": {"type": "string"},
                "baseurl": {
                    "oneOf": [
                        {"type": "string"},
                        {"type": "array", "items": {"type": "string"}}
                    ]
                },
                "metalink": {"type": "string"},
                "mirrorlist": {"type": "string"},
                "varsFromImage": {"type": "string"},
                "varsFromContainerfile": containerfile_schema(),
            },
            "required": ["repoid"],
        })
    }

    async fn collect_one(&self, declaration: &serde_yaml::Value) -> Result<Repository> {
        let mut map = match declaration {
            serde_yaml::Value::Mapping(map) => map.clone(),
            other => {
                return Err(LockError::ConfigError(format!(
                    "Repo declaration must be a mapping, got {:?}",
                    other
                )))
            }
        };
        let vars = VarsSource::take_from(&mut map)?;

        let repoid = map
            .remove("repoid")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| LockError::ConfigError("Repo declaration without repoid".to_string()))?;

        // A list baseurl stays structured; everything else is a flat option.
        let baseurl = match map.remove("baseurl") {
            Some(serde_yaml::Value::Sequence(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Some(serde_yaml::Value::String(s)) => Some(split_baseurl(&s)),
            Some(other) => {
                return Err(LockError::ConfigError(format!(
                    "Repo {} has invalid baseurl: {:?}",
                    repoid, other
                )))
            }
            None => None,
        };

        let mut options = BTreeMap::new();
        for (key, value) in &map {
            if let (Some(key), Some(value)) = (key.as_str(), yaml_to_option(value)) {
                options.insert(key.to_string(), value);
            }
        }

        let repo = Repository::from_declaration(&repoid, baseurl, options)?;
        if vars.is_empty() {
            return Ok(repo);
        }
        let labels = vars.resolve(&self.ctx).await?;
        Ok(repo.map_urls(|url| substitute(url, &labels)))
    }
}

#[async_trait]
impl ContentOrigin for RepoOrigin {
    async fn collect(&self, declarations: &[serde_yaml::Value]) -> Result<Vec<Repository>> {
        let mut repos = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            repos.push(self.collect_one(declaration).await?);
        }
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{origin_context, FakeImageService};
    use rpm_lockfile_core::repository::UrlSource;
    use tempfile::TempDir;

    fn decls(yaml: &str) -> Vec<serde_yaml::Value> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_collect_plain_repos() {
        let dir = TempDir::new().unwrap();
        let origin = RepoOrigin::new(origin_context(dir.path(), FakeImageService::new()));

        let repos = origin
            .collect(&decls(
                "- repoid: baseos\n  baseurl: http://example.com/baseos/\n  gpgcheck: false\n\
                 - repoid: extras\n  metalink: https://mirrors/metalink?repo=extras\n",
            ))
            .await
            .unwrap();

        assert_eq!(repos.len(), 2);
        assert_eq!(
            repos[0].source,
            UrlSource::Baseurl(vec!["http://example.com/baseos/".to_string()])
        );
        assert_eq!(repos[0].options.get("gpgcheck").map(String::as_str), Some("0"));
        assert_eq!(
            repos[1].source,
            UrlSource::Metalink("https://mirrors/metalink?repo=extras".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_url_source() {
        let dir = TempDir::new().unwrap();
        let origin = RepoOrigin::new(origin_context(dir.path(), FakeImageService::new()));

        let err = origin
            .collect(&decls("- repoid: broken\n  gpgcheck: 1\n"))
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::MissingUrlSource(ref id) if id == "broken"));
    }

    #[tokio::test]
    async fn test_vars_from_image_substituted() {
        let dir = TempDir::new().unwrap();
        let images = FakeImageService::new()
            .with_labels("quay.io/base:9", &[("version", "9.4"), ("vcs-ref", "abc")]);
        let origin = RepoOrigin::new(origin_context(dir.path(), images));

        let repos = origin
            .collect(&decls(
                "- repoid: base\n  baseurl: http://x/{version}/os/ http://y/{version}/\n  varsFromImage: quay.io/base:9\n",
            ))
            .await
            .unwrap();

        assert_eq!(
            repos[0].source,
            UrlSource::Baseurl(vec!["http://x/9.4/os/".to_string(), "http://y/9.4/".to_string()])
        );
        assert!(!repos[0].options.contains_key("varsFromImage"));
    }

    #[tokio::test]
    async fn test_unknown_placeholder_kept() {
        let dir = TempDir::new().unwrap();
        let images = FakeImageService::new().with_labels("quay.io/base:9", &[]);
        let origin = RepoOrigin::new(origin_context(dir.path(), images));

        let repos = origin
            .collect(&decls(
                "- repoid: base\n  baseurl: [\"http://x/{missing}/\"]\n  varsFromImage: quay.io/base:9\n",
            ))
            .await
            .unwrap();

        assert_eq!(
            repos[0].source,
            UrlSource::Baseurl(vec!["http://x/{missing}/".to_string()])
        );
    }
}
