//! `.repo` file origin (`contentOrigin.repofiles`).
//!
//! A declaration points at a `.repo` file over HTTP, on disk (relative to
//! the input file), or inside a git repository. Every section becomes one
//! repository; disabled sections are passed through and left to the
//! resolver.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use rpm_lockfile_core::config::{containerfile_schema, ContainerfileSelector};
use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::repository::Repository;
use rpm_lockfile_core::vars::substitute;

use super::{http_get_text, ContentOrigin, OriginContext, VarsSource};

/// Where a `.repo` file lives after variable substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoFileLocation {
    /// HTTP(S) URL or local path.
    Path(String),
    Git {
        url: String,
        gitref: String,
        file: String,
    },
}

/// A normalized `repofiles` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFileSpec {
    pub location: RepoFileLocation,
    pub vars: VarsSource,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RepoFileDecl {
    Location(String),
    Detailed(DetailedDecl),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DetailedDecl {
    location: Option<String>,
    giturl: Option<String>,
    file: Option<String>,
    gitref: Option<String>,
    vars_from_image: Option<String>,
    vars_from_containerfile: Option<ContainerfileSelector>,
}

impl RepoFileSpec {
    pub fn from_value(value: &serde_yaml::Value) -> Result<Self> {
        let decl: RepoFileDecl = serde_yaml::from_value(value.clone())
            .map_err(|e| LockError::ConfigError(format!("Invalid repofile declaration: {}", e)))?;

        let detailed = match decl {
            RepoFileDecl::Location(location) => {
                return Ok(Self {
                    location: RepoFileLocation::Path(location),
                    vars: VarsSource::default(),
                })
            }
            RepoFileDecl::Detailed(d) => d,
        };

        let vars = VarsSource {
            vars_from_image: detailed.vars_from_image,
            vars_from_containerfile: detailed.vars_from_containerfile,
        };
        let location = match (detailed.location, detailed.giturl, detailed.file, detailed.gitref) {
            (Some(location), None, None, None) => RepoFileLocation::Path(location),
            (None, Some(url), Some(file), Some(gitref)) => RepoFileLocation::Git { url, gitref, file },
            _ => {
                return Err(LockError::ConfigError(
                    "Repofile declaration needs either location or giturl, file and gitref"
                        .to_string(),
                ))
            }
        };
        Ok(Self { location, vars })
    }

    fn substituted(&self, vars: &BTreeMap<String, String>) -> RepoFileLocation {
        match &self.location {
            RepoFileLocation::Path(p) => RepoFileLocation::Path(substitute(p, vars)),
            RepoFileLocation::Git { url, gitref, file } => RepoFileLocation::Git {
                url: substitute(url, vars),
                gitref: substitute(gitref, vars),
                file: substitute(file, vars),
            },
        }
    }
}

/// Repositories read from `.repo` files.
pub struct RepoFileOrigin {
    ctx: OriginContext,
}

impl RepoFileOrigin {
    pub fn new(ctx: OriginContext) -> Self {
        Self { ctx }
    }

    pub fn factory(ctx: &OriginContext) -> Result<Box<dyn ContentOrigin>> {
        Ok(Box::new(Self::new(ctx.clone())))
    }

    pub fn schema() -> serde_json::Value {
        json!({
            "oneOf": [
                {"type": "string"},
                {
                    "type": "object",
                    "properties": {
                        "location": {"type": "string"},
                        "varsFromImage": {"type": "string"},
                        "varsFromContainerfile": containerfile_schema(),
                    },
                    "required": ["location"],
                    "additionalProperties": false,
                },
                {
                    "type": "object",
                    "properties": {
                        "giturl": {"type": "string"},
                        "file": {"type": "string"},
                        "gitref": {"type": "string"},
                        "varsFromImage": {"type": "string"},
                        "varsFromContainerfile": containerfile_schema(),
                    },
                    "required": ["giturl", "file", "gitref"],
                    "additionalProperties": false,
                },
            ]
        })
    }

    async fn read_repofile(&self, spec: &RepoFileSpec) -> Result<String> {
        let vars = if spec.vars.is_empty() {
            BTreeMap::new()
        } else {
            spec.vars.resolve(&self.ctx).await?
        };

        match spec.substituted(&vars) {
            RepoFileLocation::Path(location) if location.starts_with("http") => {
                http_get_text(&self.ctx.http, &location).await
            }
            RepoFileLocation::Path(location) => {
                let path: PathBuf = self.ctx.config_dir.join(&location);
                tracing::debug!(path = %path.display(), "Reading repo file");
                Ok(tokio::fs::read_to_string(&path).await?)
            }
            RepoFileLocation::Git { url, gitref, file } => {
                let checkout = self.ctx.git.fetch_file(&url, &gitref, &file).await?;
                Ok(tokio::fs::read_to_string(checkout.path()).await?)
            }
        }
    }
}

#[async_trait]
impl ContentOrigin for RepoFileOrigin {
    async fn collect(&self, declarations: &[serde_yaml::Value]) -> Result<Vec<Repository>> {
        let mut repos = Vec::new();
        for declaration in declarations {
            let spec = RepoFileSpec::from_value(declaration)?;
            let content = self.read_repofile(&spec).await?;
            for (repoid, options) in parse_repofile(&content)? {
                repos.push(Repository::from_declaration(&repoid, None, options)?);
            }
        }
        Ok(repos)
    }
}

const DEFAULT_SECTION: &str = "DEFAULT";

/// Parse a `.repo` file into `(repoid, options)` pairs in file order.
///
/// Keys are lowercased and `[DEFAULT]` entries are merged into every
/// section. Indented lines continue the value above them.
pub fn parse_repofile(content: &str) -> Result<Vec<(String, BTreeMap<String, String>)>> {
    let folded = fold_continuations(content);
    if let Some(first) = folded.lines().map(str::trim).find(|line| !line.is_empty()) {
        if !first.starts_with('[') {
            return Err(LockError::ConfigError(
                "Repo file has options outside of any section".to_string(),
            ));
        }
    }
    let ini = tini::Ini::from_string(&folded)
        .map_err(|e| LockError::ConfigError(format!("Invalid repo file: {}", e)))?;

    let mut defaults = BTreeMap::new();
    let mut sections = Vec::new();
    for (name, section) in ini.iter() {
        let name = name.to_string();
        let options: BTreeMap<String, String> = section
            .iter()
            .map(|(key, value)| (key.to_lowercase(), value.to_string()))
            .collect();
        if name == DEFAULT_SECTION {
            defaults = options;
        } else if !name.is_empty() {
            sections.push((name, options));
        }
    }

    Ok(sections
        .into_iter()
        .map(|(name, options)| {
            let mut merged = defaults.clone();
            merged.extend(options);
            (name, merged)
        })
        .collect())
}

/// Join indented continuation lines onto the line above and drop comments.
fn fold_continuations(content: &str) -> String {
    let mut folded = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        let continues = !trimmed.is_empty()
            && line.starts_with(char::is_whitespace)
            && folded.ends_with(|c: char| c != '\n');
        if continues {
            folded.push(' ');
            folded.push_str(trimmed);
            continue;
        }
        if !folded.is_empty() {
            folded.push('\n');
        }
        folded.push_str(line);
    }
    folded.push('\n');
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{origin_context, spawn_http, FakeGit, FakeImageService};
    use rpm_lockfile_core::repository::UrlSource;
    use std::sync::Arc;
    use tempfile::TempDir;

    const REPOFILE: &str = "\
# CentOS Stream
[baseos]
name = BaseOS
baseurl = http://mirror/baseos/$basearch/os/
  http://backup/baseos/$basearch/os/
gpgcheck=1

[appstream]
Name = AppStream
metalink=https://mirrors/metalink?repo=appstream&arch=$basearch
enabled=0
";

    #[test]
    fn test_parse_repofile() {
        let sections = parse_repofile(REPOFILE).unwrap();
        assert_eq!(sections.len(), 2);
        let (name, opts) = &sections[0];
        assert_eq!(name, "baseos");
        assert_eq!(
            opts.get("baseurl").map(String::as_str),
            Some("http://mirror/baseos/$basearch/os/ http://backup/baseos/$basearch/os/")
        );
        assert_eq!(opts.get("gpgcheck").map(String::as_str), Some("1"));
        let (name, opts) = &sections[1];
        assert_eq!(name, "appstream");
        assert_eq!(opts.get("name").map(String::as_str), Some("AppStream"));
        assert_eq!(
            opts.get("metalink").map(String::as_str),
            Some("https://mirrors/metalink?repo=appstream&arch=$basearch")
        );
    }

    #[test]
    fn test_parse_repofile_keeps_file_order() {
        let sections = parse_repofile("[zeta]\nbaseurl=http://z/\n[alpha]\nbaseurl=http://a/\n").unwrap();
        let names: Vec<&str> = sections.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_parse_repofile_defaults_merged() {
        let sections = parse_repofile(
            "[DEFAULT]\ngpgcheck=1\n[a]\nbaseurl=http://a/\n[b]\ngpgcheck=0\nbaseurl=http://b/\n",
        )
        .unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].1.get("gpgcheck").map(String::as_str), Some("1"));
        assert_eq!(sections[1].1.get("gpgcheck").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_fold_continuations() {
        assert_eq!(
            fold_continuations("[a]\n# note\nbaseurl=x\n  y\n\ty z\ngpgcheck=1\n"),
            "[a]\nbaseurl=x y y z\ngpgcheck=1\n"
        );
        // A blank line ends the value.
        assert_eq!(fold_continuations("k=v\n\n  w=1\n"), "k=v\n\n  w=1\n");
    }

    #[test]
    fn test_parse_repofile_options_outside_section() {
        assert!(parse_repofile("baseurl=x\n").is_err());
    }

    #[test]
    fn test_declaration_shapes() {
        let plain = RepoFileSpec::from_value(&serde_yaml::from_str("c9s.repo").unwrap()).unwrap();
        assert_eq!(plain.location, RepoFileLocation::Path("c9s.repo".to_string()));

        let git = RepoFileSpec::from_value(
            &serde_yaml::from_str("{giturl: https://git/x, file: a.repo, gitref: main}").unwrap(),
        )
        .unwrap();
        assert!(matches!(git.location, RepoFileLocation::Git { ref file, .. } if file == "a.repo"));

        let mixed = serde_yaml::from_str("{location: a.repo, giturl: https://git/x}").unwrap();
        assert!(RepoFileSpec::from_value(&mixed).is_err());
    }

    #[tokio::test]
    async fn test_collect_local_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("c9s.repo"), REPOFILE).unwrap();
        let origin = RepoFileOrigin::new(origin_context(dir.path(), FakeImageService::new()));

        let repos = origin
            .collect(&[serde_yaml::Value::from("c9s.repo")])
            .await
            .unwrap();

        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].repoid, "baseos");
        assert_eq!(
            repos[0].source,
            UrlSource::Baseurl(vec![
                "http://mirror/baseos/$basearch/os/".to_string(),
                "http://backup/baseos/$basearch/os/".to_string(),
            ])
        );
        assert_eq!(repos[1].source.key(), "metalink");
        assert_eq!(repos[1].options.get("enabled").map(String::as_str), Some("0"));
    }

    #[tokio::test]
    async fn test_collect_http_with_vars() {
        let base = spawn_http(vec![(
            "/9.4/c9s.repo".to_string(),
            200,
            "[remote]\nbaseurl=http://remote/\n".to_string(),
        )])
        .await;
        let dir = TempDir::new().unwrap();
        let images = FakeImageService::new().with_labels("quay.io/base:9", &[("ver", "9.4")]);
        let origin = RepoFileOrigin::new(origin_context(dir.path(), images));

        let decl = serde_yaml::from_str(&format!(
            "{{location: \"{}/{{ver}}/c9s.repo\", varsFromImage: \"quay.io/base:9\"}}",
            base
        ))
        .unwrap();
        let repos = origin.collect(&[decl]).await.unwrap();

        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].repoid, "remote");
    }

    #[tokio::test]
    async fn test_collect_http_error() {
        let base = spawn_http(vec![]).await;
        let dir = TempDir::new().unwrap();
        let origin = RepoFileOrigin::new(origin_context(dir.path(), FakeImageService::new()));

        let err = origin
            .collect(&[serde_yaml::Value::from(format!("{}/missing.repo", base))])
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::HttpError { .. }));
    }

    #[tokio::test]
    async fn test_collect_from_git() {
        let dir = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new().with_file("repos/x.repo", "[gitrepo]\nbaseurl=http://g/\n"));
        let origin = RepoFileOrigin::new(
            origin_context(dir.path(), FakeImageService::new()).with_git(git.clone()),
        );

        let decl = serde_yaml::from_str("{giturl: https://git/x, file: repos/x.repo, gitref: v1}").unwrap();
        let repos = origin.collect(&[decl]).await.unwrap();

        assert_eq!(repos[0].repoid, "gitrepo");
        assert_eq!(
            git.requests(),
            vec![("https://git/x".to_string(), "v1".to_string(), "repos/x.repo".to_string())]
        );
    }
}
