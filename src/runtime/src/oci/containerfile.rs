//! Containerfile base image discovery.
//!
//! Only `FROM` and `ARG` matter here: build arguments are tracked so that
//! `FROM ${BASE}` can be expanded, and stage aliases are tracked so that
//! `FROM builder` resolves to whatever `builder` was built from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rpm_lockfile_core::config::ContainerfileSelector;
use rpm_lockfile_core::error::{LockError, Result};

static BRACED_ARG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("braced ARG pattern is valid")
});
static BARE_ARG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("bare ARG pattern is valid")
});

/// Names tried, in order, when no Containerfile is configured.
pub const CONTAINERFILE_NAMES: [&str; 2] = ["Containerfile", "Dockerfile"];

/// Which stage's base image to return.
#[derive(Debug, Clone, Default)]
pub struct StageFilter {
    /// 1-based stage index
    pub stage_num: Option<u32>,
    /// Exact stage alias (`FROM ... AS <name>`)
    pub stage_name: Option<String>,
    /// Searched (not anchored) in the resolved image reference
    pub image_pattern: Option<Regex>,
}

impl StageFilter {
    pub fn from_selector(selector: &ContainerfileSelector) -> Result<Self> {
        let image_pattern = match &selector.image_pattern {
            Some(p) => Some(Regex::new(p).map_err(|e| {
                LockError::ConfigError(format!("Invalid imagePattern '{}': {}", p, e))
            })?),
            None => None,
        };
        Ok(Self {
            stage_num: selector.stage_num,
            stage_name: selector.stage_name.clone(),
            image_pattern,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.stage_num.is_none() && self.stage_name.is_none() && self.image_pattern.is_none()
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(n) = self.stage_num {
            parts.push(format!("stageNum={}", n));
        }
        if let Some(name) = &self.stage_name {
            parts.push(format!("stageName={}", name));
        }
        if let Some(re) = &self.image_pattern {
            parts.push(format!("imagePattern={}", re.as_str()));
        }
        parts.join(", ")
    }
}

/// Return the external base image selected by `filter`.
///
/// Without filters the last stage's image is returned.
pub fn extract_base_image(content: &str, filter: &StageFilter) -> Result<String> {
    scan(content, filter, "Containerfile")
}

/// Read `path` and return the selected base image.
pub fn extract_base_image_from_file(path: &Path, filter: &StageFilter) -> Result<String> {
    tracing::debug!(path = %path.display(), "Looking for base image");
    let content = std::fs::read_to_string(path).map_err(|e| {
        LockError::ConfigError(format!(
            "Failed to read Containerfile at {}: {}",
            path.display(),
            e
        ))
    })?;
    scan(&content, filter, &path.display().to_string())
}

/// Resolve a configured selector against `base` and extract its image.
pub fn extract_from_selector(base: &Path, selector: &ContainerfileSelector) -> Result<String> {
    let filter = StageFilter::from_selector(selector)?;
    extract_base_image_from_file(&selector.path(base), &filter)
}

/// Look for `Containerfile`, then `Dockerfile`, in `dir`.
pub fn find_containerfile(dir: &Path) -> Option<PathBuf> {
    CONTAINERFILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.exists())
}

/// Build arguments seen so far. `None` means declared without a value.
type ArgMap = HashMap<String, Option<String>>;

fn scan(content: &str, filter: &StageFilter, source: &str) -> Result<String> {
    let mut global_args: ArgMap = HashMap::new();
    let mut stage_args: ArgMap = HashMap::new();
    let mut aliases: HashMap<String, String> = HashMap::new();
    let mut seen_stage = false;
    let mut stages: u32 = 0;
    let mut last_image: Option<String> = None;

    for line in join_continuation_lines(content) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (keyword, rest) = split_first_word(trimmed);

        if keyword.eq_ignore_ascii_case("ARG") {
            for (name, value) in parse_arg_decls(rest) {
                if seen_stage {
                    // A stage-level ARG without default shadows the global one.
                    stage_args.insert(name, value);
                } else {
                    global_args.insert(name, value);
                }
            }
            continue;
        }

        if !keyword.eq_ignore_ascii_case("FROM") {
            continue;
        }
        let Some((image_ref, alias)) = parse_from(rest) else {
            continue;
        };

        let expanded = expand_args(image_ref, &global_args, &stage_args)?;
        let external = aliases
            .get(&expanded.to_lowercase())
            .cloned()
            .unwrap_or(expanded);

        seen_stage = true;
        stage_args.clear();
        if let Some(alias) = alias {
            aliases.insert(alias.to_lowercase(), external.clone());
        }

        if let (Some(wanted), Some(alias)) = (&filter.stage_name, alias) {
            if wanted == alias {
                return Ok(external);
            }
        }
        stages += 1;
        if filter.stage_num == Some(stages) {
            return Ok(external);
        }
        if let Some(re) = &filter.image_pattern {
            if re.is_match(&external) {
                return Ok(external);
            }
        }

        last_image = Some(external);
    }

    let Some(image) = last_image else {
        return Err(LockError::NoBaseImageFound(source.to_string()));
    };
    if !filter.is_empty() {
        return Err(LockError::NoStageMatched {
            file: source.to_string(),
            filter: filter.describe(),
        });
    }
    Ok(image)
}

/// Split `FROM [--platform=X] <image> [AS <alias>]` operands.
fn parse_from(rest: &str) -> Option<(&str, Option<&str>)> {
    let mut words: Vec<&str> = rest.split_whitespace().collect();
    if words.first().is_some_and(|w| w.starts_with("--platform=")) {
        words.remove(0);
    }
    match words.as_slice() {
        [image] => Some((*image, None)),
        [image, kw, alias] if kw.eq_ignore_ascii_case("AS") => Some((*image, Some(*alias))),
        _ => None,
    }
}

/// Parse `NAME` / `NAME=VALUE` declarations of one ARG line.
fn parse_arg_decls(rest: &str) -> Vec<(String, Option<String>)> {
    rest.split_whitespace()
        .map(|decl| match decl.split_once('=') {
            Some((name, value)) => (name.to_string(), Some(unquote(value))),
            None => (decl.to_string(), None),
        })
        .collect()
}

/// Expand `${NAME}` references, then `$NAME` references.
fn expand_args(image_ref: &str, global_args: &ArgMap, stage_args: &ArgMap) -> Result<String> {
    let lookup = |name: &str| -> Result<String> {
        stage_args
            .get(name)
            .or_else(|| global_args.get(name))
            .cloned()
            .flatten()
            .ok_or_else(|| LockError::UndefinedBuildArgument(name.to_string()))
    };

    let mut out = image_ref.to_string();
    for re in [&*BRACED_ARG_RE, &*BARE_ARG_RE] {
        let mut expanded = String::with_capacity(out.len());
        let mut last = 0;
        for caps in re.captures_iter(&out) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            expanded.push_str(&out[last..whole.start()]);
            expanded.push_str(&lookup(name.as_str())?);
            last = whole.end();
        }
        expanded.push_str(&out[last..]);
        out = expanded;
    }
    Ok(out)
}

/// Join lines ending with `\` into single logical lines.
fn join_continuation_lines(content: &str) -> Vec<String> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            logical_lines.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        logical_lines.push(current);
    }

    logical_lines
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Remove matching surrounding quotes.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
