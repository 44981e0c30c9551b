//! Container image reference parsing.
//!
//! Splits references like `registry.io/org/image:tag@sha256:abc...` into
//! repository, tag and digest without applying any registry defaults.

use rpm_lockfile_core::error::{LockError, Result};

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageSpec {
    /// Everything before the tag/digest (e.g., "registry.io/org/image")
    pub repository: String,
    /// Tag (e.g., "latest", "9.4")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageSpec {
    /// Parse `repo[:tag][@digest]`.
    ///
    /// The digest must look like `sha<digits>:<hex>`; neither the digit
    /// count nor the hex length is checked further. A colon is only taken as
    /// a tag separator when it follows the last `/`, so registry ports stay
    /// part of the repository.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();

        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                if !is_digest(digest_part) {
                    return Err(LockError::MalformedImageReference(format!(
                        "{}: invalid digest '{}'",
                        reference, digest_part
                    )));
                }
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (repository, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon_pos) => {
                let split = last_segment_start + colon_pos;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if repository.is_empty() || repository.ends_with('/') || repository.contains('@') {
            return Err(LockError::MalformedImageReference(reference.to_string()));
        }
        if matches!(tag.as_deref(), Some("")) {
            return Err(LockError::MalformedImageReference(format!(
                "{}: empty tag",
                reference
            )));
        }

        Ok(ImageSpec {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Build the reference string, omitting absent parts.
    pub fn format(repository: &str, tag: Option<&str>, digest: Option<&str>) -> String {
        let mut s = repository.to_string();
        if let Some(tag) = tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(digest) = digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        Self::format(&self.repository, self.tag.as_deref(), self.digest.as_deref())
    }

    /// Reference to hand to the image tool: the tag is dropped when a
    /// digest pins the image, since the tool would ignore it anyway.
    pub fn pull_reference(&self) -> String {
        match &self.digest {
            Some(digest) => {
                if self.tag.is_some() {
                    tracing::info!(
                        image = %self.full_reference(),
                        "Digest was provided, ignoring tag"
                    );
                }
                Self::format(&self.repository, None, Some(digest))
            }
            None => self.full_reference(),
        }
    }

    /// Same repository pinned to `digest`, tag removed.
    pub fn pinned(&self, digest: impl Into<String>) -> Self {
        Self {
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// The empty base image.
    pub fn is_scratch(&self) -> bool {
        self.repository.eq_ignore_ascii_case("scratch")
    }
}

impl std::fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageSpec {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse `spec` and return the reference with the tag stripped when a
/// digest is present.
pub fn resolve_pull_reference(spec: &str) -> Result<String> {
    Ok(ImageSpec::parse(spec)?.pull_reference())
}

/// Registry-hostname heuristic: the part before the first `/` has a dot.
pub fn is_fully_qualified(spec: &str) -> bool {
    match spec.split_once('/') {
        Some((host, _)) => host.contains('.'),
        None => false,
    }
}

fn is_digest(s: &str) -> bool {
    let Some((algo, hex)) = s.split_once(':') else {
        return false;
    };
    let Some(bits) = algo.strip_prefix("sha") else {
        return false;
    };
    !bits.is_empty()
        && bits.chars().all(|c| c.is_ascii_digit())
        && !hex.is_empty()
        && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
