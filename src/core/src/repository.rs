//! Normalized repository records produced by content origins.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{LockError, Result};

/// Where the package manager finds a repository's metadata.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UrlSource {
    Baseurl(Vec<String>),
    Metalink(String),
    Mirrorlist(String),
}

impl UrlSource {
    /// Option key the package manager uses for this source.
    pub fn key(&self) -> &'static str {
        match self {
            UrlSource::Baseurl(_) => "baseurl",
            UrlSource::Metalink(_) => "metalink",
            UrlSource::Mirrorlist(_) => "mirrorlist",
        }
    }
}

/// A single package repository.
///
/// Exactly one URL source is carried; all other key/values from the
/// declaration are passed through to the resolver untouched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Repository {
    pub repoid: String,
    pub source: UrlSource,
    pub options: BTreeMap<String, String>,
}

impl Repository {
    pub fn new(repoid: impl Into<String>, source: UrlSource) -> Self {
        Self {
            repoid: repoid.into(),
            source,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Build a repository from a loose key/value declaration.
    ///
    /// `baseurl` wins over `metalink`, which wins over `mirrorlist`. A
    /// `baseurl` given as a single string is split on whitespace. The
    /// losing URL keys stay in `options`.
    pub fn from_declaration(
        repoid: &str,
        baseurl: Option<Vec<String>>,
        mut options: BTreeMap<String, String>,
    ) -> Result<Self> {
        let baseurl = match baseurl {
            Some(urls) => Some(urls),
            None => options
                .remove("baseurl")
                .map(|s| split_baseurl(&s)),
        };

        let source = if let Some(urls) = baseurl {
            UrlSource::Baseurl(urls)
        } else if let Some(link) = options.remove("metalink") {
            UrlSource::Metalink(link)
        } else if let Some(list) = options.remove("mirrorlist") {
            UrlSource::Mirrorlist(list)
        } else {
            return Err(LockError::MissingUrlSource(repoid.to_string()));
        };

        options.remove("repoid");
        Ok(Self {
            repoid: repoid.to_string(),
            source,
            options,
        })
    }

    /// Apply `f` to the URL source strings.
    pub fn map_urls<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        self.source = match self.source {
            UrlSource::Baseurl(urls) => UrlSource::Baseurl(urls.iter().map(|u| f(u)).collect()),
            UrlSource::Metalink(link) => UrlSource::Metalink(f(&link)),
            UrlSource::Mirrorlist(list) => UrlSource::Mirrorlist(f(&list)),
        };
        self
    }
}

/// Split a whitespace-separated `baseurl` value into individual URLs.
pub fn split_baseurl(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

impl Serialize for Repository {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.options.len()))?;
        map.serialize_entry("repoid", &self.repoid)?;
        match &self.source {
            UrlSource::Baseurl(urls) => map.serialize_entry("baseurl", urls)?,
            UrlSource::Metalink(link) => map.serialize_entry("metalink", link)?,
            UrlSource::Mirrorlist(list) => map.serialize_entry("mirrorlist", list)?,
        }
        for (key, value) in &self.options {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
