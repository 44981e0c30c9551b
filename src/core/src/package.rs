//! Package selections with optional per-architecture filters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One or many strings; config files use both forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_set(self) -> BTreeSet<String> {
        match self {
            OneOrMany::One(s) => std::iter::once(s).collect(),
            OneOrMany::Many(v) => v.into_iter().collect(),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Restricts a package to a subset of architectures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<OneOrMany>,
}

impl ArchFilter {
    pub fn only<I, S>(arches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            only: Some(OneOrMany::Many(arches.into_iter().map(Into::into).collect())),
            not: None,
        }
    }

    pub fn not<I, S>(arches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            only: None,
            not: Some(OneOrMany::Many(arches.into_iter().map(Into::into).collect())),
        }
    }

    /// True iff `arch` is in `only` (when given) and not in `not` (when given).
    ///
    /// An empty list behaves like an absent one.
    pub fn matches(&self, arch: &str) -> bool {
        let listed = |set: &Option<OneOrMany>| -> Option<bool> {
            match set {
                None => None,
                Some(OneOrMany::One(s)) => Some(s == arch),
                Some(OneOrMany::Many(v)) if v.is_empty() => None,
                Some(OneOrMany::Many(v)) => Some(v.iter().any(|a| a == arch)),
            }
        };
        listed(&self.only).unwrap_or(true) && !listed(&self.not).unwrap_or(false)
    }
}

/// A package name, optionally restricted to some architectures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageSpec {
    Name(String),
    Filtered {
        name: String,
        #[serde(default)]
        arches: ArchFilter,
    },
}

impl PackageSpec {
    pub fn name(&self) -> &str {
        match self {
            PackageSpec::Name(name) => name,
            PackageSpec::Filtered { name, .. } => name,
        }
    }

    pub fn applies_to(&self, arch: &str) -> bool {
        match self {
            PackageSpec::Name(_) => true,
            PackageSpec::Filtered { arches, .. } => arches.matches(arch),
        }
    }
}

/// Names of the specs that apply to `arch`, deduplicated and sorted.
pub fn filter_for_arch(specs: &[PackageSpec], arch: &str) -> BTreeSet<String> {
    specs
        .iter()
        .filter(|spec| spec.applies_to(arch))
        .map(|spec| spec.name().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> PackageSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_only_excludes_other_arch() {
        let spec = parse("{name: foo, arches: {only: [s390x]}}");
        assert!(!spec.applies_to("ppc64le"));
        assert!(spec.applies_to("s390x"));
    }

    #[test]
    fn test_not_includes_other_arch() {
        let spec = parse("{name: foo, arches: {not: [s390x]}}");
        assert!(spec.applies_to("ppc64le"));
        assert!(!spec.applies_to("s390x"));
    }

    #[test]
    fn test_string_forms() {
        let spec = parse("{name: foo, arches: {only: x86_64}}");
        assert!(spec.applies_to("x86_64"));
        assert!(!spec.applies_to("aarch64"));

        let spec = parse("{name: foo, arches: {not: x86_64}}");
        assert!(!spec.applies_to("x86_64"));
        assert!(spec.applies_to("aarch64"));
    }

    #[test]
    fn test_only_and_not_combined() {
        let filter = ArchFilter {
            only: Some(OneOrMany::Many(vec!["x86_64".into(), "aarch64".into()])),
            not: Some(OneOrMany::One("aarch64".into())),
        };
        assert!(filter.matches("x86_64"));
        assert!(!filter.matches("aarch64"));
        assert!(!filter.matches("s390x"));
    }

    #[test]
    fn test_empty_lists_pass() {
        let filter = ArchFilter {
            only: Some(OneOrMany::Many(vec![])),
            not: Some(OneOrMany::Many(vec![])),
        };
        assert!(filter.matches("ppc64le"));
        assert!(ArchFilter::default().matches("ppc64le"));
    }

    #[test]
    fn test_bare_name() {
        let spec = parse("bash");
        assert_eq!(spec, PackageSpec::Name("bash".to_string()));
        assert!(spec.applies_to("anything"));
    }

    #[test]
    fn test_filter_for_arch_dedups() {
        let specs = vec![
            PackageSpec::Name("b".into()),
            PackageSpec::Name("a".into()),
            PackageSpec::Filtered {
                name: "a".into(),
                arches: ArchFilter::only(["x86_64"]),
            },
            PackageSpec::Filtered {
                name: "c".into(),
                arches: ArchFilter::not(["x86_64"]),
            },
        ];
        let names: Vec<String> = filter_for_arch(&specs, "x86_64").into_iter().collect();
        assert_eq!(names, vec!["a", "b"]);
        let names: Vec<String> = filter_for_arch(&specs, "aarch64").into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
