//! Provider specifiers: classification and routing references.
//!
//! A specifier starting with `github:` names a repository that has to be
//! cloned and built before installation; anything else is handed to the
//! package manager as-is. Records carry their env mapping with them so
//! reordering never detaches an env from its specifier.

use std::collections::BTreeMap;

/// Marker prefix for repository-sourced providers.
pub const REPOSITORY_MARKER: &str = "github:";

/// Where a provider's package comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    Registry,
    Repository,
}

/// One configured provider: its specifier plus the env it is started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    pub specifier: String,
    pub env: BTreeMap<String, String>,
}

impl ProviderRecord {
    pub fn new(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(specifier: impl Into<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            specifier: specifier.into(),
            env,
        }
    }

    pub fn kind(&self) -> SpecifierKind {
        specifier_kind(&self.specifier)
    }

    /// URL-safe routing key for this provider.
    pub fn reference(&self) -> String {
        provider_reference(&self.specifier)
    }
}

/// Providers split by origin, each side in original relative order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub registry: Vec<ProviderRecord>,
    pub repository: Vec<ProviderRecord>,
}

impl Classified {
    /// Canonical provider order used by every later phase: registry first,
    /// then repository.
    pub fn canonical(&self) -> Vec<ProviderRecord> {
        self.registry
            .iter()
            .chain(self.repository.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registry.len() + self.repository.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn specifier_kind(specifier: &str) -> SpecifierKind {
    if specifier.starts_with(REPOSITORY_MARKER) {
        SpecifierKind::Repository
    } else {
        SpecifierKind::Registry
    }
}

/// Partition records into registry and repository groups.
pub fn classify(records: impl IntoIterator<Item = ProviderRecord>) -> Classified {
    let (repository, registry): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|record| record.kind() == SpecifierKind::Repository);
    Classified {
        registry,
        repository,
    }
}

/// Strip the repository marker, e.g. `github:org/tool` -> `org/tool`.
/// Returns None for registry specifiers.
pub fn repository_path(specifier: &str) -> Option<&str> {
    specifier.strip_prefix(REPOSITORY_MARKER)
}

/// Characters `urlencoding` escapes that URI components leave as-is.
const COMPONENT_UNRESERVED: &[(&str, &str)] = &[
    ("%21", "!"),
    ("%27", "'"),
    ("%28", "("),
    ("%29", ")"),
    ("%2A", "*"),
];

/// Percent-encode a specifier into a single path segment, with the same
/// unreserved set as a JavaScript URI component.
/// E.g. `github:org/tool` -> `github%3Aorg%2Ftool`.
pub fn provider_reference(specifier: &str) -> String {
    let mut reference = urlencoding::encode(specifier).into_owned();
    for (escaped, plain) in COMPONENT_UNRESERVED {
        if reference.contains(escaped) {
            reference = reference.replace(escaped, plain);
        }
    }
    reference
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_specifier_kind() {
        assert_eq!(specifier_kind("left-pad"), SpecifierKind::Registry);
        assert_eq!(specifier_kind("@scope/pkg@1.2.0"), SpecifierKind::Registry);
        assert_eq!(specifier_kind("github:org/tool"), SpecifierKind::Repository);
        // marker must be a prefix, not a substring
        assert_eq!(specifier_kind("my-github:thing"), SpecifierKind::Registry);
    }

    #[test]
    fn test_classify_preserves_relative_order() {
        let classified = classify(vec![
            ProviderRecord::new("github:a/one"),
            ProviderRecord::new("alpha"),
            ProviderRecord::new("github:b/two"),
            ProviderRecord::new("beta"),
        ]);
        let registry: Vec<&str> = classified.registry.iter().map(|r| r.specifier.as_str()).collect();
        let repository: Vec<&str> = classified
            .repository
            .iter()
            .map(|r| r.specifier.as_str())
            .collect();
        assert_eq!(registry, vec!["alpha", "beta"]);
        assert_eq!(repository, vec!["github:a/one", "github:b/two"]);
    }

    #[test]
    fn test_canonical_order_registry_then_repository() {
        let classified = classify(vec![
            ProviderRecord::new("github:org/tool"),
            ProviderRecord::new("left-pad"),
        ]);
        let canonical: Vec<String> = classified
            .canonical()
            .into_iter()
            .map(|r| r.specifier)
            .collect();
        assert_eq!(canonical, vec!["left-pad", "github:org/tool"]);
    }

    #[test]
    fn test_env_follows_specifier_through_reordering() {
        // Repository provider listed first: its env must not attach to the
        // registry provider that moves into canonical slot 0.
        let classified = classify(vec![
            ProviderRecord::with_env("github:org/tool", env(&[("TOOL_TOKEN", "t")])),
            ProviderRecord::with_env("left-pad", env(&[("PAD", "p")])),
        ]);
        let canonical = classified.canonical();
        assert_eq!(canonical[0].specifier, "left-pad");
        assert_eq!(canonical[0].env, env(&[("PAD", "p")]));
        assert_eq!(canonical[1].specifier, "github:org/tool");
        assert_eq!(canonical[1].env, env(&[("TOOL_TOKEN", "t")]));
    }

    #[test]
    fn test_classify_empty() {
        let classified = classify(Vec::new());
        assert!(classified.is_empty());
        assert!(classified.canonical().is_empty());
    }

    #[test]
    fn test_repository_path() {
        assert_eq!(repository_path("github:org/tool"), Some("org/tool"));
        assert_eq!(repository_path("left-pad"), None);
    }

    #[test]
    fn test_provider_reference_encoding() {
        assert_eq!(provider_reference("left-pad"), "left-pad");
        assert_eq!(provider_reference("github:org/tool"), "github%3Aorg%2Ftool");
        assert_eq!(provider_reference("@scope/pkg@1.0.0"), "%40scope%2Fpkg%401.0.0");
    }

    #[test]
    fn test_provider_reference_keeps_uri_component_marks() {
        assert_eq!(provider_reference("tool!(beta)*'x'"), "tool!(beta)*'x'");
        assert_eq!(provider_reference("a b~c-d_e.f"), "a%20b~c-d_e.f");
        // A literal escape sequence stays escaped
        assert_eq!(provider_reference("%21"), "%2521");
    }
}
