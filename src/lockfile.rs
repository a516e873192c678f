//! Specifier-to-location resolution through the workspace lockfile.
//!
//! After the workspace install, `pnpm-lock.yaml` records every direct
//! dependency of the workspace together with the specifier it was requested
//! with. Each install target is matched back to a dependency name, which
//! gives its directory under `node_modules`.
//!
//! Both lockfile layouts are understood: v6+ (`importers` or top-level
//! `dependencies` with `{specifier, version}` entries) and v5 (a separate
//! `specifiers` map next to plain version strings).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::RelayError;
use crate::install::InstallTarget;
use crate::provider::ProviderRecord;
use crate::workspace::{Workspace, normalize};

#[derive(Debug, Default, Deserialize)]
struct LockfileDoc {
    #[serde(default)]
    importers: BTreeMap<String, ImporterDoc>,
    #[serde(flatten)]
    root: ImporterDoc,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImporterDoc {
    #[serde(default)]
    specifiers: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, DependencyDoc>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, DependencyDoc>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, DependencyDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependencyDoc {
    Detailed {
        specifier: String,
        #[serde(default)]
        version: String,
    },
    Version(String),
}

/// A direct dependency of the workspace as recorded in the lockfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedDependency {
    pub name: String,
    pub specifier: Option<String>,
    pub version: String,
}

/// Parsed lockfile, anchored at the workspace root for `file:` paths.
#[derive(Debug, Clone)]
pub struct Lockfile {
    root: PathBuf,
    dependencies: Vec<LockedDependency>,
}

/// An installed provider with its on-disk location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub record: ProviderRecord,
    pub install_target: String,
    pub package_name: String,
    pub directory: PathBuf,
}

impl Lockfile {
    pub async fn load(workspace: &Workspace) -> crate::Result<Self> {
        let path = workspace.lockfile();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| RelayError::Lockfile(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content, workspace.root())
    }

    pub fn parse(yaml: &str, root: &Path) -> crate::Result<Self> {
        let mut doc: LockfileDoc = serde_yaml::from_str(yaml)
            .map_err(|e| RelayError::Lockfile(format!("invalid pnpm-lock.yaml: {}", e)))?;

        let importer = doc.importers.remove(".").unwrap_or(doc.root);

        let ImporterDoc {
            specifiers,
            dependencies,
            optional_dependencies,
            dev_dependencies,
        } = importer;

        let dependencies = dependencies
            .into_iter()
            .chain(optional_dependencies)
            .chain(dev_dependencies)
            .map(|(name, entry)| {
                let (specifier, version) = match entry {
                    DependencyDoc::Detailed { specifier, version } => (Some(specifier), version),
                    DependencyDoc::Version(version) => (specifiers.get(&name).cloned(), version),
                };
                LockedDependency {
                    name,
                    specifier,
                    version,
                }
            })
            .collect();

        Ok(Self {
            root: root.to_path_buf(),
            dependencies,
        })
    }

    pub fn dependencies(&self) -> &[LockedDependency] {
        &self.dependencies
    }

    /// Package name installed for an install target, if any.
    ///
    /// Tried in order: exact specifier match, same local path for
    /// `file:`/`link:` targets, then the package name parsed from the target.
    pub fn package_name_for(&self, target: &str) -> Option<&str> {
        if let Some(dep) = self
            .dependencies
            .iter()
            .find(|d| d.specifier.as_deref() == Some(target))
        {
            return Some(dep.name.as_str());
        }

        if let Some(target_path) = local_path(target) {
            let target_path = normalize(&self.root.join(target_path));
            let found = self.dependencies.iter().find(|d| {
                d.specifier
                    .as_deref()
                    .and_then(local_path)
                    .is_some_and(|p| normalize(&self.root.join(p)) == target_path)
            });
            return found.map(|d| d.name.as_str());
        }

        let name = package_name_of(target)?;
        self.dependencies
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.name.as_str())
    }

    /// Resolve every target, preserving order. Fails on the first miss.
    pub fn resolve(
        &self,
        targets: Vec<InstallTarget>,
        workspace: &Workspace,
    ) -> crate::Result<Vec<ResolvedProvider>> {
        targets
            .into_iter()
            .map(|target| {
                let package_name = self
                    .package_name_for(&target.target)
                    .ok_or_else(|| RelayError::UnresolvedSpecifier(target.target.clone()))?
                    .to_string();
                let directory = workspace.package_dir(&package_name);
                tracing::debug!(
                    provider = %target.record.specifier,
                    package = %package_name,
                    directory = %directory.display(),
                    "resolved provider location"
                );
                Ok(ResolvedProvider {
                    record: target.record,
                    install_target: target.target,
                    package_name,
                    directory,
                })
            })
            .collect()
    }
}

/// Resolve install targets to installed directories. The lockfile is only
/// read when there is something to resolve.
pub async fn resolve_providers(
    targets: Vec<InstallTarget>,
    workspace: &Workspace,
) -> crate::Result<Vec<ResolvedProvider>> {
    if targets.is_empty() {
        return Ok(Vec::new());
    }
    let lockfile = Lockfile::load(workspace).await?;
    lockfile.resolve(targets, workspace)
}

/// Package name from a registry specifier: `name`, `name@range`,
/// `@scope/name` or `@scope/name@range`. None for protocol specifiers
/// (`file:`, `npm:`, URLs).
pub fn package_name_of(target: &str) -> Option<&str> {
    if target.contains(':') {
        return None;
    }
    let offset = usize::from(target.starts_with('@'));
    let name = match target[offset..].find('@') {
        Some(at) => &target[..offset + at],
        None => target,
    };
    (!name.is_empty() && name != "@").then_some(name)
}

fn local_path(specifier: &str) -> Option<&str> {
    specifier
        .strip_prefix("file:")
        .or_else(|| specifier.strip_prefix("link:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK_V9: &str = r#"
lockfileVersion: '9.0'

settings:
  autoInstallPeers: true

importers:
  .:
    dependencies:
      left-pad:
        specifier: ^1.3.0
        version: 1.3.0
      '@scope/server':
        specifier: 2.1.0
        version: 2.1.0
      tool:
        specifier: file:packages/tool
        version: file:packages/tool

packages:
  left-pad@1.3.0:
    resolution: {integrity: sha512-abc}
"#;

    const LOCK_V5: &str = r#"
lockfileVersion: 5.4

specifiers:
  left-pad: ^1.3.0
  tool: file:packages/tool

dependencies:
  left-pad: 1.3.0
  tool: file:packages/tool
"#;

    const LOCK_V6_FLAT: &str = r#"
lockfileVersion: '6.0'

dependencies:
  left-pad:
    specifier: ^1.3.0
    version: 1.3.0
"#;

    fn target(specifier: &str, install: &str) -> InstallTarget {
        InstallTarget {
            record: ProviderRecord::new(specifier),
            target: install.to_string(),
        }
    }

    #[test]
    fn test_package_name_of() {
        assert_eq!(package_name_of("left-pad"), Some("left-pad"));
        assert_eq!(package_name_of("left-pad@1.3.0"), Some("left-pad"));
        assert_eq!(package_name_of("@scope/server"), Some("@scope/server"));
        assert_eq!(package_name_of("@scope/server@^2"), Some("@scope/server"));
        assert_eq!(package_name_of("file:/w/packages/tool"), None);
        assert_eq!(package_name_of("@"), None);
    }

    #[test]
    fn test_parse_v9_importers() {
        let lock = Lockfile::parse(LOCK_V9, Path::new("/w")).unwrap();
        assert_eq!(lock.dependencies().len(), 3);
        assert_eq!(lock.package_name_for("left-pad"), Some("left-pad"));
        assert_eq!(lock.package_name_for("left-pad@^1.3.0"), Some("left-pad"));
        assert_eq!(lock.package_name_for("@scope/server@2.1.0"), Some("@scope/server"));
        assert_eq!(lock.package_name_for("file:/w/packages/tool"), Some("tool"));
        assert_eq!(lock.package_name_for("file:packages/tool"), Some("tool"));
    }

    #[test]
    fn test_parse_v5_specifiers_map() {
        let lock = Lockfile::parse(LOCK_V5, Path::new("/w")).unwrap();
        assert_eq!(lock.package_name_for("left-pad"), Some("left-pad"));
        assert_eq!(lock.package_name_for("file:/w/./packages/x/../tool"), Some("tool"));
    }

    #[test]
    fn test_parse_v6_flat() {
        let lock = Lockfile::parse(LOCK_V6_FLAT, Path::new("/w")).unwrap();
        assert_eq!(lock.package_name_for("left-pad"), Some("left-pad"));
    }

    #[test]
    fn test_unknown_targets_miss() {
        let lock = Lockfile::parse(LOCK_V9, Path::new("/w")).unwrap();
        assert_eq!(lock.package_name_for("right-pad"), None);
        assert_eq!(lock.package_name_for("file:/w/packages/other"), None);
    }

    #[test]
    fn test_invalid_yaml() {
        let result = Lockfile::parse("importers: [unclosed", Path::new("/w"));
        assert!(matches!(result, Err(RelayError::Lockfile(_))));
    }

    #[tokio::test]
    async fn test_resolve_preserves_order_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::prepare(&dir.path().join("app")).await.unwrap();
        let lock = Lockfile::parse(LOCK_V9, workspace.root()).unwrap();
        let tool_target = format!("file:{}", workspace.checkout_dir("tool").display());

        let resolved = lock
            .resolve(
                vec![
                    target("left-pad", "left-pad"),
                    target("github:org/tool", &tool_target),
                ],
                &workspace,
            )
            .unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].record.specifier, "left-pad");
        assert_eq!(resolved[0].directory, workspace.package_dir("left-pad"));
        assert_eq!(resolved[1].record.specifier, "github:org/tool");
        assert_eq!(resolved[1].package_name, "tool");
        assert_eq!(resolved[1].install_target, tool_target);
    }

    #[tokio::test]
    async fn test_resolve_fails_fast_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::prepare(&dir.path().join("app")).await.unwrap();
        let lock = Lockfile::parse(LOCK_V9, workspace.root()).unwrap();
        let result = lock.resolve(
            vec![target("left-pad", "left-pad"), target("nope", "nope")],
            &workspace,
        );
        assert!(matches!(result, Err(RelayError::UnresolvedSpecifier(s)) if s == "nope"));
    }

    #[tokio::test]
    async fn test_resolve_providers_empty_skips_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::prepare(&dir.path().join("app")).await.unwrap();
        // No lockfile on disk: must not be read for an empty target list.
        let resolved = resolve_providers(Vec::new(), &workspace).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_providers_missing_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::prepare(&dir.path().join("app")).await.unwrap();
        let result = resolve_providers(vec![target("left-pad", "left-pad")], &workspace).await;
        assert!(matches!(result, Err(RelayError::Lockfile(_))));
    }
}
