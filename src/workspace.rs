//! The per-run staging directory the providers are installed into.
//!
//! Layout:
//! ```text
//! <root>/package.json          empty manifest, `{}`
//! <root>/packages/<repo>/      one checkout per repository-sourced provider
//! <root>/node_modules/<name>/  installed providers
//! <root>/pnpm-lock.yaml        written by the workspace install
//! ```
//! The tree is wiped and recreated at the start of every run.

use std::path::{Component, Path, PathBuf};

use crate::error::RelayError;

pub const MANIFEST_FILE: &str = "package.json";
pub const LOCKFILE_FILE: &str = "pnpm-lock.yaml";
const PACKAGES_DIR: &str = "packages";
const MODULES_DIR: &str = "node_modules";

/// Absolute, lexically normalized form of a workspace root. Install targets
/// and lockfile paths are built from it, so they never depend on the
/// directory a step runs in.
pub fn absolute_root(root: &Path) -> crate::Result<PathBuf> {
    let absolute = std::path::absolute(root)
        .map_err(|e| RelayError::Workspace(root.display().to_string(), e.to_string()))?;
    Ok(normalize(&absolute))
}

/// Lexical normalization: drops `.` and folds `..`, no filesystem access.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Paths of a prepared workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Destroy anything at `root` and lay out a fresh, empty workspace.
    pub async fn prepare(root: &Path) -> crate::Result<Self> {
        let root = absolute_root(root)?;
        let workspace = Self { root: root.clone() };

        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                tracing::debug!(path = %root.display(), "removed previous workspace");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(workspace.error(&root, e)),
        }

        tokio::fs::create_dir_all(workspace.packages_dir())
            .await
            .map_err(|e| workspace.error(&workspace.packages_dir(), e))?;
        tokio::fs::write(workspace.manifest(), "{}")
            .await
            .map_err(|e| workspace.error(&workspace.manifest(), e))?;

        tracing::info!(path = %root.display(), "workspace prepared");
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join(PACKAGES_DIR)
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn lockfile(&self) -> PathBuf {
        self.root.join(LOCKFILE_FILE)
    }

    /// Checkout directory for a repository-sourced provider.
    pub fn checkout_dir(&self, name: &str) -> PathBuf {
        self.packages_dir().join(name)
    }

    /// Install directory of an installed package, by package name.
    /// Scoped names (`@scope/name`) map to nested directories.
    pub fn package_dir(&self, package_name: &str) -> PathBuf {
        self.root.join(MODULES_DIR).join(package_name)
    }

    fn error(&self, path: &Path, e: std::io::Error) -> RelayError {
        RelayError::Workspace(path.display().to_string(), e.to_string())
    }
}
