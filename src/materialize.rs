//! Repository materialization: clone, install and build each
//! repository-sourced provider so the workspace install can take it as a
//! local `file:` target.
//!
//! Providers materialize concurrently; the phase ends when all of them have
//! finished or as soon as one fails.

use std::path::PathBuf;

use futures::future::try_join_all;

use crate::config::{RelaySettings, checkout_name};
use crate::error::RelayError;
use crate::process::{Step, StepCommand};
use crate::provider::{ProviderRecord, repository_path};
use crate::workspace::Workspace;

/// A repository provider after clone + install + build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedPackage {
    pub record: ProviderRecord,
    pub directory: PathBuf,
    /// What the workspace install is given for this provider.
    pub install_target: String,
}

/// Fetch URL for a repository specifier, e.g. `github:org/tool` ->
/// `https://github.com/org/tool`.
pub fn fetch_url(repository_host: &str, specifier: &str) -> crate::Result<String> {
    let path = repository_path(specifier).ok_or_else(|| {
        RelayError::InvalidConfig(
            specifier.to_string(),
            "not a repository specifier".to_string(),
        )
    })?;
    Ok(format!("{}/{}", repository_host.trim_end_matches('/'), path))
}

/// `file:` install target for a local directory.
pub fn file_target(directory: &std::path::Path) -> String {
    format!("file:{}", directory.display())
}

/// Clone, install and build one repository provider.
///
/// Steps run in order and stop at the first failure.
pub async fn materialize_one(
    record: ProviderRecord,
    workspace: &Workspace,
    settings: &RelaySettings,
) -> crate::Result<MaterializedPackage> {
    let url = fetch_url(&settings.repository_host, &record.specifier)?;
    let name = checkout_name(repository_path(&record.specifier).unwrap_or_default()).to_string();
    let directory = workspace.checkout_dir(&name);
    let provider = record.specifier.as_str();

    tracing::info!(provider = %provider, url = %url, "materializing repository provider");

    StepCommand::new(Step::Clone, provider, &settings.git_program)
        .args(["clone", url.as_str(), name.as_str()])
        .cwd(workspace.packages_dir())
        .run()
        .await?;

    StepCommand::new(Step::Install, provider, &settings.pnpm_program)
        .arg("install")
        .cwd(&directory)
        .run()
        .await?;

    StepCommand::new(Step::Build, provider, &settings.pnpm_program)
        .arg("build")
        .cwd(&directory)
        .run()
        .await?;

    let install_target = file_target(&directory);
    tracing::info!(provider = %provider, target = %install_target, "repository provider built");

    Ok(MaterializedPackage {
        record,
        directory,
        install_target,
    })
}

/// Materialize all repository providers concurrently, preserving input order.
pub async fn materialize_all(
    records: Vec<ProviderRecord>,
    workspace: &Workspace,
    settings: &RelaySettings,
) -> crate::Result<Vec<MaterializedPackage>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }
    try_join_all(
        records
            .into_iter()
            .map(|record| materialize_one(record, workspace, settings)),
    )
    .await
}
