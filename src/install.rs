//! Workspace install: one batched package-manager install over every
//! provider, in canonical order.

use crate::config::RelaySettings;
use crate::materialize::MaterializedPackage;
use crate::process::{Step, StepCommand};
use crate::provider::ProviderRecord;
use crate::workspace::Workspace;

/// Subject used in logs and errors for the workspace-wide install.
pub const WORKSPACE_SUBJECT: &str = "workspace";

/// A provider paired with what the package manager is asked to install for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub record: ProviderRecord,
    pub target: String,
}

/// Canonical install list: registry specifiers verbatim, then materialized
/// repositories as `file:` targets.
pub fn install_targets(
    registry: Vec<ProviderRecord>,
    materialized: Vec<MaterializedPackage>,
) -> Vec<InstallTarget> {
    registry
        .into_iter()
        .map(|record| InstallTarget {
            target: record.specifier.clone(),
            record,
        })
        .chain(materialized.into_iter().map(|package| InstallTarget {
            record: package.record,
            target: package.install_target,
        }))
        .collect()
}

/// Build the install command without running it.
pub fn install_command(
    targets: &[InstallTarget],
    workspace: &Workspace,
    settings: &RelaySettings,
) -> StepCommand {
    StepCommand::new(Step::WorkspaceInstall, WORKSPACE_SUBJECT, &settings.pnpm_program)
        .arg("install")
        .args(targets.iter().map(|t| t.target.clone()))
        .cwd(workspace.root())
}

/// Run the batched install. Any failure aborts the whole run.
pub async fn install_workspace(
    targets: &[InstallTarget],
    workspace: &Workspace,
    settings: &RelaySettings,
) -> crate::Result<()> {
    tracing::info!(packages = targets.len(), "installing providers into workspace");
    install_command(targets, workspace, settings).run().await
}
