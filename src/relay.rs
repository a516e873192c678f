//! The relay: the single public entry point for a run.
//!
//! Drives the phases in order: validate and prepare the workspace, materialize
//! repository providers, install everything in one batch, resolve install
//! directories, supervise one adapter per provider, then serve the front door.
//! A failure in any phase before serving ends the run; adapters that were
//! already spawned are stopped.

use std::fmt;

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{RelayConfig, RelaySettings};
use crate::error::RelayError;
use crate::install::{install_targets, install_workspace};
use crate::lockfile::{ResolvedProvider, resolve_providers};
use crate::materialize::materialize_all;
use crate::provider::{Classified, classify};
use crate::routing::RoutingTable;
use crate::server::AdapterHandle;
use crate::server::proxy::FrontDoor;
use crate::supervisor::supervise;
use crate::workspace::Workspace;

/// Where a run currently is. Each phase starts only after the previous one
/// has fully settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayPhase {
    Initializing,
    Materializing,
    Installing,
    Resolving,
    Supervising,
    Serving,
    Failed,
}

impl fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayPhase::Initializing => "initializing",
            RelayPhase::Materializing => "materializing",
            RelayPhase::Installing => "installing",
            RelayPhase::Resolving => "resolving",
            RelayPhase::Supervising => "supervising",
            RelayPhase::Serving => "serving",
            RelayPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(phase_tx: &watch::Sender<RelayPhase>, phase: RelayPhase) {
    tracing::info!(phase = %phase, "relay phase");
    phase_tx.send_replace(phase);
}

/// A bootstrapped relay: providers installed, adapters supervised, routes
/// registered. Call [`Relay::serve`] to start accepting requests.
pub struct Relay {
    settings: RelaySettings,
    workspace: Workspace,
    providers: Vec<ResolvedProvider>,
    adapters: Vec<AdapterHandle>,
    routes: RoutingTable,
    phase_tx: watch::Sender<RelayPhase>,
    /// Cancelling this stops every adapter and the front door.
    cancel: CancellationToken,
}

impl Relay {
    /// Run every phase up to and including supervision.
    ///
    /// The relay's own token is a child of `cancel`, so cancelling the parent
    /// shuts the relay down.
    pub async fn bootstrap(
        config: RelayConfig,
        settings: RelaySettings,
        cancel: &CancellationToken,
    ) -> crate::Result<Self> {
        let (phase_tx, _) = watch::channel(RelayPhase::Initializing);
        Self::bootstrap_observed(config, settings, cancel, phase_tx).await
    }

    /// Like [`Relay::bootstrap`], publishing phase changes on `phase_tx`,
    /// including the final `Failed` when bootstrap errors.
    pub async fn bootstrap_observed(
        config: RelayConfig,
        settings: RelaySettings,
        cancel: &CancellationToken,
        phase_tx: watch::Sender<RelayPhase>,
    ) -> crate::Result<Self> {
        let cancel = cancel.child_token();
        match run_phases(config, &settings, &cancel, &phase_tx).await {
            Ok(supervised) => Ok(Self {
                settings,
                workspace: supervised.workspace,
                providers: supervised.providers,
                adapters: supervised.adapters,
                routes: supervised.routes,
                phase_tx,
                cancel,
            }),
            Err(e) => {
                let phase = *phase_tx.borrow();
                tracing::error!(phase = %phase, error = %e, "relay bootstrap failed");
                enter(&phase_tx, RelayPhase::Failed);
                cancel.cancel();
                Err(e)
            }
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Resolved providers in canonical order.
    pub fn providers(&self) -> &[ResolvedProvider] {
        &self.providers
    }

    /// Adapter handles in canonical order.
    pub fn adapters(&self) -> &[AdapterHandle] {
        &self.adapters
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn phase(&self) -> RelayPhase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RelayPhase> {
        self.phase_tx.subscribe()
    }

    /// The front-door router over this relay's routes.
    pub fn router(&self) -> axum::Router {
        FrontDoor::new(self.routes.clone()).router()
    }

    /// Public URL of every provider, in canonical order.
    pub fn provider_urls(&self, port: u16) -> Vec<String> {
        self.adapters
            .iter()
            .map(|adapter| format!("http://localhost:{}/{}", port, adapter.reference))
            .collect()
    }

    /// Serve the front door on `listener` until the relay is shut down.
    pub async fn serve(&self, listener: TcpListener) -> crate::Result<()> {
        enter(&self.phase_tx, RelayPhase::Serving);
        let shutdown = self.cancel.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| RelayError::Serve(e.to_string()))?;
        tracing::info!("front door stopped");
        Ok(())
    }

    /// Stop the front door and every adapter.
    pub fn shutdown(&self) {
        tracing::info!(adapters = self.adapters.len(), "relay shutting down");
        self.cancel.cancel();
    }
}

/// Everything the phases up to supervision produce.
struct Supervised {
    workspace: Workspace,
    providers: Vec<ResolvedProvider>,
    adapters: Vec<AdapterHandle>,
    routes: RoutingTable,
}

async fn run_phases(
    config: RelayConfig,
    settings: &RelaySettings,
    cancel: &CancellationToken,
    phase_tx: &watch::Sender<RelayPhase>,
) -> crate::Result<Supervised> {
    enter(phase_tx, RelayPhase::Initializing);
    config.validate()?;
    let records = config.providers();
    settings.validate(records.len())?;
    let workspace = Workspace::prepare(&settings.workspace_root).await?;

    let Classified {
        registry,
        repository,
    } = classify(records);
    tracing::info!(
        registry = registry.len(),
        repository = repository.len(),
        "providers classified"
    );

    enter(phase_tx, RelayPhase::Materializing);
    let materialized = materialize_all(repository, &workspace, settings).await?;

    enter(phase_tx, RelayPhase::Installing);
    let targets = install_targets(registry, materialized);
    install_workspace(&targets, &workspace, settings).await?;

    enter(phase_tx, RelayPhase::Resolving);
    let providers = resolve_providers(targets, &workspace).await?;

    enter(phase_tx, RelayPhase::Supervising);
    let routes = RoutingTable::new();
    let adapters = supervise(&providers, settings, &routes, cancel).await?;

    Ok(Supervised {
        workspace,
        providers,
        adapters,
        routes,
    })
}
