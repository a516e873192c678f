//! Provider supervision: one adapter per resolved provider, one route each.
//!
//! Ports are assigned by canonical index. Every adapter is spawned up front;
//! each route is registered as soon as that adapter settles, so the phase
//! ends once every provider has a route.

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::config::RelaySettings;
use crate::error::RelayError;
use crate::lockfile::ResolvedProvider;
use crate::routing::RoutingTable;
use crate::server::AdapterHandle;
use crate::server::adapter::spawn_adapter;

/// Spawn adapters for all providers and register their routes.
///
/// Returns handles in canonical order. A spawn failure aborts the phase;
/// adapters already spawned stop when `cancel` fires.
pub async fn supervise(
    providers: &[ResolvedProvider],
    settings: &RelaySettings,
    routes: &RoutingTable,
    cancel: &CancellationToken,
) -> crate::Result<Vec<AdapterHandle>> {
    let handles = providers
        .iter()
        .enumerate()
        .map(|(index, provider)| {
            let port = settings.internal_port(index).ok_or_else(|| {
                RelayError::InvalidConfig(
                    provider.record.specifier.clone(),
                    format!("no internal port left for provider #{}", index),
                )
            })?;
            spawn_adapter(provider, port, settings, cancel.child_token())
        })
        .collect::<crate::Result<Vec<_>>>()?;

    try_join_all(handles.iter().map(|handle| async move {
        let state = handle.wait_settled().await;
        tracing::debug!(provider = %handle.specifier, state = %state, "adapter settled");
        routes.register(handle.route())
    }))
    .await?;

    let ready = handles.iter().filter(|h| h.state().accepts_traffic()).count();
    if ready < handles.len() {
        tracing::warn!(
            ready = ready,
            total = handles.len(),
            "some adapters are not accepting traffic"
        );
    } else {
        tracing::info!(adapters = handles.len(), "all adapters ready");
    }

    Ok(handles)
}
