//! The routing table: provider reference -> adapter port.
//!
//! Entries are added while adapters come up and never removed. Requests read
//! the table concurrently with registration, so it sits behind an `RwLock`
//! and is cheap to clone into the request handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use crate::error::RelayError;
use crate::server::health::AdapterState;

/// Path on the adapter that every forwarded request targets.
pub const UPSTREAM_PATH: &str = "/sse";

/// One routable provider.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub reference: String,
    pub specifier: String,
    pub port: u16,
    state: watch::Receiver<AdapterState>,
}

impl RouteEntry {
    pub fn new(
        reference: impl Into<String>,
        specifier: impl Into<String>,
        port: u16,
        state: watch::Receiver<AdapterState>,
    ) -> Self {
        Self {
            reference: reference.into(),
            specifier: specifier.into(),
            port,
            state,
        }
    }

    /// Current adapter state.
    pub fn state(&self) -> AdapterState {
        *self.state.borrow()
    }

    /// Where requests for this provider are sent.
    pub fn upstream_url(&self) -> String {
        format!("http://localhost:{}{}", self.port, UPSTREAM_PATH)
    }
}

#[derive(Debug, Default)]
struct Routes {
    by_reference: HashMap<String, usize>,
    entries: Vec<RouteEntry>,
}

/// Shared, append-only route registry.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    inner: Arc<RwLock<Routes>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. A reference can only be registered once.
    pub fn register(&self, entry: RouteEntry) -> crate::Result<()> {
        let mut routes = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if routes.by_reference.contains_key(&entry.reference) {
            return Err(RelayError::DuplicateRoute(entry.reference));
        }
        tracing::info!(
            reference = %entry.reference,
            port = entry.port,
            state = %entry.state(),
            "route registered"
        );
        let index = routes.entries.len();
        routes.by_reference.insert(entry.reference.clone(), index);
        routes.entries.push(entry);
        Ok(())
    }

    pub fn lookup(&self, reference: &str) -> Option<RouteEntry> {
        let routes = self.inner.read().unwrap_or_else(|e| e.into_inner());
        routes
            .by_reference
            .get(reference)
            .map(|&index| routes.entries[index].clone())
    }

    /// All routes in registration order.
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clone()
    }

    pub fn references(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.reference).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
