//! Adapter processes and the HTTP front door.
//!
//! `adapter` spawns and monitors one stdio-to-socket adapter per provider,
//! `health` holds the readiness state machine, and `proxy` is the public
//! listener that forwards requests to ready adapters.

pub mod adapter;
pub mod health;
pub mod proxy;

use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use crate::routing::RouteEntry;
use crate::server::health::{AdapterState, StderrBuffer};

/// External-facing handle for a supervised adapter.
///
/// The monitor task owns the child process; the handle only observes it.
#[derive(Debug, Clone)]
pub struct AdapterHandle {
    pub reference: String,
    pub specifier: String,
    pub port: u16,
    pub state_rx: watch::Receiver<AdapterState>,
    pub stderr: Arc<Mutex<StderrBuffer>>,
}

impl AdapterHandle {
    /// Returns the current state of the adapter.
    pub fn state(&self) -> AdapterState {
        *self.state_rx.borrow()
    }

    /// Wait until the adapter has left `Starting` and return where it settled.
    pub async fn wait_settled(&self) -> AdapterState {
        let mut rx = self.state_rx.clone();
        let settled = rx.wait_for(|state| state.is_settled()).await.map(|state| *state);
        // Monitor gone: its last published state is final
        settled.unwrap_or_else(|_| *rx.borrow())
    }

    /// Snapshot of the buffered stderr tail.
    pub async fn recent_stderr(&self) -> Vec<String> {
        self.stderr.lock().await.lines().iter().cloned().collect()
    }

    /// Routing entry that follows this adapter's state.
    pub fn route(&self) -> RouteEntry {
        RouteEntry::new(
            self.reference.clone(),
            self.specifier.clone(),
            self.port,
            self.state_rx.clone(),
        )
    }
}
