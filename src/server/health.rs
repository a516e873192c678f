//! Adapter readiness state for the relay.
//!
//! An adapter starts in `Starting` and settles exactly once: `Ready` when its
//! internal port accepts connections, `Failed` when it never did within the
//! readiness timeout, or `Exited` when the process ended. A `Ready` adapter
//! that later crashes moves to `Exited`; it is never restarted.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;

/// Delay between readiness probes.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on a single probe connect.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle of one adapter process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterState {
    /// Spawned, port not yet accepting connections
    Starting,
    /// Port accepted a connection; requests are forwarded
    Ready,
    /// Never became ready within the readiness timeout (process killed)
    Failed,
    /// Process exited, before or after becoming ready
    Exited,
}

impl AdapterState {
    /// True once the adapter has left `Starting`.
    pub fn is_settled(self) -> bool {
        self != AdapterState::Starting
    }

    pub fn accepts_traffic(self) -> bool {
        self == AdapterState::Ready
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AdapterState::Starting => "starting",
            AdapterState::Ready => "ready",
            AdapterState::Failed => "failed",
            AdapterState::Exited => "exited",
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single readiness probe: does anything accept TCP connections on
/// `localhost:port`?
pub async fn probe_port(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(("localhost", port))).await,
        Ok(Ok(_))
    )
}

/// Rolling buffer for per-adapter stderr output, for diagnostics.
#[derive(Debug)]
pub struct StderrBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrBuffer {
    /// Create a new stderr buffer with the given line capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
        }
    }

    /// Push a new stderr line, evicting the oldest if at capacity.
    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Read access to buffered stderr lines.
    pub fn lines(&self) -> &VecDeque<String> {
        &self.lines
    }

    /// Buffered lines joined for a log field.
    pub fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}
