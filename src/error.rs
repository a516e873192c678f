//! Error types for relay startup and request routing.

use thiserror::Error;

use crate::process::Step;
use crate::server::health::AdapterState;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Invalid configuration or settings for a named subject
    #[error("invalid config for '{0}': {1}")]
    InvalidConfig(String, String),

    /// The same specifier appears twice in the provider list
    #[error("duplicate provider specifier: {0}")]
    DuplicateProvider(String),

    /// A subprocess could not be started at all (missing executable, bad cwd)
    #[error("failed to spawn {1} for '{0}': {2}")]
    SpawnFailed(String, Step, String),

    /// A subprocess ran but exited unsuccessfully. `None` means killed by a signal.
    #[error("{1} failed for '{0}' with exit code {code}", code = display_code(.2))]
    StepFailed(String, Step, Option<i32>),

    /// The lockfile has no entry for an install target
    #[error("package specifier not found in lockfile: {0}")]
    UnresolvedSpecifier(String),

    /// The lockfile could not be read or parsed
    #[error("lockfile error: {0}")]
    Lockfile(String),

    /// Workspace directory setup failed
    #[error("workspace error at '{0}': {1}")]
    Workspace(String, String),

    /// A route with this reference is already registered
    #[error("route already registered: {0}")]
    DuplicateRoute(String),

    /// Request addressed a reference with no registered route
    #[error("no route for provider reference '{0}'")]
    RouteNotFound(String),

    /// Route exists but its adapter is not accepting traffic
    #[error("provider '{0}' is unavailable ({1})")]
    Unavailable(String, AdapterState),

    /// Forwarding to the adapter's internal port failed
    #[error("upstream error for provider '{0}': {1}")]
    Upstream(String, String),

    /// Inbound request body could not be read
    #[error("invalid request body: {0}")]
    RequestBody(String),

    /// The front-door listener failed
    #[error("front door error: {0}")]
    Serve(String),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
