//! Relay: installs stdio MCP providers into an isolated workspace, bridges
//! each one to a local port through an adapter process, and serves them all
//! behind one HTTP endpoint with path-based reverse proxying.

pub mod config;
pub mod error;
pub mod install;
pub mod lockfile;
pub mod materialize;
pub mod process;
pub mod provider;
pub mod relay;
pub mod routing;
pub mod server;
pub mod supervisor;
pub mod workspace;

pub use config::{RelayConfig, RelaySettings, parse_env_ref, resolve_env_value};
pub use error::{RelayError, Result};
pub use lockfile::ResolvedProvider;
pub use provider::{ProviderRecord, SpecifierKind, classify, provider_reference};
pub use relay::{Relay, RelayPhase};
pub use routing::{RouteEntry, RoutingTable};
pub use server::AdapterHandle;
pub use server::health::AdapterState;
pub use server::proxy::FrontDoor;
