//! Ownership-aware routing, replication, and concurrency control for a
//! storage mesh node.
//!
//! This crate is the request-path core sitting between an external HTTP
//! layer and the node's collaborators (object store, permission
//! service, codecs). It decides, per request:
//! - which node owns the data, and how to forward when it isn't us
//!   (proxy, redirect, or refuse)
//! - how the mutation replicates (none, fire-and-forget async with a
//!   durable mailbox fallback, or sequential sync with compensation)
//! - which resources are locked while the mutation runs
//!
//! Assemble a node with [`state::Core::from_config`] and call the verb
//! methods on [`state::Core`]; everything network-shaped goes through
//! the [`peer::PeerTransport`] seam.

pub mod bunker;
pub mod config;
pub mod error;
pub mod externals;
pub mod handlers;
pub mod locks;
pub mod mailbox;
pub mod ownership;
pub mod peer;
pub mod replication;
pub mod state;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

// Re-export key types for convenience
pub use config::{ConfigError, CoreConfig};
pub use error::OpError;
pub use handlers::{respond, ApiResponse, RequestContext};
pub use state::{default_transport, Collaborators, Core, CoreSetupError};
