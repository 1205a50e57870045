use std::fmt;

use serde::{Deserialize, Serialize};

/// How a mutation must reach this node's replica set before the local
/// write is considered successful.
///
/// The source of a mode is always configuration deserialized at load
/// time; anything other than `none`/`async`/`sync` fails there, so an
/// unrecognized mode is unrepresentable past startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// No replication: the mutation stays local.
    #[default]
    None,
    /// Replicate in the background; failures fall back to the durable
    /// per-node retry queue and never fail the client operation.
    Async,
    /// Every replica must acknowledge before the local write proceeds;
    /// any failure rolls back already-written replicas.
    Sync,
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationMode::None => write!(f, "none"),
            ReplicationMode::Async => write!(f, "async"),
            ReplicationMode::Sync => write!(f, "sync"),
        }
    }
}
