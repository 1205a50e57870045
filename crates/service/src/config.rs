//! Node configuration, loaded once at startup.
//!
//! Everything enum-shaped (replication mode, forwarding policies) is
//! validated by serde here: a config with an unrecognized mode fails
//! the load and the process never starts with undefined durability
//! guarantees.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use uuid::Uuid;

use common::obj::ReplicationMode;
use common::topology::{Node, NodeId, Topology, TopologyError};

use crate::bunker::BunkerEndpoint;
use crate::ownership::ForwardingConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A user's static node assignment: which node owns their data, and
/// whether they run in gateway (raw passthrough) mode.
#[derive(Debug, Clone, Deserialize)]
pub struct UserAssignment {
    pub id: Uuid,
    pub node: NodeId,
    #[serde(default)]
    pub gateway: bool,
}

#[derive(Debug, Deserialize)]
pub struct CoreConfig {
    /// This node's id; must appear in `nodes`.
    pub node_id: NodeId,
    pub nodes: Vec<Node>,
    /// Ids of the nodes replicating this node, in delivery order.
    #[serde(default)]
    pub replicas: Vec<NodeId>,
    #[serde(default)]
    pub replication_mode: ReplicationMode,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    pub storage_root: PathBuf,
    pub mailbox_root: PathBuf,
    /// Admin key sent as `x-api-key` on peer REST calls.
    pub admin_api_key: String,
    #[serde(default = "default_max_object_bytes")]
    pub max_object_bytes: usize,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Bytes-per-second floor for scaling peer call timeouts by
    /// payload size.
    #[serde(default = "default_peer_throughput_floor")]
    pub peer_throughput_floor: u64,
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    #[serde(default)]
    pub bunkers: Vec<BunkerEndpoint>,
    #[serde(default)]
    pub users: Vec<UserAssignment>,
}

fn default_max_object_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_peer_timeout_secs() -> u64 {
    15
}

fn default_peer_throughput_floor() -> u64 {
    1024 * 1024
}

fn default_drain_interval_secs() -> u64 {
    30
}

impl CoreConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn topology(&self) -> Result<Topology, TopologyError> {
        Topology::new(self.node_id, self.nodes.clone(), self.replicas.clone())
    }

    pub fn assignments(&self) -> HashMap<Uuid, UserAssignment> {
        self.users
            .iter()
            .map(|u| (u.id, u.clone()))
            .collect()
    }
}
