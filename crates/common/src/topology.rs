use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Numeric identity of a mesh participant.
pub type NodeId = u32;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("own node id {0} is not present in the node list")]
    OwnNodeMissing(NodeId),
    #[error("duplicate node id {0} in the node list")]
    DuplicateNode(NodeId),
    #[error("replica id {0} does not resolve to a known node")]
    UnknownReplica(NodeId),
    #[error("node {0} lists itself as its own replica")]
    SelfReplica(NodeId),
}

/// HTTP endpoint of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
}

impl HttpEndpoint {
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Optional raw TCP endpoint with mutual-TLS parameters.
///
/// Not every node exposes one; the REST endpoint is the only
/// channel the core requires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TcpEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub mutual_tls: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_io_timeout() -> u64 {
    60
}

/// Identity of a mesh participant. Immutable after load; shared as
/// `Arc<Node>` across all components of a node. No node ever mutates
/// another node's record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub http: HttpEndpoint,
    #[serde(default)]
    pub tcp: Option<TcpEndpoint>,
    /// Ids of the nodes that replicate this node's data. Used to pick
    /// read fan-out candidates when proxying to a remote owner.
    #[serde(default)]
    pub replicas: Vec<NodeId>,
}

impl Node {
    pub fn base_url(&self) -> String {
        self.http.base_url()
    }
}

/// This node's view of the mesh: its own id, every known node, and the
/// ids of the nodes that replicate its data.
///
/// Loaded once at startup and treated as read-only process-wide state,
/// so lookups need no locking.
#[derive(Debug, Clone)]
pub struct Topology {
    own_id: NodeId,
    nodes: Vec<Arc<Node>>,
    replica_ids: Vec<NodeId>,
}

impl Topology {
    /// Build a topology, validating the structural invariants: the own
    /// node id must appear in the node list, node ids must be unique,
    /// and every replica id must resolve to a known node other than
    /// ourselves.
    pub fn new(
        own_id: NodeId,
        nodes: Vec<Node>,
        replica_ids: Vec<NodeId>,
    ) -> Result<Self, TopologyError> {
        let nodes: Vec<Arc<Node>> = nodes.into_iter().map(Arc::new).collect();

        for (i, node) in nodes.iter().enumerate() {
            if nodes[..i].iter().any(|n| n.id == node.id) {
                return Err(TopologyError::DuplicateNode(node.id));
            }
        }
        if !nodes.iter().any(|n| n.id == own_id) {
            return Err(TopologyError::OwnNodeMissing(own_id));
        }
        for id in &replica_ids {
            if *id == own_id {
                return Err(TopologyError::SelfReplica(*id));
            }
            if !nodes.iter().any(|n| n.id == *id) {
                return Err(TopologyError::UnknownReplica(*id));
            }
        }

        Ok(Self {
            own_id,
            nodes,
            replica_ids,
        })
    }

    /* Getters */

    pub fn own_id(&self) -> NodeId {
        self.own_id
    }

    pub fn own_node(&self) -> Arc<Node> {
        // validated in new()
        self.node(self.own_id).unwrap()
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| n.id == id).cloned()
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn is_own(&self, id: NodeId) -> bool {
        self.own_id == id
    }

    /// The replica set of this node, in configured order. Sync
    /// replication walks this order and the snapshot taken at write
    /// time preserves it.
    pub fn replicas(&self) -> Vec<Arc<Node>> {
        self.replica_ids
            .iter()
            .filter_map(|id| self.node(*id))
            .collect()
    }

    /// The nodes worth trying for a read of data owned by `owner`: the
    /// owner itself first, then the nodes that replicate it.
    pub fn read_candidates(&self, owner: &Arc<Node>) -> Vec<Arc<Node>> {
        let mut candidates = vec![owner.clone()];
        for id in &owner.replicas {
            if let Some(node) = self.node(*id) {
                if node.id != owner.id {
                    candidates.push(node);
                }
            }
        }
        candidates
    }
}
