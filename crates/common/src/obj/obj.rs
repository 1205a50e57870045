use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use uuid::Uuid;

use crate::topology::{Node, NodeId, Topology};

use super::mode::ReplicationMode;
use super::path::ContainerPath;

#[derive(Debug, thiserror::Error)]
pub enum ObjError {
    #[error("wire obj references unknown node id {0}")]
    UnknownNode(NodeId),
}

/// A resolved object or container reference.
///
/// Constructed per-request from the incoming path plus ownership and
/// placement computation, threaded through the pipeline, and discarded
/// once the response is built. The durable on-disk representation is
/// the store adapter's concern, not this type's.
///
/// The replica set is snapshotted onto the obj at write time so that a
/// later compensating delete targets exactly the nodes that were
/// actually attempted, even if the topology view changes meanwhile.
#[derive(Debug, Clone)]
pub struct Obj {
    pub user: Uuid,
    pub container: ContainerPath,
    /// Empty for a container.
    pub key: String,
    pub primary: Arc<Node>,
    pub disk_path: PathBuf,
    pub replicas: Vec<Arc<Node>>,
    pub mode: ReplicationMode,
    /// Absent for containers.
    pub data: Option<Bytes>,
    pub compressed: bool,
    pub encrypted: bool,
}

impl Obj {
    pub fn is_container(&self) -> bool {
        self.key.is_empty()
    }

    /// Canonical `user/container/key` path, used in response URLs and
    /// as the lock key for single-resource operations.
    pub fn url_path(&self) -> String {
        let mut parts = vec![self.user.to_string()];
        if !self.container.is_root() {
            parts.push(self.container.to_string());
        }
        if !self.key.is_empty() {
            parts.push(self.key.clone());
        }
        parts.join("/")
    }

    /// Where this node would store the object, under `root`.
    pub fn disk_path_under(root: &Path, user: &Uuid, container: &ContainerPath, key: &str) -> PathBuf {
        let mut path = root.join(user.to_string());
        for segment in container.segments() {
            path.push(segment);
        }
        if !key.is_empty() {
            path.push(key);
        }
        path
    }

    pub fn to_wire(&self) -> ObjWire {
        ObjWire {
            user: self.user,
            container: self.container.clone(),
            key: self.key.clone(),
            primary: self.primary.id,
            replicas: self.replicas.iter().map(|n| n.id).collect(),
            mode: self.mode,
            data: self.data.as_ref().map(|b| b.to_vec()),
            compressed: self.compressed,
            encrypted: self.encrypted,
        }
    }

    /// Rebuild an obj from its wire form against the local topology and
    /// storage root. Node ids are re-resolved on the receiving side so
    /// an obj never carries another node's endpoint table.
    pub fn from_wire(wire: ObjWire, topology: &Topology, root: &Path) -> Result<Self, ObjError> {
        let primary = topology
            .node(wire.primary)
            .ok_or(ObjError::UnknownNode(wire.primary))?;
        let mut replicas = Vec::with_capacity(wire.replicas.len());
        for id in &wire.replicas {
            replicas.push(topology.node(*id).ok_or(ObjError::UnknownNode(*id))?);
        }
        let disk_path = Self::disk_path_under(root, &wire.user, &wire.container, &wire.key);
        Ok(Self {
            user: wire.user,
            container: wire.container,
            key: wire.key,
            primary,
            disk_path,
            replicas,
            mode: wire.mode,
            data: wire.data.map(Bytes::from),
            compressed: wire.compressed,
            encrypted: wire.encrypted,
        })
    }
}

/// JSON body mirror of [`Obj`] for peer REST calls. Nodes collapse to
/// their ids; payload bytes travel base64-encoded.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjWire {
    pub user: Uuid,
    pub container: ContainerPath,
    pub key: String,
    pub primary: NodeId,
    pub replicas: Vec<NodeId>,
    pub mode: ReplicationMode,
    #[serde_as(as = "Option<Base64>")]
    pub data: Option<Vec<u8>>,
    pub compressed: bool,
    pub encrypted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::HttpEndpoint;

    fn topology() -> Topology {
        let nodes = (1..=3)
            .map(|id| Node {
                id,
                name: format!("node-{id}"),
                http: HttpEndpoint {
                    host: "localhost".into(),
                    port: 9000 + id as u16,
                    tls: false,
                },
                tcp: None,
                replicas: vec![],
            })
            .collect();
        Topology::new(1, nodes, vec![2, 3]).unwrap()
    }

    #[test]
    fn url_path_skips_empty_parts() {
        let topo = topology();
        let user = Uuid::nil();
        let obj = Obj {
            user,
            container: ContainerPath::root(),
            key: String::new(),
            primary: topo.own_node(),
            disk_path: PathBuf::new(),
            replicas: vec![],
            mode: ReplicationMode::None,
            data: None,
            compressed: false,
            encrypted: false,
        };
        assert_eq!(obj.url_path(), user.to_string());
    }

    #[test]
    fn wire_round_trip_re_resolves_nodes() {
        let topo = topology();
        let user = Uuid::new_v4();
        let obj = Obj {
            user,
            container: ContainerPath::parse("docs"),
            key: "report.pdf".into(),
            primary: topo.node(2).unwrap(),
            disk_path: PathBuf::from("/tmp/ignored"),
            replicas: topo.replicas(),
            mode: ReplicationMode::Sync,
            data: Some(Bytes::from_static(b"payload")),
            compressed: true,
            encrypted: false,
        };

        let json = serde_json::to_string(&obj.to_wire()).unwrap();
        let wire: ObjWire = serde_json::from_str(&json).unwrap();
        let back = Obj::from_wire(wire, &topo, Path::new("/data")).unwrap();

        assert_eq!(back.primary.id, 2);
        assert_eq!(back.replicas.iter().map(|n| n.id).collect::<Vec<_>>(), [2, 3]);
        assert_eq!(back.data.as_deref(), Some(b"payload".as_ref()));
        assert_eq!(
            back.disk_path,
            PathBuf::from(format!("/data/{user}/docs/report.pdf"))
        );
    }
}
