//! Core state: wires the topology, lock manager, resolver, engines,
//! and collaborator seams into one handle the operation orchestrators
//! hang off.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use common::obj::{ContainerPath, Obj, ReplicationMode};
use common::topology::{Node, Topology, TopologyError};

use crate::bunker::BunkerEngine;
use crate::config::{CoreConfig, UserAssignment};
use crate::error::OpError;
use crate::externals::{AuditSink, Codec, ObjectStore, PermissionService};
use crate::locks::{LockManager, LockedResource};
use crate::mailbox::{DrainWorker, Mailbox};
use crate::ownership::OwnershipResolver;
use crate::peer::{PeerClient, PeerTransport};
use crate::replication::ReplicationEngine;

#[derive(Debug, thiserror::Error)]
pub enum CoreSetupError {
    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),
    #[error("cannot build peer client: {0}")]
    Transport(#[from] anyhow::Error),
}

/// The external collaborators a node is assembled from. Production
/// bindings live outside this crate; tests use [`crate::testkit`].
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub permissions: Arc<dyn PermissionService>,
    pub audit: Arc<dyn AuditSink>,
    pub compression: Arc<dyn Codec>,
    pub encryption: Arc<dyn Codec>,
    pub transport: Arc<dyn PeerTransport>,
}

/// Build the production reqwest transport from config.
pub fn default_transport(config: &CoreConfig) -> anyhow::Result<Arc<dyn PeerTransport>> {
    let client = PeerClient::new(
        config.admin_api_key.clone(),
        Duration::from_secs(config.peer_timeout_secs),
        config.peer_throughput_floor,
    )?;
    Ok(Arc::new(client))
}

/// One storage node's routing/replication/locking core.
pub struct Core {
    pub(crate) topology: Arc<Topology>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) resolver: OwnershipResolver,
    pub(crate) replication: ReplicationEngine,
    pub(crate) bunker: BunkerEngine,
    pub(crate) mailbox: Arc<Mailbox>,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) permissions: Arc<dyn PermissionService>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) compression: Arc<dyn Codec>,
    pub(crate) encryption: Arc<dyn Codec>,
    transport: Arc<dyn PeerTransport>,
    storage_root: PathBuf,
    pub(crate) replication_mode: ReplicationMode,
    pub(crate) max_object_bytes: usize,
    drain_interval: Duration,
    assignments: HashMap<Uuid, UserAssignment>,
}

impl Core {
    pub fn from_config(
        config: &CoreConfig,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, CoreSetupError> {
        // 1. Topology: validated once, read-only afterwards
        let topology = Arc::new(config.topology()?);
        tracing::info!(
            node = topology.own_id(),
            nodes = topology.nodes().len(),
            replicas = topology.replicas().len(),
            "topology loaded"
        );

        // 2. Durable mailbox for undelivered mutations
        let mailbox = Arc::new(Mailbox::new(config.mailbox_root.clone()));

        // 3. Engines over the shared transport
        let resolver = OwnershipResolver::new(
            topology.clone(),
            config.forwarding,
            collaborators.transport.clone(),
        );
        let replication = ReplicationEngine::new(
            topology.clone(),
            collaborators.transport.clone(),
            mailbox.clone(),
        );
        let bunker = BunkerEngine::new(config.bunkers.clone(), collaborators.transport.clone());
        if !config.bunkers.is_empty() {
            tracing::info!(endpoints = config.bunkers.len(), "bunker fan-out enabled");
        }

        Ok(Arc::new(Self {
            topology,
            locks: Arc::new(LockManager::new()),
            resolver,
            replication,
            bunker,
            mailbox,
            store: collaborators.store,
            permissions: collaborators.permissions,
            audit: collaborators.audit,
            compression: collaborators.compression,
            encryption: collaborators.encryption,
            transport: collaborators.transport,
            storage_root: config.storage_root.clone(),
            replication_mode: config.replication_mode,
            max_object_bytes: config.max_object_bytes,
            drain_interval: Duration::from_secs(config.drain_interval_secs),
            assignments: config.assignments(),
        }))
    }

    /// Start the store-and-forward drain loop.
    pub fn spawn_drain_worker(&self) -> tokio::task::JoinHandle<()> {
        DrainWorker::new(
            self.mailbox.clone(),
            self.topology.clone(),
            self.transport.clone(),
            self.drain_interval,
        )
        .spawn()
    }

    /* Getters */

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Resources currently being operated on, for introspection
    /// endpoints.
    pub fn active_locks(&self) -> Vec<LockedResource> {
        self.locks.snapshot()
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// The node owning `user`'s data. Users without an assignment are
    /// unknown to the mesh.
    pub fn primary_for(&self, user: &Uuid) -> Result<Arc<Node>, OpError> {
        let assignment = self
            .assignments
            .get(user)
            .ok_or_else(|| OpError::NotFound(format!("no node assignment for user {user}")))?;
        self.topology
            .node(assignment.node)
            .ok_or_else(|| OpError::Unavailable(format!("user {user} assigned to unknown node")))
    }

    pub fn is_gateway(&self, user: &Uuid) -> bool {
        self.assignments
            .get(user)
            .map(|a| a.gateway)
            .unwrap_or(false)
    }

    /// Resolve an incoming object reference into the pipeline's unit
    /// of work: primary owner, disk placement, and the node's
    /// replication mode. Paths are validated here, before anything
    /// touches the filesystem.
    pub fn build_object(
        &self,
        user: Uuid,
        container: ContainerPath,
        key: &str,
        data: Option<Bytes>,
    ) -> Result<Obj, OpError> {
        container.validate()?;
        if !key.is_empty() {
            common::obj::validate_segment(key)?;
        }
        let primary = self.primary_for(&user)?;
        let disk_path = Obj::disk_path_under(&self.storage_root, &user, &container, key);
        Ok(Obj {
            user,
            container,
            key: key.to_string(),
            primary,
            disk_path,
            replicas: Vec::new(),
            mode: self.replication_mode,
            data,
            compressed: false,
            encrypted: false,
        })
    }

    pub fn build_container(&self, user: Uuid, container: ContainerPath) -> Result<Obj, OpError> {
        self.build_object(user, container, "", None)
    }

    pub(crate) fn storage_root(&self) -> &PathBuf {
        &self.storage_root
    }
}
