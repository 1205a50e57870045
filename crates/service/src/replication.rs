//! Replication engine: propagate a local mutation to the replica set.
//!
//! `async` mode dispatches one background task per replica over an
//! immutable snapshot of the mutation; a failed delivery falls back to
//! the durable per-node mailbox and never fails the client operation.
//! `sync` mode walks the replicas sequentially in configured order,
//! aborting on the first failure and issuing compensating requests to
//! everything already attempted. Sequential fan-out bounds worst-case
//! latency predictably at the cost of higher tail latency under
//! partial failure.

use std::sync::Arc;

use common::message::{Message, MessageMeta};
use common::obj::{MoveRequest, Obj, RenameRequest, ReplicationMode};
use common::topology::{Node, NodeId, Topology};

use crate::mailbox::Mailbox;
use crate::peer::{PeerError, PeerTransport};

/// A mutation of the local store, as seen by the replication and
/// bunker engines. Clones of this are what background tasks receive;
/// they never share mutable state with the orchestrator.
#[derive(Debug, Clone)]
pub enum MutationKind {
    ObjectWrite(Obj),
    ObjectDelete(Obj),
    ObjectMove(MoveRequest),
    ObjectRename(RenameRequest),
    ContainerCreate(Obj),
    ContainerDelete(Obj),
    ContainerMove(MoveRequest),
    ContainerRename(RenameRequest),
}

impl MutationKind {
    /// Message type/subject, also used as the audit tag.
    pub fn subject(&self) -> &'static str {
        match self {
            MutationKind::ObjectWrite(_) => "object.write",
            MutationKind::ObjectDelete(_) => "object.delete",
            MutationKind::ObjectMove(_) => "object.move",
            MutationKind::ObjectRename(_) => "object.rename",
            MutationKind::ContainerCreate(_) => "container.create",
            MutationKind::ContainerDelete(_) => "container.delete",
            MutationKind::ContainerMove(_) => "container.move",
            MutationKind::ContainerRename(_) => "container.rename",
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            MutationKind::ObjectWrite(_) | MutationKind::ContainerCreate(_) => "PUT",
            MutationKind::ObjectDelete(_) | MutationKind::ContainerDelete(_) => "DELETE",
            _ => "POST",
        }
    }

    /// Path of the peer's internal replication endpoint for this kind.
    pub fn api_path(&self) -> &'static str {
        match self {
            MutationKind::ObjectWrite(_) | MutationKind::ObjectDelete(_) => "internal/object",
            MutationKind::ObjectMove(_) => "internal/object/move",
            MutationKind::ObjectRename(_) => "internal/object/rename",
            MutationKind::ContainerCreate(_) | MutationKind::ContainerDelete(_) => {
                "internal/container"
            }
            MutationKind::ContainerMove(_) => "internal/container/move",
            MutationKind::ContainerRename(_) => "internal/container/rename",
        }
    }

    pub fn user(&self) -> uuid::Uuid {
        match self {
            MutationKind::ObjectWrite(o)
            | MutationKind::ObjectDelete(o)
            | MutationKind::ContainerCreate(o)
            | MutationKind::ContainerDelete(o) => o.user,
            MutationKind::ObjectMove(mv) | MutationKind::ContainerMove(mv) => mv.user,
            MutationKind::ObjectRename(rn) | MutationKind::ContainerRename(rn) => rn.user,
        }
    }

    /// Canonical path of the mutated resource, for lock keys, audit
    /// lines, and the `Metadata` header of queued messages.
    pub fn url_path(&self) -> String {
        match self {
            MutationKind::ObjectWrite(o)
            | MutationKind::ObjectDelete(o)
            | MutationKind::ContainerCreate(o)
            | MutationKind::ContainerDelete(o) => o.url_path(),
            MutationKind::ObjectMove(mv) | MutationKind::ContainerMove(mv) => {
                let mut parts = vec![mv.user.to_string()];
                if !mv.source.is_root() {
                    parts.push(mv.source.to_string());
                }
                if !mv.key.is_empty() {
                    parts.push(mv.key.clone());
                }
                parts.join("/")
            }
            MutationKind::ObjectRename(rn) | MutationKind::ContainerRename(rn) => {
                let mut parts = vec![rn.user.to_string()];
                if !rn.container.is_root() {
                    parts.push(rn.container.to_string());
                }
                parts.push(rn.old_name.clone());
                parts.join("/")
            }
        }
    }

    /// JSON body for the peer REST call, mirroring the wire structs.
    pub fn body_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            MutationKind::ObjectWrite(o)
            | MutationKind::ObjectDelete(o)
            | MutationKind::ContainerCreate(o)
            | MutationKind::ContainerDelete(o) => serde_json::to_vec(&o.to_wire()),
            MutationKind::ObjectMove(mv) | MutationKind::ContainerMove(mv) => {
                serde_json::to_vec(mv)
            }
            MutationKind::ObjectRename(rn) | MutationKind::ContainerRename(rn) => {
                serde_json::to_vec(rn)
            }
        }
    }

    /// Payload bytes carried by this mutation, for timeout scaling.
    pub fn payload_len(&self) -> usize {
        match self {
            MutationKind::ObjectWrite(o) => o.data.as_ref().map(|d| d.len()).unwrap_or(0),
            _ => 0,
        }
    }

    /// The compensating mutation to undo this one on a replica, or
    /// `None` when there is nothing to undo (deletes are idempotent).
    pub fn compensation(&self) -> Option<MutationKind> {
        match self {
            MutationKind::ObjectWrite(o) => Some(MutationKind::ObjectDelete(o.clone())),
            MutationKind::ContainerCreate(o) => Some(MutationKind::ContainerDelete(o.clone())),
            MutationKind::ObjectMove(mv) => Some(MutationKind::ObjectMove(reverse_move(mv))),
            MutationKind::ContainerMove(mv) => Some(MutationKind::ContainerMove(reverse_move(mv))),
            MutationKind::ObjectRename(rn) => Some(MutationKind::ObjectRename(reverse_rename(rn))),
            MutationKind::ContainerRename(rn) => {
                Some(MutationKind::ContainerRename(reverse_rename(rn)))
            }
            MutationKind::ObjectDelete(_) | MutationKind::ContainerDelete(_) => None,
        }
    }

    /// Wrap this mutation in a store-and-forward envelope for the
    /// durable retry queue.
    pub fn to_message(&self, from: NodeId, to: NodeId) -> Result<Message, serde_json::Error> {
        Ok(Message {
            from,
            to,
            meta: MessageMeta {
                verb: self.verb().to_string(),
                path: self.url_path(),
                user: Some(self.user()),
            },
            subject: self.subject().to_string(),
            success: false,
            body: self.body_json()?.into(),
        })
    }
}

fn reverse_move(mv: &MoveRequest) -> MoveRequest {
    MoveRequest {
        user: mv.user,
        source: mv.destination.clone(),
        destination: mv.source.clone(),
        key: mv.key.clone(),
    }
}

fn reverse_rename(rn: &RenameRequest) -> RenameRequest {
    RenameRequest {
        user: rn.user,
        container: rn.container.clone(),
        old_name: rn.new_name.clone(),
        new_name: rn.old_name.clone(),
    }
}

/// A mutation plus the durability contract attached to it. The replica
/// set starts empty and is snapshotted from the topology at replicate
/// time, so later compensation targets exactly the attempted nodes.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: MutationKind,
    pub mode: ReplicationMode,
    pub replicas: Vec<Arc<Node>>,
}

impl Mutation {
    pub fn new(kind: MutationKind, mode: ReplicationMode) -> Self {
        Self {
            kind,
            mode,
            replicas: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("sync replication to node {node} failed: {source}")]
    SyncFailed {
        node: NodeId,
        #[source]
        source: PeerError,
    },
}

pub struct ReplicationEngine {
    topology: Arc<Topology>,
    transport: Arc<dyn PeerTransport>,
    mailbox: Arc<Mailbox>,
}

impl ReplicationEngine {
    pub fn new(
        topology: Arc<Topology>,
        transport: Arc<dyn PeerTransport>,
        mailbox: Arc<Mailbox>,
    ) -> Self {
        Self {
            topology,
            transport,
            mailbox,
        }
    }

    /// Propagate `mutation` per its mode. Returns the replica set that
    /// was attempted (empty for mode `none`); the orchestrator uses it
    /// for compensation if the local write fails afterwards.
    ///
    /// `sync` failure means no local write may happen: the error
    /// carries the failed node and compensation has already been
    /// issued to every attempted replica, the failed one included,
    /// since its partial state is unknown.
    pub async fn replicate(
        &self,
        mutation: &mut Mutation,
    ) -> Result<Vec<Arc<Node>>, ReplicationError> {
        if mutation.mode == ReplicationMode::None {
            return Ok(Vec::new());
        }

        // snapshot the replica set onto the mutation before any attempt
        mutation.replicas = self.topology.replicas();
        if mutation.replicas.is_empty() {
            tracing::debug!(
                subject = mutation.kind.subject(),
                "replication mode set but no replicas configured"
            );
            return Ok(Vec::new());
        }

        match mutation.mode {
            ReplicationMode::None => unreachable!("handled above"),
            ReplicationMode::Async => {
                for replica in &mutation.replicas {
                    self.dispatch_async(mutation.kind.clone(), replica.clone());
                }
                Ok(mutation.replicas.clone())
            }
            ReplicationMode::Sync => {
                for (i, replica) in mutation.replicas.iter().enumerate() {
                    if let Err(err) = self.transport.send(replica, &mutation.kind).await {
                        tracing::warn!(
                            subject = mutation.kind.subject(),
                            node = replica.id,
                            "sync replication failed: {err}"
                        );
                        // roll back the successes, and hit the failed
                        // replica too as a safety measure
                        self.compensate(&mutation.kind, &mutation.replicas[..=i])
                            .await;
                        return Err(ReplicationError::SyncFailed {
                            node: replica.id,
                            source: err,
                        });
                    }
                    tracing::debug!(
                        subject = mutation.kind.subject(),
                        node = replica.id,
                        "sync replication delivered"
                    );
                }
                Ok(mutation.replicas.clone())
            }
        }
    }

    /// Background delivery for one replica. A failed send falls back to
    /// the durable mailbox; nothing here can surface to the caller.
    fn dispatch_async(&self, kind: MutationKind, replica: Arc<Node>) {
        let transport = self.transport.clone();
        let mailbox = self.mailbox.clone();
        let own_id = self.topology.own_id();
        tokio::spawn(async move {
            match transport.send(&replica, &kind).await {
                Ok(()) => {
                    tracing::debug!(
                        subject = kind.subject(),
                        node = replica.id,
                        "async replication delivered"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        subject = kind.subject(),
                        node = replica.id,
                        "async replication failed, queueing: {err}"
                    );
                    let msg = match kind.to_message(own_id, replica.id) {
                        Ok(msg) => msg,
                        Err(err) => {
                            tracing::error!("failed to encode mutation for queue: {err}");
                            return;
                        }
                    };
                    if let Err(err) = mailbox.enqueue(&msg).await {
                        tracing::error!(
                            node = replica.id,
                            "failed to queue undelivered mutation: {err}"
                        );
                    }
                }
            }
        });
    }

    /// Best-effort compensation: issue the undo mutation to each node
    /// and log failures. The compensating request itself is not
    /// verified -- a replica that misses its undo stays divergent until
    /// the next write. Known durability gap, not a consistency
    /// guarantee.
    pub async fn compensate(&self, kind: &MutationKind, replicas: &[Arc<Node>]) {
        let Some(undo) = kind.compensation() else {
            return;
        };
        for replica in replicas {
            if let Err(err) = self.transport.send(replica, &undo).await {
                tracing::warn!(
                    subject = undo.subject(),
                    node = replica.id,
                    "compensation failed: {err}"
                );
            }
        }
    }
}
