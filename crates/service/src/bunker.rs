//! Offsite (bunker) replication: best-effort fan-out of mutations to
//! external backup endpoints.
//!
//! Bunkers live outside the replica set and never influence a request:
//! dispatch returns immediately, failures are logged and skipped, and
//! nothing is queued or compensated. All bunker destinations share one
//! logical account namespace, so every mutation is remapped before it
//! leaves: the original user GUID becomes the first container segment
//! under the bunker account's own GUID.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use common::obj::{MoveRequest, Obj, RenameRequest, ReplicationMode};
use common::topology::Node;

use crate::peer::PeerTransport;
use crate::replication::MutationKind;

/// An external backup endpoint plus the account everything is filed
/// under there.
#[derive(Debug, Clone, Deserialize)]
pub struct BunkerEndpoint {
    pub name: String,
    pub node: Node,
    pub account: Uuid,
}

pub struct BunkerEngine {
    endpoints: Arc<Vec<BunkerEndpoint>>,
    transport: Arc<dyn PeerTransport>,
}

impl BunkerEngine {
    pub fn new(endpoints: Vec<BunkerEndpoint>, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
            transport,
        }
    }

    /// Fire-and-forget fan-out. Returns before any network activity;
    /// the spawned task owns a snapshot of the mutation and walks the
    /// endpoints in order.
    pub fn dispatch(&self, kind: &MutationKind) {
        if self.endpoints.is_empty() {
            return;
        }
        let endpoints = self.endpoints.clone();
        let transport = self.transport.clone();
        let kind = kind.clone();
        tokio::spawn(async move {
            for endpoint in endpoints.iter() {
                let remapped = remap(&kind, endpoint.account);
                match transport.send(&endpoint.node, &remapped).await {
                    Ok(()) => {
                        tracing::debug!(
                            bunker = %endpoint.name,
                            subject = kind.subject(),
                            "bunker copy delivered"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(
                            bunker = %endpoint.name,
                            subject = kind.subject(),
                            "bunker copy failed, skipping: {err}"
                        );
                    }
                }
            }
        });
    }
}

/// Rewrite a mutation's addressing into the bunker account namespace.
/// Applied identically for every operation kind.
fn remap(kind: &MutationKind, account: Uuid) -> MutationKind {
    match kind {
        MutationKind::ObjectWrite(o) => MutationKind::ObjectWrite(remap_obj(o, account)),
        MutationKind::ObjectDelete(o) => MutationKind::ObjectDelete(remap_obj(o, account)),
        MutationKind::ContainerCreate(o) => MutationKind::ContainerCreate(remap_obj(o, account)),
        MutationKind::ContainerDelete(o) => MutationKind::ContainerDelete(remap_obj(o, account)),
        MutationKind::ObjectMove(mv) => MutationKind::ObjectMove(remap_move(mv, account)),
        MutationKind::ContainerMove(mv) => MutationKind::ContainerMove(remap_move(mv, account)),
        MutationKind::ObjectRename(rn) => MutationKind::ObjectRename(remap_rename(rn, account)),
        MutationKind::ContainerRename(rn) => {
            MutationKind::ContainerRename(remap_rename(rn, account))
        }
    }
}

fn remap_obj(obj: &Obj, account: Uuid) -> Obj {
    let mut remapped = obj.clone();
    remapped.container = obj.container.prefixed(&obj.user.to_string());
    remapped.user = account;
    // the bunker applies its own durability; nothing cascades from here
    remapped.mode = ReplicationMode::None;
    remapped.replicas = Vec::new();
    remapped
}

fn remap_move(mv: &MoveRequest, account: Uuid) -> MoveRequest {
    let user_segment = mv.user.to_string();
    MoveRequest {
        user: account,
        source: mv.source.prefixed(&user_segment),
        destination: mv.destination.prefixed(&user_segment),
        key: mv.key.clone(),
    }
}

fn remap_rename(rn: &RenameRequest, account: Uuid) -> RenameRequest {
    RenameRequest {
        user: account,
        container: rn.container.prefixed(&rn.user.to_string()),
        old_name: rn.old_name.clone(),
        new_name: rn.new_name.clone(),
    }
}
