//! Ownership resolution and cross-node forwarding.
//!
//! Ownership is static: an obj's primary owner comes from the user's
//! configured node assignment, so resolving the same obj against the
//! same topology always gives the same answer. What happens to a
//! request we do not own is the forwarding policy's call, configured
//! per operation class.

use std::sync::Arc;

use futures::future::select_ok;
use serde::Deserialize;

use common::obj::Obj;
use common::topology::{Node, Topology};

use crate::error::OpError;
use crate::handlers::ApiResponse;
use crate::peer::{PeerTransport, ProxyRequest};

/// Where an obj lives relative to this node.
#[derive(Debug, Clone)]
pub enum Ownership {
    Local,
    Remote(Arc<Node>),
}

/// Operation class, the granularity at which forwarding is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Read,
    Write,
    Delete,
    Search,
}

/// What to do with a request this node does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForwardPolicy {
    /// Reject; the client must re-target itself.
    #[default]
    None,
    /// Relay the request to the owning node and hand its response back
    /// verbatim.
    Proxy,
    /// Answer with a redirect pointing at the owning node.
    Redirect,
}

/// Per-class forwarding policies. Defaults to rejecting everything.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
pub struct ForwardingConfig {
    pub read: ForwardPolicy,
    pub write: ForwardPolicy,
    pub delete: ForwardPolicy,
    pub search: ForwardPolicy,
}

impl ForwardingConfig {
    pub fn policy(&self, class: OpClass) -> ForwardPolicy {
        match class {
            OpClass::Read => self.read,
            OpClass::Write => self.write,
            OpClass::Delete => self.delete,
            OpClass::Search => self.search,
        }
    }
}

pub struct OwnershipResolver {
    topology: Arc<Topology>,
    forwarding: ForwardingConfig,
    transport: Arc<dyn PeerTransport>,
}

impl OwnershipResolver {
    pub fn new(
        topology: Arc<Topology>,
        forwarding: ForwardingConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            topology,
            forwarding,
            transport,
        }
    }

    /// Local if the obj's primary owner is this node.
    pub fn resolve(&self, obj: &Obj) -> Ownership {
        if self.topology.is_own(obj.primary.id) {
            Ownership::Local
        } else {
            Ownership::Remote(obj.primary.clone())
        }
    }

    /// Apply the forwarding policy for `class` to a request owned by
    /// `owner`.
    ///
    /// A request that already carries the proxied marker is never
    /// forwarded again; two nodes disagreeing about ownership would
    /// otherwise bounce it between them forever.
    pub async fn forward(
        &self,
        class: OpClass,
        owner: &Arc<Node>,
        req: ProxyRequest,
        already_proxied: bool,
    ) -> Result<ApiResponse, OpError> {
        if already_proxied {
            tracing::warn!(
                owner = owner.id,
                path = %req.path,
                "refusing to proxy an already-proxied request"
            );
            return Err(OpError::ProxyingDisabled);
        }

        match self.forwarding.policy(class) {
            ForwardPolicy::None => Err(OpError::ProxyingDisabled),
            ForwardPolicy::Redirect => {
                let location = format!("{}/{}", owner.base_url(), req.path);
                tracing::debug!(owner = owner.id, "redirecting to {location}");
                Ok(ApiResponse::redirect(&location))
            }
            ForwardPolicy::Proxy => {
                if class == OpClass::Read || class == OpClass::Search {
                    self.proxy_first_responder(owner, &req).await
                } else {
                    self.transport
                        .proxy(owner, &req)
                        .await
                        .map_err(|e| OpError::Unavailable(e.to_string()))
                }
            }
        }
    }

    /// Race the owner and its replicas; the first HTTP response wins.
    /// Reads are safe to fan out since any holder of the data can
    /// answer them.
    async fn proxy_first_responder(
        &self,
        owner: &Arc<Node>,
        req: &ProxyRequest,
    ) -> Result<ApiResponse, OpError> {
        let candidates = self.topology.read_candidates(owner);
        let candidate_count = candidates.len();
        let races = candidates
            .iter()
            .map(|node| Box::pin(self.transport.proxy(node, req)))
            .collect::<Vec<_>>();

        let outcome = select_ok(races).await;
        match outcome {
            Ok((response, rest)) => {
                // abandon the relays still in flight
                drop(rest);
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(
                    owner = owner.id,
                    candidates = candidate_count,
                    "no candidate answered the proxied read: {err}"
                );
                Err(OpError::Unavailable(format!(
                    "no reachable node for data owned by {}",
                    owner.name
                )))
            }
        }
    }
}
