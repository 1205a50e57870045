//! Outbound transport to peer and bunker nodes.
//!
//! [`PeerTransport`] is the seam: the replication engine, resolver, and
//! drain worker all speak through it, which keeps them testable against
//! the scripted transport in [`crate::testkit`]. [`PeerClient`] is the
//! production binding over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;

use common::message::Message;
use common::topology::{Node, NodeId};

use crate::handlers::ApiResponse;
use crate::replication::MutationKind;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("node {node} unreachable: {reason}")]
    Unreachable { node: NodeId, reason: String },
    #[error("node {node} answered status {status}")]
    Status { node: NodeId, status: u16 },
    #[error("could not encode request: {0}")]
    Encode(String),
}

/// A request relayed verbatim to a peer under the `proxy` forwarding
/// policy. `path` is relative to the peer's base URL.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub verb: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver a mutation to a peer's internal replication endpoint.
    /// Non-2xx counts as failure.
    async fn send(&self, node: &Node, mutation: &MutationKind) -> Result<(), PeerError>;

    /// Deliver a queued store-and-forward message.
    async fn deliver(&self, node: &Node, msg: &Message) -> Result<(), PeerError>;

    /// Relay a request to a peer and hand back its response verbatim.
    /// `Err` means no HTTP response at all; an error *status* is a
    /// valid response and is relayed like any other.
    async fn proxy(&self, node: &Node, req: &ProxyRequest) -> Result<ApiResponse, PeerError>;
}

/// reqwest-backed transport. Peer calls carry the mesh admin key in
/// `x-api-key` and a timeout scaled by payload size, so one dead
/// replica cannot stall a request indefinitely.
pub struct PeerClient {
    client: reqwest::Client,
    admin_key: String,
    timeout_base: Duration,
    /// Bytes-per-second floor used to stretch the timeout for
    /// data-bearing calls.
    throughput_floor: u64,
}

impl PeerClient {
    pub fn new(
        admin_key: impl Into<String>,
        timeout_base: Duration,
        throughput_floor: u64,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            admin_key: admin_key.into(),
            timeout_base,
            throughput_floor: throughput_floor.max(1),
        })
    }

    fn timeout_for(&self, payload_len: usize) -> Duration {
        self.timeout_base + Duration::from_secs(payload_len as u64 / self.throughput_floor)
    }

    fn url(node: &Node, path: &str) -> String {
        format!("{}/{}", node.base_url(), path)
    }

    fn unreachable(node: &Node, err: reqwest::Error) -> PeerError {
        PeerError::Unreachable {
            node: node.id,
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl PeerTransport for PeerClient {
    async fn send(&self, node: &Node, mutation: &MutationKind) -> Result<(), PeerError> {
        let body = mutation
            .body_json()
            .map_err(|e| PeerError::Encode(e.to_string()))?;
        let method = Method::from_bytes(mutation.verb().as_bytes())
            .map_err(|e| PeerError::Encode(e.to_string()))?;

        let response = self
            .client
            .request(method, Self::url(node, mutation.api_path()))
            .header("x-api-key", &self.admin_key)
            .header(http::header::CONTENT_TYPE.as_str(), "application/json")
            .timeout(self.timeout_for(mutation.payload_len()))
            .body(body)
            .send()
            .await
            .map_err(|e| Self::unreachable(node, e))?;

        if !response.status().is_success() {
            return Err(PeerError::Status {
                node: node.id,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn deliver(&self, node: &Node, msg: &Message) -> Result<(), PeerError> {
        let body = msg.encode().map_err(|e| PeerError::Encode(e.to_string()))?;
        let response = self
            .client
            .post(Self::url(node, "internal/message"))
            .header("x-api-key", &self.admin_key)
            .header(
                http::header::CONTENT_TYPE.as_str(),
                "application/octet-stream",
            )
            .timeout(self.timeout_for(msg.body.len()))
            .body(body)
            .send()
            .await
            .map_err(|e| Self::unreachable(node, e))?;

        if !response.status().is_success() {
            return Err(PeerError::Status {
                node: node.id,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn proxy(&self, node: &Node, req: &ProxyRequest) -> Result<ApiResponse, PeerError> {
        let mut query = req.query.clone();
        // loop prevention: the receiving node must not proxy again
        query.push(("proxied".to_string(), "true".to_string()));

        let mut builder = self
            .client
            .request(req.verb.clone(), Self::url(node, &req.path))
            .header("x-api-key", &self.admin_key)
            .query(&query)
            .timeout(self.timeout_for(req.body.len()))
            .body(req.body.clone());
        if let Some(content_type) = &req.content_type {
            builder = builder.header(http::header::CONTENT_TYPE.as_str(), content_type.clone());
        }

        let response = builder.send().await.map_err(|e| Self::unreachable(node, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::unreachable(node, e))?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
