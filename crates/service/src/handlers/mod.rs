//! Operation orchestrators: one method per verb, composing ownership
//! resolution, locking, permission/audit hooks, replication, bunker
//! fan-out, and the local mutation.
//!
//! Common shape (mutating verbs):
//!
//! ```text
//! Received -> OwnershipResolved -> { Forwarded (terminal)
//!                                  | Locked -> PermissionChecked
//!                                    -> Replicated -> Persisted
//!                                    -> Unlocked (terminal) }
//! ```
//!
//! Any step may fail straight to the terminal state; locks release
//! through guard drop on every path.

mod container;
mod object;
mod response;

pub use response::{respond, ApiResponse, RequestContext};

use bytes::Bytes;
use chrono::Utc;
use http::Method;

use common::obj::{ContainerPath, Obj};
use uuid::Uuid;

use crate::error::OpError;
use crate::externals::{Capability, ObjMetadata};
use crate::peer::ProxyRequest;
use crate::state::Core;

impl Core {
    /// Step 1 of every verb: does the caller hold the capability at
    /// all? Cheap, checked before ownership resolution so a forbidden
    /// request is never forwarded across the mesh.
    pub(crate) async fn require(
        &self,
        capability: Capability,
        ctx: &RequestContext,
    ) -> Result<(), OpError> {
        if self.permissions.check(capability, ctx, None).await {
            return Ok(());
        }
        Err(OpError::PermissionDenied(format!(
            "{capability:?} not granted"
        )))
    }

    /// The post-lock permission + audit hook: the target's own policy
    /// may still deny the operation. Every decision leaves an audit
    /// line.
    pub(crate) async fn policy_gate(
        &self,
        capability: Capability,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<(), OpError> {
        let allowed = self.permissions.check(capability, ctx, Some(path)).await;
        self.audit.append(
            "access",
            &format!(
                "{} {} {} user={} allowed={}",
                Utc::now().to_rfc3339(),
                ctx.verb,
                path,
                ctx.user.map(|u| u.to_string()).unwrap_or_default(),
                allowed
            ),
        );
        if allowed {
            Ok(())
        } else {
            Err(OpError::PermissionDenied(format!("policy denies {path}")))
        }
    }

    /// Relay form of a single-resource request, for the proxy policy.
    pub(crate) fn relay_request(
        &self,
        verb: Method,
        obj: &Obj,
        ctx: &RequestContext,
        body: Bytes,
    ) -> ProxyRequest {
        ProxyRequest {
            verb,
            path: format!("api/{}", obj.url_path()),
            query: ctx.query_pairs(),
            body,
            content_type: None,
        }
    }

    /// Relay form of a structural request (move/rename), which posts
    /// its descriptor as JSON instead of addressing the resource path.
    pub(crate) fn relay_json<T: serde::Serialize>(
        &self,
        path: &str,
        ctx: &RequestContext,
        payload: &T,
    ) -> Result<ProxyRequest, OpError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| OpError::Internal(anyhow::anyhow!("encode relay body: {e}")))?;
        Ok(ProxyRequest {
            verb: Method::POST,
            path: path.to_string(),
            query: ctx.query_pairs(),
            body: Bytes::from(body),
            content_type: Some("application/json".to_string()),
        })
    }

    /// Normalize stored metadata after a move/rename, off the response
    /// path. The metadata record travels with the file, so the codec
    /// flags and content type are preserved; only the placement fields
    /// and the timestamp change. Writes record their metadata inline
    /// instead -- a read may arrive the moment the response is out and
    /// must already know how to decode.
    pub(crate) fn spawn_metadata_rewrite(
        &self,
        disk_path: std::path::PathBuf,
        container: ContainerPath,
        key: String,
    ) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let existing = match store.read_metadata(&disk_path).await {
                Ok(existing) => existing,
                Err(err) => {
                    tracing::warn!("metadata rewrite skipped for {}: {err}", disk_path.display());
                    return;
                }
            };
            let size = match &existing {
                Some(meta) => meta.size,
                None => match store.read_body(&disk_path).await {
                    Ok(body) => body.len() as u64,
                    Err(_) => 0,
                },
            };
            let (compressed, encrypted) = existing
                .as_ref()
                .map(|m| (m.compressed, m.encrypted))
                .unwrap_or((false, false));
            let meta = ObjMetadata {
                key,
                container,
                size,
                modified: Utc::now(),
                content_type: existing.and_then(|m| m.content_type),
                compressed,
                encrypted,
            };
            if let Err(err) = store.write_metadata(&disk_path, &meta).await {
                tracing::warn!("metadata rewrite failed for {}: {err}", disk_path.display());
            }
        });
    }

    /// Canonical `user/path` string for resources addressed by
    /// container path alone.
    pub(crate) fn path_of(user: &Uuid, container: &ContainerPath, key: &str) -> String {
        let mut parts = vec![user.to_string()];
        if !container.is_root() {
            parts.push(container.to_string());
        }
        if !key.is_empty() {
            parts.push(key.to_string());
        }
        parts.join("/")
    }
}
