//! Object verbs: read, head, write, delete, move, rename.

use bytes::Bytes;
use chrono::Utc;
use http::{header, HeaderValue, Method, StatusCode};

use common::obj::{MoveRequest, Obj, RenameRequest, ReplicationMode};

use crate::error::OpError;
use crate::externals::{Capability, ObjMetadata};
use crate::ownership::{OpClass, Ownership};
use crate::replication::{Mutation, MutationKind};
use crate::state::Core;

use super::{ApiResponse, RequestContext};

impl Core {
    pub async fn read_object(
        &self,
        ctx: &RequestContext,
        obj: Obj,
    ) -> Result<ApiResponse, OpError> {
        // 1. capability
        self.require(Capability::ReadObject, ctx).await?;

        // 2. ownership
        if let Ownership::Remote(owner) = self.resolver.resolve(&obj) {
            let req = self.relay_request(Method::GET, &obj, ctx, Bytes::new());
            return self
                .resolver
                .forward(OpClass::Read, &owner, req, ctx.proxied)
                .await;
        }

        // 3. object policy + audit
        self.policy_gate(Capability::ReadObject, ctx, &obj.url_path())
            .await?;

        // 4. read and decode
        let raw = self.store.read_body(&obj.disk_path).await?;
        let meta = self.store.read_metadata(&obj.disk_path).await?;
        let body = if self.is_gateway(&obj.user) {
            raw
        } else if let Some(meta) = &meta {
            let decrypted = if meta.encrypted {
                self.encryption.decode(raw)?
            } else {
                raw
            };
            if meta.compressed {
                self.compression.decode(decrypted)?
            } else {
                decrypted
            }
        } else {
            raw
        };

        let mut response = ApiResponse::empty(StatusCode::OK);
        if let Some(content_type) = meta.and_then(|m| m.content_type) {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers.insert(header::CONTENT_TYPE, value);
            }
        }
        response.body = body;
        Ok(response)
    }

    pub async fn head_object(
        &self,
        ctx: &RequestContext,
        obj: Obj,
    ) -> Result<ApiResponse, OpError> {
        self.require(Capability::ReadObject, ctx).await?;

        if let Ownership::Remote(owner) = self.resolver.resolve(&obj) {
            let req = self.relay_request(Method::HEAD, &obj, ctx, Bytes::new());
            return self
                .resolver
                .forward(OpClass::Read, &owner, req, ctx.proxied)
                .await;
        }

        self.policy_gate(Capability::ReadObject, ctx, &obj.url_path())
            .await?;

        if !self.store.exists(&obj.disk_path).await {
            return Err(OpError::NotFound(obj.url_path()));
        }
        let mut response = ApiResponse::empty(StatusCode::OK);
        if let Some(meta) = self.store.read_metadata(&obj.disk_path).await? {
            response
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
            if let Some(content_type) = meta.content_type {
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    response.headers.insert(header::CONTENT_TYPE, value);
                }
            }
        }
        Ok(response)
    }

    pub async fn write_object(
        &self,
        ctx: &RequestContext,
        mut obj: Obj,
    ) -> Result<ApiResponse, OpError> {
        // 1. capability
        self.require(Capability::WriteObject, ctx).await?;

        // 2. ownership
        if let Ownership::Remote(owner) = self.resolver.resolve(&obj) {
            let body = obj.data.clone().unwrap_or_default();
            let req = self.relay_request(Method::PUT, &obj, ctx, body);
            return self
                .resolver
                .forward(OpClass::Write, &owner, req, ctx.proxied)
                .await;
        }

        // 3. payload bound
        let payload = obj.data.clone().unwrap_or_default();
        if payload.len() > self.max_object_bytes {
            return Err(OpError::BadRequest(format!(
                "payload of {} bytes exceeds the {}-byte limit",
                payload.len(),
                self.max_object_bytes
            )));
        }

        // 4. lock
        let _guard = self
            .locks
            .acquire(&obj.url_path(), ctx.user, &ctx.verb)
            .ok_or_else(|| OpError::ResourceInUse(obj.url_path()))?;

        // 5. object policy + audit
        self.policy_gate(Capability::WriteObject, ctx, &obj.url_path())
            .await?;

        // 6. the target container must exist
        if !obj.container.is_root() {
            let container_dir = Obj::disk_path_under(
                self.storage_root(),
                &obj.user,
                &obj.container,
                "",
            );
            if !self.store.dir_exists(&container_dir).await {
                return Err(OpError::NotFound(format!(
                    "container {}",
                    Self::path_of(&obj.user, &obj.container, "")
                )));
            }
        }

        // 7. codecs, skipped for gateway users (raw passthrough)
        let gateway = self.is_gateway(&obj.user);
        if !gateway {
            let compressed = self.compression.encode(payload)?;
            let encoded = self.encryption.encode(compressed)?;
            obj.data = Some(encoded);
            obj.compressed = true;
            obj.encrypted = true;
        }

        // 8. replication first (it can abort the operation), bunker
        //    second (it cannot)
        let mut mutation = Mutation::new(MutationKind::ObjectWrite(obj.clone()), obj.mode);
        let attempted = self.replication.replicate(&mut mutation).await?;
        self.bunker.dispatch(&mutation.kind);

        // 9. local write; a failure after a successful sync pass rolls
        //    the replicas back
        let body = obj.data.clone().unwrap_or_default();
        if let Err(err) = self.store.write(&obj.disk_path, body).await {
            if mutation.mode == ReplicationMode::Sync {
                self.replication.compensate(&mutation.kind, &attempted).await;
            }
            return Err(err.into());
        }

        // 10. metadata lands before the response goes out: a read may
        //     follow immediately and needs the codec flags to decode
        if !gateway {
            let existing = self.store.read_metadata(&obj.disk_path).await?;
            let meta = ObjMetadata {
                key: obj.key.clone(),
                container: obj.container.clone(),
                size: obj.data.as_ref().map(|d| d.len()).unwrap_or(0) as u64,
                modified: Utc::now(),
                content_type: existing.and_then(|m| m.content_type),
                compressed: obj.compressed,
                encrypted: obj.encrypted,
            };
            self.store.write_metadata(&obj.disk_path, &meta).await?;
        }

        Ok(ApiResponse::ok_json(
            &serde_json::json!({ "url": obj.url_path() }),
        ))
    }

    pub async fn delete_object(
        &self,
        ctx: &RequestContext,
        obj: Obj,
    ) -> Result<ApiResponse, OpError> {
        // 1. capability
        self.require(Capability::DeleteObject, ctx).await?;

        // 2. ownership
        if let Ownership::Remote(owner) = self.resolver.resolve(&obj) {
            let req = self.relay_request(Method::DELETE, &obj, ctx, Bytes::new());
            return self
                .resolver
                .forward(OpClass::Delete, &owner, req, ctx.proxied)
                .await;
        }

        // 3. lock
        let _guard = self
            .locks
            .acquire(&obj.url_path(), ctx.user, &ctx.verb)
            .ok_or_else(|| OpError::ResourceInUse(obj.url_path()))?;

        // 4. object policy + audit
        self.policy_gate(Capability::DeleteObject, ctx, &obj.url_path())
            .await?;

        // 5. precondition
        if !self.store.exists(&obj.disk_path).await {
            return Err(OpError::NotFound(obj.url_path()));
        }

        // 6. replicate, bunker, local delete
        let mut mutation = Mutation::new(MutationKind::ObjectDelete(obj.clone()), obj.mode);
        self.replication.replicate(&mut mutation).await?;
        self.bunker.dispatch(&mutation.kind);
        self.store.delete(&obj.disk_path).await?;

        Ok(ApiResponse::empty(StatusCode::NO_CONTENT))
    }

    pub async fn move_object(
        &self,
        ctx: &RequestContext,
        mv: MoveRequest,
    ) -> Result<ApiResponse, OpError> {
        // 1. path safety, before anything else
        mv.validate()?;
        if mv.is_container() {
            return Err(OpError::BadRequest("object move requires a key".into()));
        }

        // 2. capability
        self.require(Capability::WriteObject, ctx).await?;

        // 3. ownership, resolved through the source reference
        let source = self.build_object(mv.user, mv.source.clone(), &mv.key, None)?;
        if let Ownership::Remote(owner) = self.resolver.resolve(&source) {
            let req = self.relay_json("api/object/move", ctx, &mv)?;
            return self
                .resolver
                .forward(OpClass::Write, &owner, req, ctx.proxied)
                .await;
        }

        // 4. lock both endpoints by literal disk path
        let src_path = source.disk_path.clone();
        let dst_path =
            Obj::disk_path_under(self.storage_root(), &mv.user, &mv.destination, &mv.key);
        let src_key = src_path.to_string_lossy().into_owned();
        let dst_key = dst_path.to_string_lossy().into_owned();
        let _guard = self
            .locks
            .acquire_pair(&src_key, &dst_key, ctx.user, &ctx.verb)
            .ok_or_else(|| OpError::ResourceInUse(source.url_path()))?;

        // 5. policy + audit
        self.policy_gate(Capability::WriteObject, ctx, &source.url_path())
            .await?;

        // 6. preconditions: source exists, destination container
        //    exists, destination itself does not
        if !self.store.exists(&src_path).await {
            return Err(OpError::NotFound(source.url_path()));
        }
        if !mv.destination.is_root() {
            let dst_container =
                Obj::disk_path_under(self.storage_root(), &mv.user, &mv.destination, "");
            if !self.store.dir_exists(&dst_container).await {
                return Err(OpError::NotFound(format!(
                    "container {}",
                    Self::path_of(&mv.user, &mv.destination, "")
                )));
            }
        }
        if self.store.exists(&dst_path).await {
            return Err(OpError::Conflict(Self::path_of(
                &mv.user,
                &mv.destination,
                &mv.key,
            )));
        }

        // 7. replicate, bunker, local move
        let mut mutation =
            Mutation::new(MutationKind::ObjectMove(mv.clone()), self.replication_mode);
        let attempted = self.replication.replicate(&mut mutation).await?;
        self.bunker.dispatch(&mutation.kind);
        if let Err(err) = self.store.rename(&src_path, &dst_path).await {
            if mutation.mode == ReplicationMode::Sync {
                self.replication.compensate(&mutation.kind, &attempted).await;
            }
            return Err(err.into());
        }

        // 8. metadata now lives at the destination
        if !self.is_gateway(&mv.user) {
            self.spawn_metadata_rewrite(dst_path, mv.destination.clone(), mv.key.clone());
        }

        Ok(ApiResponse::ok_json(&serde_json::json!({
            "url": Self::path_of(&mv.user, &mv.destination, &mv.key),
        })))
    }

    pub async fn rename_object(
        &self,
        ctx: &RequestContext,
        rn: RenameRequest,
    ) -> Result<ApiResponse, OpError> {
        // 1. path safety
        rn.validate()?;

        // 2. capability
        self.require(Capability::WriteObject, ctx).await?;

        // 3. ownership
        let source = self.build_object(rn.user, rn.container.clone(), &rn.old_name, None)?;
        if let Ownership::Remote(owner) = self.resolver.resolve(&source) {
            let req = self.relay_json("api/object/rename", ctx, &rn)?;
            return self
                .resolver
                .forward(OpClass::Write, &owner, req, ctx.proxied)
                .await;
        }

        // 4. lock both names
        let src_path = source.disk_path.clone();
        let dst_path =
            Obj::disk_path_under(self.storage_root(), &rn.user, &rn.container, &rn.new_name);
        let src_key = src_path.to_string_lossy().into_owned();
        let dst_key = dst_path.to_string_lossy().into_owned();
        let _guard = self
            .locks
            .acquire_pair(&src_key, &dst_key, ctx.user, &ctx.verb)
            .ok_or_else(|| OpError::ResourceInUse(source.url_path()))?;

        // 5. policy + audit
        self.policy_gate(Capability::WriteObject, ctx, &source.url_path())
            .await?;

        // 6. preconditions
        if !self.store.exists(&src_path).await {
            return Err(OpError::NotFound(source.url_path()));
        }
        if self.store.exists(&dst_path).await {
            return Err(OpError::Conflict(Self::path_of(
                &rn.user,
                &rn.container,
                &rn.new_name,
            )));
        }

        // 7. replicate, bunker, local rename
        let mut mutation =
            Mutation::new(MutationKind::ObjectRename(rn.clone()), self.replication_mode);
        let attempted = self.replication.replicate(&mut mutation).await?;
        self.bunker.dispatch(&mutation.kind);
        if let Err(err) = self.store.rename(&src_path, &dst_path).await {
            if mutation.mode == ReplicationMode::Sync {
                self.replication.compensate(&mutation.kind, &attempted).await;
            }
            return Err(err.into());
        }

        // 8. metadata follows the new name
        if !self.is_gateway(&rn.user) {
            self.spawn_metadata_rewrite(dst_path, rn.container.clone(), rn.new_name.clone());
        }

        Ok(ApiResponse::ok_json(&serde_json::json!({
            "url": Self::path_of(&rn.user, &rn.container, &rn.new_name),
        })))
    }
}
