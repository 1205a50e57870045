//! Container verbs: create, delete, move, rename, list, search.

use bytes::Bytes;
use http::{Method, StatusCode};

use common::obj::{MoveRequest, Obj, RenameRequest, ReplicationMode};

use crate::error::OpError;
use crate::externals::Capability;
use crate::ownership::{OpClass, Ownership};
use crate::replication::{Mutation, MutationKind};
use crate::state::Core;

use super::{ApiResponse, RequestContext};

impl Core {
    pub async fn create_container(
        &self,
        ctx: &RequestContext,
        obj: Obj,
    ) -> Result<ApiResponse, OpError> {
        // 1. capability
        self.require(Capability::WriteContainer, ctx).await?;

        // 2. ownership
        if let Ownership::Remote(owner) = self.resolver.resolve(&obj) {
            let req = self.relay_request(Method::PUT, &obj, ctx, Bytes::new());
            return self
                .resolver
                .forward(OpClass::Write, &owner, req, ctx.proxied)
                .await;
        }

        // 3. lock
        let _guard = self
            .locks
            .acquire(&obj.url_path(), ctx.user, &ctx.verb)
            .ok_or_else(|| OpError::ResourceInUse(obj.url_path()))?;

        // 4. container policy + audit
        self.policy_gate(Capability::WriteContainer, ctx, &obj.url_path())
            .await?;

        // 5. preconditions: parent exists, target does not
        if let Some(parent) = obj.container.parent() {
            if !parent.is_root() {
                let parent_dir =
                    Obj::disk_path_under(self.storage_root(), &obj.user, &parent, "");
                if !self.store.dir_exists(&parent_dir).await {
                    return Err(OpError::NotFound(format!(
                        "container {}",
                        Self::path_of(&obj.user, &parent, "")
                    )));
                }
            }
        }
        if self.store.dir_exists(&obj.disk_path).await {
            return Err(OpError::Conflict(obj.url_path()));
        }

        // 6. replicate, bunker, local create
        let mut mutation = Mutation::new(MutationKind::ContainerCreate(obj.clone()), obj.mode);
        self.replication.replicate(&mut mutation).await?;
        self.bunker.dispatch(&mutation.kind);
        self.store.create_dir(&obj.disk_path).await?;

        Ok(ApiResponse::json(
            StatusCode::CREATED,
            &serde_json::json!({ "url": obj.url_path() }),
        ))
    }

    pub async fn delete_container(
        &self,
        ctx: &RequestContext,
        obj: Obj,
    ) -> Result<ApiResponse, OpError> {
        // 1. capability
        self.require(Capability::DeleteContainer, ctx).await?;

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

        // 4. container policy + audit
        self.policy_gate(Capability::DeleteContainer, ctx, &obj.url_path())
            .await?;

        // 5. precondition
        if !self.store.dir_exists(&obj.disk_path).await {
            return Err(OpError::NotFound(obj.url_path()));
        }

        // 6. replicate, bunker, local delete
        let mut mutation = Mutation::new(MutationKind::ContainerDelete(obj.clone()), obj.mode);
        self.replication.replicate(&mut mutation).await?;
        self.bunker.dispatch(&mutation.kind);
        self.store.remove_dir(&obj.disk_path).await?;

        Ok(ApiResponse::empty(StatusCode::NO_CONTENT))
    }

    /// Move a container to a new full path. `mv.key` is empty for
    /// container moves; `mv.destination` is the container's new path,
    /// not its new parent.
    pub async fn move_container(
        &self,
        ctx: &RequestContext,
        mv: MoveRequest,
    ) -> Result<ApiResponse, OpError> {
        // 1. path safety
        mv.validate()?;
        if !mv.is_container() {
            return Err(OpError::BadRequest(
                "container move must not carry a key".into(),
            ));
        }
        if mv.source.is_root() {
            return Err(OpError::BadRequest("cannot move the root container".into()));
        }

        // 2. capability
        self.require(Capability::WriteContainer, ctx).await?;

        // 3. ownership
        let source = self.build_container(mv.user, mv.source.clone())?;
        if let Ownership::Remote(owner) = self.resolver.resolve(&source) {
            let req = self.relay_json("api/container/move", ctx, &mv)?;
            return self
                .resolver
                .forward(OpClass::Write, &owner, req, ctx.proxied)
                .await;
        }

        // 4. lock both paths
        let src_path = source.disk_path.clone();
        let dst_path = Obj::disk_path_under(self.storage_root(), &mv.user, &mv.destination, "");
        let src_key = src_path.to_string_lossy().into_owned();
        let dst_key = dst_path.to_string_lossy().into_owned();
        let _guard = self
            .locks
            .acquire_pair(&src_key, &dst_key, ctx.user, &ctx.verb)
            .ok_or_else(|| OpError::ResourceInUse(source.url_path()))?;

        // 5. policy + audit
        self.policy_gate(Capability::WriteContainer, ctx, &source.url_path())
            .await?;

        // 6. preconditions
        if !self.store.dir_exists(&src_path).await {
            return Err(OpError::NotFound(source.url_path()));
        }
        if let Some(parent) = mv.destination.parent() {
            if !parent.is_root() {
                let parent_dir =
                    Obj::disk_path_under(self.storage_root(), &mv.user, &parent, "");
                if !self.store.dir_exists(&parent_dir).await {
                    return Err(OpError::NotFound(format!(
                        "container {}",
                        Self::path_of(&mv.user, &parent, "")
                    )));
                }
            }
        }
        if self.store.dir_exists(&dst_path).await {
            return Err(OpError::Conflict(Self::path_of(&mv.user, &mv.destination, "")));
        }

        // 7. replicate, bunker, local move
        let mut mutation =
            Mutation::new(MutationKind::ContainerMove(mv.clone()), self.replication_mode);
        let attempted = self.replication.replicate(&mut mutation).await?;
        self.bunker.dispatch(&mutation.kind);
        if let Err(err) = self.store.rename(&src_path, &dst_path).await {
            if mutation.mode == ReplicationMode::Sync {
                self.replication.compensate(&mutation.kind, &attempted).await;
            }
            return Err(err.into());
        }

        Ok(ApiResponse::ok_json(&serde_json::json!({
            "url": Self::path_of(&mv.user, &mv.destination, ""),
        })))
    }

    pub async fn rename_container(
        &self,
        ctx: &RequestContext,
        rn: RenameRequest,
    ) -> Result<ApiResponse, OpError> {
        // 1. path safety
        rn.validate()?;

        // 2. capability
        self.require(Capability::WriteContainer, ctx).await?;

        // 3. ownership
        let source = self.build_container(rn.user, rn.container.child(&rn.old_name))?;
        if let Ownership::Remote(owner) = self.resolver.resolve(&source) {
            let req = self.relay_json("api/container/rename", ctx, &rn)?;
            return self
                .resolver
                .forward(OpClass::Write, &owner, req, ctx.proxied)
                .await;
        }

        // 4. lock both names
        let src_path = source.disk_path.clone();
        let dst_path = Obj::disk_path_under(
            self.storage_root(),
            &rn.user,
            &rn.container.child(&rn.new_name),
            "",
        );
        let src_key = src_path.to_string_lossy().into_owned();
        let dst_key = dst_path.to_string_lossy().into_owned();
        let _guard = self
            .locks
            .acquire_pair(&src_key, &dst_key, ctx.user, &ctx.verb)
            .ok_or_else(|| OpError::ResourceInUse(source.url_path()))?;

        // 5. policy + audit
        self.policy_gate(Capability::WriteContainer, ctx, &source.url_path())
            .await?;

        // 6. preconditions
        if !self.store.dir_exists(&src_path).await {
            return Err(OpError::NotFound(source.url_path()));
        }
        if self.store.dir_exists(&dst_path).await {
            return Err(OpError::Conflict(Self::path_of(
                &rn.user,
                &rn.container.child(&rn.new_name),
                "",
            )));
        }

        // 7. replicate, bunker, local rename
        let mut mutation = Mutation::new(
            MutationKind::ContainerRename(rn.clone()),
            self.replication_mode,
        );
        let attempted = self.replication.replicate(&mut mutation).await?;
        self.bunker.dispatch(&mutation.kind);
        if let Err(err) = self.store.rename(&src_path, &dst_path).await {
            if mutation.mode == ReplicationMode::Sync {
                self.replication.compensate(&mutation.kind, &attempted).await;
            }
            return Err(err.into());
        }

        Ok(ApiResponse::ok_json(&serde_json::json!({
            "url": Self::path_of(&rn.user, &rn.container.child(&rn.new_name), ""),
        })))
    }

    /// List the objects stored in a container.
    pub async fn list_container(
        &self,
        ctx: &RequestContext,
        obj: Obj,
    ) -> Result<ApiResponse, OpError> {
        // 1. capability
        self.require(Capability::ReadContainer, ctx).await?;

        // 2. ownership
        if let Ownership::Remote(owner) = self.resolver.resolve(&obj) {
            let req = self.relay_request(Method::GET, &obj, ctx, Bytes::new());
            return self
                .resolver
                .forward(OpClass::Read, &owner, req, ctx.proxied)
                .await;
        }

        // 3. container policy + audit
        self.policy_gate(Capability::ReadContainer, ctx, &obj.url_path())
            .await?;

        // 4. precondition and listing; the root container always exists
        if !obj.container.is_root() && !self.store.dir_exists(&obj.disk_path).await {
            return Err(OpError::NotFound(obj.url_path()));
        }
        let listed = self.store.list(&obj.disk_path).await?;
        Ok(ApiResponse::ok_json(&listed))
    }

    /// Search a container for objects whose key contains `q`
    /// (case-insensitive). Reads only; forwarded per the search policy
    /// when the data lives elsewhere.
    pub async fn search(&self, ctx: &RequestContext, obj: Obj) -> Result<ApiResponse, OpError> {
        // 1. capability
        self.require(Capability::Search, ctx).await?;

        // 2. ownership
        if let Ownership::Remote(owner) = self.resolver.resolve(&obj) {
            let mut req = self.relay_request(Method::GET, &obj, ctx, Bytes::new());
            req.path = format!("api/search/{}", obj.url_path());
            return self
                .resolver
                .forward(OpClass::Search, &owner, req, ctx.proxied)
                .await;
        }

        // 3. container policy + audit
        self.policy_gate(Capability::Search, ctx, &obj.url_path())
            .await?;

        // 4. list and filter
        let term = ctx
            .query
            .get("q")
            .map(|q| q.to_lowercase())
            .unwrap_or_default();
        let listed = self.store.list(&obj.disk_path).await?;
        let matches: Vec<_> = listed
            .into_iter()
            .filter(|meta| term.is_empty() || meta.key.to_lowercase().contains(&term))
            .collect();

        Ok(ApiResponse::ok_json(&matches))
    }
}
