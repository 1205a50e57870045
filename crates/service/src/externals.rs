//! Seams to the node's external collaborators.
//!
//! The routing/replication core never reads disks, checks API keys, or
//! runs codecs itself; it talks to these traits. Production bindings
//! live outside this crate, in-memory bindings for tests live in
//! [`crate::testkit`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::obj::ContainerPath;

use crate::handlers::RequestContext;

/// A capability granted to a caller, read/write/delete crossed with
/// object/container, plus search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ReadObject,
    WriteObject,
    DeleteObject,
    ReadContainer,
    WriteContainer,
    DeleteContainer,
    Search,
}

/// Decides whether a caller may perform an operation.
///
/// Called twice per mutating verb: once for the raw capability, once
/// (after locking) with the target's own policy attached.
#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn check(
        &self,
        capability: Capability,
        ctx: &RequestContext,
        policy: Option<&str>,
    ) -> bool;
}

/// Fire-and-forget audit trail. Failures are the sink's problem.
pub trait AuditSink: Send + Sync {
    fn append(&self, log: &str, message: &str);
}

/// Stored metadata for an object, normalized after structural changes
/// by the background rewrite task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjMetadata {
    pub key: String,
    pub container: ContainerPath,
    pub size: u64,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub compressed: bool,
    pub encrypted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(PathBuf),
    /// Disk-full is surfaced distinctly so the orchestrator can answer
    /// storage-exhausted instead of a generic failure.
    #[error("storage exhausted writing {0}")]
    DiskFull(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent object store adapter.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read_metadata(&self, path: &Path) -> Result<Option<ObjMetadata>, StoreError>;
    async fn write_metadata(&self, path: &Path, meta: &ObjMetadata) -> Result<(), StoreError>;
    async fn read_body(&self, path: &Path) -> Result<Bytes, StoreError>;
    async fn write(&self, path: &Path, body: Bytes) -> Result<(), StoreError>;
    async fn delete(&self, path: &Path) -> Result<(), StoreError>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<(), StoreError>;
    async fn exists(&self, path: &Path) -> bool;
    async fn dir_exists(&self, path: &Path) -> bool;
    async fn create_dir(&self, path: &Path) -> Result<(), StoreError>;
    /// Remove a directory and everything under it.
    async fn remove_dir(&self, path: &Path) -> Result<(), StoreError>;
    /// Metadata of every object under `prefix`, for search.
    async fn list(&self, prefix: &Path) -> Result<Vec<ObjMetadata>, StoreError>;
}

/// Compression or encryption adapter. Invoked only by orchestrators;
/// the routing/replication core moves bytes opaquely.
pub trait Codec: Send + Sync {
    fn encode(&self, data: Bytes) -> anyhow::Result<Bytes>;
    fn decode(&self, data: Bytes) -> anyhow::Result<Bytes>;
}
