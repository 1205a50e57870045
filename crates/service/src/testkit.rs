//! In-process test harness: memory-backed collaborators, a scripted
//! peer transport, and a single-call mesh builder.
//!
//! Nothing here opens a socket; replication, forwarding, and locking
//! are exercised end-to-end against scripted peers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http::StatusCode;
use parking_lot::Mutex;
use uuid::Uuid;

use common::message::Message;
use common::obj::{ContainerPath, ReplicationMode};
use common::topology::{HttpEndpoint, Node, NodeId};

use crate::bunker::BunkerEndpoint;
use crate::config::{CoreConfig, UserAssignment};
use crate::externals::{
    AuditSink, Capability, Codec, ObjMetadata, ObjectStore, PermissionService, StoreError,
};
use crate::handlers::{ApiResponse, RequestContext};
use crate::ownership::ForwardingConfig;
use crate::peer::{PeerError, PeerTransport, ProxyRequest};
use crate::replication::MutationKind;
use crate::state::{Collaborators, Core};

/// Memory-backed object store with a switchable disk-full mode.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<PathBuf, Bytes>>,
    metadata: Mutex<HashMap<PathBuf, ObjMetadata>>,
    dirs: Mutex<HashSet<PathBuf>>,
    full: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent write fail with `DiskFull`.
    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    pub fn insert_dir(&self, path: &Path) {
        self.dirs.lock().insert(path.to_path_buf());
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    fn check_full(&self, path: &Path) -> Result<(), StoreError> {
        if self.full.load(Ordering::SeqCst) {
            return Err(StoreError::DiskFull(path.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn read_metadata(&self, path: &Path) -> Result<Option<ObjMetadata>, StoreError> {
        Ok(self.metadata.lock().get(path).cloned())
    }

    async fn write_metadata(&self, path: &Path, meta: &ObjMetadata) -> Result<(), StoreError> {
        self.check_full(path)?;
        self.metadata.lock().insert(path.to_path_buf(), meta.clone());
        Ok(())
    }

    async fn read_body(&self, path: &Path) -> Result<Bytes, StoreError> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))
    }

    async fn write(&self, path: &Path, body: Bytes) -> Result<(), StoreError> {
        self.check_full(path)?;
        self.files.lock().insert(path.to_path_buf(), body);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<(), StoreError> {
        self.metadata.lock().remove(path);
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), StoreError> {
        let mut files = self.files.lock();
        if let Some(body) = files.remove(from) {
            files.insert(to.to_path_buf(), body);
            let mut metadata = self.metadata.lock();
            if let Some(meta) = metadata.remove(from) {
                metadata.insert(to.to_path_buf(), meta);
            }
            return Ok(());
        }
        drop(files);

        // directory rename: re-prefix everything underneath
        let mut dirs = self.dirs.lock();
        if !dirs.remove(from) {
            return Err(StoreError::NotFound(from.to_path_buf()));
        }
        dirs.insert(to.to_path_buf());
        let moved: Vec<PathBuf> = dirs
            .iter()
            .filter(|d| d.starts_with(from))
            .cloned()
            .collect();
        for dir in moved {
            dirs.remove(&dir);
            if let Ok(rest) = dir.strip_prefix(from) {
                dirs.insert(to.join(rest));
            }
        }
        let mut files = self.files.lock();
        let moved: Vec<PathBuf> = files
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for path in moved {
            if let (Some(body), Ok(rest)) = (files.remove(&path), path.strip_prefix(from)) {
                files.insert(to.join(rest), body);
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    async fn dir_exists(&self, path: &Path) -> bool {
        if self.dirs.lock().contains(path) {
            return true;
        }
        // implicit: a directory exists if anything lives under it
        self.files
            .lock()
            .keys()
            .any(|p| p.starts_with(path) && p != path)
    }

    async fn create_dir(&self, path: &Path) -> Result<(), StoreError> {
        self.check_full(path)?;
        self.dirs.lock().insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), StoreError> {
        let mut dirs = self.dirs.lock();
        if !dirs.remove(path) {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        dirs.retain(|d| !d.starts_with(path));
        self.files.lock().retain(|p, _| !p.starts_with(path));
        self.metadata.lock().retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn list(&self, prefix: &Path) -> Result<Vec<ObjMetadata>, StoreError> {
        let metadata = self.metadata.lock();
        let mut listed = Vec::new();
        for (path, body) in self.files.lock().iter() {
            if !path.starts_with(prefix) {
                continue;
            }
            if let Some(meta) = metadata.get(path) {
                listed.push(meta.clone());
            } else {
                listed.push(ObjMetadata {
                    key: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    container: ContainerPath::root(),
                    size: body.len() as u64,
                    modified: Utc::now(),
                    content_type: None,
                    compressed: false,
                    encrypted: false,
                });
            }
        }
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }
}

/// One recorded peer call.
#[derive(Debug, Clone)]
pub struct SentCall {
    pub node: NodeId,
    pub subject: String,
    pub user: Uuid,
    pub path: String,
}

/// Scripted transport: records every call, fails per-node on demand,
/// and answers proxy relays from a canned response table.
#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<SentCall>>,
    delivered: Mutex<Vec<(NodeId, Message)>>,
    failing: Mutex<HashSet<NodeId>>,
    proxy_responses: Mutex<HashMap<NodeId, (StatusCode, Bytes)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_node(&self, node: NodeId) {
        self.failing.lock().insert(node);
    }

    pub fn recover_node(&self, node: NodeId) {
        self.failing.lock().remove(&node);
    }

    pub fn script_proxy(&self, node: NodeId, status: StatusCode, body: &[u8]) {
        self.proxy_responses
            .lock()
            .insert(node, (status, Bytes::copy_from_slice(body)));
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, node: NodeId) -> Vec<SentCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.node == node)
            .cloned()
            .collect()
    }

    pub fn delivered(&self) -> Vec<(NodeId, Message)> {
        self.delivered.lock().clone()
    }

    fn unreachable(node: &Node) -> PeerError {
        PeerError::Unreachable {
            node: node.id,
            reason: "scripted failure".into(),
        }
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn send(&self, node: &Node, mutation: &MutationKind) -> Result<(), PeerError> {
        // attempts are recorded even when scripted to fail, so tests
        // can assert what a dead node was asked to do
        self.calls.lock().push(SentCall {
            node: node.id,
            subject: mutation.subject().to_string(),
            user: mutation.user(),
            path: mutation.url_path(),
        });
        if self.failing.lock().contains(&node.id) {
            return Err(Self::unreachable(node));
        }
        Ok(())
    }

    async fn deliver(&self, node: &Node, msg: &Message) -> Result<(), PeerError> {
        if self.failing.lock().contains(&node.id) {
            return Err(Self::unreachable(node));
        }
        self.delivered.lock().push((node.id, msg.clone()));
        Ok(())
    }

    async fn proxy(&self, node: &Node, _req: &ProxyRequest) -> Result<ApiResponse, PeerError> {
        if self.failing.lock().contains(&node.id) {
            return Err(Self::unreachable(node));
        }
        match self.proxy_responses.lock().get(&node.id) {
            Some((status, body)) => Ok(ApiResponse {
                status: *status,
                headers: http::HeaderMap::new(),
                body: body.clone(),
            }),
            None => Err(Self::unreachable(node)),
        }
    }
}

/// Permission service with deniable capabilities and per-path policy
/// denials.
#[derive(Default)]
pub struct StaticPermissions {
    denied_caps: Mutex<HashSet<Capability>>,
    denied_paths: Mutex<HashSet<String>>,
}

impl StaticPermissions {
    pub fn allow_all() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, capability: Capability) {
        self.denied_caps.lock().insert(capability);
    }

    /// Deny the post-lock policy check for one resource path.
    pub fn deny_path(&self, path: &str) {
        self.denied_paths.lock().insert(path.to_string());
    }
}

#[async_trait]
impl PermissionService for StaticPermissions {
    async fn check(
        &self,
        capability: Capability,
        _ctx: &RequestContext,
        policy: Option<&str>,
    ) -> bool {
        if self.denied_caps.lock().contains(&capability) {
            return false;
        }
        if let Some(path) = policy {
            if self.denied_paths.lock().contains(path) {
                return false;
            }
        }
        true
    }
}

/// Audit sink that keeps its lines for assertions.
#[derive(Default)]
pub struct MemoryAudit {
    lines: Mutex<Vec<(String, String)>>,
}

impl MemoryAudit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().clone()
    }
}

impl AuditSink for MemoryAudit {
    fn append(&self, log: &str, message: &str) {
        self.lines.lock().push((log.to_string(), message.to_string()));
    }
}

/// Pass-through codec.
pub struct NopCodec;

impl Codec for NopCodec {
    fn encode(&self, data: Bytes) -> anyhow::Result<Bytes> {
        Ok(data)
    }

    fn decode(&self, data: Bytes) -> anyhow::Result<Bytes> {
        Ok(data)
    }
}

/// Byte-reversing codec: encoding is observable in the stored bytes and
/// a missed decode is observable in the response.
pub struct MirrorCodec;

impl Codec for MirrorCodec {
    fn encode(&self, data: Bytes) -> anyhow::Result<Bytes> {
        let reversed: Vec<u8> = data.iter().rev().copied().collect();
        Ok(Bytes::from(reversed))
    }

    fn decode(&self, data: Bytes) -> anyhow::Result<Bytes> {
        self.encode(data)
    }
}

pub fn test_node(id: NodeId) -> Node {
    Node {
        id,
        name: format!("node-{id}"),
        http: HttpEndpoint {
            host: format!("node{id}.test"),
            port: 9000 + id as u16,
            tls: false,
        },
        tcp: None,
        replicas: vec![],
    }
}

/// A single node's core wired to memory collaborators. Node 1 is the
/// local node; `user` is assigned here, `remote_user` to node 2.
pub struct TestMesh {
    pub core: Arc<Core>,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<ScriptedTransport>,
    pub permissions: Arc<StaticPermissions>,
    pub audit: Arc<MemoryAudit>,
    pub user: Uuid,
    pub remote_user: Uuid,
    _mailbox_dir: tempfile::TempDir,
}

impl TestMesh {
    pub fn builder() -> TestMeshBuilder {
        TestMeshBuilder::default()
    }

    pub fn mailbox_dir(&self, node: NodeId) -> PathBuf {
        self.core.mailbox().node_dir(node)
    }

    pub fn ctx(&self, verb: &str) -> RequestContext {
        RequestContext::new(Some(self.user), verb)
    }
}

pub struct TestMeshBuilder {
    mode: ReplicationMode,
    replica_count: usize,
    forwarding: ForwardingConfig,
    bunkers: Vec<BunkerEndpoint>,
    max_object_bytes: usize,
    owner_replicas: Vec<NodeId>,
    mirror_compression: bool,
}

impl Default for TestMeshBuilder {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::None,
            replica_count: 0,
            forwarding: ForwardingConfig::default(),
            bunkers: Vec::new(),
            max_object_bytes: 1024 * 1024,
            owner_replicas: Vec::new(),
            mirror_compression: false,
        }
    }
}

impl TestMeshBuilder {
    pub fn mode(mut self, mode: ReplicationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replicas are nodes 2, 3, 4 in that order (max 3).
    pub fn replicas(mut self, count: usize) -> Self {
        self.replica_count = count.min(3);
        self
    }

    pub fn forwarding(mut self, forwarding: ForwardingConfig) -> Self {
        self.forwarding = forwarding;
        self
    }

    pub fn bunker(mut self, name: &str, node: Node, account: Uuid) -> Self {
        self.bunkers.push(BunkerEndpoint {
            name: name.to_string(),
            node,
            account,
        });
        self
    }

    pub fn max_object_bytes(mut self, max: usize) -> Self {
        self.max_object_bytes = max;
        self
    }

    /// Read-replicas of node 2, the remote owner.
    pub fn owner_replicas(mut self, replicas: Vec<NodeId>) -> Self {
        self.owner_replicas = replicas;
        self
    }

    /// Use the byte-reversing compression codec so codec handling
    /// shows up in stored bytes and responses.
    pub fn mirror_compression(mut self) -> Self {
        self.mirror_compression = true;
        self
    }

    pub fn build(self) -> TestMesh {
        let mailbox_dir = tempfile::tempdir().expect("tempdir for mailbox");
        let user = Uuid::new_v4();
        let remote_user = Uuid::new_v4();

        let mut nodes: Vec<Node> = (1..=4).map(test_node).collect();
        nodes[1].replicas = self.owner_replicas;

        let config = CoreConfig {
            node_id: 1,
            nodes,
            replicas: (2..2 + self.replica_count as NodeId).collect(),
            replication_mode: self.mode,
            forwarding: self.forwarding,
            storage_root: PathBuf::from("/store"),
            mailbox_root: mailbox_dir.path().to_path_buf(),
            admin_api_key: "test-admin-key".into(),
            max_object_bytes: self.max_object_bytes,
            peer_timeout_secs: 1,
            peer_throughput_floor: 1024 * 1024,
            drain_interval_secs: 3600,
            bunkers: self.bunkers,
            users: vec![
                UserAssignment {
                    id: user,
                    node: 1,
                    gateway: false,
                },
                UserAssignment {
                    id: remote_user,
                    node: 2,
                    gateway: false,
                },
            ],
        };

        let store = MemoryStore::new();
        let transport = ScriptedTransport::new();
        let permissions = StaticPermissions::allow_all();
        let audit = MemoryAudit::new();
        let compression: Arc<dyn Codec> = if self.mirror_compression {
            Arc::new(MirrorCodec)
        } else {
            Arc::new(NopCodec)
        };

        let core = Core::from_config(
            &config,
            Collaborators {
                store: store.clone(),
                permissions: permissions.clone(),
                audit: audit.clone(),
                compression,
                encryption: Arc::new(NopCodec),
                transport: transport.clone(),
            },
        )
        .expect("core setup");

        TestMesh {
            core,
            store,
            transport,
            permissions,
            audit,
            user,
            remote_user,
            _mailbox_dir: mailbox_dir,
        }
    }
}
