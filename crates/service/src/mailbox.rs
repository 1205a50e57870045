//! Durable mailbox for undelivered inter-node mutations.
//!
//! Append-only directory per destination node under a configured root:
//! `root/<node-id>/<timestamp>-<uuid>.msg`, one encoded [`Message`]
//! per file, written atomically (tmp then rename) so a crash never
//! leaves a half-readable entry. The [`DrainWorker`] delivers pending
//! entries on an interval, entirely off the request path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::message::{Message, MessageError};
use common::topology::{NodeId, Topology};
use uuid::Uuid;

use crate::peer::PeerTransport;

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queued message is corrupt: {0}")]
    Corrupt(#[from] MessageError),
}

#[derive(Debug, Clone)]
pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn node_dir(&self, node: NodeId) -> PathBuf {
        self.root.join(node.to_string())
    }

    /// Append a message to its destination's queue directory. The file
    /// name sorts by enqueue time so `pending` drains oldest first.
    pub async fn enqueue(&self, msg: &Message) -> Result<PathBuf, MailboxError> {
        let dir = self.node_dir(msg.to);
        tokio::fs::create_dir_all(&dir).await?;

        let encoded = msg.encode().map_err(MailboxError::Corrupt)?;
        // millis alone can collide under load, so a process-wide
        // sequence keeps file names strictly ordered
        static SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let name = format!(
            "{:020}-{seq:08}-{}.msg",
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4()
        );
        let tmp = dir.join(format!("{name}.tmp"));
        let path = dir.join(name);

        tokio::fs::write(&tmp, &encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(to = msg.to, subject = %msg.subject, "queued message at {}", path.display());
        Ok(path)
    }

    /// Pending queue files for a node, oldest first.
    pub async fn pending(&self, node: NodeId) -> Result<Vec<PathBuf>, MailboxError> {
        let dir = self.node_dir(node);
        let mut entries = Vec::new();
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "msg") {
                entries.push(path);
            }
        }
        entries.sort();
        Ok(entries)
    }

    pub async fn read(&self, path: &Path) -> Result<Message, MailboxError> {
        let raw = tokio::fs::read(path).await?;
        Ok(Message::decode(&raw)?)
    }

    pub async fn remove(&self, path: &Path) -> Result<(), MailboxError> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}

/// Periodic delivery of queued messages. One failed delivery parks the
/// rest of that node's queue until the next tick, preserving order.
pub struct DrainWorker {
    mailbox: Arc<Mailbox>,
    topology: Arc<Topology>,
    transport: Arc<dyn PeerTransport>,
    interval: Duration,
}

impl DrainWorker {
    pub fn new(
        mailbox: Arc<Mailbox>,
        topology: Arc<Topology>,
        transport: Arc<dyn PeerTransport>,
        interval: Duration,
    ) -> Self {
        Self {
            mailbox,
            topology,
            transport,
            interval,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.drain_once().await;
            }
        })
    }

    /// One delivery pass over every replica's queue.
    pub async fn drain_once(&self) {
        for replica in self.topology.replicas() {
            let pending = match self.mailbox.pending(replica.id).await {
                Ok(pending) => pending,
                Err(err) => {
                    tracing::error!(node = replica.id, "cannot list queue: {err}");
                    continue;
                }
            };
            for path in pending {
                let msg = match self.mailbox.read(&path).await {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::error!("skipping corrupt queue entry {}: {err}", path.display());
                        continue;
                    }
                };
                match self.transport.deliver(&replica, &msg).await {
                    Ok(()) => {
                        tracing::info!(
                            node = replica.id,
                            subject = %msg.subject,
                            "drained queued message"
                        );
                        if let Err(err) = self.mailbox.remove(&path).await {
                            tracing::error!(
                                "delivered but could not remove {}: {err}",
                                path.display()
                            );
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            node = replica.id,
                            "delivery still failing, keeping queue: {err}"
                        );
                        break;
                    }
                }
            }
        }
    }
}
