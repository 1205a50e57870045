/**
 * Store-and-forward message envelope.
 *  One codec for both the wire and the
 *  on-disk retry queue.
 */
pub mod message;
/**
 * The unit of work: object/container references,
 *  structural-change requests, and the replication
 *  mode attached to a mutation.
 */
pub mod obj;
/**
 * Static mesh description: nodes, endpoints,
 *  and the replica set of the current node.
 * Read-mostly after load, shared by reference.
 */
pub mod topology;

pub mod prelude {
    pub use crate::message::{Message, MessageMeta};
    pub use crate::obj::{ContainerPath, MoveRequest, Obj, RenameRequest, ReplicationMode};
    pub use crate::topology::{Node, NodeId, Topology};
}
