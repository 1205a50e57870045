//! The unit of work flowing through the routing/replication pipeline.
//!
//! - **[`ContainerPath`]**: validated, ordered container segments
//! - **[`Obj`]**: a resolved object or container reference, constructed
//!   per-request and discarded after the response is built
//! - **[`MoveRequest`]** / **[`RenameRequest`]**: structural-change
//!   descriptors, validated before any filesystem action
//! - **[`ReplicationMode`]**: closed enumeration of the durability modes

mod mode;
mod obj;
mod path;
mod requests;

pub use mode::ReplicationMode;
pub use obj::{Obj, ObjError, ObjWire};
pub use path::{validate_segment, ContainerPath, PathError};
pub use requests::{MoveRequest, RenameRequest};
