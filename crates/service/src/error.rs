//! Request-level error taxonomy.
//!
//! Every orchestrator step returns one of these; the mapping to an HTTP
//! status lives in [`OpError::status`] so the external server binding
//! stays a one-liner. Lock-acquisition failure gets its own variant
//! (`ResourceInUse`, 423) distinct from `Conflict` so clients can back
//! off and retry themselves -- the server never retries internally.

use http::StatusCode;

use common::obj::PathError;

use crate::externals::StoreError;
use crate::peer::PeerError;
use crate::replication::ReplicationError;

#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("resource in use: {0}")]
    ResourceInUse(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("proxying disabled for this operation class")]
    ProxyingDisabled,
    #[error("peer unavailable: {0}")]
    Unavailable(String),
    #[error("storage exhausted: {0}")]
    StorageExhausted(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OpError {
    pub fn status(&self) -> StatusCode {
        match self {
            OpError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            OpError::NotFound(_) => StatusCode::NOT_FOUND,
            OpError::Conflict(_) => StatusCode::CONFLICT,
            OpError::ResourceInUse(_) => StatusCode::LOCKED,
            OpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OpError::ProxyingDisabled => StatusCode::NOT_IMPLEMENTED,
            // distinct from NOT_FOUND so clients can tell topology
            // misconfiguration from missing data
            OpError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            OpError::StorageExhausted(_) => StatusCode::INSUFFICIENT_STORAGE,
            OpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PathError> for OpError {
    fn from(err: PathError) -> Self {
        OpError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for OpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => OpError::NotFound(path.display().to_string()),
            StoreError::DiskFull(path) => OpError::StorageExhausted(path.display().to_string()),
            StoreError::Io(e) => OpError::Internal(e.into()),
        }
    }
}

impl From<PeerError> for OpError {
    fn from(err: PeerError) -> Self {
        OpError::Unavailable(err.to_string())
    }
}

impl From<ReplicationError> for OpError {
    fn from(err: ReplicationError) -> Self {
        OpError::Unavailable(err.to_string())
    }
}
