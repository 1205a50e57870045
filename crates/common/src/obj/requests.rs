use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::path::{validate_segment, ContainerPath, PathError};

/// Move an object (or a whole container when `key` is empty) from one
/// container to another. Immutable once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    pub user: Uuid,
    pub source: ContainerPath,
    pub destination: ContainerPath,
    /// The moved key; empty when moving a container.
    #[serde(default)]
    pub key: String,
}

impl MoveRequest {
    /// Check every path component for traversal-unsafe characters.
    /// Runs before any filesystem action.
    pub fn validate(&self) -> Result<(), PathError> {
        self.source.validate()?;
        self.destination.validate()?;
        if !self.key.is_empty() {
            validate_segment(&self.key)?;
        }
        Ok(())
    }

    pub fn is_container(&self) -> bool {
        self.key.is_empty()
    }
}

/// Rename an object (or a container when `old_name` addresses one)
/// inside a single container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub user: Uuid,
    pub container: ContainerPath,
    pub old_name: String,
    pub new_name: String,
}

impl RenameRequest {
    pub fn validate(&self) -> Result<(), PathError> {
        self.container.validate()?;
        validate_segment(&self.old_name)?;
        validate_segment(&self.new_name)?;
        Ok(())
    }
}
