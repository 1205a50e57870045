use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path segment")]
    EmptySegment,
    #[error("path segment contains unsafe character: {0:?}")]
    UnsafeCharacter(char),
    #[error("path segment is a traversal token: {0}")]
    Traversal(String),
}

/// An ordered list of container path segments.
///
/// The root container is the empty path. Segments are validated before
/// any filesystem action: separators, NUL, control characters, and the
/// dot traversal tokens are rejected so a request path can never escape
/// the user's storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContainerPath(Vec<String>);

impl ContainerPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parse a slash-separated container path. Empty runs of slashes
    /// are tolerated; segment validation happens in [`validate`].
    ///
    /// [`validate`]: ContainerPath::validate
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn validate(&self) -> Result<(), PathError> {
        for segment in &self.0 {
            validate_segment(segment)?;
        }
        Ok(())
    }

    /* Getters */

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<ContainerPath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn child(&self, segment: &str) -> ContainerPath {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    /// Prepend a segment, used by the bunker remap where the original
    /// user id becomes the first segment under the bunker account.
    pub fn prefixed(&self, segment: &str) -> ContainerPath {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(segment.to_string());
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }
}

impl fmt::Display for ContainerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Reject path-traversal-unsafe segments.
pub fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if segment == "." || segment == ".." {
        return Err(PathError::Traversal(segment.to_string()));
    }
    for c in segment.chars() {
        if c == '/' || c == '\\' || c == '\0' || c.is_control() {
            return Err(PathError::UnsafeCharacter(c));
        }
    }
    Ok(())
}
