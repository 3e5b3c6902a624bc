//! Hierarchical group paths.
//!
//! A group is identified by an absolute path such as `/mail/authorlist`.
//! Segments are limited to letters, digits, `-` and `_`; child paths are
//! prefixed by their parent path plus `/`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string is not a well-formed group path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a well-formed group path: {value:?}")]
pub struct InvalidGroupPath {
    /// The offending string.
    pub value: String,
}

/// Validated absolute path of a group in the directory hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupPath(String);

impl GroupPath {
    /// Parse and validate a group path.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidGroupPath> {
        let value = value.into();
        if is_well_formed(&value) {
            Ok(GroupPath(value))
        } else {
            Err(InvalidGroupPath { value })
        }
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment (the group's own name).
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Path of the parent group, or `None` for a top-level group.
    #[must_use]
    pub fn parent(&self) -> Option<GroupPath> {
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            None
        } else {
            Some(GroupPath(self.0[..idx].to_string()))
        }
    }

    /// Whether `other` is this path or nested anywhere beneath it.
    #[must_use]
    pub fn contains(&self, other: &GroupPath) -> bool {
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }
}

fn is_well_formed(value: &str) -> bool {
    if !value.starts_with('/') || value.ends_with('/') {
        return false;
    }
    value[1..].split('/').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

impl std::fmt::Display for GroupPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for GroupPath {
    type Err = InvalidGroupPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GroupPath::new(s)
    }
}

impl TryFrom<String> for GroupPath {
    type Error = InvalidGroupPath;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GroupPath::new(value)
    }
}

impl From<GroupPath> for String {
    fn from(path: GroupPath) -> Self {
        path.0
    }
}

impl AsRef<str> for GroupPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
