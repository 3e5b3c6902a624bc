//! Capability traits for identity directory backends.
//!
//! The reconciliation engine consumes a directory exclusively through
//! these traits. Reads and writes are split so that read-only tooling can
//! depend on the narrower capability.

use async_trait::async_trait;

use crate::error::DirectoryResult;
use crate::path::GroupPath;
use crate::types::{GroupNode, UserRecord};

/// Read access to the group hierarchy, memberships and users.
#[async_trait]
pub trait DirectoryReader: Send + Sync {
    /// Fetch the complete group hierarchy as a forest of root groups.
    ///
    /// Callers are expected to treat the result as a snapshot scoped to a
    /// single reconciliation run and never cache it beyond that.
    async fn group_hierarchy(&self) -> DirectoryResult<Vec<GroupNode>>;

    /// Fetch one group (with attributes) by its path.
    async fn group_by_path(&self, path: &GroupPath) -> DirectoryResult<GroupNode>;

    /// Usernames of the direct members of a group.
    async fn group_members(&self, path: &GroupPath) -> DirectoryResult<Vec<String>>;

    /// Fetch a user record by username.
    async fn user(&self, username: &str) -> DirectoryResult<UserRecord>;
}

/// Write access to group membership and group attributes.
///
/// The engine never creates or deletes groups or users.
#[async_trait]
pub trait DirectoryWriter: Send + Sync {
    /// Add a user to a group.
    async fn add_member(&self, path: &GroupPath, username: &str) -> DirectoryResult<()>;

    /// Remove a user from a group.
    async fn remove_member(&self, path: &GroupPath, username: &str) -> DirectoryResult<()>;

    /// Write or delete a single-valued group attribute.
    ///
    /// `Some(value)` replaces the attribute in one call; `None` deletes
    /// it. Used for the deferred-removal state blob, which must be
    /// replaced whole on every mutation.
    async fn set_group_attribute(
        &self,
        path: &GroupPath,
        name: &str,
        value: Option<String>,
    ) -> DirectoryResult<()>;
}

/// Full directory access.
pub trait Directory: DirectoryReader + DirectoryWriter {}

impl<T> Directory for T where T: DirectoryReader + DirectoryWriter {}
