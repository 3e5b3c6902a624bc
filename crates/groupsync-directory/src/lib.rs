//! Identity directory domain model and capability traits.
//!
//! This crate defines the group/user data model shared by the membership
//! reconciliation engine and the concrete directory backends, plus the
//! capability traits a backend must implement. The engine only ever talks
//! to a directory through these traits, so tests can substitute in-memory
//! implementations.

pub mod error;
pub mod path;
pub mod traits;
pub mod types;

pub use error::{DirectoryError, DirectoryResult};
pub use path::{GroupPath, InvalidGroupPath};
pub use traits::{Directory, DirectoryReader, DirectoryWriter};
pub use types::{flatten_hierarchy, Attributes, GroupNode, UserRecord};
