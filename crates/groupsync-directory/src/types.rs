//! Directory entity types.
//!
//! Groups carry multi-valued string attributes on the wire; [`Attributes`]
//! keeps that shape and offers scalar accessors for the common
//! single-valued case.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::GroupPath;

/// Attribute map of a directory entity (group or user).
///
/// Attribute values are lists of strings, matching the directory wire
/// format. Most configuration attributes are single-valued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(pub BTreeMap<String, Vec<String>>);

impl Attributes {
    /// Create an empty attribute map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of an attribute, if present and non-empty.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Replace an attribute with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), vec![value.into()]);
    }

    /// Remove an attribute entirely. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.0.remove(name).is_some()
    }

    /// Whether an attribute is present with at least one non-empty value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.first(name).is_some()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Attributes(
            iter.into_iter()
                .map(|(k, v)| (k.into(), vec![v.into()]))
                .collect(),
        )
    }
}

/// One group in the directory hierarchy.
///
/// Serialized field names follow the directory wire format (`subGroups`)
/// so that operator-authored path queries evaluate against the same
/// document shape the directory itself returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNode {
    /// Group name (last path segment).
    pub name: String,
    /// Absolute path of the group.
    pub path: GroupPath,
    /// Custom attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Nested child groups.
    #[serde(default)]
    pub sub_groups: Vec<GroupNode>,
}

impl GroupNode {
    /// Create a leaf node with no attributes.
    pub fn new(path: GroupPath) -> Self {
        Self {
            name: path.name().to_string(),
            path,
            attributes: Attributes::new(),
            sub_groups: Vec::new(),
        }
    }

    /// Every node in this subtree, self first, in depth-first order.
    pub fn flatten(&self) -> Vec<&GroupNode> {
        let mut nodes = vec![self];
        for child in &self.sub_groups {
            nodes.extend(child.flatten());
        }
        nodes
    }

    /// Find a node by path anywhere in this subtree.
    #[must_use]
    pub fn find(&self, path: &GroupPath) -> Option<&GroupNode> {
        if &self.path == path {
            return Some(self);
        }
        if !self.path.contains(path) {
            return None;
        }
        self.sub_groups.iter().find_map(|child| child.find(path))
    }
}

/// Flatten a forest of root groups into a single depth-first list.
pub fn flatten_hierarchy(roots: &[GroupNode]) -> Vec<&GroupNode> {
    roots.iter().flat_map(GroupNode::flatten).collect()
}

/// A user record as read from the directory.
///
/// User lifecycle is owned entirely by the directory; the engine only
/// reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique, immutable username.
    pub username: String,
    /// Primary email address, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Custom attributes.
    #[serde(default)]
    pub attributes: Attributes,
}
