//! Admin API wire representations.
//!
//! Only the fields the reconciler needs are modeled; unknown fields are
//! ignored on deserialization, and `GroupRepresentation` round-trips the
//! full group body for attribute updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use groupsync_directory::{Attributes, GroupNode, GroupPath, InvalidGroupPath, UserRecord};

/// A group as the admin API represents it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupRepresentation {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub sub_groups: Vec<GroupRepresentation>,
    /// Fields we do not model but must preserve on update.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl GroupRepresentation {
    /// Convert into the domain model, dropping server-side ids.
    pub fn into_node(self) -> Result<GroupNode, InvalidGroupPath> {
        let path = GroupPath::new(&self.path)?;
        let sub_groups = self
            .sub_groups
            .into_iter()
            .map(GroupRepresentation::into_node)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GroupNode {
            name: self.name,
            path,
            attributes: Attributes(self.attributes),
            sub_groups,
        })
    }
}

/// A user as the admin API represents it.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserRepresentation {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl UserRepresentation {
    pub fn into_record(self) -> UserRecord {
        UserRecord {
            username: self.username,
            email: self.email,
            attributes: Attributes(self.attributes),
        }
    }
}

/// Response of the OAuth2 token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    60
}
