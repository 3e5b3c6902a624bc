//! Deferred-removal state store.
//!
//! To implement the removal grace period, each target group persists a
//! map of username to the timestamp at which the user was first observed
//! as extraneous. The map is stored as a JSON object in a single group
//! attribute; every mutation re-serializes the whole map and writes it
//! back in one call, which is the unit of atomicity. A single writer per
//! target group is assumed; concurrent runs against the same target must
//! be serialized by the operator.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use groupsync_directory::{Directory, GroupPath};

use crate::error::{SyncError, SyncResult};

/// Group attribute holding the deferred-removal map.
pub const DEFERRAL_ATTR: &str = "synchronized_group_removal_scheduled";

type DeferralMap = BTreeMap<String, DateTime<Utc>>;

/// Decode the persisted attribute value into a deferral map.
fn parse_blob(blob: &str) -> Result<DeferralMap, String> {
    let raw: BTreeMap<String, String> =
        serde_json::from_str(blob).map_err(|e| format!("not a JSON object of strings: {e}"))?;
    raw.into_iter()
        .map(|(username, stamp)| {
            DateTime::parse_from_rfc3339(&stamp)
                .map(|dt| (username.clone(), dt.with_timezone(&Utc)))
                .map_err(|e| format!("bad timestamp {stamp:?} for {username}: {e}"))
        })
        .collect()
}

/// Encode a deferral map for persistence; `None` when the map is empty,
/// which deletes the attribute.
fn encode_blob(map: &DeferralMap) -> Option<String> {
    if map.is_empty() {
        return None;
    }
    let raw: BTreeMap<&str, String> = map
        .iter()
        .map(|(username, at)| {
            (
                username.as_str(),
                at.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
        })
        .collect();
    // Serializing a string map cannot fail.
    serde_json::to_string(&raw).ok()
}

/// Per-target-group deferred-removal store, scoped to one run.
///
/// The map is loaded lazily on first access and cached for the run's
/// duration; `record` and `clear` write through immediately.
pub struct DeferralStore<'a> {
    directory: &'a dyn Directory,
    target: &'a GroupPath,
    map: Option<DeferralMap>,
}

impl<'a> DeferralStore<'a> {
    /// Create a store for one target group.
    pub fn new(directory: &'a dyn Directory, target: &'a GroupPath) -> Self {
        Self {
            directory,
            target,
            map: None,
        }
    }

    async fn load(&mut self) -> SyncResult<&mut DeferralMap> {
        if self.map.is_none() {
            let group = self.directory.group_by_path(self.target).await?;
            let map = match group.attributes.first(DEFERRAL_ATTR) {
                Some(blob) => parse_blob(blob)
                    .map_err(|msg| SyncError::state(self.target.clone(), msg))?,
                None => DeferralMap::new(),
            };
            debug!(target = %self.target, entries = map.len(), "loaded deferred-removal state");
            self.map = Some(map);
        }
        Ok(self.map.get_or_insert_with(DeferralMap::new))
    }

    /// When the user was first observed as extraneous, if recorded.
    pub async fn scheduled_at(&mut self, username: &str) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.load().await?.get(username).copied())
    }

    /// Record a user as extraneous at `at` and persist immediately.
    pub async fn record(&mut self, username: &str, at: DateTime<Utc>) -> SyncResult<()> {
        self.load().await?.insert(username.to_string(), at);
        self.persist().await
    }

    /// Clear a user's record, if any, and persist. Returns whether a
    /// record existed; clearing an absent record is a no-op.
    pub async fn clear(&mut self, username: &str) -> SyncResult<bool> {
        let removed = self.load().await?.remove(username).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn persist(&mut self) -> SyncResult<()> {
        let Some(map) = self.map.as_ref() else {
            return Ok(());
        };
        let blob = encode_blob(map);
        self.directory
            .set_group_attribute(self.target, DEFERRAL_ATTR, blob)
            .await?;
        Ok(())
    }
}
