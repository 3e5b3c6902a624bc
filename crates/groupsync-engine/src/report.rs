//! Per-run reporting.
//!
//! Every decision the reconciler takes (or, in dry-run mode, would have
//! taken) is recorded as a [`SyncAction`]. The report is the engine's
//! user-visible output and what the tests assert against.

use chrono::{DateTime, Utc};
use serde::Serialize;

use groupsync_directory::GroupPath;

use crate::config::SyncPolicy;

/// One membership decision for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncAction {
    /// User added to the target group (policy `match` only).
    Added {
        username: String,
        /// Source groups that qualify the user.
        source_paths: Vec<GroupPath>,
    },
    /// User removed from the target group.
    Removed { username: String },
    /// User newly recorded as extraneous; removal deferred by the grace
    /// period.
    RemovalScheduled {
        username: String,
        scheduled_at: DateTime<Utc>,
    },
    /// User already recorded as extraneous; grace period still running.
    RemovalDeferred {
        username: String,
        scheduled_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    },
    /// User re-qualified before grace expiry; record cleared.
    RemovalAverted { username: String },
}

impl SyncAction {
    /// Username the action applies to.
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            SyncAction::Added { username, .. }
            | SyncAction::Removed { username }
            | SyncAction::RemovalScheduled { username, .. }
            | SyncAction::RemovalDeferred { username, .. }
            | SyncAction::RemovalAverted { username } => username,
        }
    }
}

/// Report of one target group's reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Target group.
    pub target: GroupPath,
    /// Policy in effect.
    pub policy: SyncPolicy,
    /// Whether this was a dry run (decisions logged, nothing mutated).
    pub dry_run: bool,
    /// Every decision taken, in processing order.
    pub actions: Vec<SyncAction>,
    /// When processing of this target started.
    pub started_at: DateTime<Utc>,
    /// When processing of this target finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Start a report for a target group.
    #[must_use]
    pub fn new(target: GroupPath, policy: SyncPolicy, dry_run: bool) -> Self {
        Self {
            target,
            policy,
            dry_run,
            actions: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record an action.
    pub fn push(&mut self, action: SyncAction) {
        self.actions.push(action);
    }

    /// Mark the report complete.
    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Number of members added.
    #[must_use]
    pub fn added(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::Added { .. }))
    }

    /// Number of members removed.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::Removed { .. }))
    }

    /// Number of members newly scheduled for removal.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::RemovalScheduled { .. }))
    }

    /// Number of members whose scheduled removal was averted.
    #[must_use]
    pub fn averted(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::RemovalAverted { .. }))
    }

    /// Number of members still inside their grace period.
    #[must_use]
    pub fn deferred(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::RemovalDeferred { .. }))
    }

    /// Whether the run changed (or would change) nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }

    fn count(&self, pred: impl Fn(&SyncAction) -> bool) -> usize {
        self.actions.iter().filter(|a| pred(a)).count()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} policy={} dry_run={} added={} removed={} scheduled={} averted={} deferred={}",
            self.target,
            self.policy,
            self.dry_run,
            self.added(),
            self.removed(),
            self.scheduled(),
            self.averted(),
            self.deferred(),
        )
    }
}
