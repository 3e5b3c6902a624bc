//! Synchronized-group membership reconciliation engine.
//!
//! Keeps the membership of a designated target group consistent with the
//! union of the memberships of a set of source groups. Source groups are
//! selected by a path query evaluated against the full group hierarchy;
//! a per-target policy decides whether members are only pruned or also
//! added; removals can be deferred by a configurable grace period; every
//! membership transition can notify the affected user.
//!
//! The engine consumes an identity directory through the traits in
//! `groupsync-directory` and never creates or deletes groups or users.
//!
//! # Operation modes
//!
//! - **Automatic** ([`Reconciler::auto_sync`]): scan the hierarchy for
//!   groups whose auto-sync attribute is `"true"`, load their
//!   configuration from their own attributes, and reconcile each in turn.
//! - **Manual** ([`Reconciler::manual_sync`]): reconcile one explicit
//!   target with a source query supplied by the operator, used for
//!   debugging and initial seeding.

pub mod config;
pub mod context;
pub mod deferral;
pub mod discovery;
pub mod error;
pub mod notify;
pub mod reconciler;
pub mod report;
pub mod resolver;

pub use config::{ConfigError, EventMessages, SyncConfig, SyncEvent, SyncPolicy};
pub use context::RunContext;
pub use deferral::{DeferralStore, DEFERRAL_ATTR};
pub use error::{SyncError, SyncResult};
pub use notify::{Notifier, NoopNotifier, NotificationError, SmtpConfig, SmtpNotifier};
pub use reconciler::{Reconciler, SyncOptions};
pub use report::{RunReport, SyncAction};
pub use resolver::{JsonPathEvaluator, QueryEvaluator, ResolvedSources, SourceQueryError};
