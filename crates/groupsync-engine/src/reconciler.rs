//! The reconciliation state machine.
//!
//! For one target group, the reconciler partitions the current members
//! against the desired (source-derived) members and drives each user
//! through their transition:
//!
//! - stable members (current ∩ source) have any pending removal cleared;
//! - extraneous members (current \ source) are removed immediately, or
//!   recorded and removed only after the grace period expires;
//! - missing members (source \ current) are added under policy `match`.
//!
//! Each user's full transition (deferral write, directory mutation,
//! notification) completes before the next user is processed, so a
//! mid-run failure never leaves a user half-transitioned.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use groupsync_directory::{Directory, GroupPath};

use crate::config::{SyncConfig, SyncEvent, SyncPolicy};
use crate::context::RunContext;
use crate::deferral::DeferralStore;
use crate::error::SyncResult;
use crate::notify::{render, subject, Notifier};
use crate::report::{RunReport, SyncAction};
use crate::resolver::{resolve_sources, JsonPathEvaluator, QueryEvaluator, ResolvedSources};

/// Run-level options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Log every decision but mutate nothing: no membership changes, no
    /// deferral writes, no notifications.
    pub dry_run: bool,
    /// Gate for real notification sends.
    pub allow_notifications: bool,
}

/// Membership reconciler for synchronized groups.
pub struct Reconciler {
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    evaluator: Box<dyn QueryEvaluator>,
    options: SyncOptions,
}

impl Reconciler {
    /// Create a reconciler with the default JSONPath query evaluator.
    pub fn new(
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        options: SyncOptions,
    ) -> Self {
        Self {
            directory,
            notifier,
            evaluator: Box::new(JsonPathEvaluator),
            options,
        }
    }

    /// Replace the query evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Box<dyn QueryEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// The run options in effect.
    #[must_use]
    pub fn options(&self) -> SyncOptions {
        self.options
    }

    pub(crate) fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    /// Reconcile one target group against the run's hierarchy snapshot.
    pub async fn sync_group(&self, ctx: &RunContext, cfg: &SyncConfig) -> SyncResult<RunReport> {
        info!(
            target = %cfg.group_path,
            policy = %cfg.policy,
            grace_days = cfg.removal_grace_days,
            dry_run = self.options.dry_run,
            "reconciling synchronized group"
        );

        let sources = resolve_sources(
            self.evaluator.as_ref(),
            self.directory.as_ref(),
            ctx,
            &cfg.source_query,
        )
        .await?;
        debug!(
            target = %cfg.group_path,
            sources = ?sources.source_paths,
            desired = sources.members.len(),
            "resolved desired membership"
        );

        let current: BTreeSet<String> = self
            .directory
            .group_members(&cfg.group_path)
            .await?
            .into_iter()
            .collect();

        let mut store = DeferralStore::new(self.directory.as_ref(), &cfg.group_path);
        let mut report = RunReport::new(cfg.group_path.clone(), cfg.policy, self.options.dry_run);
        let now = Utc::now();

        for username in current.intersection(&sources.members) {
            self.process_stable_member(&mut store, cfg, &mut report, username)
                .await?;
        }

        for username in current.difference(&sources.members) {
            self.process_extraneous_member(&mut store, cfg, &mut report, username, now)
                .await?;
        }

        if cfg.policy == SyncPolicy::Match {
            for username in sources.members.difference(&current) {
                self.process_missing_member(cfg, &mut report, username, &sources)
                    .await?;
            }
        }

        report.finish();
        info!(target = %cfg.group_path, %report, "reconciliation finished");
        Ok(report)
    }

    /// A current member who still qualifies: clear any pending removal.
    ///
    /// A member with no deferral record is a silent no-op; there is
    /// nothing to clear and nothing to notify.
    async fn process_stable_member(
        &self,
        store: &mut DeferralStore<'_>,
        cfg: &SyncConfig,
        report: &mut RunReport,
        username: &str,
    ) -> SyncResult<()> {
        if store.scheduled_at(username).await?.is_none() {
            return Ok(());
        }
        info!(
            target = %cfg.group_path,
            user = username,
            "member re-qualified; clearing scheduled removal"
        );
        report.push(SyncAction::RemovalAverted {
            username: username.to_string(),
        });
        if !self.options.dry_run {
            store.clear(username).await?;
            self.notify(cfg, SyncEvent::RemovalAverted, username, &[])
                .await;
        }
        Ok(())
    }

    /// A current member who belongs to no source group.
    async fn process_extraneous_member(
        &self,
        store: &mut DeferralStore<'_>,
        cfg: &SyncConfig,
        report: &mut RunReport,
        username: &str,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        info!(
            target = %cfg.group_path,
            user = username,
            "member is in no source group"
        );

        if cfg.removal_grace_days == 0 {
            return self.remove_member(store, cfg, report, username).await;
        }

        match store.scheduled_at(username).await? {
            None => {
                info!(
                    target = %cfg.group_path,
                    user = username,
                    scheduled_at = %now,
                    "scheduling removal after grace period"
                );
                report.push(SyncAction::RemovalScheduled {
                    username: username.to_string(),
                    scheduled_at: now,
                });
                if !self.options.dry_run {
                    store.record(username, now).await?;
                    self.notify(cfg, SyncEvent::RemovalPending, username, &[])
                        .await;
                }
                Ok(())
            }
            Some(scheduled_at) => {
                let due_at = scheduled_at + cfg.grace_period();
                if now < due_at {
                    debug!(
                        target = %cfg.group_path,
                        user = username,
                        due_at = %due_at,
                        "grace period still running"
                    );
                    report.push(SyncAction::RemovalDeferred {
                        username: username.to_string(),
                        scheduled_at,
                        due_at,
                    });
                    Ok(())
                } else {
                    info!(
                        target = %cfg.group_path,
                        user = username,
                        scheduled_at = %scheduled_at,
                        "grace period expired"
                    );
                    self.remove_member(store, cfg, report, username).await
                }
            }
        }
    }

    /// Remove a user now: clear any deferral record, mutate the
    /// directory, then notify.
    async fn remove_member(
        &self,
        store: &mut DeferralStore<'_>,
        cfg: &SyncConfig,
        report: &mut RunReport,
        username: &str,
    ) -> SyncResult<()> {
        info!(target = %cfg.group_path, user = username, "removing member");
        report.push(SyncAction::Removed {
            username: username.to_string(),
        });
        if self.options.dry_run {
            return Ok(());
        }
        store.clear(username).await?;
        self.directory
            .remove_member(&cfg.group_path, username)
            .await?;
        self.notify(cfg, SyncEvent::RemovalOccurred, username, &[])
            .await;
        Ok(())
    }

    /// A source member missing from the target group (policy `match`).
    async fn process_missing_member(
        &self,
        cfg: &SyncConfig,
        report: &mut RunReport,
        username: &str,
        sources: &ResolvedSources,
    ) -> SyncResult<()> {
        let source_paths: Vec<GroupPath> = sources
            .sources_by_member
            .get(username)
            .cloned()
            .unwrap_or_default();
        info!(target = %cfg.group_path, user = username, "adding member");
        report.push(SyncAction::Added {
            username: username.to_string(),
            source_paths: source_paths.clone(),
        });
        if self.options.dry_run {
            return Ok(());
        }
        self.directory.add_member(&cfg.group_path, username).await?;
        self.notify(cfg, SyncEvent::AdditionOccurred, username, &source_paths)
            .await;
        Ok(())
    }

    /// Deliver a notification for an event, if allowed and configured.
    ///
    /// Failures here are logged and swallowed: a notification must never
    /// block or roll back a membership mutation that already succeeded.
    async fn notify(
        &self,
        cfg: &SyncConfig,
        event: SyncEvent,
        username: &str,
        source_paths: &[GroupPath],
    ) {
        if !self.options.allow_notifications {
            return;
        }
        let Some(template) = cfg.messages.get(event) else {
            return;
        };
        let user = match self.directory.user(username).await {
            Ok(user) => user,
            Err(error) => {
                warn!(
                    user = username,
                    %error,
                    "skipping notification: user lookup failed"
                );
                return;
            }
        };
        let body = render(template, username, &cfg.group_path, source_paths);
        let subject = subject(event, &cfg.group_path);
        if let Err(error) = self.notifier.send(&user, &subject, &body).await {
            warn!(user = username, %event, %error, "notification delivery failed");
        }
    }
}
