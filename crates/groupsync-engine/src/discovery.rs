//! Entry points: automatic discovery and manual sync.

use tracing::{error, info};

use groupsync_directory::{flatten_hierarchy, GroupPath};

use crate::config::{attr_name, SyncConfig};
use crate::context::RunContext;
use crate::error::{SyncError, SyncResult};
use crate::reconciler::Reconciler;
use crate::report::RunReport;

impl Reconciler {
    /// Discover every enabled synchronized group and reconcile each.
    ///
    /// A group is an enabled target when its auto-sync attribute is
    /// literally `"true"`. Per-group configuration and source-query
    /// failures are logged and skipped; any other failure aborts the
    /// whole run, loudly.
    pub async fn auto_sync(&self) -> SyncResult<Vec<RunReport>> {
        let ctx = RunContext::load(self.directory()).await?;

        let enable_attr = attr_name("enable");
        // Listing all groups and filtering locally is much cheaper than
        // querying custom attributes through the directory.
        let targets: Vec<_> = flatten_hierarchy(ctx.hierarchy())
            .into_iter()
            .filter(|node| node.attributes.first(&enable_attr) == Some("true"))
            .map(|node| (node.path.clone(), node.attributes.clone()))
            .collect();
        info!(count = targets.len(), "discovered enabled synchronized groups");

        let mut reports = Vec::with_capacity(targets.len());
        for (path, attributes) in targets {
            let cfg = match SyncConfig::from_group(path.clone(), &attributes, None) {
                Ok(cfg) => cfg,
                Err(error) => {
                    error!(target = %path, %error, "skipping group: invalid configuration");
                    continue;
                }
            };
            match self.sync_group(&ctx, &cfg).await {
                Ok(report) => reports.push(report),
                Err(error) if error.is_per_group() => {
                    error!(target = %path, %error, "skipping group");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(reports)
    }

    /// Reconcile one explicit target with an operator-supplied source
    /// query, overriding the group's own `sources_expr` attribute.
    ///
    /// Refuses to run against a group whose auto-sync attribute is
    /// `"true"`: such groups are managed by [`Reconciler::auto_sync`]
    /// and double management would fight over membership.
    pub async fn manual_sync(
        &self,
        target: &GroupPath,
        source_query: &str,
    ) -> SyncResult<RunReport> {
        info!(target = %target, query = source_query, "manual sync");
        let group = self.directory().group_by_path(target).await?;

        if group.attributes.first(&attr_name("enable")) == Some("true") {
            return Err(SyncError::ManagedAutomatically {
                path: target.clone(),
            });
        }

        let cfg = SyncConfig::from_group(
            target.clone(),
            &group.attributes,
            Some(source_query.to_string()),
        )?;
        let ctx = RunContext::load(self.directory()).await?;
        self.sync_group(&ctx, &cfg).await
    }
}
