//! End-to-end reconciliation tests against an in-memory directory.
//!
//! Covers the reconciler state machine (policies, grace period,
//! deferral reversal), dry-run behavior, discovery, and error
//! propagation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};

use groupsync_directory::{
    Attributes, DirectoryError, DirectoryReader, DirectoryResult, DirectoryWriter, GroupNode,
    GroupPath, UserRecord,
};
use groupsync_engine::{
    DeferralStore, Notifier, NotificationError, Reconciler, RunContext, SyncConfig, SyncError,
    SyncOptions, DEFERRAL_ATTR,
};

const QUERY: &str = "$[?@.path == \"/sources\"].subGroups[*].path";

// =============================================================================
// In-memory directory and recording notifier
// =============================================================================

#[derive(Default)]
struct DirectoryState {
    hierarchy: Vec<GroupNode>,
    members: BTreeMap<String, BTreeSet<String>>,
    fail_writes: bool,
}

struct MockDirectory {
    state: Mutex<DirectoryState>,
}

impl MockDirectory {
    fn new(hierarchy: Vec<GroupNode>) -> Self {
        Self {
            state: Mutex::new(DirectoryState {
                hierarchy,
                ..DirectoryState::default()
            }),
        }
    }

    fn set_members(&self, path: &str, members: &[&str]) {
        self.state.lock().unwrap().members.insert(
            path.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    fn members_of(&self, path: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .members
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    fn attribute(&self, path: &str, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let path = GroupPath::new(path).unwrap();
        let node = state.hierarchy.iter().find_map(|r| r.find(&path))?;
        node.attributes.first(name).map(str::to_string)
    }

    fn write_attribute(&self, path: &str, name: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        let path = GroupPath::new(path).unwrap();
        let node = find_mut(&mut state.hierarchy, &path).unwrap();
        node.attributes.set(name, value);
    }

    fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    fn check_writable(&self) -> DirectoryResult<()> {
        if self.state.lock().unwrap().fail_writes {
            Err(DirectoryError::request("injected write failure"))
        } else {
            Ok(())
        }
    }
}

fn find_mut<'t>(nodes: &'t mut [GroupNode], path: &GroupPath) -> Option<&'t mut GroupNode> {
    for node in nodes {
        if &node.path == path {
            return Some(node);
        }
        if node.path.contains(path) {
            return find_mut(&mut node.sub_groups, path);
        }
    }
    None
}

#[async_trait]
impl DirectoryReader for MockDirectory {
    async fn group_hierarchy(&self) -> DirectoryResult<Vec<GroupNode>> {
        Ok(self.state.lock().unwrap().hierarchy.clone())
    }

    async fn group_by_path(&self, path: &GroupPath) -> DirectoryResult<GroupNode> {
        let state = self.state.lock().unwrap();
        state
            .hierarchy
            .iter()
            .find_map(|r| r.find(path))
            .cloned()
            .ok_or_else(|| DirectoryError::not_found("group", path.as_str()))
    }

    async fn group_members(&self, path: &GroupPath) -> DirectoryResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .members
            .get(path.as_str())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn user(&self, username: &str) -> DirectoryResult<UserRecord> {
        Ok(UserRecord {
            username: username.to_string(),
            email: Some(format!("{username}@example.org")),
            attributes: Attributes::new(),
        })
    }
}

#[async_trait]
impl DirectoryWriter for MockDirectory {
    async fn add_member(&self, path: &GroupPath, username: &str) -> DirectoryResult<()> {
        self.check_writable()?;
        self.state
            .lock()
            .unwrap()
            .members
            .entry(path.as_str().to_string())
            .or_default()
            .insert(username.to_string());
        Ok(())
    }

    async fn remove_member(&self, path: &GroupPath, username: &str) -> DirectoryResult<()> {
        self.check_writable()?;
        self.state
            .lock()
            .unwrap()
            .members
            .entry(path.as_str().to_string())
            .or_default()
            .remove(username);
        Ok(())
    }

    async fn set_group_attribute(
        &self,
        path: &GroupPath,
        name: &str,
        value: Option<String>,
    ) -> DirectoryResult<()> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        let node = find_mut(&mut state.hierarchy, path)
            .ok_or_else(|| DirectoryError::not_found("group", path.as_str()))?;
        match value {
            Some(value) => node.attributes.set(name, value),
            None => {
                node.attributes.remove(name);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SentMessage {
    username: String,
    subject: String,
    body: String,
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        user: &UserRecord,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(SentMessage {
            username: user.username.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _: &UserRecord, _: &str, _: &str) -> Result<(), NotificationError> {
        Err(NotificationError::Delivery {
            message: "relay down".to_string(),
        })
    }
}

// =============================================================================
// Scenario setup
// =============================================================================

fn group(path: &str, children: Vec<GroupNode>) -> GroupNode {
    let mut node = GroupNode::new(GroupPath::new(path).unwrap());
    node.sub_groups = children;
    node
}

/// Hierarchy with two source groups under /sources and the target group
/// at /sync/target carrying the given config attributes.
fn hierarchy(target_attrs: Attributes) -> Vec<GroupNode> {
    let mut target = group("/sync/target", vec![]);
    target.attributes = target_attrs;
    vec![
        group(
            "/sources",
            vec![group("/sources/a", vec![]), group("/sources/b", vec![])],
        ),
        group("/sync", vec![target]),
    ]
}

fn config_attrs(enable: &str, policy: &str, grace_days: &str) -> Attributes {
    [
        ("synchronized_group_enable", enable),
        ("synchronized_group_policy", policy),
        ("synchronized_group_sources_expr", QUERY),
        ("synchronized_group_removal_grace_days", grace_days),
    ]
    .into_iter()
    .collect()
}

struct Fixture {
    directory: Arc<MockDirectory>,
    notifier: Arc<RecordingNotifier>,
    reconciler: Reconciler,
}

fn fixture(target_attrs: Attributes, options: SyncOptions) -> Fixture {
    let directory = Arc::new(MockDirectory::new(hierarchy(target_attrs)));
    // Current members: alice and bob; desired: bob (from /sources/a) and
    // carol (from /sources/b).
    directory.set_members("/sync/target", &["alice", "bob"]);
    directory.set_members("/sources/a", &["bob"]);
    directory.set_members("/sources/b", &["carol"]);
    let notifier = Arc::new(RecordingNotifier::default());
    let reconciler = Reconciler::new(directory.clone(), notifier.clone(), options);
    Fixture {
        directory,
        notifier,
        reconciler,
    }
}

fn notify_options() -> SyncOptions {
    SyncOptions {
        dry_run: false,
        allow_notifications: true,
    }
}

async fn sync_target(f: &Fixture) -> Result<groupsync_engine::RunReport, SyncError> {
    let target = GroupPath::new("/sync/target").unwrap();
    let group = f.directory.group_by_path(&target).await.unwrap();
    let cfg = SyncConfig::from_group(target, &group.attributes, None).unwrap();
    let ctx = RunContext::load(f.directory.as_ref()).await.unwrap();
    f.reconciler.sync_group(&ctx, &cfg).await
}

fn seed_deferral(directory: &MockDirectory, username: &str, days_ago: i64) {
    let stamp = (Utc::now() - Duration::days(days_ago))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    directory.write_attribute(
        "/sync/target",
        DEFERRAL_ATTR,
        &format!("{{\"{username}\":\"{stamp}\"}}"),
    );
}

fn set(members: &[&str]) -> BTreeSet<String> {
    members.iter().map(|m| m.to_string()).collect()
}

// =============================================================================
// Policy behavior
// =============================================================================

#[tokio::test]
async fn test_match_policy_adds_and_removes() {
    let f = fixture(config_attrs("false", "match", "0"), notify_options());
    let report = sync_target(&f).await.unwrap();

    assert_eq!(f.directory.members_of("/sync/target"), set(&["bob", "carol"]));
    assert_eq!(report.added(), 1);
    assert_eq!(report.removed(), 1);
    // One action per affected user: the removal, then the addition.
    let acted: Vec<&str> = report.actions.iter().map(|a| a.username()).collect();
    assert_eq!(acted, ["alice", "carol"]);

    let messages = f.notifier.messages();
    assert_eq!(messages.len(), 2);
    let removal = messages.iter().find(|m| m.username == "alice").unwrap();
    assert!(removal.subject.contains("removed from group /sync/target"));
    let addition = messages.iter().find(|m| m.username == "carol").unwrap();
    assert!(addition.subject.contains("added to group /sync/target"));
    // The addition body names the qualifying source group.
    assert!(addition.body.contains("/sources/b"));
}

#[tokio::test]
async fn test_prune_policy_never_adds() {
    let f = fixture(config_attrs("false", "prune", "0"), notify_options());
    let report = sync_target(&f).await.unwrap();

    assert_eq!(f.directory.members_of("/sync/target"), set(&["bob"]));
    assert_eq!(report.added(), 0);
    assert_eq!(report.removed(), 1);
}

// =============================================================================
// Grace period state machine
// =============================================================================

#[tokio::test]
async fn test_grace_schedules_before_removing() {
    let f = fixture(config_attrs("false", "match", "7"), notify_options());
    let report = sync_target(&f).await.unwrap();

    // Alice is kept but recorded; carol is added regardless of grace.
    assert_eq!(
        f.directory.members_of("/sync/target"),
        set(&["alice", "bob", "carol"])
    );
    assert_eq!(report.scheduled(), 1);
    assert_eq!(report.removed(), 0);

    let blob = f.directory.attribute("/sync/target", DEFERRAL_ATTR).unwrap();
    assert!(blob.contains("alice"));

    let pending = f
        .notifier
        .messages()
        .into_iter()
        .find(|m| m.username == "alice")
        .unwrap();
    assert!(pending.subject.contains("scheduled for removal"));
}

#[tokio::test]
async fn test_grace_not_expired_keeps_member() {
    let f = fixture(config_attrs("false", "prune", "7"), notify_options());
    seed_deferral(&f.directory, "alice", 3);
    let report = sync_target(&f).await.unwrap();

    assert_eq!(f.directory.members_of("/sync/target"), set(&["alice", "bob"]));
    assert_eq!(report.deferred(), 1);
    assert_eq!(report.removed(), 0);
    // No re-notification while the grace period runs.
    assert!(f.notifier.messages().is_empty());
    // The record is untouched.
    let blob = f.directory.attribute("/sync/target", DEFERRAL_ATTR).unwrap();
    assert!(blob.contains("alice"));
}

#[tokio::test]
async fn test_grace_expired_removes_member() {
    let f = fixture(config_attrs("false", "prune", "7"), notify_options());
    seed_deferral(&f.directory, "alice", 8);
    let report = sync_target(&f).await.unwrap();

    assert_eq!(f.directory.members_of("/sync/target"), set(&["bob"]));
    assert_eq!(report.removed(), 1);
    // The emptied map deletes the attribute entirely.
    assert_eq!(f.directory.attribute("/sync/target", DEFERRAL_ATTR), None);

    let removal = f
        .notifier
        .messages()
        .into_iter()
        .find(|m| m.username == "alice")
        .unwrap();
    assert!(removal.subject.contains("removed from group"));
}

#[tokio::test]
async fn test_grace_reversal_averts_removal() {
    let f = fixture(config_attrs("false", "prune", "7"), notify_options());
    // Bob is a source member but was recorded as extraneous earlier.
    seed_deferral(&f.directory, "bob", 3);
    // Alice left already so only bob is processed.
    f.directory.set_members("/sync/target", &["bob"]);
    let report = sync_target(&f).await.unwrap();

    assert_eq!(f.directory.members_of("/sync/target"), set(&["bob"]));
    assert_eq!(report.averted(), 1);
    assert_eq!(f.directory.attribute("/sync/target", DEFERRAL_ATTR), None);

    let averted = f.notifier.messages().pop().unwrap();
    assert_eq!(averted.username, "bob");
    assert!(averted.subject.contains("no longer scheduled for removal"));
}

#[tokio::test]
async fn test_stable_member_without_record_is_silent() {
    let f = fixture(config_attrs("false", "prune", "7"), notify_options());
    f.directory.set_members("/sync/target", &["bob"]);
    let report = sync_target(&f).await.unwrap();

    assert!(report.is_noop());
    assert!(f.notifier.messages().is_empty());
}

// =============================================================================
// Idempotence and worked scenarios
// =============================================================================

#[tokio::test]
async fn test_second_run_is_noop_after_convergence() {
    let f = fixture(config_attrs("false", "match", "0"), notify_options());
    let first = sync_target(&f).await.unwrap();
    assert!(!first.is_noop());

    let members_after_first = f.directory.members_of("/sync/target");
    let sent_after_first = f.notifier.messages().len();

    let second = sync_target(&f).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(f.directory.members_of("/sync/target"), members_after_first);
    assert_eq!(f.notifier.messages().len(), sent_after_first);
    assert_eq!(f.directory.attribute("/sync/target", DEFERRAL_ATTR), None);
}

#[tokio::test]
async fn test_match_with_grace_full_lifecycle() {
    // Current {alice,bob}, sources {bob,carol}, policy match, grace 7.
    let f = fixture(config_attrs("false", "match", "7"), notify_options());

    // Run 1: bob stays, alice is recorded, carol is added.
    sync_target(&f).await.unwrap();
    assert_eq!(
        f.directory.members_of("/sync/target"),
        set(&["alice", "bob", "carol"])
    );

    // Run 2, three days in: no change.
    seed_deferral(&f.directory, "alice", 3);
    let report = sync_target(&f).await.unwrap();
    assert_eq!(report.deferred(), 1);
    assert_eq!(
        f.directory.members_of("/sync/target"),
        set(&["alice", "bob", "carol"])
    );

    // Run 3, past expiry: alice is gone.
    seed_deferral(&f.directory, "alice", 8);
    sync_target(&f).await.unwrap();
    assert_eq!(f.directory.members_of("/sync/target"), set(&["bob", "carol"]));
}

#[tokio::test]
async fn test_prune_with_grace_full_lifecycle() {
    // Same setup under prune: carol is never added and alice eventually
    // leaves, ending at {bob}.
    let f = fixture(config_attrs("false", "prune", "7"), notify_options());

    sync_target(&f).await.unwrap();
    assert_eq!(f.directory.members_of("/sync/target"), set(&["alice", "bob"]));

    seed_deferral(&f.directory, "alice", 8);
    sync_target(&f).await.unwrap();
    assert_eq!(f.directory.members_of("/sync/target"), set(&["bob"]));
}

// =============================================================================
// Dry run
// =============================================================================

#[tokio::test]
async fn test_dry_run_reports_without_mutating() {
    let f = fixture(
        config_attrs("false", "match", "7"),
        SyncOptions {
            dry_run: true,
            allow_notifications: true,
        },
    );
    assert!(f.reconciler.options().dry_run);
    let report = sync_target(&f).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.scheduled(), 1);
    assert_eq!(report.added(), 1);

    // Nothing actually changed: membership, deferral state, mail.
    assert_eq!(f.directory.members_of("/sync/target"), set(&["alice", "bob"]));
    assert_eq!(f.directory.attribute("/sync/target", DEFERRAL_ATTR), None);
    assert!(f.notifier.messages().is_empty());
}

// =============================================================================
// Error handling
// =============================================================================

#[tokio::test]
async fn test_notification_failure_does_not_abort_run() {
    let directory = Arc::new(MockDirectory::new(hierarchy(config_attrs(
        "false", "match", "0",
    ))));
    directory.set_members("/sync/target", &["alice", "bob"]);
    directory.set_members("/sources/a", &["bob"]);
    directory.set_members("/sources/b", &["carol"]);
    let reconciler = Reconciler::new(
        directory.clone(),
        Arc::new(FailingNotifier),
        notify_options(),
    );

    let target = GroupPath::new("/sync/target").unwrap();
    let node = directory.group_by_path(&target).await.unwrap();
    let cfg = SyncConfig::from_group(target, &node.attributes, None).unwrap();
    let ctx = RunContext::load(directory.as_ref()).await.unwrap();

    let report = reconciler.sync_group(&ctx, &cfg).await.unwrap();
    assert_eq!(report.removed(), 1);
    assert_eq!(directory.members_of("/sync/target"), set(&["bob", "carol"]));
}

#[tokio::test]
async fn test_non_string_query_result_aborts_target() {
    let f = fixture(config_attrs("false", "match", "0"), notify_options());
    // Select whole nodes instead of their paths.
    f.directory.write_attribute(
        "/sync/target",
        "synchronized_group_sources_expr",
        "$[?@.path == \"/sources\"].subGroups[*]",
    );
    let err = sync_target(&f).await.unwrap_err();
    assert!(matches!(err, SyncError::SourceQuery(_)), "got {err:?}");
    // Nothing was mutated.
    assert_eq!(f.directory.members_of("/sync/target"), set(&["alice", "bob"]));
}

#[tokio::test]
async fn test_invalid_path_query_result_aborts_target() {
    let f = fixture(config_attrs("false", "match", "0"), notify_options());
    // Group names are not absolute paths.
    f.directory.write_attribute(
        "/sync/target",
        "synchronized_group_sources_expr",
        "$[?@.path == \"/sources\"].subGroups[*].name",
    );
    let err = sync_target(&f).await.unwrap_err();
    assert!(matches!(err, SyncError::SourceQuery(_)), "got {err:?}");
}

// =============================================================================
// Discovery entry points
// =============================================================================

#[tokio::test]
async fn test_auto_sync_discovers_enabled_groups() {
    let f = fixture(config_attrs("true", "match", "0"), notify_options());
    let reports = f.reconciler.auto_sync().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(f.directory.members_of("/sync/target"), set(&["bob", "carol"]));
}

#[tokio::test]
async fn test_auto_sync_skips_disabled_groups() {
    let f = fixture(config_attrs("false", "match", "0"), notify_options());
    let reports = f.reconciler.auto_sync().await.unwrap();
    assert!(reports.is_empty());
    assert_eq!(f.directory.members_of("/sync/target"), set(&["alice", "bob"]));
}

#[tokio::test]
async fn test_auto_sync_continues_past_bad_configuration() {
    let mut broken = group("/sync/broken", vec![]);
    broken.attributes = config_attrs("true", "bogus", "0");
    let mut roots = hierarchy(config_attrs("true", "match", "0"));
    roots[1].sub_groups.push(broken);

    let directory = Arc::new(MockDirectory::new(roots));
    directory.set_members("/sync/target", &["alice", "bob"]);
    directory.set_members("/sources/a", &["bob"]);
    directory.set_members("/sources/b", &["carol"]);
    let reconciler = Reconciler::new(
        directory.clone(),
        Arc::new(RecordingNotifier::default()),
        notify_options(),
    );

    let reports = reconciler.auto_sync().await.unwrap();
    // The broken group is skipped, the valid one still reconciles.
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].target.as_str(), "/sync/target");
}

#[tokio::test]
async fn test_auto_sync_directory_failure_is_fatal() {
    let f = fixture(config_attrs("true", "match", "0"), notify_options());
    f.directory.fail_writes();
    let err = f.reconciler.auto_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Directory(_)), "got {err:?}");
}

#[tokio::test]
async fn test_manual_sync_refuses_auto_managed_group() {
    let f = fixture(config_attrs("true", "match", "0"), notify_options());
    let target = GroupPath::new("/sync/target").unwrap();
    let err = f.reconciler.manual_sync(&target, QUERY).await.unwrap_err();
    assert!(matches!(err, SyncError::ManagedAutomatically { .. }));
}

#[tokio::test]
async fn test_manual_sync_overrides_source_query() {
    // The group has no sources_expr of its own; the override supplies it.
    let attrs: Attributes = [
        ("synchronized_group_enable", "false"),
        ("synchronized_group_policy", "match"),
    ]
    .into_iter()
    .collect();
    let directory = Arc::new(MockDirectory::new(hierarchy(attrs)));
    directory.set_members("/sync/target", &["alice"]);
    directory.set_members("/sources/a", &["bob"]);
    let reconciler = Reconciler::new(
        directory.clone(),
        Arc::new(RecordingNotifier::default()),
        notify_options(),
    );

    let target = GroupPath::new("/sync/target").unwrap();
    let report = reconciler.manual_sync(&target, QUERY).await.unwrap();
    assert_eq!(report.added(), 1);
    assert_eq!(report.removed(), 1);
    assert_eq!(directory.members_of("/sync/target"), set(&["bob"]));
}

// =============================================================================
// Deferral store behavior through the public API
// =============================================================================

#[tokio::test]
async fn test_deferral_store_write_through() {
    let f = fixture(config_attrs("false", "prune", "7"), notify_options());
    let target = GroupPath::new("/sync/target").unwrap();
    let mut store = DeferralStore::new(f.directory.as_ref(), &target);

    let now = Utc::now();
    assert_eq!(store.scheduled_at("alice").await.unwrap(), None);

    store.record("alice", now).await.unwrap();
    let blob = f.directory.attribute("/sync/target", DEFERRAL_ATTR).unwrap();
    assert!(blob.contains("alice"));

    // Clearing an unknown user is a no-op and does not rewrite state.
    assert!(!store.clear("nobody").await.unwrap());

    assert!(store.clear("alice").await.unwrap());
    assert_eq!(f.directory.attribute("/sync/target", DEFERRAL_ATTR), None);
}
