//! Source-group resolution.
//!
//! A target group's desired membership is the union of the member lists
//! of its source groups. Source groups are selected by evaluating a path
//! query against the run's hierarchy snapshot. The query grammar is
//! opaque to the engine; the evaluator's output is validated defensively
//! because a malformed query is a realistic operator error, not a
//! programming bug.

use std::collections::{BTreeMap, BTreeSet};

use futures::future;
use serde_json::Value;
use serde_json_path::JsonPath;
use thiserror::Error;
use tracing::debug;

use groupsync_directory::{DirectoryReader, GroupPath, InvalidGroupPath};

use crate::context::RunContext;
use crate::error::SyncResult;

/// The source-group query failed or produced unusable results.
#[derive(Debug, Error)]
pub enum SourceQueryError {
    /// The query expression itself could not be parsed.
    #[error("failed to parse source query: {message}")]
    Parse { message: String },

    /// The query selected a value that is not a string.
    #[error("source query produced a non-string result: {value}")]
    NonString { value: Value },

    /// The query selected a string that is not a well-formed group path.
    #[error("source query produced {0}")]
    InvalidPath(#[from] InvalidGroupPath),
}

/// Evaluates a path-query expression against a tree-shaped document,
/// returning the matched values in document order.
pub trait QueryEvaluator: Send + Sync {
    /// Evaluate `query` against `document`.
    fn evaluate(&self, query: &str, document: &Value) -> Result<Vec<Value>, SourceQueryError>;
}

/// JSONPath (RFC 9535) query evaluator.
#[derive(Debug, Default)]
pub struct JsonPathEvaluator;

impl QueryEvaluator for JsonPathEvaluator {
    fn evaluate(&self, query: &str, document: &Value) -> Result<Vec<Value>, SourceQueryError> {
        let path = JsonPath::parse(query).map_err(|e| SourceQueryError::Parse {
            message: e.to_string(),
        })?;
        Ok(path.query(document).all().into_iter().cloned().collect())
    }
}

/// Outcome of resolving a source query to concrete memberships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSources {
    /// Paths of the qualifying source groups, deduplicated, in query
    /// result order.
    pub source_paths: Vec<GroupPath>,
    /// Union of the source groups' member usernames.
    pub members: BTreeSet<String>,
    /// For each member, the source groups that qualify them. Used in
    /// notification text.
    pub sources_by_member: BTreeMap<String, Vec<GroupPath>>,
}

/// Select the source groups for `query` and fetch their memberships.
///
/// Member lists of independent source groups are fetched concurrently;
/// results are joined before any mutation begins.
pub async fn resolve_sources(
    evaluator: &dyn QueryEvaluator,
    directory: &dyn DirectoryReader,
    ctx: &RunContext,
    query: &str,
) -> SyncResult<ResolvedSources> {
    let values = evaluator.evaluate(query, ctx.document())?;

    let mut source_paths: Vec<GroupPath> = Vec::with_capacity(values.len());
    for value in values {
        let raw = value
            .as_str()
            .ok_or_else(|| SourceQueryError::NonString {
                value: value.clone(),
            })?;
        let path = GroupPath::new(raw).map_err(SourceQueryError::from)?;
        if !source_paths.contains(&path) {
            source_paths.push(path);
        }
    }
    debug!(count = source_paths.len(), query, "resolved source groups");

    let member_lists = future::try_join_all(
        source_paths
            .iter()
            .map(|path| directory.group_members(path)),
    )
    .await?;

    let mut members = BTreeSet::new();
    let mut sources_by_member: BTreeMap<String, Vec<GroupPath>> = BTreeMap::new();
    for (path, list) in source_paths.iter().zip(member_lists) {
        for username in list {
            sources_by_member
                .entry(username.clone())
                .or_default()
                .push(path.clone());
            members.insert(username);
        }
    }

    Ok(ResolvedSources {
        source_paths,
        members,
        sources_by_member,
    })
}
