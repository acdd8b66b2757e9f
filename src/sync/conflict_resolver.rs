//! # Conflict Resolution
//!
//! Pure functions deciding between two records of the same item.
//!
//! ## Policies
//!
//! - **Latest**: larger `timestamp` wins; ties fall to `version`, then to the
//!   lexically larger `device_id`
//! - **Local** / **Remote**: one side always wins
//! - **Merge**: build a new record from both sides (furthest progress, furthest
//!   position, newest playback settings, version bumped past both)
//!
//! ## Detection
//!
//! Detection is separate from resolution. Two records conflict when they share
//! a timestamp but disagree on progress, or when a local write replaces an
//! already-synced record the writer had not seen (a stale-base write).
//! Detection only produces a [`ConflictRecord`]; it never changes a write.

use crate::shared::progress::{ConflictRecord, ProgressMetadata, ProgressRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPolicy {
    /// Newest record wins
    #[default]
    Latest,
    /// Local record wins
    Local,
    /// Remote record wins
    Remote,
    /// Synthesize a combined record
    Merge,
}

impl std::str::FromStr for ResolutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown resolution policy: {}", other)),
        }
    }
}

/// Why two records are considered in conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Same timestamp, different progress
    ConcurrentEdit,
    /// A write replaced a synced record the writer never observed
    StaleBase,
}

/// Resolve `local` against `remote` with `policy`
pub fn resolve(
    policy: ResolutionPolicy,
    local: &ProgressRecord,
    remote: &ProgressRecord,
) -> ProgressRecord {
    match policy {
        ResolutionPolicy::Latest => latest(local, remote),
        ResolutionPolicy::Local => local.clone(),
        ResolutionPolicy::Remote => remote.clone(),
        ResolutionPolicy::Merge => merge(local, remote),
    }
}

/// Total precedence order used by the latest policy
fn precedence(a: &ProgressRecord, b: &ProgressRecord) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.device_id.cmp(&b.device_id))
        .then_with(|| a.progress.total_cmp(&b.progress))
}

/// Whichever record is newer. Symmetric in its arguments.
pub fn latest(local: &ProgressRecord, remote: &ProgressRecord) -> ProgressRecord {
    match precedence(local, remote) {
        Ordering::Less => remote.clone(),
        _ => local.clone(),
    }
}

/// Combine two records into a new one.
///
/// `progress` and `last_position` take the maximum of both sides, playback
/// settings come from the newer side, and the version moves past both inputs.
/// The result is attributed to the local side's device, which is the one that
/// will queue and send it.
pub fn merge(local: &ProgressRecord, remote: &ProgressRecord) -> ProgressRecord {
    let (newer, older) = match precedence(local, remote) {
        Ordering::Less => (remote, local),
        _ => (local, remote),
    };

    ProgressRecord {
        item_id: local.item_id.clone(),
        progress: local.progress.max(remote.progress),
        timestamp: local.timestamp.max(remote.timestamp),
        device_id: local.device_id.clone(),
        metadata: merge_metadata(&newer.metadata, &older.metadata),
        version: local.version.max(remote.version) + 1,
        synced: false,
    }
}

fn merge_metadata(newer: &ProgressMetadata, older: &ProgressMetadata) -> ProgressMetadata {
    let last_position = match (newer.last_position, older.last_position) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    let mut extra = older.extra.clone();
    for (key, value) in &newer.extra {
        extra.insert(key.clone(), value.clone());
    }

    ProgressMetadata {
        duration: newer.duration.or(older.duration),
        last_position,
        playback_rate: newer.playback_rate.or(older.playback_rate),
        quality: newer.quality.clone().or_else(|| older.quality.clone()),
        extra,
    }
}

/// Same-timestamp conflict between two records of one item
pub fn detect_conflict(local: &ProgressRecord, remote: &ProgressRecord) -> Option<ConflictKind> {
    if local.timestamp == remote.timestamp && local.progress != remote.progress {
        Some(ConflictKind::ConcurrentEdit)
    } else {
        None
    }
}

/// Whether writing over `existing` is a stale-base write.
///
/// `base_timestamp` is the timestamp of the record the writer started from.
/// Without one, the writer is taken to have based the edit on `existing`.
pub fn detect_stale_write(
    existing: &ProgressRecord,
    base_timestamp: Option<i64>,
) -> Option<ConflictKind> {
    match base_timestamp {
        Some(base) if existing.synced && base < existing.timestamp => {
            Some(ConflictKind::StaleBase)
        }
        _ => None,
    }
}

/// Conflict log entry for replacing `existing` with version `new_version`
pub fn conflict_record(existing: &ProgressRecord, new_version: u64, now: i64) -> ConflictRecord {
    ConflictRecord {
        old_version: existing.version,
        new_version,
        detected_at: now,
    }
}

/// Resolver bound to a default policy
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    default_policy: ResolutionPolicy,
}

impl ConflictResolver {
    /// Create a resolver with a default policy
    pub fn new(default_policy: ResolutionPolicy) -> Self {
        Self { default_policy }
    }

    /// The policy used when none is given
    pub fn default_policy(&self) -> ResolutionPolicy {
        self.default_policy
    }

    /// Resolve with `policy`, or the default policy
    pub fn resolve(
        &self,
        local: &ProgressRecord,
        remote: &ProgressRecord,
        policy: Option<ResolutionPolicy>,
    ) -> ProgressRecord {
        resolve(policy.unwrap_or(self.default_policy), local, remote)
    }
}
