//! Watch progress data model
//!
//! Types persisted by the local store and exchanged with the sync service.
//! All wire and storage encodings use camelCase JSON.
//!
//! # Invariants
//!
//! - `ProgressRecord::progress` is always within `[0, 100]` once it has passed
//!   through [`clamp_progress`]; every local write path does that
//! - `ProgressRecord::version` only grows for a given item
//! - Unknown metadata fields are carried through untouched in
//!   [`ProgressMetadata::extra`]

use serde::{Deserialize, Serialize};

/// Lowest storable progress value
pub const MIN_PROGRESS: f64 = 0.0;

/// Highest storable progress value
pub const MAX_PROGRESS: f64 = 100.0;

/// Fastest playback rate accepted in metadata
pub const MAX_PLAYBACK_RATE: f64 = 16.0;

/// Clamp a raw progress value into `[0, 100]`.
///
/// NaN is treated as zero progress.
pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        return MIN_PROGRESS;
    }
    progress.clamp(MIN_PROGRESS, MAX_PROGRESS)
}

/// Playback metadata attached to a progress record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMetadata {
    /// Total length of the item in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Last playback position in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_position: Option<f64>,
    /// Playback speed multiplier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
    /// Stream quality label (e.g. "HD", "4K")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Fields this build does not know about
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProgressMetadata {
    /// Drop numeric values outside their valid ranges.
    ///
    /// Invalid values are discarded rather than rejected; `last_position` is
    /// pulled back into `[0, duration]` when a duration is known.
    pub fn sanitized(mut self) -> Self {
        self.duration = self.duration.filter(|d| d.is_finite() && *d >= 0.0);
        self.playback_rate = self
            .playback_rate
            .filter(|r| r.is_finite() && *r > 0.0 && *r <= MAX_PLAYBACK_RATE);
        self.last_position = self
            .last_position
            .filter(|p| p.is_finite())
            .map(|p| {
                let p = p.max(0.0);
                match self.duration {
                    Some(duration) => p.min(duration),
                    None => p,
                }
            });
        self
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the last playback position
    pub fn with_last_position(mut self, position: f64) -> Self {
        self.last_position = Some(position);
        self
    }

    /// Set the playback rate
    pub fn with_playback_rate(mut self, rate: f64) -> Self {
        self.playback_rate = Some(rate);
        self
    }

    /// Set the quality label
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }
}

/// Playback progress of one item, as last written by some device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Opaque item identifier
    pub item_id: String,
    /// Percentage watched, `0..=100`
    pub progress: f64,
    /// Wall-clock milliseconds of the update
    pub timestamp: i64,
    /// Device that produced the update
    pub device_id: String,
    /// Playback metadata
    #[serde(default)]
    pub metadata: ProgressMetadata,
    /// Monotonic per-item version
    #[serde(default)]
    pub version: u64,
    /// Whether the server has acknowledged this record
    #[serde(default)]
    pub synced: bool,
}

impl ProgressRecord {
    /// Create an unsynced record at version 1 with empty metadata
    pub fn new(
        item_id: impl Into<String>,
        progress: f64,
        timestamp: i64,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            progress,
            timestamp,
            device_id: device_id.into(),
            metadata: ProgressMetadata::default(),
            version: 1,
            synced: false,
        }
    }

    /// Replace the metadata
    pub fn with_metadata(mut self, metadata: ProgressMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the version
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the synced flag
    pub fn with_synced(mut self, synced: bool) -> Self {
        self.synced = synced;
        self
    }

    /// Whether two records carry the same playback state.
    ///
    /// Ignores `version`, `synced` and `device_id`, which describe the
    /// record's history rather than its value.
    pub fn same_content(&self, other: &ProgressRecord) -> bool {
        self.item_id == other.item_id
            && self.progress == other.progress
            && self.timestamp == other.timestamp
            && self.metadata == other.metadata
    }
}

/// A record waiting for server acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    /// The record to push
    #[serde(flatten)]
    pub record: ProgressRecord,
    /// When the item first entered the queue (ms)
    pub queued_at: i64,
    /// Failed send attempts that included this entry
    #[serde(default)]
    pub attempts: u32,
}

impl SyncQueueEntry {
    /// Wrap a record as a fresh queue entry
    pub fn new(record: ProgressRecord, queued_at: i64) -> Self {
        Self {
            record,
            queued_at,
            attempts: 0,
        }
    }

    /// Item id of the queued record
    pub fn item_id(&self) -> &str {
        &self.record.item_id
    }
}

/// A local progress write, before it becomes a record
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Item being watched
    pub item_id: String,
    /// Raw progress, clamped on write
    pub progress: f64,
    /// Playback metadata, sanitized on write
    pub metadata: ProgressMetadata,
    /// Timestamp of the record the writer last observed for this item
    pub base_timestamp: Option<i64>,
}

impl ProgressUpdate {
    /// Update with empty metadata and no observed base
    pub fn new(item_id: impl Into<String>, progress: f64) -> Self {
        Self {
            item_id: item_id.into(),
            progress,
            metadata: ProgressMetadata::default(),
            base_timestamp: None,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: ProgressMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record which version of the item the writer started from
    pub fn based_on(mut self, timestamp: i64) -> Self {
        self.base_timestamp = Some(timestamp);
        self
    }
}

/// Informational trace of a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Version that was about to be replaced
    pub old_version: u64,
    /// Version that replaced it
    pub new_version: u64,
    /// When the conflict was noticed (ms)
    pub detected_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(150.0), 100.0);
        assert_eq!(clamp_progress(-5.0), 0.0);
        assert_eq!(clamp_progress(42.5), 42.5);
        assert_eq!(clamp_progress(f64::NAN), 0.0);
        assert_eq!(clamp_progress(f64::INFINITY), 100.0);
    }

    #[test]
    fn test_metadata_sanitized() {
        let metadata = ProgressMetadata::default()
            .with_duration(100.0)
            .with_last_position(250.0)
            .with_playback_rate(-1.0)
            .with_quality("HD")
            .sanitized();

        assert_eq!(metadata.duration, Some(100.0));
        assert_eq!(metadata.last_position, Some(100.0));
        assert_eq!(metadata.playback_rate, None);
        assert_eq!(metadata.quality.as_deref(), Some("HD"));
    }

    #[test]
    fn test_metadata_unknown_fields_pass_through() {
        let json = r#"{"itemId":"m1","progress":10,"timestamp":5,"deviceId":"d1",
            "metadata":{"quality":"4K","subtitleLang":"fr"},"version":2,"synced":true}"#;
        let record: ProgressRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.metadata.quality.as_deref(), Some("4K"));
        assert_eq!(record.metadata.extra["subtitleLang"], "fr");

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["metadata"]["subtitleLang"], "fr");
        assert_eq!(back["itemId"], "m1");
    }

    #[test]
    fn test_record_defaults_when_fields_missing() {
        let json = r#"{"itemId":"m1","progress":10,"timestamp":5,"deviceId":"d1"}"#;
        let record: ProgressRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.version, 0);
        assert!(!record.synced);
        assert_eq!(record.metadata, ProgressMetadata::default());
    }

    #[test]
    fn test_queue_entry_flattens_record() {
        let entry = SyncQueueEntry::new(ProgressRecord::new("m1", 30.0, 10, "d1"), 10);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["itemId"], "m1");
        assert_eq!(value["queuedAt"], 10);
        assert_eq!(value["attempts"], 0);
    }

    #[test]
    fn test_same_content_ignores_bookkeeping() {
        let a = ProgressRecord::new("m1", 30.0, 10, "d1");
        let b = a.clone().with_version(7).with_synced(true);
        assert!(a.same_content(&b));
        let c = ProgressRecord::new("m1", 31.0, 10, "d1");
        assert!(!a.same_content(&c));
    }
}
