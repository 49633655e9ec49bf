//! Consolidated per-day snapshot and its single-writer merge.
//!
//! Merge rules:
//! - records are keyed by `(dispensary, store id, batch id)`;
//! - only sources that completed in the current run are merged, so a source
//!   that failed, timed out or opened its circuit keeps its prior records;
//! - an incoming record replaces an existing one unless the existing record
//!   was seen later;
//! - nothing is ever deleted.
//!
//! The merged snapshot is written back with one atomic `put`. Concurrent
//! writers for the same day are serialised by a per-day lock, and each write
//! bumps the snapshot's `revision` so readers can tell which of two
//! snapshots of the same day is newer.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::object_store::{snapshot_path, ObjectStore, StoreError};
use crate::{DispensaryId, MergeKey, NormalizedBatchRecord, SnapshotDate, UtcDateTime};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("snapshot at '{path}' is not valid JSON: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Marks the last run in which a dispensary completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMarker {
    pub run_id: Uuid,
    pub finished_at: UtcDateTime,
    pub record_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispensarySnapshot {
    pub records: Vec<NormalizedBatchRecord>,
    pub last_successful_run: Option<RunMarker>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedSnapshot {
    pub date: SnapshotDate,
    pub generated_at: Option<UtcDateTime>,
    /// Number of writes this day's snapshot has seen.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub dispensaries: BTreeMap<DispensaryId, DispensarySnapshot>,
}

/// Counts produced by merging one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub replaced: usize,
    /// Incoming records older than what the snapshot already holds.
    pub kept_existing: usize,
    /// Incoming records without a batch id.
    pub unkeyed: usize,
}

impl MergeStats {
    fn absorb(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.kept_existing += other.kept_existing;
        self.unkeyed += other.unkeyed;
    }
}

/// Records of one completed source, ready to merge.
#[derive(Debug, Clone)]
pub struct SourceMerge {
    pub dispensary: DispensaryId,
    pub records: Vec<NormalizedBatchRecord>,
    pub marker: RunMarker,
}

impl ConsolidatedSnapshot {
    pub fn new(date: SnapshotDate) -> Self {
        Self {
            date,
            generated_at: None,
            revision: 0,
            dispensaries: BTreeMap::new(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.dispensaries
            .values()
            .map(|snapshot| snapshot.records.len())
            .sum()
    }

    pub fn records(&self) -> impl Iterator<Item = &NormalizedBatchRecord> {
        self.dispensaries
            .values()
            .flat_map(|snapshot| snapshot.records.iter())
    }

    /// Upserts a completed source's records. Records belonging to another
    /// dispensary are ignored.
    pub fn merge_source(&mut self, merge: &SourceMerge) -> MergeStats {
        let entry = self.dispensaries.entry(merge.dispensary).or_default();
        let mut by_key: BTreeMap<MergeKey, NormalizedBatchRecord> = entry
            .records
            .drain(..)
            .filter_map(|record| record.merge_key().map(|key| (key, record)))
            .collect();

        let mut stats = MergeStats::default();
        for record in merge
            .records
            .iter()
            .filter(|record| record.dispensary == merge.dispensary)
        {
            let Some(key) = record.merge_key() else {
                stats.unkeyed += 1;
                continue;
            };
            match by_key.get(&key).map(|existing| existing.last_seen) {
                None => {
                    stats.inserted += 1;
                    by_key.insert(key, record.clone());
                }
                Some(seen) if seen <= record.last_seen => {
                    stats.replaced += 1;
                    by_key.insert(key, record.clone());
                }
                Some(_) => stats.kept_existing += 1,
            }
        }

        entry.records = by_key.into_values().collect();
        entry.last_successful_run = Some(merge.marker);
        stats
    }
}

/// Loads, merges and atomically rewrites daily snapshots.
pub struct SnapshotWriter {
    store: Arc<dyn ObjectStore>,
    day_locks: Mutex<HashMap<SnapshotDate, Arc<tokio::sync::Mutex<()>>>>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            day_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(&self, date: SnapshotDate) -> Result<Option<ConsolidatedSnapshot>, SnapshotError> {
        let path = snapshot_path(date);
        let Some(bytes) = self.store.get(&path).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SnapshotError::Decode { path, source })
    }

    /// Most recent snapshot on `from` or up to `days` earlier.
    pub async fn load_latest(
        &self,
        from: SnapshotDate,
        days: u32,
    ) -> Result<Option<ConsolidatedSnapshot>, SnapshotError> {
        let mut date = Some(from);
        for _ in 0..=days {
            let Some(current) = date else { break };
            if let Some(snapshot) = self.load(current).await? {
                return Ok(Some(snapshot));
            }
            date = current.previous();
        }
        Ok(None)
    }

    /// Merges `merges` into the snapshot for `date` and writes it back.
    pub async fn write_run(
        &self,
        date: SnapshotDate,
        merges: &[SourceMerge],
        now: UtcDateTime,
    ) -> Result<(ConsolidatedSnapshot, MergeStats), SnapshotError> {
        let day_lock = self.day_lock(date);
        let _guard = day_lock.lock().await;

        let mut snapshot = self
            .load(date)
            .await?
            .unwrap_or_else(|| ConsolidatedSnapshot::new(date));

        let mut totals = MergeStats::default();
        for merge in merges {
            let stats = snapshot.merge_source(merge);
            debug!(
                dispensary = %merge.dispensary,
                inserted = stats.inserted,
                replaced = stats.replaced,
                kept_existing = stats.kept_existing,
                "merged source into snapshot"
            );
            totals.absorb(stats);
        }
        snapshot.generated_at = Some(now);
        snapshot.revision += 1;

        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(SnapshotError::Encode)?;
        self.store.put(&snapshot_path(date), bytes).await?;
        info!(
            date = %date,
            revision = snapshot.revision,
            records = snapshot.record_count(),
            sources_merged = merges.len(),
            "snapshot written"
        );
        Ok((snapshot, totals))
    }

    fn day_lock(&self, date: SnapshotDate) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.day_locks.lock().expect("day lock map is not poisoned");
        Arc::clone(locks.entry(date).or_default())
    }
}
