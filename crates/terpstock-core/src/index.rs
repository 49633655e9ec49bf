//! Read-model built wholly from one consolidated snapshot.
//!
//! The index is immutable once built. [`IndexHandle`] holds the current
//! index behind a single reference that a rebuild swaps atomically, so
//! readers never see a half-built index and never wait on a rebuild.
//! A rebuild from a snapshot older than the one already published is
//! dropped, so overlapping runs that finish out of order cannot move the
//! index backwards.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::ConsolidatedSnapshot;
use crate::{normalize_strain_key, DispensaryId, NormalizedBatchRecord, SnapshotDate, UtcDateTime};

/// Index metadata reported by `/stock/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub snapshot_date: Option<SnapshotDate>,
    #[serde(default)]
    pub snapshot_revision: u64,
    pub built_at: UtcDateTime,
    pub record_count: usize,
    pub strain_count: usize,
    pub per_dispensary: BTreeMap<DispensaryId, usize>,
}

#[derive(Debug, Clone)]
pub struct StrainIndex {
    records: Vec<NormalizedBatchRecord>,
    /// Normalized strain key → positions in `records`.
    by_strain: BTreeMap<String, Vec<usize>>,
    /// (dispensary, lowercase batch id) → positions in `records`.
    by_batch: BTreeMap<(DispensaryId, String), Vec<usize>>,
    metadata: IndexMetadata,
}

impl StrainIndex {
    pub fn empty() -> Self {
        Self::from_records(None, 0, Vec::new())
    }

    pub fn build(snapshot: &ConsolidatedSnapshot) -> Self {
        Self::from_records(
            Some(snapshot.date),
            snapshot.revision,
            snapshot.records().cloned().collect(),
        )
    }

    fn from_records(
        snapshot_date: Option<SnapshotDate>,
        snapshot_revision: u64,
        mut records: Vec<NormalizedBatchRecord>,
    ) -> Self {
        records.sort_by(|left, right| {
            (left.dispensary, left.store_label(), &left.batch_id)
                .cmp(&(right.dispensary, right.store_label(), &right.batch_id))
        });

        let mut by_strain: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut by_batch: BTreeMap<(DispensaryId, String), Vec<usize>> = BTreeMap::new();
        let mut per_dispensary = BTreeMap::new();

        for (position, record) in records.iter().enumerate() {
            *per_dispensary.entry(record.dispensary).or_insert(0) += 1;
            if let Some(strain) = &record.strain_name {
                let key = normalize_strain_key(strain);
                if !key.is_empty() {
                    by_strain.entry(key).or_default().push(position);
                }
            }
            if let Some(batch) = &record.batch_id {
                by_batch
                    .entry((record.dispensary, batch.to_lowercase()))
                    .or_default()
                    .push(position);
            }
        }

        let metadata = IndexMetadata {
            snapshot_date,
            snapshot_revision,
            built_at: UtcDateTime::now(),
            record_count: records.len(),
            strain_count: by_strain.len(),
            per_dispensary,
        };
        Self {
            records,
            by_strain,
            by_batch,
            metadata,
        }
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    /// Orders indexes by the snapshot they were built from.
    fn version(&self) -> (Option<SnapshotDate>, u64) {
        (self.metadata.snapshot_date, self.metadata.snapshot_revision)
    }

    /// Strain keys with their records, in key order.
    pub fn strains(&self) -> impl Iterator<Item = (&str, Vec<&NormalizedBatchRecord>)> + '_ {
        self.by_strain.iter().map(|(key, positions)| {
            let records = positions.iter().map(|position| &self.records[*position]).collect();
            (key.as_str(), records)
        })
    }

    /// Records whose normalized strain key is exactly `key`.
    pub fn strain(&self, key: &str) -> Vec<&NormalizedBatchRecord> {
        self.by_strain
            .get(key)
            .map(|positions| positions.iter().map(|position| &self.records[*position]).collect())
            .unwrap_or_default()
    }

    /// Records carrying `batch_id` (case-insensitive) at `dispensary`.
    pub fn batch(&self, dispensary: DispensaryId, batch_id: &str) -> Vec<&NormalizedBatchRecord> {
        self.by_batch
            .get(&(dispensary, batch_id.trim().to_lowercase()))
            .map(|positions| positions.iter().map(|position| &self.records[*position]).collect())
            .unwrap_or_default()
    }

    pub fn dispensary(&self, dispensary: DispensaryId) -> impl Iterator<Item = &NormalizedBatchRecord> {
        self.records
            .iter()
            .filter(move |record| record.dispensary == dispensary)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Shared handle to the current index.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    current: Arc<RwLock<Arc<StrainIndex>>>,
}

impl IndexHandle {
    pub fn new(index: StrainIndex) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    /// The index as of this call; later swaps do not affect it.
    pub fn current(&self) -> Arc<StrainIndex> {
        self.current
            .read()
            .expect("index lock is not poisoned")
            .clone()
    }

    /// Swaps `index` in unless the current one was built from a newer
    /// snapshot. Returns whether the swap happened.
    pub fn publish(&self, index: StrainIndex) -> bool {
        let next = Arc::new(index);
        let mut current = self.current.write().expect("index lock is not poisoned");
        if current.version() > next.version() {
            debug!(
                current = ?current.version(),
                rejected = ?next.version(),
                "stale index not published"
            );
            return false;
        }
        *current = next;
        true
    }

    /// Builds from `snapshot` off the lock, then publishes.
    pub fn rebuild(&self, snapshot: &ConsolidatedSnapshot) -> bool {
        self.publish(StrainIndex::build(snapshot))
    }
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new(StrainIndex::empty())
    }
}
