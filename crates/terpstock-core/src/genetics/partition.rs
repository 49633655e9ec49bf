use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::extract::{Confidence, ConfidencePolicy, ExtractionMethod, LineageExtractor};
use super::GeneticsError;
use crate::object_store::{genetics_partition_path, ObjectStore, GENETICS_INDEX_PATH};
use crate::{strain_slug, DispensaryId, UtcDateTime};

/// Lineage facts for one strain; `slug` is the case-insensitive key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneticsRecord {
    pub strain_name: String,
    pub slug: String,
    pub parent1: String,
    pub parent2: String,
    pub source: DispensaryId,
    pub confidence: Confidence,
    pub method: ExtractionMethod,
    pub extracted_at: UtcDateTime,
}

impl GeneticsRecord {
    /// Runs the lineage patterns over `description`.
    pub fn from_description(
        extractor: &LineageExtractor,
        policy: &ConfidencePolicy,
        strain_name: &str,
        description: &str,
        source: DispensaryId,
        extracted_at: UtcDateTime,
    ) -> Option<Self> {
        let slug = strain_slug(strain_name);
        if slug.is_empty() {
            return None;
        }
        let lineage = extractor.extract(description)?;
        Some(Self {
            strain_name: strain_name.trim().to_owned(),
            slug,
            parent1: lineage.parent1,
            parent2: lineage.parent2,
            source,
            confidence: policy.confidence_for(lineage.method),
            method: lineage.method,
            extracted_at,
        })
    }

    pub fn partition_key(&self) -> String {
        partition_key(&self.slug)
    }
}

/// First slug character when it is `a`–`z`, otherwise `other`.
pub fn partition_key(slug: &str) -> String {
    match slug.chars().next() {
        Some(first) if first.is_ascii_lowercase() => first.to_string(),
        _ => String::from("other"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneticsPartition {
    #[serde(default)]
    pub strains: Vec<GeneticsRecord>,
    pub updated_at: Option<UtcDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneticsIndexEntry {
    pub name: String,
    pub partition: String,
    pub has_lineage: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneticsIndex {
    #[serde(default)]
    pub strains: BTreeMap<String, GeneticsIndexEntry>,
    pub total_strains: usize,
    pub updated_at: Option<UtcDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneticsMergeOutcome {
    pub inserted: usize,
    pub upgraded: usize,
    /// Candidates that lost to an existing record of equal or higher confidence.
    pub kept_existing: usize,
    pub partitions_written: Vec<String>,
}

/// Upserts genetics candidates into alphabetical partitions.
///
/// Only the partitions touched by a candidate are loaded, and only the ones
/// that actually changed are written back.
pub struct GeneticsPartitionMerger {
    store: Arc<dyn ObjectStore>,
    writer: Mutex<()>,
}

impl GeneticsPartitionMerger {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    pub async fn merge(
        &self,
        candidates: Vec<GeneticsRecord>,
    ) -> Result<GeneticsMergeOutcome, GeneticsError> {
        let _guard = self.writer.lock().await;
        let mut outcome = GeneticsMergeOutcome::default();
        if candidates.is_empty() {
            return Ok(outcome);
        }

        let mut by_partition: BTreeMap<String, Vec<GeneticsRecord>> = BTreeMap::new();
        for candidate in candidates {
            by_partition
                .entry(candidate.partition_key())
                .or_default()
                .push(candidate);
        }

        let mut touched: Vec<(String, GeneticsPartition)> = Vec::new();
        for (key, candidates) in by_partition {
            let mut partition = self.load_partition(&key).await?;
            let mut modified = false;
            for candidate in candidates {
                match upsert(&mut partition, candidate) {
                    Upsert::Inserted => {
                        outcome.inserted += 1;
                        modified = true;
                    }
                    Upsert::Upgraded => {
                        outcome.upgraded += 1;
                        modified = true;
                    }
                    Upsert::Kept => outcome.kept_existing += 1,
                }
            }
            if modified {
                touched.push((key, partition));
            }
        }

        if touched.is_empty() {
            debug!(kept = outcome.kept_existing, "genetics unchanged");
            return Ok(outcome);
        }

        let now = UtcDateTime::now();
        let mut index = self.load_index().await?;
        let mut written = Vec::with_capacity(touched.len());
        let mut failure = None;
        for (key, mut partition) in touched {
            partition.strains.sort_by(|left, right| left.slug.cmp(&right.slug));
            partition.updated_at = Some(now);
            if let Err(error) = self.write_partition(&key, &partition).await {
                failure = Some(error);
                break;
            }
            for record in &partition.strains {
                index.strains.insert(
                    record.slug.clone(),
                    GeneticsIndexEntry {
                        name: record.strain_name.clone(),
                        partition: key.clone(),
                        has_lineage: true,
                    },
                );
            }
            written.push(key);
        }

        // The index must list every partition that reached the store, even
        // when a later partition failed.
        if !written.is_empty() {
            index.total_strains = index.strains.len();
            index.updated_at = Some(now);
            let stored = self.write_index(&index).await;
            if let (Err(index_error), Some(error)) = (&stored, &failure) {
                warn!(%error, %index_error, "genetics index not updated after partition failure");
            }
            if failure.is_none() {
                stored?;
            }
        }

        if let Some(error) = failure {
            warn!(written = ?written, %error, "genetics merge stopped at a failed partition");
            return Err(error);
        }

        outcome.partitions_written = written;
        info!(
            inserted = outcome.inserted,
            upgraded = outcome.upgraded,
            partitions = ?outcome.partitions_written,
            "genetics partitions merged"
        );
        Ok(outcome)
    }

    async fn write_partition(&self, key: &str, partition: &GeneticsPartition) -> Result<(), GeneticsError> {
        let bytes = serde_json::to_vec_pretty(partition).map_err(GeneticsError::Encode)?;
        self.store.put(&genetics_partition_path(key), bytes).await?;
        Ok(())
    }

    async fn write_index(&self, index: &GeneticsIndex) -> Result<(), GeneticsError> {
        let bytes = serde_json::to_vec_pretty(index).map_err(GeneticsError::Encode)?;
        self.store.put(GENETICS_INDEX_PATH, bytes).await?;
        Ok(())
    }

    /// Looks up one strain by name, reading a single partition.
    pub async fn lookup(&self, strain_name: &str) -> Result<Option<GeneticsRecord>, GeneticsError> {
        let slug = strain_slug(strain_name);
        if slug.is_empty() {
            return Ok(None);
        }
        let partition = self.load_partition(&partition_key(&slug)).await?;
        Ok(partition.strains.into_iter().find(|record| record.slug == slug))
    }

    pub async fn load_index(&self) -> Result<GeneticsIndex, GeneticsError> {
        match self.store.get(GENETICS_INDEX_PATH).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| GeneticsError::Decode {
                path: GENETICS_INDEX_PATH.to_owned(),
                source,
            }),
            None => Ok(GeneticsIndex::default()),
        }
    }

    async fn load_partition(&self, key: &str) -> Result<GeneticsPartition, GeneticsError> {
        let path = genetics_partition_path(key);
        match self.store.get(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| GeneticsError::Decode { path, source }),
            None => Ok(GeneticsPartition::default()),
        }
    }
}

enum Upsert {
    Inserted,
    Upgraded,
    Kept,
}

/// Higher confidence replaces; equal or lower confidence never does.
fn upsert(partition: &mut GeneticsPartition, candidate: GeneticsRecord) -> Upsert {
    let existing = partition
        .strains
        .iter()
        .position(|record| record.slug == candidate.slug);
    match existing {
        None => {
            partition.strains.push(candidate);
            Upsert::Inserted
        }
        Some(position) if candidate.confidence > partition.strains[position].confidence => {
            partition.strains[position] = candidate;
            Upsert::Upgraded
        }
        Some(_) => Upsert::Kept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{InMemoryObjectStore, StoreError, StoreFuture};

    /// Refuses writes to one path, delegating everything else.
    struct RejectingStore {
        inner: InMemoryObjectStore,
        rejected: &'static str,
    }

    impl ObjectStore for RejectingStore {
        fn get<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
            self.inner.get(path)
        }

        fn put<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> StoreFuture<'a, ()> {
            if path == self.rejected {
                return Box::pin(async move { Err(StoreError::Task(format!("write to {path} refused"))) });
            }
            self.inner.put(path, bytes)
        }
    }

    fn candidate(name: &str, parents: (&str, &str), confidence: Confidence) -> GeneticsRecord {
        GeneticsRecord {
            strain_name: name.to_owned(),
            slug: strain_slug(name),
            parent1: parents.0.to_owned(),
            parent2: parents.1.to_owned(),
            source: DispensaryId::Muv,
            confidence,
            method: match confidence {
                Confidence::High => ExtractionMethod::CrossOf,
                Confidence::Medium => ExtractionMethod::HybridOf,
            },
            extracted_at: UtcDateTime::now(),
        }
    }

    #[test]
    fn partition_keys_use_the_first_letter_or_other() {
        assert_eq!(partition_key("gelato"), "g");
        assert_eq!(partition_key("9-lb-hammer"), "other");
        assert_eq!(partition_key(""), "other");
    }

    #[tokio::test]
    async fn medium_never_overwrites_high_and_high_upgrades_medium() {
        let store = Arc::new(InMemoryObjectStore::new());
        let merger = GeneticsPartitionMerger::new(store);

        merger
            .merge(vec![candidate("Gelato", ("Sunset Sherbet", "Thin Mint"), Confidence::High)])
            .await
            .expect("merge succeeds");
        let outcome = merger
            .merge(vec![candidate("GELATO", ("Foo", "Bar"), Confidence::Medium)])
            .await
            .expect("merge succeeds");

        assert_eq!(outcome.kept_existing, 1);
        assert!(outcome.partitions_written.is_empty());
        let gelato = merger.lookup("gelato").await.expect("lookup").expect("record");
        assert_eq!(gelato.parent1, "Sunset Sherbet");

        merger
            .merge(vec![candidate("Runtz", ("Zkittlez", "Gelato"), Confidence::Medium)])
            .await
            .expect("merge succeeds");
        let upgraded = merger
            .merge(vec![candidate("Runtz", ("Zkittlez", "Gelato 33"), Confidence::High)])
            .await
            .expect("merge succeeds");
        assert_eq!(upgraded.upgraded, 1);
    }

    #[tokio::test]
    async fn writes_only_touched_partitions_and_the_index() {
        let store = Arc::new(InMemoryObjectStore::new());
        let merger = GeneticsPartitionMerger::new(store.clone());

        let outcome = merger
            .merge(vec![
                candidate("Blue Dream", ("Blueberry", "Haze"), Confidence::High),
                candidate("Banana Kush", ("Ghost Og", "Skunk Haze"), Confidence::High),
                candidate("707 Headband", ("Sour Diesel", "Og Kush"), Confidence::Medium),
            ])
            .await
            .expect("merge succeeds");

        assert_eq!(outcome.partitions_written, vec!["b", "other"]);
        assert_eq!(
            store.paths(),
            vec![
                "genetics/index.json",
                "genetics/partitions/b.json",
                "genetics/partitions/other.json",
            ]
        );

        let index = merger.load_index().await.expect("index");
        assert_eq!(index.total_strains, 3);
        assert_eq!(index.strains["707-headband"].partition, "other");
    }

    #[tokio::test]
    async fn partitions_written_before_a_failure_stay_indexed() {
        let store = Arc::new(RejectingStore {
            inner: InMemoryObjectStore::new(),
            rejected: "genetics/partitions/g.json",
        });
        let merger = GeneticsPartitionMerger::new(store.clone());

        let result = merger
            .merge(vec![
                candidate("Blue Dream", ("Blueberry", "Haze"), Confidence::High),
                candidate("Gelato", ("Sunset Sherbet", "Thin Mint"), Confidence::High),
                candidate("Runtz", ("Zkittlez", "Gelato"), Confidence::High),
            ])
            .await;

        assert!(matches!(result, Err(GeneticsError::Store(_))));
        assert_eq!(
            store.inner.paths(),
            vec!["genetics/index.json", "genetics/partitions/b.json"]
        );
        let index = merger.load_index().await.expect("index");
        assert_eq!(index.total_strains, 1);
        assert_eq!(index.strains["blue-dream"].partition, "b");
        assert!(merger.lookup("Blue Dream").await.expect("lookup").is_some());
    }
}
