//! Durable object storage used for snapshots, raw artifacts and genetics
//! partitions.
//!
//! | Path | Contents |
//! |------|----------|
//! | `batches/consolidated_batches_{yyyyMMdd}.json` | Consolidated snapshot for one day |
//! | `dispensaries/{source}/{yyyy}/{mm}/{dd}/{stamp}_{store}.json` | Raw store fetch |
//! | `genetics/partitions/{key}.json` | Genetics records for one partition |
//! | `genetics/index.json` | Strain slug → partition listing |
//!
//! `put` is an atomic replace: readers observe either the previous object or
//! the new one, never a partial write.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::{DispensaryId, SnapshotDate, UtcDateTime};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object path '{path}'")]
    InvalidPath { path: String },
    #[error("object store i/o failed for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("object store task failed: {0}")]
    Task(String),
}

/// Key/value object store with atomic replace semantics.
pub trait ObjectStore: Send + Sync {
    /// Returns `None` when nothing is stored at `path`.
    fn get<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    fn put<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> StoreFuture<'a, ()>;
}

pub fn snapshot_path(date: SnapshotDate) -> String {
    format!("batches/consolidated_batches_{date}.json")
}

pub fn raw_artifact_path(source: DispensaryId, store_id: &str, fetched_at: UtcDateTime) -> String {
    let date = fetched_at.snapshot_date();
    let store: String = store_id
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' })
        .collect();
    format!(
        "dispensaries/{source}/{:04}/{:02}/{:02}/{}_{store}.json",
        date.year(),
        date.month(),
        date.day(),
        fetched_at.compact_stamp(),
    )
}

pub fn genetics_partition_path(key: &str) -> String {
    format!("genetics/partitions/{key}.json")
}

pub const GENETICS_INDEX_PATH: &str = "genetics/index.json";

/// Filesystem-backed store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, std::path::Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidPath {
                path: path.to_owned(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for FsObjectStore {
    fn get<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            match tokio::fs::read(&full).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(source) => Err(StoreError::Io {
                    path: path.to_owned(),
                    source,
                }),
            }
        })
    }

    fn put<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            let owned_path = path.to_owned();
            tokio::task::spawn_blocking(move || write_atomically(&full, &bytes))
                .await
                .map_err(|error| StoreError::Task(error.to_string()))?
                .map_err(|source| StoreError::Io {
                    path: owned_path,
                    source,
                })
        })
    }
}

/// Writes to a temp file in the target directory, then renames over the
/// target.
fn write_atomically(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|error| error.error)?;
    Ok(())
}

/// In-process store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("object map lock is not poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        let found = self
            .objects
            .lock()
            .expect("object map lock is not poisoned")
            .get(path)
            .cloned();
        Box::pin(async move { Ok(found) })
    }

    fn put<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> StoreFuture<'a, ()> {
        self.objects
            .lock()
            .expect("object map lock is not poisoned")
            .insert(path.to_owned(), bytes);
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_replaces_objects_and_reports_missing_ones() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FsObjectStore::new(dir.path());

        assert_eq!(store.get("batches/a.json").await.expect("read"), None);

        store.put("batches/a.json", b"first".to_vec()).await.expect("write");
        store.put("batches/a.json", b"second".to_vec()).await.expect("write");

        let bytes = store.get("batches/a.json").await.expect("read");
        assert_eq!(bytes.as_deref(), Some(&b"second"[..]));
        assert!(dir.path().join("batches/a.json").exists());
    }

    #[tokio::test]
    async fn fs_store_rejects_paths_escaping_the_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FsObjectStore::new(dir.path());

        let error = store
            .put("../outside.json", Vec::new())
            .await
            .expect_err("escape rejected");
        assert!(matches!(error, StoreError::InvalidPath { .. }));
    }

    #[test]
    fn path_conventions() {
        let date = SnapshotDate::from_ymd(2026, 3, 7).expect("valid date");
        assert_eq!(snapshot_path(date), "batches/consolidated_batches_20260307.json");
        assert_eq!(genetics_partition_path("g"), "genetics/partitions/g.json");

        let fetched = UtcDateTime::parse("2026-03-07T09:05:01Z").expect("valid timestamp");
        assert_eq!(
            raw_artifact_path(DispensaryId::Trulieve, "palm coast", fetched),
            "dispensaries/trulieve/2026/03/07/20260307_090501_palm_coast.json"
        );
    }
}
