//! Concurrent ingestion across sources and stores.
//!
//! # Run classification
//!
//! | State | Condition |
//! |-------|-----------|
//! | `Failed` | no source produced a single product (systemic failure) |
//! | `Completed` | products were fetched and every configured source completed |
//! | `PartiallyCompleted` | products were fetched, at least one source did not complete |
//!
//! A source *completed* when at least one of its stores was fetched and it
//! neither opened its circuit nor hit its timeout. Only completed sources
//! are merged into the snapshot; the others keep their prior records. A
//! source that produced data and then opened its circuit therefore keeps
//! the run out of `Failed` without being merged.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitState, TripReason};
use crate::data_source::{ErrorTaxonomy, SourceAdapter, SourceError};
use crate::extractor::{CompletenessReport, CompletenessStats, Extractor};
use crate::guard::{GuardedFetch, SourceGuard};
use crate::object_store::{raw_artifact_path, ObjectStore};
use crate::source_policy::SourcePolicy;
use crate::{DispensaryId, NormalizedBatchRecord, Product, StoreRef, UtcDateTime, ValidationError};

pub const DEFAULT_POOL_SIZE: usize = 12;
const MAX_REPORTED_ERRORS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl RunState {
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyCompleted | Self::Failed)
    }
}

/// What started a run. Carried as metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    OnDemand,
}

impl RunTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::OnDemand => "on_demand",
        }
    }
}

impl Display for RunTrigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunTrigger {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "on_demand" => Ok(Self::OnDemand),
            _ => Err(ValidationError::InvalidTrigger {
                value: value.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFailure {
    pub store_id: String,
    pub code: String,
    pub taxonomy: ErrorTaxonomy,
    pub message: String,
}

impl StoreFailure {
    fn new(store_id: &str, error: &SourceError) -> Self {
        Self {
            store_id: store_id.to_owned(),
            code: error.code().to_owned(),
            taxonomy: error.taxonomy(),
            message: error.message().to_owned(),
        }
    }
}

/// Per-source breakdown reported by `/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub dispensary: DispensaryId,
    pub status: SourceStatus,
    pub detail: String,
    pub circuit_open: bool,
    pub timed_out: bool,
    pub stores_attempted: usize,
    pub stores_succeeded: usize,
    pub stores_skipped: usize,
    pub products_fetched: usize,
    pub records_skipped: usize,
    pub completeness: CompletenessReport,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StoreFailure>,
}

impl SourceOutcome {
    /// Whether this source's records may replace snapshot records.
    pub fn completed(&self) -> bool {
        self.status != SourceStatus::Failed && !self.circuit_open && !self.timed_out
    }

    fn unavailable(dispensary: DispensaryId, detail: String, timed_out: bool) -> Self {
        Self {
            dispensary,
            status: SourceStatus::Failed,
            detail,
            circuit_open: false,
            timed_out,
            stores_attempted: 0,
            stores_succeeded: 0,
            stores_skipped: 0,
            products_fetched: 0,
            records_skipped: 0,
            completeness: CompletenessStats::default().report(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub fetched: usize,
    pub skipped: usize,
    pub extraction_failed: usize,
}

/// Product description kept for lineage extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedProduct {
    pub dispensary: DispensaryId,
    pub strain_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRunResult {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub state: RunState,
    pub sources: Vec<SourceOutcome>,
    pub counters: RunCounters,
    #[serde(skip)]
    pub records: Vec<NormalizedBatchRecord>,
    #[serde(skip)]
    pub described: Vec<DescribedProduct>,
}

impl IngestionRunResult {
    pub fn completed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|outcome| outcome.completed())
    }

    pub fn records_for(&self, dispensary: DispensaryId) -> impl Iterator<Item = &NormalizedBatchRecord> {
        self.records
            .iter()
            .filter(move |record| record.dispensary == dispensary)
    }
}

pub fn classify_run(sources: &[SourceOutcome]) -> RunState {
    let produced = sources.iter().any(|outcome| outcome.products_fetched > 0);
    if !produced {
        RunState::Failed
    } else if sources.iter().all(SourceOutcome::completed) {
        RunState::Completed
    } else {
        RunState::PartiallyCompleted
    }
}

/// One configured source: adapter, resilience policy and field mapping.
#[derive(Clone)]
pub struct SourceRuntime {
    pub adapter: Arc<dyn SourceAdapter>,
    pub policy: SourcePolicy,
    pub extractor: Extractor,
}

impl SourceRuntime {
    pub fn new(adapter: Arc<dyn SourceAdapter>, policy: SourcePolicy, extractor: Extractor) -> Self {
        Self {
            adapter,
            policy,
            extractor,
        }
    }

    pub fn id(&self) -> DispensaryId {
        self.adapter.id()
    }
}

struct SourceRun {
    outcome: SourceOutcome,
    records: Vec<NormalizedBatchRecord>,
    described: Vec<DescribedProduct>,
}

pub struct IngestionOrchestrator {
    sources: Vec<SourceRuntime>,
    pool: Arc<Semaphore>,
    artifacts: Option<Arc<dyn ObjectStore>>,
}

impl IngestionOrchestrator {
    pub fn new(sources: Vec<SourceRuntime>, pool_size: usize) -> Self {
        Self {
            sources,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            artifacts: None,
        }
    }

    /// Writes each successful store fetch as a raw artifact.
    pub fn with_artifact_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn sources(&self) -> &[SourceRuntime] {
        &self.sources
    }

    /// Runs every source once, restricted to `only` when given.
    pub async fn run(
        &self,
        run_id: Uuid,
        trigger: RunTrigger,
        only: Option<&[DispensaryId]>,
    ) -> IngestionRunResult {
        let started_at = UtcDateTime::now();
        let selected: Vec<&SourceRuntime> = self
            .sources
            .iter()
            .filter(|source| only.map_or(true, |ids| ids.contains(&source.id())))
            .collect();
        info!(%run_id, %trigger, sources = selected.len(), "ingestion run started");

        let runs = futures::future::join_all(
            selected
                .into_iter()
                .map(|source| self.run_source_with_timeout(run_id, source)),
        )
        .await;

        let mut sources = Vec::with_capacity(runs.len());
        let mut records = Vec::new();
        let mut described = Vec::new();
        let mut counters = RunCounters::default();
        for run in runs {
            counters.fetched += run.outcome.products_fetched;
            counters.skipped += run.outcome.records_skipped;
            counters.extraction_failed += run.outcome.completeness.extraction_failed;
            records.extend(run.records);
            described.extend(run.described);
            sources.push(run.outcome);
        }

        let state = classify_run(&sources);
        let result = IngestionRunResult {
            run_id,
            trigger,
            started_at,
            finished_at: UtcDateTime::now(),
            state,
            sources,
            counters,
            records,
            described,
        };
        match state {
            RunState::Failed => tracing::error!(
                %run_id,
                fetched = counters.fetched,
                "ingestion run failed: no source produced data"
            ),
            RunState::PartiallyCompleted => warn!(
                %run_id,
                fetched = counters.fetched,
                incomplete = ?result
                    .sources
                    .iter()
                    .filter(|outcome| !outcome.completed())
                    .map(|outcome| outcome.dispensary)
                    .collect::<Vec<_>>(),
                "ingestion run partially completed"
            ),
            _ => info!(%run_id, fetched = counters.fetched, "ingestion run completed"),
        }
        result
    }

    async fn run_source_with_timeout(&self, run_id: Uuid, source: &SourceRuntime) -> SourceRun {
        let dispensary = source.id();
        let timeout = source.policy.timeout;
        match tokio::time::timeout(timeout, self.run_source(run_id, source)).await {
            Ok(run) => run,
            Err(_) => {
                warn!(%run_id, source = %dispensary, timeout_secs = timeout.as_secs(), "source timed out");
                SourceRun {
                    outcome: SourceOutcome::unavailable(
                        dispensary,
                        format!("timed out after {}", format_duration(timeout)),
                        true,
                    ),
                    records: Vec::new(),
                    described: Vec::new(),
                }
            }
        }
    }

    async fn run_source(&self, run_id: Uuid, source: &SourceRuntime) -> SourceRun {
        let dispensary = source.id();
        let adapter = source.adapter.as_ref();

        let stores = match source.policy.retry.run(|_| adapter.stores()).await {
            Ok(stores) => stores,
            Err(error) => {
                warn!(%run_id, source = %dispensary, code = error.code(), "store enumeration failed");
                let mut outcome = SourceOutcome::unavailable(
                    dispensary,
                    format!("store enumeration failed: {}", error.message()),
                    false,
                );
                outcome.errors.push(StoreFailure::new("*", &error));
                return SourceRun {
                    outcome,
                    records: Vec::new(),
                    described: Vec::new(),
                };
            }
        };

        let stores = match source.policy.store_batch {
            Some(batch) => {
                let total = stores.len();
                let selected = batch.select(stores);
                info!(
                    %run_id,
                    source = %dispensary,
                    batch = batch.index,
                    batches = batch.total_batches(total),
                    stores = selected.len(),
                    "running one store batch"
                );
                selected
            }
            None => stores,
        };

        let guard = SourceGuard::new(&source.policy);
        let fetches: Vec<(StoreRef, GuardedFetch)> = stream::iter(stores)
            .map(|store| {
                let guard = &guard;
                let pool = Arc::clone(&self.pool);
                async move {
                    let _worker = pool.acquire_owned().await;
                    let fetched = guard.fetch(adapter, &store).await;
                    (store, fetched)
                }
            })
            .buffer_unordered(source.policy.max_concurrency.max(1))
            .collect()
            .await;

        let mut outcome = SourceOutcome::unavailable(dispensary, String::new(), false);
        outcome.stores_attempted = fetches.len();
        let mut stats = CompletenessStats::default();
        let mut records = Vec::new();
        let mut described = Vec::new();
        let mut failed_stores = 0;

        for (store, fetched) in fetches {
            match fetched {
                GuardedFetch::Fetched(fetch) => {
                    outcome.stores_succeeded += 1;
                    outcome.products_fetched += fetch.products.len();
                    outcome.records_skipped += fetch.skipped;
                    self.write_artifact(run_id, dispensary, &store, &fetch.products).await;
                    for product in &fetch.products {
                        let record = source.extractor.extract(product, &store);
                        stats.observe(product, &record);
                        if let (Some(strain), Some(description)) =
                            (&record.strain_name, &product.description)
                        {
                            described.push(DescribedProduct {
                                dispensary,
                                strain_name: strain.clone(),
                                description: description.clone(),
                            });
                        }
                        records.push(record);
                    }
                }
                GuardedFetch::Failed(error) => {
                    failed_stores += 1;
                    if outcome.errors.len() < MAX_REPORTED_ERRORS {
                        outcome.errors.push(StoreFailure::new(&store.id, &error));
                    }
                }
                GuardedFetch::SkippedCircuitOpen => outcome.stores_skipped += 1,
            }
        }

        outcome.circuit_open = guard.circuit_state() == CircuitState::Open;
        outcome.completeness = stats.report();
        outcome.status = if outcome.stores_succeeded == 0 {
            SourceStatus::Failed
        } else if failed_stores > 0 || outcome.stores_skipped > 0 {
            SourceStatus::Partial
        } else {
            SourceStatus::Success
        };
        outcome.detail = source_detail(&outcome, failed_stores, guard.trip_reason());

        if outcome.circuit_open {
            warn!(%run_id, source = %dispensary, skipped = outcome.stores_skipped, "source circuit open");
        }
        info!(
            %run_id,
            source = %dispensary,
            status = ?outcome.status,
            stores = outcome.stores_succeeded,
            products = outcome.products_fetched,
            "source finished"
        );
        SourceRun {
            outcome,
            records,
            described,
        }
    }

    async fn write_artifact(&self, run_id: Uuid, dispensary: DispensaryId, store: &StoreRef, products: &[Product]) {
        let Some(artifacts) = &self.artifacts else {
            return;
        };
        let fetched_at = products
            .first()
            .map(|product| product.fetched_at)
            .unwrap_or_else(UtcDateTime::now);
        let document = serde_json::json!({
            "run_id": run_id,
            "source": dispensary,
            "store": store,
            "fetched_at": fetched_at,
            "product_count": products.len(),
            "products": products,
        });
        let path = raw_artifact_path(dispensary, &store.id, fetched_at);
        let written = match serde_json::to_vec(&document) {
            Ok(bytes) => artifacts.put(&path, bytes).await.map_err(|error| error.to_string()),
            Err(error) => Err(error.to_string()),
        };
        if let Err(error) = written {
            warn!(%run_id, source = %dispensary, store = %store.id, %error, "raw artifact not written");
        }
    }
}

fn source_detail(outcome: &SourceOutcome, failed_stores: usize, trip: Option<TripReason>) -> String {
    let mut detail = format!(
        "{}/{} stores fetched",
        outcome.stores_succeeded, outcome.stores_attempted
    );
    if failed_stores > 0 {
        detail.push_str(&format!(", {failed_stores} failed"));
    }
    if outcome.circuit_open {
        let reason = match trip {
            Some(TripReason::Blocked) => "upstream blocked the client",
            _ => "too many consecutive failures",
        };
        detail.push_str(&format!(
            ", circuit open ({reason}), {} skipped",
            outcome.stores_skipped
        ));
    }
    detail
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() > 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
