//! The run pipeline: orchestrate, merge, rebuild, extract genetics.
//!
//! Scheduled and on-demand runs both enter through
//! [`IngestionService::start_run`]; the trigger is carried as metadata
//! only. Concurrent runs are allowed, the snapshot writer serializes their
//! merge step per calendar day.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::build_adapter;
use crate::config::{ConfigError, TerpstockConfig};
use crate::extractor::Extractor;
use crate::genetics::{
    ConfidencePolicy, GeneticsError, GeneticsMergeOutcome, GeneticsPartitionMerger, GeneticsRecord,
    LineageExtractor,
};
use crate::http_client::HttpClient;
use crate::index::{IndexHandle, IndexMetadata};
use crate::locations::{LocationBook, LocationError};
use crate::object_store::ObjectStore;
use crate::orchestrator::{IngestionOrchestrator, IngestionRunResult, RunState, RunTrigger, SourceRuntime};
use crate::query::StockQueryService;
use crate::snapshot::{MergeStats, RunMarker, SnapshotError, SnapshotWriter, SourceMerge};
use crate::{DispensaryId, SnapshotDate, UtcDateTime};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run {run_id} failed: no source produced data")]
    SystemicFailure { run_id: Uuid, report: Box<RunReport> },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Genetics(#[from] GeneticsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Locations(#[from] LocationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub date: SnapshotDate,
    pub record_count: usize,
    pub merged_sources: Vec<DispensaryId>,
    pub merge: MergeStats,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: IngestionRunResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genetics: Option<GeneticsMergeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRun {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub state: RunState,
    pub started_at: UtcDateTime,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub active_runs: Vec<ActiveRun>,
    pub last_run: Option<RunReport>,
    pub index: IndexMetadata,
}

/// In-flight runs plus the last finished one.
#[derive(Debug, Default)]
pub struct RunRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    active: Vec<ActiveRun>,
    last: Option<RunReport>,
}

impl RunRegistry {
    fn begin(&self, run_id: Uuid, trigger: RunTrigger) {
        let mut state = self.inner.lock().expect("run registry is not poisoned");
        state.active.push(ActiveRun {
            run_id,
            trigger,
            state: RunState::Pending,
            started_at: UtcDateTime::now(),
        });
    }

    fn mark_running(&self, run_id: Uuid) {
        let mut state = self.inner.lock().expect("run registry is not poisoned");
        if let Some(run) = state.active.iter_mut().find(|run| run.run_id == run_id) {
            run.state = RunState::Running;
        }
    }

    fn finish(&self, report: RunReport) {
        let mut state = self.inner.lock().expect("run registry is not poisoned");
        state.active.retain(|run| run.run_id != report.run.run_id);
        // A slow run finishing after a newer one does not replace it.
        let newer_exists = state
            .last
            .as_ref()
            .is_some_and(|last| last.run.started_at > report.run.started_at);
        if !newer_exists {
            state.last = Some(report);
        }
    }

    pub fn active(&self) -> Vec<ActiveRun> {
        self.inner
            .lock()
            .expect("run registry is not poisoned")
            .active
            .clone()
    }

    pub fn last(&self) -> Option<RunReport> {
        self.inner
            .lock()
            .expect("run registry is not poisoned")
            .last
            .clone()
    }
}

struct GeneticsStage {
    extractor: LineageExtractor,
    policy: ConfidencePolicy,
    merger: GeneticsPartitionMerger,
}

pub struct IngestionService {
    orchestrator: IngestionOrchestrator,
    snapshots: SnapshotWriter,
    index: IndexHandle,
    genetics: Option<GeneticsStage>,
    registry: RunRegistry,
    warm_start_days: u32,
    locations: Arc<LocationBook>,
}

impl IngestionService {
    pub fn new(orchestrator: IngestionOrchestrator, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            orchestrator,
            snapshots: SnapshotWriter::new(store),
            index: IndexHandle::default(),
            genetics: None,
            registry: RunRegistry::default(),
            warm_start_days: 7,
            locations: Arc::default(),
        }
    }

    /// Enables lineage extraction into `store`'s genetics partitions.
    pub fn with_genetics(
        mut self,
        store: Arc<dyn ObjectStore>,
        policy: ConfidencePolicy,
    ) -> Result<Self, GeneticsError> {
        self.genetics = Some(GeneticsStage {
            extractor: LineageExtractor::new()?,
            policy,
            merger: GeneticsPartitionMerger::new(store),
        });
        Ok(self)
    }

    pub fn with_warm_start_days(mut self, days: u32) -> Self {
        self.warm_start_days = days;
        self
    }

    /// Reference coordinates used by distance queries.
    pub fn with_locations(mut self, locations: LocationBook) -> Self {
        self.locations = Arc::new(locations);
        self
    }

    /// Wires adapters, policies and mappings for every enabled source.
    pub fn from_config(
        config: &TerpstockConfig,
        http_client: Arc<dyn HttpClient>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, PipelineError> {
        let sources = config
            .enabled_sources()
            .into_iter()
            .map(|id| {
                let adapter = build_adapter(
                    id,
                    Arc::clone(&http_client),
                    config.source(id).stores,
                    config.token(id).map(|token| token.expose().to_owned()),
                );
                SourceRuntime::new(adapter, config.policy_for(id), Extractor::new(config.mapping_for(id)))
            })
            .collect();

        let mut orchestrator = IngestionOrchestrator::new(sources, config.orchestrator.pool_size);
        if config.orchestrator.write_raw_artifacts {
            orchestrator = orchestrator.with_artifact_store(Arc::clone(&store));
        }

        let mut service = Self::new(orchestrator, Arc::clone(&store))
            .with_warm_start_days(config.orchestrator.warm_start_days);
        if let Some(path) = &config.locations.path {
            service = service.with_locations(LocationBook::load(path)?);
        }
        if config.genetics.enabled {
            return Ok(service.with_genetics(store, config.genetics.confidence)?);
        }
        Ok(service)
    }

    pub fn index(&self) -> IndexHandle {
        self.index.clone()
    }

    pub fn query(&self) -> StockQueryService {
        StockQueryService::new(self.index.clone()).with_locations(Arc::clone(&self.locations))
    }

    pub fn orchestrator(&self) -> &IngestionOrchestrator {
        &self.orchestrator
    }

    pub fn genetics(&self) -> Option<&GeneticsPartitionMerger> {
        self.genetics.as_ref().map(|stage| &stage.merger)
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            active_runs: self.registry.active(),
            last_run: self.registry.last(),
            index: self.index.current().metadata().clone(),
        }
    }

    /// Loads today's snapshot, or the most recent one in the warm-start
    /// window, into the index.
    pub async fn warm_start(&self) -> Result<Option<SnapshotDate>, PipelineError> {
        let today = UtcDateTime::now().snapshot_date();
        match self.snapshots.load_latest(today, self.warm_start_days).await? {
            Some(snapshot) => {
                self.index.rebuild(&snapshot);
                info!(date = %snapshot.date, records = snapshot.record_count(), "index warmed from snapshot");
                Ok(Some(snapshot.date))
            }
            None => {
                info!(days = self.warm_start_days, "no recent snapshot, index starts empty");
                Ok(None)
            }
        }
    }

    /// Starts a run in the background and returns its id immediately.
    pub fn start_run(self: &Arc<Self>, trigger: RunTrigger, only: Option<Vec<DispensaryId>>) -> Uuid {
        let run_id = Uuid::new_v4();
        self.registry.begin(run_id, trigger);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = service.execute(run_id, trigger, only.as_deref()).await {
                error!(%run_id, %error, "run did not complete");
            }
        });
        run_id
    }

    /// Runs to completion on the caller's task.
    pub async fn run_once(
        &self,
        trigger: RunTrigger,
        only: Option<&[DispensaryId]>,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        self.registry.begin(run_id, trigger);
        self.execute(run_id, trigger, only).await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        trigger: RunTrigger,
        only: Option<&[DispensaryId]>,
    ) -> Result<RunReport, PipelineError> {
        self.registry.mark_running(run_id);
        let run = self.orchestrator.run(run_id, trigger, only).await;
        let mut report = RunReport {
            run,
            snapshot: None,
            genetics: None,
            error: None,
        };

        if report.run.state == RunState::Failed {
            report.error = Some(String::from("systemic failure: no source produced data"));
            self.registry.finish(report.clone());
            return Err(PipelineError::SystemicFailure {
                run_id,
                report: Box::new(report),
            });
        }

        if report.run.completed_sources().next().is_none() {
            // Data arrived but every source stopped short; prior records stand.
            warn!(%run_id, "no source completed; snapshot left as is");
        } else {
            match self.merge_snapshot(&report.run).await {
                Ok(summary) => report.snapshot = Some(summary),
                Err(error) => {
                    report.error = Some(error.to_string());
                    self.registry.finish(report);
                    return Err(error.into());
                }
            }
        }

        if let Some(stage) = &self.genetics {
            match merge_genetics(stage, &report.run).await {
                Ok(outcome) => report.genetics = Some(outcome),
                Err(error) => {
                    warn!(%run_id, %error, "genetics merge failed; snapshot is unaffected");
                    report.error = Some(format!("genetics: {error}"));
                }
            }
        }

        self.registry.finish(report.clone());
        Ok(report)
    }

    async fn merge_snapshot(&self, run: &IngestionRunResult) -> Result<SnapshotSummary, SnapshotError> {
        let merges: Vec<SourceMerge> = run
            .completed_sources()
            .map(|outcome| {
                let records: Vec<_> = run.records_for(outcome.dispensary).cloned().collect();
                SourceMerge {
                    dispensary: outcome.dispensary,
                    marker: RunMarker {
                        run_id: run.run_id,
                        finished_at: run.finished_at,
                        record_count: records.len(),
                    },
                    records,
                }
            })
            .collect();

        let date = run.started_at.snapshot_date();
        let (snapshot, merge) = self
            .snapshots
            .write_run(date, &merges, UtcDateTime::now())
            .await?;
        if !self.index.rebuild(&snapshot) {
            info!(run_id = %run.run_id, revision = snapshot.revision, "a newer snapshot is already indexed");
        }

        Ok(SnapshotSummary {
            date,
            record_count: snapshot.record_count(),
            merged_sources: merges.iter().map(|merge| merge.dispensary).collect(),
            merge,
        })
    }
}

async fn merge_genetics(
    stage: &GeneticsStage,
    run: &IngestionRunResult,
) -> Result<GeneticsMergeOutcome, GeneticsError> {
    let now = UtcDateTime::now();
    let candidates: Vec<GeneticsRecord> = run
        .described
        .iter()
        .filter_map(|product| {
            GeneticsRecord::from_description(
                &stage.extractor,
                &stage.policy,
                &product.strain_name,
                &product.description,
                product.dispensary,
                now,
            )
        })
        .collect();
    stage.merger.merge(candidates).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;

    fn empty_service() -> IngestionService {
        let store = Arc::new(InMemoryObjectStore::new());
        IngestionService::new(IngestionOrchestrator::new(Vec::new(), 4), store)
    }

    #[tokio::test]
    async fn run_without_sources_is_a_systemic_failure_and_writes_nothing() {
        let store = Arc::new(InMemoryObjectStore::new());
        let service = IngestionService::new(IngestionOrchestrator::new(Vec::new(), 4), store.clone());

        let error = service
            .run_once(RunTrigger::OnDemand, None)
            .await
            .expect_err("no source can produce data");

        assert!(matches!(error, PipelineError::SystemicFailure { .. }));
        assert!(store.paths().is_empty());
        let last = service.registry().last().expect("failed run is recorded");
        assert_eq!(last.run.state, RunState::Failed);
        assert!(service.registry().active().is_empty());
    }

    #[tokio::test]
    async fn warm_start_without_snapshots_leaves_index_empty() {
        let service = empty_service();
        let warmed = service.warm_start().await.expect("warm start succeeds");

        assert_eq!(warmed, None);
        assert!(service.index().current().is_empty());
    }
}
