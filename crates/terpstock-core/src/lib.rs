//! # Terpstock Core
//!
//! Dispensary inventory ingestion, consolidation and stock lookup.
//!
//! ## Overview
//!
//! Menus from several independent dispensary chains are fetched on a
//! schedule, normalized into batch/strain facts and merged into one
//! consolidated snapshot per day. A read-only index rebuilt from that
//! snapshot serves strain search and batch presence queries. Lineage
//! phrases found in product descriptions feed a separate genetics store.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | One adapter per upstream menu (REST, GraphQL, HTML, embedded JSON) |
//! | [`circuit_breaker`] | Run-scoped circuit breaker |
//! | [`config`] | TOML configuration and environment overrides |
//! | [`data_source`] | Adapter contract and source error taxonomy |
//! | [`domain`] | Products, stores, batch records, timestamps |
//! | [`extractor`] | Declarative field mapping and completeness metrics |
//! | [`genetics`] | Lineage extraction and partitioned merge |
//! | [`guard`] | Throttle, retry and circuit breaker around each call |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`index`] | Strain/batch read-model and its atomic handle |
//! | [`locations`] | Store coordinates and distances |
//! | [`logging`] | Subscriber setup |
//! | [`object_store`] | Atomic-replace object storage |
//! | [`orchestrator`] | Concurrent run across sources and stores |
//! | [`query`] | Search, batch checks, nearest stores |
//! | [`scheduler`] | Timer-driven runs |
//! | [`service`] | Run pipeline and run registry |
//! | [`snapshot`] | Daily snapshot merge and write |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Scheduler   │──▶│   Ingestion   │◀──│  POST /run   │
//! └──────────────┘   │    Service    │   └──────────────┘
//!                    └───────┬───────┘
//!                            ▼
//!                    ┌───────────────┐   ┌──────────────┐
//!                    │ Orchestrator  │──▶│ SourceGuard  │──▶ adapters
//!                    └───────┬───────┘   └──────────────┘
//!                            ▼
//!      ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!      │  Extractor   │─▶│   Snapshot   │─▶│ StrainIndex  │──▶ queries
//!      └──────────────┘  │    Writer    │  └──────────────┘
//!                        └──────────────┘
//! ```

pub mod adapters;
pub mod circuit_breaker;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod genetics;
pub mod guard;
pub mod http_client;
pub mod index;
pub mod locations;
pub mod logging;
pub mod object_store;
pub mod orchestrator;
pub mod query;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod source;
pub mod source_policy;
pub mod throttling;

pub use adapters::{
    build_adapter, CookiesAdapter, CuraleafAdapter, FloweryAdapter, MuvAdapter, StorefrontSite,
    SweedStorefrontAdapter, TrulieveAdapter,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, TripReason};
pub use config::{ConfigError, LocationsConfig, TerpstockConfig};
pub use data_source::{
    AdapterFuture, ErrorTaxonomy, SourceAdapter, SourceError, SourceErrorKind, StoreEnumeration,
    StoreFetch,
};
pub use domain::{
    normalize_strain_key, strain_slug, MergeKey, NormalizedBatchRecord, Potency, Product,
    SnapshotDate, StoreRef, UtcDateTime,
};
pub use error::ValidationError;
pub use extractor::{CompletenessStats, Extractor, FieldExpr, FieldMapping, MappingTable};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient, StatusClass,
};
pub use index::{IndexHandle, IndexMetadata, StrainIndex};
pub use logging::{init_logging, LogConfig};
pub use object_store::{FsObjectStore, InMemoryObjectStore, ObjectStore, StoreError};
pub use orchestrator::{
    IngestionOrchestrator, IngestionRunResult, RunState, RunTrigger, SourceOutcome, SourceRuntime,
    SourceStatus,
};
pub use locations::{GeoPoint, LocationBook, LocationError, StoreCoordinates};
pub use query::{
    BatchCheck, NearbyBatch, NearestStock, SearchHit, SearchQuery, StockQueryService, StoreLocation,
};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::Scheduler;
pub use service::{IngestionService, PipelineError, RunReport, ServiceStatus};
pub use snapshot::{ConsolidatedSnapshot, SnapshotWriter};
pub use source::DispensaryId;
pub use source_policy::{SourcePolicy, StoreBatch};
