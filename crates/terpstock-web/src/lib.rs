//! # Terpstock Web
//!
//! HTTP surface over [`IngestionService`].
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /run` | start an on-demand run, `202` with the run id |
//! | `GET /status` | active runs, last run with per-source breakdown |
//! | `GET /health` | liveness plus index size |
//! | `GET /stock/search?strain=` | ranked strain search |
//! | `GET /stock/status` | index metadata |
//! | `GET /stock/nearest?strain=&lat=&lng=` | nearest stores carrying a strain |
//! | `GET /stock/locations/{dispensary}` | reference store locations, nearest first with `lat`/`lng` |
//! | `GET /stock/{dispensary}` | current records for one dispensary |
//! | `POST /stock/{dispensary}` | presence for several batch ids |
//! | `GET /stock/{dispensary}/{batch_id}` | batch presence |
//! | `GET /genetics/{strain}` | lineage record |

mod error;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use terpstock_core::genetics::GeneticsRecord;
use terpstock_core::index::IndexMetadata;
use terpstock_core::query::{BatchCheck, NearestStock, SearchHit, SearchQuery, StoreLocation};
use terpstock_core::{
    DispensaryId, GeoPoint, IngestionService, NormalizedBatchRecord, RunTrigger, ServiceStatus,
    SnapshotDate,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

pub use error::ApiError;

#[derive(Clone)]
struct AppState {
    service: Arc<IngestionService>,
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    sources: Vec<DispensaryId>,
}

#[derive(Debug, Serialize)]
struct RunAccepted {
    run_id: Uuid,
    trigger: RunTrigger,
    status_url: &'static str,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    index_records: usize,
    snapshot_date: Option<SnapshotDate>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    strain: Option<String>,
    dispensary: Option<String>,
    category: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct DispensaryListing {
    dispensary: DispensaryId,
    count: usize,
    records: Vec<NormalizedBatchRecord>,
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    batch_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OriginParams {
    lat: Option<f64>,
    lng: Option<f64>,
}

impl OriginParams {
    /// Both coordinates or neither.
    fn origin(&self) -> Result<Option<GeoPoint>, ApiError> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Ok(Some(GeoPoint::new(lat, lng)?)),
            (None, None) => Ok(None),
            _ => Err(ApiError::BadRequest(String::from("'lat' and 'lng' must be given together"))),
        }
    }
}

#[derive(Debug, Serialize)]
struct LocationListing {
    dispensary: DispensaryId,
    count: usize,
    sorted_by_distance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<GeoPoint>,
    locations: Vec<StoreLocation>,
}

#[derive(Debug, Deserialize)]
struct NearestParams {
    strain: Option<String>,
    max_distance: Option<f64>,
    limit: Option<usize>,
    lat: Option<f64>,
    lng: Option<f64>,
}

pub fn router(service: Arc<IngestionService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/run", post(start_run))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/stock/search", get(search))
        .route("/stock/status", get(stock_status))
        .route("/stock/nearest", get(nearest))
        .route("/stock/locations/{dispensary}", get(store_locations))
        .route("/stock/{dispensary}", get(list_dispensary).post(check_batches))
        .route("/stock/{dispensary}/{batch_id}", get(check_batch))
        .route("/genetics/{strain}", get(genetics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { service })
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(service: Arc<IngestionService>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
}

async fn start_run(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let request: RunRequest = if body.is_empty() {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|error| ApiError::BadRequest(format!("invalid run request: {error}")))?
    };
    let only = (!request.sources.is_empty()).then_some(request.sources);
    let run_id = state.service.start_run(RunTrigger::OnDemand, only);

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            run_id,
            trigger: RunTrigger::OnDemand,
            status_url: "/status",
        }),
    ))
}

async fn status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.service.status())
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let index = state.service.index().current();
    Json(Health {
        status: "ok",
        index_records: index.len(),
        snapshot_date: index.metadata().snapshot_date,
    })
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let fragment = params
        .strain
        .ok_or_else(|| ApiError::BadRequest(String::from("missing 'strain' query parameter")))?;
    let dispensary = params
        .dispensary
        .as_deref()
        .map(str::parse::<DispensaryId>)
        .transpose()?;
    let query = SearchQuery::new(fragment.clone())
        .with_dispensary(dispensary)
        .with_category(params.category)
        .with_limit(params.limit);

    let results = state.service.query().search(&query)?;
    Ok(Json(SearchResponse {
        query: fragment,
        count: results.len(),
        results,
    }))
}

async fn stock_status(State(state): State<AppState>) -> Json<IndexMetadata> {
    Json(state.service.query().status())
}

async fn list_dispensary(
    State(state): State<AppState>,
    Path(dispensary): Path<String>,
) -> Result<Json<DispensaryListing>, ApiError> {
    let dispensary: DispensaryId = dispensary.parse()?;
    let records = state.service.query().list_dispensary(dispensary);
    Ok(Json(DispensaryListing {
        dispensary,
        count: records.len(),
        records,
    }))
}

async fn check_batch(
    State(state): State<AppState>,
    Path((dispensary, batch_id)): Path<(String, String)>,
) -> Result<Json<BatchCheck>, ApiError> {
    Ok(Json(state.service.query().check_batch(&dispensary, &batch_id)?))
}

async fn check_batches(
    State(state): State<AppState>,
    Path(dispensary): Path<String>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<Vec<BatchCheck>>, ApiError> {
    if request.batch_ids.is_empty() {
        return Err(ApiError::BadRequest(String::from("batch_ids must not be empty")));
    }
    Ok(Json(
        state
            .service
            .query()
            .check_batches(&dispensary, &request.batch_ids)?,
    ))
}

async fn store_locations(
    State(state): State<AppState>,
    Path(dispensary): Path<String>,
    Query(params): Query<OriginParams>,
) -> Result<Json<LocationListing>, ApiError> {
    let dispensary: DispensaryId = dispensary.parse()?;
    let origin = params.origin()?;
    let locations = state.service.query().store_locations(dispensary, origin);
    if locations.is_empty() {
        return Err(ApiError::NotFound(format!("no location data for dispensary '{dispensary}'")));
    }
    Ok(Json(LocationListing {
        dispensary,
        count: locations.len(),
        sorted_by_distance: origin.is_some(),
        origin,
        locations,
    }))
}

async fn nearest(
    State(state): State<AppState>,
    Query(params): Query<NearestParams>,
) -> Result<Json<NearestStock>, ApiError> {
    let strain = params
        .strain
        .ok_or_else(|| ApiError::BadRequest(String::from("missing 'strain' query parameter")))?;
    let origin = OriginParams {
        lat: params.lat,
        lng: params.lng,
    }
    .origin()?
        .ok_or_else(|| ApiError::BadRequest(String::from("missing 'lat' and 'lng' query parameters")))?;
    Ok(Json(state.service.query().nearest(
        &strain,
        origin,
        params.max_distance,
        params.limit,
    )?))
}

async fn genetics(
    State(state): State<AppState>,
    Path(strain): Path<String>,
) -> Result<Json<GeneticsRecord>, ApiError> {
    let merger = state
        .service
        .genetics()
        .ok_or_else(|| ApiError::NotFound(String::from("genetics extraction is disabled")))?;
    merger
        .lookup(&strain)
        .await
        .map_err(|error| ApiError::Internal(error.to_string()))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no lineage recorded for '{strain}'")))
}
