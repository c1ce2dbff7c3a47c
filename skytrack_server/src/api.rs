//! REST surface over the Location Store and the Simulation Engine.
//!
//! Routing and request validation only - all temporal logic lives in
//! `skytrack_core`. Progress is observed by polling `/location/latest` and
//! `/location/history`; the engine exposes no event stream.
//!
//! Session scoping: callers send an `x-session-id` header; without one they
//! operate in the "global" namespace. Mutating routes can be guarded with a
//! shared API key in the `x-api-key` header.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, get_service, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use skytrack_core::store::DEFAULT_HISTORY_LIMIT;
use skytrack_core::{
    location, DeliveryStatus, EngineError, LocationRecord, LocationStore, ObstacleType,
    SimulationEngine, StoreError, ValidationError, GLOBAL_SESSION,
};
use skytrack_env::TokioContext;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

const SESSION_HEADER: &str = "x-session-id";
const API_KEY_HEADER: &str = "x-api-key";

/// Shared API state exposed to handlers.
pub struct AppState {
    store: Arc<dyn LocationStore>,
    engine: SimulationEngine<TokioContext>,
    api_key: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LocationStore>,
        engine: SimulationEngine<TokioContext>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            store,
            engine,
            api_key,
        }
    }
}

/// Builds the application router, optionally fronting a static asset dir.
pub fn router(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(get_health))
        .route("/location", post(post_location))
        .route("/location/latest", get(get_latest_location))
        .route("/location/history", get(get_location_history))
        .route("/location/:trackerId", delete(delete_history))
        .route("/trackers", get(get_trackers))
        .route("/simulation/start", post(start_simulation))
        .route("/simulation/stop", post(stop_simulation))
        .with_state(state);

    if let Some(dir) = static_dir {
        let service = get_service(ServeDir::new(dir).append_index_html_on_directories(true));
        Router::new()
            .merge(api_routes)
            .fallback_service(service)
            .layer(TraceLayer::new_for_http())
    } else {
        api_routes.layer(TraceLayer::new_for_http())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

enum ApiError {
    Validation(String),
    NotFound(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Validation(message) => {
                (StatusCode::BAD_REQUEST, "Validation Error", message)
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "Not Found", message),
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, "Unauthorized", message)
            }
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", message)
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(inner) => ApiError::Validation(inner.to_string()),
            EngineError::Store(inner) => ApiError::Internal(inner.to_string()),
        }
    }
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostLocationRequest {
    tracker_id: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: f64,
    #[serde(default)]
    heading: f64,
    status: Option<DeliveryStatus>,
    obstacle_type: Option<ObstacleType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestQuery {
    tracker_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    tracker_id: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSimulationRequest {
    tracker_id: String,
    destination: [f64; 2],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopSimulationRequest {
    tracker_id: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredAck {
    status: &'static str,
    tracker_id: String,
    stored_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageAck {
    status: &'static str,
    message: String,
}

/// A location record as served to clients, with a formatted timestamp.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocationView {
    tracker_id: String,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    heading: f64,
    status: DeliveryStatus,
    obstacle_type: ObstacleType,
    timestamp: String,
}

impl From<LocationRecord> for LocationView {
    fn from(record: LocationRecord) -> Self {
        Self {
            tracker_id: record.tracker_id,
            latitude: record.latitude,
            longitude: record.longitude,
            altitude: record.altitude,
            heading: record.heading,
            status: record.status,
            obstacle_type: record.obstacle_type,
            timestamp: format_timestamp(record.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    tracker_id: String,
    count: usize,
    locations: Vec<LocationView>,
}

#[derive(Debug, Serialize)]
struct TrackersResponse {
    trackers: Vec<String>,
}

fn format_timestamp(millis: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis as i64)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| GLOBAL_SESSION.to_string())
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        None => Err(ApiError::Unauthorized(
            "API key is required. Provide x-api-key header.".to_string(),
        )),
        Some(provided) if provided != expected => {
            Err(ApiError::Unauthorized("Invalid API key".to_string()))
        }
        Some(_) => Ok(()),
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

async fn post_location(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PostLocationRequest>,
) -> Result<Json<StoredAck>, ApiError> {
    require_api_key(&state, &headers)?;
    location::validate_tracker_id(&body.tracker_id)?;
    location::validate_coordinates(body.latitude, body.longitude)?;

    let stored = state
        .store
        .append(LocationRecord {
            tracker_id: body.tracker_id,
            session_id: session_id(&headers),
            latitude: body.latitude,
            longitude: body.longitude,
            altitude: body.altitude,
            heading: body.heading,
            status: body.status.unwrap_or(DeliveryStatus::Moving),
            obstacle_type: body.obstacle_type.unwrap_or(ObstacleType::None),
            created_at: 0,
        })
        .await?;

    Ok(Json(StoredAck {
        status: "ok",
        tracker_id: stored.tracker_id,
        stored_at: format_timestamp(stored.created_at),
    }))
}

async fn get_latest_location(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LatestQuery>,
) -> Result<Json<LocationView>, ApiError> {
    location::validate_tracker_id(&query.tracker_id)?;
    let record = state
        .store
        .latest(&query.tracker_id, &session_id(&headers))
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No location found for tracker: {}", query.tracker_id))
        })?;
    Ok(Json(record.into()))
}

async fn get_location_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    location::validate_tracker_id(&query.tracker_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = state
        .store
        .history(&query.tracker_id, &session_id(&headers), limit)
        .await?;
    Ok(Json(HistoryResponse {
        tracker_id: query.tracker_id,
        count: records.len(),
        locations: records.into_iter().map(LocationView::from).collect(),
    }))
}

async fn get_trackers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TrackersResponse>, ApiError> {
    let trackers = state.store.list_tracker_ids(&session_id(&headers)).await?;
    Ok(Json(TrackersResponse { trackers }))
}

async fn delete_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tracker_id): Path<String>,
) -> Result<Json<MessageAck>, ApiError> {
    require_api_key(&state, &headers)?;
    location::validate_tracker_id(&tracker_id)?;
    let session = session_id(&headers);

    state.store.clear(&tracker_id, &session).await?;
    // A cleared tracker should stop flying too.
    state.engine.stop(&tracker_id, &session);

    Ok(Json(MessageAck {
        status: "ok",
        message: format!("History cleared for tracker: {}", tracker_id),
    }))
}

async fn start_simulation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartSimulationRequest>,
) -> Result<Json<MessageAck>, ApiError> {
    state
        .engine
        .start(&body.tracker_id, body.destination, &session_id(&headers))
        .await?;
    Ok(Json(MessageAck {
        status: "ok",
        message: "Simulation started".to_string(),
    }))
}

async fn stop_simulation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StopSimulationRequest>,
) -> Result<Json<MessageAck>, ApiError> {
    state.engine.stop(&body.tracker_id, &session_id(&headers));
    Ok(Json(MessageAck {
        status: "ok",
        message: "Simulation stopped".to_string(),
    }))
}
