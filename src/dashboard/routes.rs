//! API route handlers for the read surface.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`. Reads
//! go straight to the store and the scheduler's published snapshots, so
//! they never fail because a refresh failed.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::scheduler::SchedulerHandle;
use crate::store::{OpportunityFilter, Store, StoreError};
use crate::types::{Event, LastRun, Opportunity, QuotaSnapshot, RefreshStatus, Sport};

/// Default row cap for list endpoints when the caller does not pass one.
const DEFAULT_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Static view of the configuration, reported by `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfiguredSummary {
    pub api_key_configured: bool,
    pub sports: Vec<String>,
    pub markets: String,
    pub regions: String,
    pub odds_format: String,
    pub min_profit_pct: f64,
    pub refresh_interval_secs: u64,
}

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub store: Arc<Store>,
    pub scheduler: SchedulerHandle,
    pub configured: ConfiguredSummary,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Handler-level failure, rendered as a JSON error body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn parse_since(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| ApiError::BadRequest(format!("invalid RFC3339 `since`: {s}"))),
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ArbitrageQuery {
    pub sport: Option<String>,
    pub min_profit: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub sport: Option<String>,
    pub since: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OddsQuery {
    pub sport: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ArbitrageResponse {
    pub arbitrage: Vec<Opportunity>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OddsResponse {
    pub odds: Vec<Event>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub configured: ConfiguredSummary,
    pub last_run: Option<LastRun>,
    pub quota: Option<QuotaSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct SportsResponse {
    pub sports: Vec<Sport>,
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/arbitrage — opportunities from the most recent successful
/// refresh.
pub async fn get_arbitrage(
    State(state): State<AppState>,
    Query(q): Query<ArbitrageQuery>,
) -> Result<Json<ArbitrageResponse>, ApiError> {
    // Rows are "current" when stamped by the last refresh that replaced
    // the snapshot; after a restart, fall back to the newest batch in
    // the log.
    let since = match state.scheduler.last_success_started().await {
        Some(ts) => Some(ts),
        None => state.store.latest_detection()?,
    };

    let arbitrage = match since {
        None => Vec::new(),
        Some(since) => state.store.list_opportunities(&OpportunityFilter {
            sport: q.sport,
            min_profit_pct: q.min_profit,
            since: Some(since),
            limit: q.limit.unwrap_or(DEFAULT_LIMIT),
        })?,
    };

    Ok(Json(ArbitrageResponse {
        count: arbitrage.len(),
        arbitrage,
        timestamp: Utc::now(),
    }))
}

/// GET /api/arbitrage/history — the historical opportunity log.
pub async fn get_arbitrage_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<ArbitrageResponse>, ApiError> {
    let arbitrage = state.store.list_opportunities(&OpportunityFilter {
        sport: q.sport,
        min_profit_pct: None,
        since: parse_since(q.since.as_deref())?,
        limit: q.limit.unwrap_or(DEFAULT_LIMIT),
    })?;

    Ok(Json(ArbitrageResponse {
        count: arbitrage.len(),
        arbitrage,
        timestamp: Utc::now(),
    }))
}

/// GET /api/odds — latest odds snapshot, optionally filtered by sport.
pub async fn get_odds(
    State(state): State<AppState>,
    Query(q): Query<OddsQuery>,
) -> Result<Json<OddsResponse>, ApiError> {
    let odds = state.store.list_latest(q.sport.as_deref())?;
    Ok(Json(OddsResponse { count: odds.len(), odds }))
}

/// POST /api/refresh — trigger a refresh (or join the in-flight one) and
/// return its result. Failed cycles surface as a non-2xx status.
pub async fn post_refresh(State(state): State<AppState>) -> Response {
    let result = state.scheduler.trigger_refresh().await;
    let status = match result.status {
        RefreshStatus::Ok | RefreshStatus::Partial => StatusCode::OK,
        RefreshStatus::Failed => StatusCode::BAD_GATEWAY,
        RefreshStatus::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(result)).into_response()
}

/// GET /api/status — configuration, last refresh and quota.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        configured: state.configured.clone(),
        last_run: state.scheduler.last_run().await,
        quota: state.scheduler.quota().await,
    })
}

/// GET /api/sports — the synced catalogue snapshot.
pub async fn get_sports(State(state): State<AppState>) -> Json<SportsResponse> {
    let sports = state.scheduler.catalogue().await;
    Json(SportsResponse { count: sports.len(), sports })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
