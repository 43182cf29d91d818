//! JSON API over the deal tracker
//!
//! Routes:
//! * `GET /` - API information
//! * `GET /api/deals` - all deals, refreshed when the cache is stale
//! * `GET /api/deals/:id` - a single deal
//! * `POST /api/refresh` - force a full refresh
//! * `GET /api/health` - cache status

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::data::DealSnapshot;
use crate::tracker::{DealListing, DealLookup, DealTracker, TrackerError, TrackerStatus};

const API_NAME: &str = "KFH Rewards Tracker API";

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

/// Body of `GET /api/deals`
#[derive(Debug, Serialize)]
pub struct DealsResponse {
    pub deals: Vec<DealSnapshot>,
    pub timestamp: DateTime<Utc>,
    /// True when the deals came from the cache rather than a fresh refresh
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DealListing> for DealsResponse {
    fn from(listing: DealListing) -> Self {
        Self {
            deals: listing.deals,
            timestamp: Utc::now(),
            cached: !listing.refreshed,
            cache_age_seconds: listing.age.map(|age| age.num_seconds()),
            error: listing.error,
        }
    }
}

/// Body of `GET /api/deals/:id`
#[derive(Debug, Serialize)]
pub struct DealResponse {
    pub deal: DealSnapshot,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<DealLookup> for DealResponse {
    fn from(lookup: DealLookup) -> Self {
        Self {
            deal: lookup.deal,
            cached: !lookup.refreshed,
            timestamp: Utc::now(),
        }
    }
}

/// Body of `POST /api/refresh`
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub deals: Vec<DealSnapshot>,
    pub timestamp: DateTime<Utc>,
    pub message: &'static str,
}

impl From<DealListing> for RefreshResponse {
    fn from(listing: DealListing) -> Self {
        Self {
            deals: listing.deals,
            timestamp: Utc::now(),
            message: "Data refreshed successfully",
        }
    }
}

/// Body of `GET /api/health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub cache_age_seconds: Option<i64>,
    pub cached_deals: usize,
}

impl From<TrackerStatus> for HealthResponse {
    fn from(status: TrackerStatus) -> Self {
        Self {
            status: "healthy",
            timestamp: Utc::now(),
            cache_age_seconds: status.age.map(|age| age.num_seconds()),
            cached_deals: status.cached_count,
        }
    }
}

/// Body of `GET /`
#[derive(Debug, Serialize)]
struct IndexResponse {
    name: &'static str,
    version: &'static str,
    endpoints: BTreeMap<&'static str, &'static str>,
    deals_tracked: usize,
    timestamp: DateTime<Utc>,
}

/// Error body shared by every route
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Builds the API router with permissive CORS
pub fn router(tracker: Arc<DealTracker>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/deals", get(list_deals))
        .route("/api/deals/:id", get(get_deal))
        .route("/api/refresh", post(refresh_deals))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(tracker)
}

/// Serves the API until `shutdown` resolves
pub async fn serve<F>(
    addr: SocketAddr,
    tracker: Arc<DealTracker>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "KFH Rewards Tracker listening");
    axum::serve(listener, router(tracker))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn index(State(tracker): State<Arc<DealTracker>>) -> Json<IndexResponse> {
    let endpoints = BTreeMap::from([
        ("/api/deals", "GET all deals"),
        ("/api/deals/<deal_id>", "GET specific deal"),
        ("/api/refresh", "POST to force refresh"),
        ("/api/health", "GET health status"),
    ]);
    let deals_tracked = tracker.catalog().deals().map(|deals| deals.len()).unwrap_or(0);

    Json(IndexResponse {
        name: API_NAME,
        version: env!("CARGO_PKG_VERSION"),
        endpoints,
        deals_tracked,
        timestamp: Utc::now(),
    })
}

async fn list_deals(State(tracker): State<Arc<DealTracker>>) -> ApiResult<DealsResponse> {
    match tracker.list_all().await {
        Ok(listing) => Ok(Json(listing.into())),
        Err(e) => Err(internal_error(
            "Failed to fetch deals and no cache available",
            e,
        )),
    }
}

async fn get_deal(
    State(tracker): State<Arc<DealTracker>>,
    Path(id): Path<String>,
) -> ApiResult<DealResponse> {
    match tracker.get_one(&id).await {
        Ok(lookup) => Ok(Json(lookup.into())),
        Err(TrackerError::DealNotFound(_)) => Err(not_found("Deal not found")),
        Err(e) => Err(internal_error("Failed to fetch deal", e)),
    }
}

async fn refresh_deals(State(tracker): State<Arc<DealTracker>>) -> ApiResult<RefreshResponse> {
    tracker
        .force_refresh()
        .await
        .map(|listing| Json(listing.into()))
        .map_err(|e| internal_error("Failed to refresh deals", e))
}

async fn health(State(tracker): State<Arc<DealTracker>>) -> Json<HealthResponse> {
    Json(tracker.status().await.into())
}

fn not_found(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: message.into(),
            message: None,
            timestamp: Utc::now(),
        }),
    )
}

fn internal_error(context: &str, err: TrackerError) -> (StatusCode, Json<ErrorBody>) {
    error!(error = %err, "{}", context);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: context.to_string(),
            message: Some(err.to_string()),
            timestamp: Utc::now(),
        }),
    )
}
