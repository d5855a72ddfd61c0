//! HTTP request handlers for the elevation service.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use geojson::Geometry;
use qtdem::{ElevationError, LatLon, MinMax, QueryStatus, Sector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::AppState;

/// Query parameters for the elevation endpoint.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ElevationQuery {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Target resolution in meters. Defaults to the service setting.
    pub resolution: Option<f64>,
}

/// How an elevation value should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// At or finer than the requested resolution.
    Resolved,
    /// From a coarser tile; ask again later for better data.
    ResolutionNotAchieved,
    /// Outside the plausible range, returned anyway.
    OutOfRange,
    /// No data loaded for this point yet.
    Missing,
}

impl From<QueryStatus> for Status {
    fn from(status: QueryStatus) -> Self {
        match status {
            QueryStatus::Resolved => Status::Resolved,
            QueryStatus::ResolutionNotAchieved => Status::ResolutionNotAchieved,
            QueryStatus::OutOfRange => Status::OutOfRange,
            QueryStatus::Missing => Status::Missing,
        }
    }
}

/// Elevation at a point.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ElevationResponse {
    /// Latitude queried.
    pub lat: f64,
    /// Longitude queried.
    pub lon: f64,
    /// Elevation in meters, or null when no data is loaded yet.
    pub elevation: Option<f64>,
    /// Resolution of the data that answered, in meters.
    pub achieved_resolution_m: Option<f64>,
    pub status: Status,
}

/// Sector bounds in decimal degrees.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExtremesQuery {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Elevation bounds inside a sector.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExtremesResponse {
    pub min: f64,
    pub max: f64,
}

/// A point in decimal degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl From<Point> for LatLon {
    fn from(p: Point) -> Self {
        LatLon::new(p.lat, p.lon)
    }
}

/// Great-circle path between two points.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PathRequest {
    pub from: Point,
    pub to: Point,
}

/// Circle around a point.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CircleRequest {
    pub center: Point,
    /// Radius in meters.
    pub radius: f64,
}

/// Ground elevation bounds over sampled points.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MinMaxResponse {
    /// Lowest sampled elevation, or null if no sample had data.
    pub min: Option<f64>,
    /// Highest sampled elevation, or null if no sample had data.
    pub max: Option<f64>,
    /// Samples with data.
    pub samples: usize,
    /// Samples without data.
    pub missing: usize,
}

impl From<MinMax> for MinMaxResponse {
    fn from(bound: MinMax) -> Self {
        let bounds = bound.bounds();
        Self {
            min: bounds.map(|(min, _)| min),
            max: bounds.map(|(_, max)| max),
            samples: bound.samples,
            missing: bound.missing,
        }
    }
}

/// A GeoJSON geometry, e.g. `{"type": "Point", "coordinates": [7.9, 46.5]}`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GeometryDoc {
    #[serde(rename = "type")]
    pub kind: String,
    #[schema(value_type = Object)]
    pub coordinates: serde_json::Value,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Cache statistics response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    /// Tiles held in memory, ready or pending.
    pub cached_tiles: u64,
    /// Tiles with data.
    pub ready_tiles: u64,
    /// Fetches outstanding.
    pub pending_fetches: u64,
    /// Cache hit count.
    pub cache_hits: u64,
    /// Cache miss count.
    pub cache_misses: u64,
    /// Cache hit rate (0.0 to 1.0).
    pub hit_rate: f64,
    /// Fetches started.
    pub fetches: u64,
    /// Fetches that failed.
    pub failures: u64,
    /// Whole-dataset drops.
    pub drops: u64,
}

/// Get elevation for given coordinates.
///
/// Always answers immediately with the best data loaded; missing tiles are
/// fetched in the background.
#[utoipa::path(
    get,
    path = "/elevation",
    tag = "elevation",
    params(ElevationQuery),
    responses(
        (status = 200, description = "Elevation (null when not yet available)", body = ElevationResponse),
        (status = 400, description = "Invalid coordinates or resolution", body = ErrorResponse)
    )
)]
pub async fn get_elevation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ElevationQuery>,
) -> Response {
    let resolution = query.resolution.unwrap_or(state.default_resolution);
    tracing::debug!(lat = query.lat, lon = query.lon, resolution, "Elevation query");

    match state.service.elevation_at(query.lat, query.lon, resolution) {
        Ok(result) => {
            tracing::debug!(
                lat = query.lat,
                lon = query.lon,
                elevation = ?result.elevation,
                status = ?result.status(),
                "Elevation answered"
            );
            Json(ElevationResponse {
                lat: query.lat,
                lon: query.lon,
                elevation: result.elevation,
                achieved_resolution_m: (!result.is_missing()).then(|| result.achieved_resolution_m()),
                status: result.status().into(),
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Add elevations to a GeoJSON geometry.
///
/// Coordinates without data are returned without a third component.
#[utoipa::path(
    post,
    path = "/elevation",
    tag = "elevation",
    request_body(content = GeometryDoc, description = "GeoJSON geometry"),
    responses(
        (status = 200, description = "Geometry with elevations", body = GeometryDoc),
        (status = 400, description = "Invalid coordinates", body = ErrorResponse)
    )
)]
pub async fn post_elevation(
    State(state): State<Arc<AppState>>,
    Json(geometry): Json<Geometry>,
) -> Response {
    match qtdem::geojson::add_elevations_to_geometry(
        &state.service,
        geometry,
        state.default_resolution,
    ) {
        Ok(geometry) => Json(geometry).into_response(),
        Err(e) => error_response(e),
    }
}

/// Elevation bounds inside a sector.
#[utoipa::path(
    get,
    path = "/extremes",
    tag = "elevation",
    params(ExtremesQuery),
    responses(
        (status = 200, description = "Conservative elevation bounds", body = ExtremesResponse),
        (status = 400, description = "Non-finite bounds", body = ErrorResponse)
    )
)]
pub async fn get_extremes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExtremesQuery>,
) -> Response {
    let sector = Sector::new(query.min_lat, query.max_lat, query.min_lon, query.max_lon);
    if !sector.is_finite() {
        return error_response(ElevationError::InvalidInput {
            lat: query.min_lat,
            lon: query.min_lon,
            reason: "sector bounds are not finite",
        });
    }

    let (min, max) = state.service.extremes(&sector);
    Json(ExtremesResponse { min, max }).into_response()
}

/// Ground elevation bounds along a great-circle path.
#[utoipa::path(
    post,
    path = "/path",
    tag = "elevation",
    request_body = PathRequest,
    responses(
        (status = 200, description = "Bounds over the sampled path", body = MinMaxResponse),
        (status = 400, description = "Invalid coordinates", body = ErrorResponse)
    )
)]
pub async fn post_path(State(state): State<Arc<AppState>>, Json(request): Json<PathRequest>) -> Response {
    match state
        .service
        .min_max_along_path(request.from.into(), request.to.into())
    {
        Ok(bound) => Json(MinMaxResponse::from(bound)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Ground elevation bounds on a circle around a point.
#[utoipa::path(
    post,
    path = "/circle",
    tag = "elevation",
    request_body = CircleRequest,
    responses(
        (status = 200, description = "Bounds over the sampled circle", body = MinMaxResponse),
        (status = 400, description = "Invalid center or radius", body = ErrorResponse)
    )
)]
pub async fn post_circle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CircleRequest>,
) -> Response {
    match state
        .service
        .min_max_around_point(request.center.into(), request.radius)
    {
        Ok(bound) => Json(MinMaxResponse::from(bound)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Create an error response. Only bad input is the caller's fault.
fn error_response(e: ElevationError) -> Response {
    let status = match &e {
        ElevationError::InvalidInput { .. } | ElevationError::InvalidResolution(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    tracing::warn!(error = %e, "Elevation request failed");

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

/// Health check endpoint.
///
/// Returns service status and version.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get cache statistics.
#[utoipa::path(
    get,
    path = "/stats",
    tag = "system",
    responses((status = 200, description = "Tile cache statistics", body = StatsResponse))
)]
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(stats_response(&state))
}

/// Drop every tile held in memory.
#[utoipa::path(
    post,
    path = "/cache/clear",
    tag = "system",
    responses((status = 200, description = "Statistics after clearing", body = StatsResponse))
)]
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    state.service.clear_cache();
    tracing::info!("Tile cache cleared");
    Json(stats_response(&state))
}

fn stats_response(state: &AppState) -> StatsResponse {
    let stats = state.service.cache_stats();
    StatsResponse {
        cached_tiles: stats.entry_count,
        ready_tiles: stats.ready_count,
        pending_fetches: stats.pending_count,
        cache_hits: stats.hit_count,
        cache_misses: stats.miss_count,
        hit_rate: stats.hit_rate(),
        fetches: stats.fetch_count,
        failures: stats.failure_count,
        drops: stats.drop_count,
    }
}
