//! qtdem Service Library
//!
//! HTTP handlers, router and types for the elevation service.
//! This library is used by both the qtdem-service binary and integration tests.

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use qtdem::ElevationService;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Resolution used when a request does not name one (meters).
pub const DEFAULT_RESOLUTION_M: f64 = 30.0;

/// Application state shared across handlers.
pub struct AppState {
    /// Elevation model answering every query.
    pub service: ElevationService,
    /// Target resolution for requests without one, in meters.
    pub default_resolution: f64,
}

impl AppState {
    pub fn new(service: ElevationService) -> Self {
        Self {
            service,
            default_resolution: DEFAULT_RESOLUTION_M,
        }
    }
}

/// OpenAPI documentation for the elevation service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "qtdem Elevation Service",
        version = "0.1.0",
        description = "Multi-resolution elevation queries over a lazily fetched tile pyramid.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    paths(
        handlers::get_elevation,
        handlers::post_elevation,
        handlers::get_extremes,
        handlers::post_path,
        handlers::post_circle,
        handlers::health_check,
        handlers::get_stats,
        handlers::clear_cache,
    ),
    components(
        schemas(
            handlers::ElevationResponse,
            handlers::Status,
            handlers::ExtremesResponse,
            handlers::Point,
            handlers::PathRequest,
            handlers::CircleRequest,
            handlers::MinMaxResponse,
            handlers::GeometryDoc,
            handlers::ErrorResponse,
            handlers::HealthResponse,
            handlers::StatsResponse,
        )
    ),
    tags(
        (name = "elevation", description = "Elevation query endpoints"),
        (name = "system", description = "System and health endpoints")
    )
)]
pub struct ApiDoc;

/// Build the full router, documentation included.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route(
            "/elevation",
            get(handlers::get_elevation).post(handlers::post_elevation),
        )
        .route("/extremes", get(handlers::get_extremes))
        .route("/path", post(handlers::post_path))
        .route("/circle", post(handlers::post_circle))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats))
        .route("/cache/clear", post(handlers::clear_cache))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

// Re-export commonly used types for convenience
pub use handlers::{
    ElevationQuery, ElevationResponse, ErrorResponse, ExtremesResponse, HealthResponse,
    MinMaxResponse, StatsResponse,
};
