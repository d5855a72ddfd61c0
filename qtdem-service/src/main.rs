//! qtdem Service - HTTP microservice for quadtree elevation queries.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `QTDEM_TILE_URL` | Tile URL template, or `terrain-rgb` | Required |
//! | `QTDEM_ACCESS_TOKEN` | Access token for the tile server | None |
//! | `QTDEM_CACHE_DIR` | Directory for the on-disk tile store | None |
//! | `QTDEM_CACHE_SIZE` | Tiles kept in memory | 256 |
//! | `QTDEM_CACHE_TTL_DAYS` | Dataset lifetime in days | 27 |
//! | `QTDEM_OFFLINE` | Disable fetching | false |
//! | `QTDEM_SAMPLE_DISTANCE` | Path sample spacing in meters | 10 |
//! | `QTDEM_GEOID_OFFSET` | Constant datum shift in meters | None |
//! | `QTDEM_MAX_LEVEL` | Finest pyramid level | 13 |
//! | `QTDEM_QUEUE_CAPACITY` | Concurrent background fetches | 64 |
//! | `QTDEM_PORT` | HTTP server port | 8080 |
//! | `RUST_LOG` | Log level (e.g., "info", "debug") | "info" |
//!
//! ## Endpoints
//!
//! - `GET /elevation?lat=X&lon=Y[&resolution=M]` - Elevation at a point
//! - `POST /elevation` - Add elevations to a GeoJSON geometry
//! - `GET /extremes?min_lat=..&max_lat=..&min_lon=..&max_lon=..` - Sector bounds
//! - `POST /path` - Ground bounds along a great-circle path
//! - `POST /circle` - Ground bounds on a circle
//! - `GET /health` - Health check
//! - `GET /stats` - Cache statistics
//! - `POST /cache/clear` - Drop in-memory tiles
//! - `GET /docs` - OpenAPI documentation (Swagger UI)

use std::net::SocketAddr;
use std::sync::Arc;

use qtdem::fetch::TokioQueue;
use qtdem::ElevationServiceBuilder;
use qtdem_service::{router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default number of fetches running at once.
const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qtdem_service=info,qtdem=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Service-specific config; the library reads the rest
    let port: u16 = std::env::var("QTDEM_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let queue_capacity: usize = std::env::var("QTDEM_QUEUE_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_QUEUE_CAPACITY);

    let service = ElevationServiceBuilder::from_env()?
        .queue(TokioQueue::current(queue_capacity)?)
        .build()?;

    tracing::info!(
        levels = service.levels().num_levels(),
        cache_capacity = service.engine().cache().capacity(),
        offline = service.is_offline(),
        queue_capacity,
        port,
        "Starting qtdem service"
    );

    let app = router(Arc::new(AppState::new(service)));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
