//! # qtdem - Quadtree Elevation Model
//!
//! Multi-resolution elevation queries over a quadtree of fixed-size tiles that
//! are fetched lazily from a remote source.
//!
//! ## Features
//!
//! - **Non-blocking**: Queries answer with the best data in memory and
//!   request better tiles in the background
//! - **Ancestor Fallback**: A missing tile falls back to the nearest coarser
//!   tile that is loaded
//! - **De-duplicated Fetches**: Many queries for one missing tile produce a
//!   single fetch
//! - **Sector Extremes**: Cached `(min, max)` per sector, built from
//!   per-tile extremes
//! - **Datum Correction**: Composable vertical datum stages
//! - **Path Sampling**: Great-circle and circle clearance checks
//!
//! ## Quick Start
//!
//! ```ignore
//! use qtdem::ElevationServiceBuilder;
//!
//! let service = ElevationServiceBuilder::from_env()?.build()?;
//!
//! let result = service.elevation_at(46.5577, 7.9857, 30.0)?;
//! match result.elevation {
//!     Some(h) => println!("{h:.1} m at {:.0} m resolution", result.achieved_resolution_m()),
//!     None => println!("no data yet"),
//! }
//!
//! // Let queued fetches run, then ask again for a finer answer.
//! service.run_pending_fetches();
//! ```
//!
//! ## Tile Pyramid
//!
//! Level `n` has `2^n × 2^n` tiles. Rows count from the south, columns from
//! 180°W. With the Mercator projection (the default) tile rows are spaced
//! evenly in Mercator `y`, so the pyramid covers about ±85.05° latitude.
//!
//! ## Cargo Features
//!
//! - `download`: [`download::HttpTileSource`] over HTTP
//! - `terrain-rgb`: [`decode::TerrainRgbDecoder`] for Terrain-RGB PNG tiles
//! - `tokio`: [`fetch::TokioQueue`] running fetches on a Tokio blocking pool
//! - `geojson`: [`geojson`] enrichment helpers

pub mod addressing;
pub mod cache;
pub mod datum;
pub mod decode;
pub mod error;
pub mod extremes;
pub mod fetch;
pub mod path;
pub mod query;
pub mod service;
pub mod source;
pub mod store;
pub mod tile;

#[cfg(feature = "download")]
pub mod download;

#[cfg(feature = "geojson")]
pub mod geojson;

#[cfg(test)]
mod testing;

// Re-export main types at crate root for convenience
pub use addressing::{LatLon, LevelSet, Projection, Sector, TileKey, EARTH_RADIUS_M};
pub use cache::{CacheStats, TileCache};
pub use datum::{DatumPipeline, DatumShift, Stage, UnavailablePolicy};
pub use error::{ElevationError, Result};
pub use path::{MinMax, PathSampler, Position};
pub use query::{ElevationEngine, QueryResult, QueryStatus};
pub use service::{ElevationService, ElevationServiceBuilder};
pub use source::{ElevationSource, TileElevationModel};
pub use tile::MISSING_DATA_SIGNAL;
