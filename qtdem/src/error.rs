//! Error types for the qtdem library.

use thiserror::Error;

use crate::addressing::TileKey;

/// Errors that can occur when querying or loading elevation data.
///
/// Slow or missing data is not an error: it is reported through
/// [`QueryResult`](crate::QueryResult). Only invalid input and
/// infrastructure failures surface here.
#[derive(Error, Debug)]
pub enum ElevationError {
    /// Coordinates that can never be answered (NaN or infinite).
    #[error("Invalid input: lat={lat}, lon={lon} ({reason})")]
    InvalidInput {
        lat: f64,
        lon: f64,
        reason: &'static str,
    },

    /// Target resolution is not a finite positive number of meters.
    #[error("Invalid resolution: {0} (must be finite and positive)")]
    InvalidResolution(f64),

    /// IO error when reading or writing cached tiles.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The tile source could not deliver a tile.
    #[error("Fetch failed for tile {key}: {reason}")]
    FetchFailed { key: TileKey, reason: String },

    /// Tile bytes could not be turned into an elevation grid.
    #[error("Failed to decode tile {key}: {reason}")]
    Decode { key: TileKey, reason: String },

    /// Sample buffer does not match the declared grid size.
    #[error("Invalid tile size: {actual} samples (expected {expected})")]
    InvalidTileSize { expected: usize, actual: usize },

    /// Missing or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP error while talking to a remote tile server.
    #[cfg(feature = "download")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using [`ElevationError`].
pub type Result<T> = std::result::Result<T, ElevationError>;
