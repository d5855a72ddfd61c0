//! Decoded elevation tiles and bilinear lookup.
//!
//! An [`ElevationGrid`] is the raw sample buffer produced by a
//! [`TileDecoder`](crate::fetch::TileDecoder). A [`Tile`] wraps it with its
//! address, bounds, lifecycle state and the extremes computed at insertion.

use std::sync::Arc;
use std::time::Instant;

use crate::addressing::{TileBounds, TileKey};
use crate::error::{ElevationError, Result};

/// Sample value meaning "no data here".
///
/// Never returned to callers as a number: lookups that touch it yield `None`.
pub const MISSING_DATA_SIGNAL: f64 = -10000.0;

/// Samples below this are treated as corrupt and reported as missing.
const MIN_PLAUSIBLE_SAMPLE: f64 = -11000.0;

/// Returns `true` if `value` is the missing-data signal (or not a number).
#[inline]
pub fn is_missing(value: f64) -> bool {
    value == MISSING_DATA_SIGNAL || value.is_nan() || value < MIN_PLAUSIBLE_SAMPLE
}

/// A row-major grid of elevation samples in meters.
///
/// Row 0 is the north edge and column 0 the west edge. Edge samples sit
/// exactly on the tile boundary, so sample spacing is `extent / (n - 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    width: usize,
    height: usize,
    samples: Vec<f64>,
}

impl ElevationGrid {
    /// Wrap an existing sample buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ElevationError::InvalidTileSize`] if `samples.len()` is not
    /// `width * height` or the grid is empty.
    pub fn new(width: usize, height: usize, samples: Vec<f64>) -> Result<Self> {
        let expected = width * height;
        if expected == 0 || samples.len() != expected {
            return Err(ElevationError::InvalidTileSize {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// A grid with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            samples: vec![value; width.max(1) * height.max(1)],
        }
    }

    /// Build a grid by evaluating `f(row, col)` for every sample.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut samples = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                samples.push(f(row, col));
            }
        }
        Self {
            width,
            height,
            samples,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Sample at `(row, col)`, clamped into the grid.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let row = row.min(self.height - 1);
        let col = col.min(self.width - 1);
        self.samples[row * self.width + col]
    }

    /// Minimum and maximum over all non-missing samples in one pass.
    ///
    /// Returns `None` if every sample is missing.
    pub fn extremes(&self) -> Option<(f64, f64)> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in &self.samples {
            if is_missing(v) {
                continue;
            }
            min = min.min(v);
            max = max.max(v);
        }
        (min <= max).then_some((min, max))
    }

    /// Bilinear interpolation at fractional grid coordinates.
    ///
    /// `x` is the column position (0 = west edge, `width - 1` = east edge) and
    /// `y` the row position (0 = north edge). On the last row or column the
    /// edge sample is replicated. If any of the four neighbours is missing,
    /// the whole result is missing.
    pub fn bilinear(&self, x: f64, y: f64) -> Option<f64> {
        let x = x.clamp(0.0, (self.width - 1) as f64);
        let y = y.clamp(0.0, (self.height - 1) as f64);

        let i0 = x.floor() as usize;
        let j0 = y.floor() as usize;
        let i1 = (i0 + 1).min(self.width - 1);
        let j1 = (j0 + 1).min(self.height - 1);
        let fx = x - i0 as f64;
        let fy = y - j0 as f64;

        let v00 = self.get(j0, i0);
        let v10 = self.get(j0, i1);
        let v01 = self.get(j1, i0);
        let v11 = self.get(j1, i1);
        if [v00, v10, v01, v11].into_iter().any(is_missing) {
            return None;
        }

        let north = v00 + (v10 - v00) * fx;
        let south = v01 + (v11 - v01) * fx;
        Some(north + (south - north) * fy)
    }
}

/// Lifecycle state of a cached tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// Referenced and (possibly) being fetched; no data yet.
    Placeholder,
    /// Data decoded and usable.
    Ready,
    /// Fetch failed; the cache removes tiles in this state.
    Failed,
}

/// One quadtree tile as held by the [`TileCache`](crate::cache::TileCache).
#[derive(Debug, Clone)]
pub struct Tile {
    key: TileKey,
    bounds: TileBounds,
    state: TileState,
    grid: Option<Arc<ElevationGrid>>,
    extremes: Option<(f64, f64)>,
    ready_at: Option<Instant>,
}

impl Tile {
    /// A tile that has been referenced but has no data yet.
    pub fn placeholder(key: TileKey, bounds: TileBounds) -> Self {
        Self {
            key,
            bounds,
            state: TileState::Placeholder,
            grid: None,
            extremes: None,
            ready_at: None,
        }
    }

    /// A tile with decoded data. Extremes are computed here, once.
    pub fn ready(key: TileKey, bounds: TileBounds, grid: ElevationGrid) -> Self {
        let extremes = grid.extremes();
        Self {
            key,
            bounds,
            state: TileState::Ready,
            grid: Some(Arc::new(grid)),
            extremes,
            ready_at: Some(Instant::now()),
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn bounds(&self) -> &TileBounds {
        &self.bounds
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == TileState::Ready
    }

    pub fn grid(&self) -> Option<&ElevationGrid> {
        self.grid.as_deref()
    }

    /// Per-tile `(min, max)` over non-missing samples.
    pub fn extremes(&self) -> Option<(f64, f64)> {
        self.extremes
    }

    pub fn ready_at(&self) -> Option<Instant> {
        self.ready_at
    }

    /// Interpolated elevation at projected fraction `y` and longitude `lon`.
    ///
    /// Returns `None` when the tile has no data or the neighbourhood touches
    /// missing samples.
    pub fn elevation_at(&self, y: f64, lon: f64) -> Option<f64> {
        let grid = self.grid.as_deref()?;
        let (x, row) = self.grid_position(grid, y, lon);
        grid.bilinear(x, row)
    }

    /// Fractional `(column, row)` of a point inside this tile.
    fn grid_position(&self, grid: &ElevationGrid, y: f64, lon: f64) -> (f64, f64) {
        let b = &self.bounds;
        let x = (grid.width() - 1) as f64 * (lon - b.min_lon) / b.delta_lon();
        let row = (grid.height() - 1) as f64 * (b.max_y - y) / b.delta_y();
        (x, row)
    }
}
