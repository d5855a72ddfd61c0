//! The capability shared by the tile model and every decorator above it.

use crate::addressing::Sector;
use crate::cache::TileCache;
use crate::error::Result;
use crate::extremes::ExtremesCache;
use crate::query::{ElevationEngine, QueryResult};

/// Anything that can answer elevation queries.
///
/// Path and circle sampling are built on these operations; see
/// [`PathSampler`](crate::path::PathSampler).
pub trait ElevationSource: Send + Sync {
    /// Elevation at a point, with the best resolution currently available.
    fn elevation_at(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<QueryResult>;

    /// `(min, max)` elevation inside a sector.
    fn extremes(&self, sector: &Sector) -> (f64, f64);

    /// `(min, max)` over the whole model.
    fn model_extremes(&self) -> (f64, f64);
}

impl<T: ElevationSource + ?Sized> ElevationSource for &T {
    fn elevation_at(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<QueryResult> {
        (**self).elevation_at(lat, lon, resolution_m)
    }

    fn extremes(&self, sector: &Sector) -> (f64, f64) {
        (**self).extremes(sector)
    }

    fn model_extremes(&self) -> (f64, f64) {
        (**self).model_extremes()
    }
}

/// The quadtree tile model: point queries plus sector extremes.
pub struct TileElevationModel {
    engine: ElevationEngine,
    extremes: ExtremesCache,
}

impl TileElevationModel {
    pub fn new(engine: ElevationEngine, extremes: ExtremesCache) -> Self {
        Self { engine, extremes }
    }

    /// Model with default extremes settings over `cache`.
    pub fn from_cache(cache: TileCache) -> Self {
        let extremes = ExtremesCache::new(cache.clone());
        Self::new(ElevationEngine::new(cache), extremes)
    }

    pub fn engine(&self) -> &ElevationEngine {
        &self.engine
    }

    pub fn extremes_cache(&self) -> &ExtremesCache {
        &self.extremes
    }
}

impl ElevationSource for TileElevationModel {
    fn elevation_at(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<QueryResult> {
        self.engine.elevation_at(lat, lon, resolution_m)
    }

    fn extremes(&self, sector: &Sector) -> (f64, f64) {
        self.extremes.extremes(sector)
    }

    fn model_extremes(&self) -> (f64, f64) {
        self.extremes.model_extremes()
    }
}
