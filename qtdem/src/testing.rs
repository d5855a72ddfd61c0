//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::addressing::{LevelSet, Projection, TileKey};
use crate::cache::{TileCache, TileCacheConfig, DEFAULT_CACHE_TTL};
use crate::decode::RawGridDecoder;
use crate::error::Result;
use crate::fetch::{DeferredQueue, OfflineMode, TileSource};
use crate::query::ElevationEngine;
use crate::tile::ElevationGrid;

pub const TILE_SIZE: usize = 17;

/// A smooth synthetic terrain between 500 m and 1500 m.
pub fn wavy(lat: f64, lon: f64) -> f64 {
    1000.0 + 500.0 * (lat.to_radians() * 3.0).sin() * (lon.to_radians() * 2.0).cos()
}

/// Samples `wavy` at the exact sample positions of a tile.
pub fn synthetic_grid(levels: &LevelSet, key: TileKey) -> ElevationGrid {
    let b = levels.bounds_for(key);
    let projection = levels.projection();
    let step = (TILE_SIZE - 1) as f64;
    ElevationGrid::from_fn(TILE_SIZE, TILE_SIZE, |row, col| {
        let y = b.max_y - b.delta_y() * row as f64 / step;
        let lon = b.min_lon + b.delta_lon() * col as f64 / step;
        wavy(projection.fraction_to_lat(y), lon)
    })
}

/// Serves [`synthetic_grid`] tiles and counts calls.
pub struct SyntheticSource {
    levels: LevelSet,
    calls: AtomicUsize,
}

impl SyntheticSource {
    pub fn new(levels: LevelSet) -> Self {
        Self {
            levels,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileSource for SyntheticSource {
    fn fetch(&self, key: TileKey) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawGridDecoder::encode(&synthetic_grid(&self.levels, key)))
    }
}

pub struct Harness {
    pub engine: ElevationEngine,
    pub queue: Arc<DeferredQueue>,
    pub source: Arc<SyntheticSource>,
}

impl Harness {
    pub fn new(num_levels: u8) -> Self {
        let levels = LevelSet::new(Projection::Mercator, TILE_SIZE, TILE_SIZE, num_levels);
        let source = Arc::new(SyntheticSource::new(levels.clone()));
        let queue = Arc::new(DeferredQueue::new(4096));
        let cache = TileCache::new(TileCacheConfig {
            levels: Arc::new(levels),
            source: source.clone(),
            decoder: Arc::new(RawGridDecoder::new(TILE_SIZE, TILE_SIZE)),
            queue: queue.clone(),
            offline: OfflineMode::default(),
            store: None,
            capacity: 10_000,
            ttl: DEFAULT_CACHE_TTL,
        });

        Self {
            engine: ElevationEngine::new(cache),
            queue,
            source,
        }
    }

    /// Make a tile ready without going through the queue.
    pub fn install(&self, key: TileKey) {
        let grid = synthetic_grid(self.engine.levels(), key);
        self.engine.cache().on_fetch_complete(key, grid);
    }

    /// Run fetches until nothing is left, including the expiry task.
    pub fn settle(&self) {
        while self.queue.run_pending() > 0 {}
    }
}
