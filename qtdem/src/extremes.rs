//! Per-sector elevation extremes.
//!
//! Sector extremes are folded from the bounds the tile cache keeps for every
//! subtree, so no samples are rescanned and data loaded at finer levels than
//! the estimate level still widens the answer. Only fully resolved answers
//! are cached. An entry is stale once any tile has loaded since it was
//! computed, and the whole cache is discarded when the dataset is dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;

use crate::addressing::{LevelSet, Sector, TileKey};
use crate::cache::TileCache;

/// Finest level used to estimate sector extremes.
pub const DEFAULT_MAX_EXTREMES_LEVEL: u8 = 11;

/// Default number of sectors remembered.
pub const DEFAULT_EXTREMES_CAPACITY: u64 = 1024;

/// Bounds reported before any tile data has been seen.
pub const DEFAULT_MODEL_EXTREMES: (f64, f64) = (-500.0, 9000.0);

/// Upper bound on tiles folded for a single sector.
const MAX_TILES_PER_SECTOR: u64 = 64;

/// Bit-exact sector identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SectorKey([u64; 4]);

impl From<&Sector> for SectorKey {
    fn from(s: &Sector) -> Self {
        SectorKey([
            s.min_lat.to_bits(),
            s.max_lat.to_bits(),
            s.min_lon.to_bits(),
            s.max_lon.to_bits(),
        ])
    }
}

/// Memoized `(min, max)` elevation per sector.
pub struct ExtremesCache {
    tiles: TileCache,
    levels: Arc<LevelSet>,
    /// Bounds and the tile data version they were computed at.
    entries: Cache<SectorKey, ((f64, f64), u64)>,
    seen_generation: AtomicU64,
    max_level: u8,
    default_extremes: (f64, f64),
}

impl ExtremesCache {
    pub fn new(tiles: TileCache) -> Self {
        Self::with_options(tiles, DEFAULT_EXTREMES_CAPACITY, DEFAULT_MAX_EXTREMES_LEVEL)
    }

    pub fn with_options(tiles: TileCache, capacity: u64, max_level: u8) -> Self {
        let levels = tiles.levels().clone();
        let max_level = max_level.min(levels.max_level());
        let generation = tiles.generation();
        Self {
            tiles,
            levels,
            entries: Cache::builder().max_capacity(capacity).build(),
            seen_generation: AtomicU64::new(generation),
            max_level,
            default_extremes: DEFAULT_MODEL_EXTREMES,
        }
    }

    /// Bounds to report when no tile data exists at all.
    pub fn default_extremes(mut self, bounds: (f64, f64)) -> Self {
        self.default_extremes = bounds;
        self
    }

    /// Level whose tiles are roughly the size of `sector`.
    ///
    /// `round(log4(2π² / area))`, clamped to `[0, max_level]`. A zero-area
    /// sector uses `max_level`.
    pub fn level_for(&self, sector: &Sector) -> u8 {
        let area = sector.delta_lat_radians() * sector.delta_lon_radians();
        if !(area > 0.0) {
            return self.max_level;
        }
        let ratio = 2.0 * std::f64::consts::PI.powi(2) / area;
        let estimate = (ratio.ln() / 4f64.ln()).round();
        estimate.clamp(0.0, self.max_level as f64) as u8
    }

    /// `(min, max)` elevation inside `sector`.
    ///
    /// Uses the best tiles currently available, falling back to ancestors
    /// and finally to [`model_extremes`](Self::model_extremes). Missing
    /// tiles are requested.
    pub fn extremes(&self, sector: &Sector) -> (f64, f64) {
        self.sync_generation();
        let key = SectorKey::from(sector);
        let version = self.tiles.data_version();
        if let Some((bounds, seen)) = self.entries.get(&key) {
            if seen == version {
                return bounds;
            }
        }

        let mut level = self.level_for(sector);
        while level > 0 && self.levels.count_in_sector(level, sector) > MAX_TILES_PER_SECTOR {
            level -= 1;
        }
        let keys = self.levels.keys_in_sector(level, sector);
        if keys.is_empty() {
            return self.model_extremes();
        }

        let (bounds, fully_resolved) = self.fold_tiles(&keys);
        let bounds = bounds.unwrap_or_else(|| self.model_extremes());

        if fully_resolved {
            self.entries.insert(key, (bounds, version));
        }
        bounds
    }

    /// Extremes of the finest known tile under a point.
    pub fn extremes_at(&self, lat: f64, lon: f64) -> (f64, f64) {
        self.extremes(&Sector::from_point(lat, lon))
    }

    /// Running bound over all data seen so far, or the configured default.
    pub fn model_extremes(&self) -> (f64, f64) {
        self.tiles.model_bounds().unwrap_or(self.default_extremes)
    }

    /// Forget every cached sector.
    pub fn invalidate(&self) {
        self.entries.invalidate_all();
    }

    fn sync_generation(&self) {
        let current = self.tiles.generation();
        if self.seen_generation.swap(current, Ordering::AcqRel) != current {
            tracing::debug!(generation = current, "tile dataset dropped; clearing extremes");
            self.invalidate();
        }
    }

    fn fold_tiles(&self, keys: &[TileKey]) -> (Option<(f64, f64)>, bool) {
        let mut bounds: Option<(f64, f64)> = None;
        let mut fully_resolved = true;
        let mut folded = HashSet::new();
        let mut fold = |root: TileKey, fallback: Option<(f64, f64)>| {
            if !folded.insert(root) {
                return;
            }
            if let Some((min, max)) = self.tiles.subtree_extremes(root).or(fallback) {
                bounds = Some(match bounds {
                    Some((lo, hi)) => (lo.min(min), hi.max(max)),
                    None => (min, max),
                });
            }
        };

        for &key in keys {
            let ready = key.lineage().find_map(|k| {
                let tile = self.tiles.get_ready(k);
                if tile.is_none() {
                    self.tiles.ensure_fetching(k);
                }
                tile
            });
            match ready {
                // The ready ancestor's subtree covers every finer tile too.
                Some(tile) => {
                    if tile.key() != key {
                        fully_resolved = false;
                    }
                    fold(tile.key(), tile.extremes());
                }
                // Only tiles below `key` can answer inside it.
                None => {
                    fully_resolved = false;
                    fold(key, None);
                }
            }
        }

        (bounds, fully_resolved)
    }
}
