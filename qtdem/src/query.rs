//! Point and sector elevation queries with ancestor fallback.
//!
//! A query asks for a target resolution in meters. The engine picks the
//! matching level, answers from that tile if it is ready, and otherwise falls
//! back to the finest ready ancestor while requesting everything it walked
//! past. The [`QueryResult`] says how fine the answer actually was.

use std::collections::HashMap;
use std::sync::Arc;

use crate::addressing::{normalize_lon, LatLon, LevelSet, Sector, TileKey, EARTH_RADIUS_M};
use crate::cache::TileCache;
use crate::error::{ElevationError, Result};
use crate::tile::Tile;

/// Results below this are implausible on Earth.
pub const MIN_PLAUSIBLE_ELEVATION: f64 = -1000.0;

/// Results above this are implausible on Earth.
pub const MAX_PLAUSIBLE_ELEVATION: f64 = 100_000.0;

/// Upper bound on samples per direction when gridding a sector.
pub const MAX_SAMPLES_PER_DIRECTION: usize = 100;

/// Upper bound on tiles inspected by an availability report.
const MAX_AVAILABILITY_TILES: u64 = 1024;

/// How a [`QueryResult`] should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Value at (or finer than) the requested resolution.
    Resolved,
    /// Value from a coarser ancestor tile.
    ResolutionNotAchieved,
    /// Value outside the plausible envelope; still returned.
    OutOfRange,
    /// No usable tile at any resolution.
    Missing,
}

/// Outcome of a point query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    /// Elevation in meters, or `None` for missing data.
    pub elevation: Option<f64>,
    /// Texel size (radians) of the tile that answered; `+inf` if none did.
    pub achieved_resolution: f64,
    /// Requested resolution in radians.
    pub target_resolution: f64,
}

impl QueryResult {
    pub fn missing(target_resolution: f64) -> Self {
        Self {
            elevation: None,
            achieved_resolution: f64::INFINITY,
            target_resolution,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.elevation.is_none()
    }

    /// Whether the requested resolution was met.
    pub fn is_fully_resolved(&self) -> bool {
        self.elevation.is_some() && self.achieved_resolution <= self.target_resolution
    }

    pub fn achieved_resolution_m(&self) -> f64 {
        self.achieved_resolution * EARTH_RADIUS_M
    }

    pub fn status(&self) -> QueryStatus {
        match self.elevation {
            None => QueryStatus::Missing,
            Some(v) if !(MIN_PLAUSIBLE_ELEVATION..=MAX_PLAUSIBLE_ELEVATION).contains(&v) => {
                QueryStatus::OutOfRange
            }
            Some(_) if self.achieved_resolution > self.target_resolution => {
                QueryStatus::ResolutionNotAchieved
            }
            Some(_) => QueryStatus::Resolved,
        }
    }
}

/// Results of a batched query.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<QueryResult>,
    /// Coarsest achieved resolution over all points (radians).
    pub worst_resolution: f64,
}

/// Answers elevation queries against a [`TileCache`].
#[derive(Clone)]
pub struct ElevationEngine {
    cache: TileCache,
    levels: Arc<LevelSet>,
}

impl ElevationEngine {
    pub fn new(cache: TileCache) -> Self {
        let levels = cache.levels().clone();
        Self { cache, levels }
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn levels(&self) -> &LevelSet {
        &self.levels
    }

    /// Elevation at a point with the best data currently available.
    ///
    /// Never blocks on I/O. Missing tiles along the fallback path are
    /// requested so that a later call can do better.
    ///
    /// # Errors
    ///
    /// Returns [`ElevationError::InvalidInput`] for non-finite coordinates
    /// and [`ElevationError::InvalidResolution`] for a non-positive target.
    pub fn elevation_at(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<QueryResult> {
        validate_point(lat, lon)?;
        let target = target_radians(resolution_m)?;
        let level = self.levels.resolution_to_level(target);

        let Some(key) = self.levels.key_for(level, lat, lon) else {
            return Ok(QueryResult::missing(target));
        };
        let y = self.levels.projection().lat_to_fraction(lat);
        let lon = normalize_lon(lon);

        let mut missing_level_zero = true;
        let mut answer = None;
        for k in key.lineage() {
            if let Some(tile) = self.cache.get_ready(k) {
                missing_level_zero = false;
                answer = Some((tile, k.level));
                break;
            }
            self.cache.ensure_fetching(k);
        }

        let result = match answer {
            Some((tile, level)) => {
                self.cache.check_expiration();
                QueryResult {
                    elevation: tile.elevation_at(y, lon),
                    achieved_resolution: self.levels.level(level).texel_size,
                    target_resolution: target,
                }
            }
            None => QueryResult::missing(target),
        };

        if missing_level_zero {
            tracing::trace!(lat, lon, "no tile available at any level");
        }
        Ok(result)
    }

    /// Elevations for many points at once.
    ///
    /// Tiles resolved for one point are reused for its neighbours, and each
    /// missing tile is requested at most once per call.
    pub fn elevations(&self, points: &[LatLon], resolution_m: f64) -> Result<BatchResult> {
        for p in points {
            validate_point(p.lat, p.lon)?;
        }
        let target = target_radians(resolution_m)?;
        let level = self.levels.resolution_to_level(target);
        let projection = self.levels.projection();

        let mut seen: HashMap<TileKey, Option<Arc<Tile>>> = HashMap::new();
        let mut touched_ready = false;
        let mut worst = 0.0f64;
        let mut results = Vec::with_capacity(points.len());

        for p in points {
            let result = match self.levels.key_for(level, p.lat, p.lon) {
                None => QueryResult::missing(target),
                Some(key) => {
                    let found = key.lineage().find_map(|k| {
                        let entry = seen.entry(k).or_insert_with(|| {
                            let tile = self.cache.get_ready(k);
                            if tile.is_none() {
                                self.cache.ensure_fetching(k);
                            }
                            tile
                        });
                        entry.clone()
                    });

                    match found {
                        Some(tile) => {
                            touched_ready = true;
                            QueryResult {
                                elevation: tile.elevation_at(
                                    projection.lat_to_fraction(p.lat),
                                    normalize_lon(p.lon),
                                ),
                                achieved_resolution: self.levels.level(tile.key().level).texel_size,
                                target_resolution: target,
                            }
                        }
                        None => QueryResult::missing(target),
                    }
                }
            };
            worst = worst.max(result.achieved_resolution);
            results.push(result);
        }

        if touched_ready {
            self.cache.check_expiration();
        }
        Ok(BatchResult {
            results,
            worst_resolution: worst,
        })
    }

    /// Sample a sector on a regular grid spaced roughly `spacing_m` apart.
    ///
    /// Corners and the centroid are always included; each direction is
    /// capped at [`MAX_SAMPLES_PER_DIRECTION`] samples.
    pub fn sample_sector(&self, sector: &Sector, spacing_m: f64) -> Result<Vec<(LatLon, QueryResult)>> {
        if !sector.is_finite() {
            return Err(ElevationError::InvalidInput {
                lat: sector.min_lat,
                lon: sector.min_lon,
                reason: "sector bounds are not finite",
            });
        }
        let spacing = target_radians(spacing_m)?;
        let points = grid_points(sector, spacing);
        let batch = self.elevations(&points, spacing_m)?;
        Ok(points.into_iter().zip(batch.results).collect())
    }

    /// Fraction of tiles covering `sector` at the target level that are
    /// ready in memory.
    pub fn data_availability(&self, sector: &Sector, resolution_m: f64) -> Result<f64> {
        let target = target_radians(resolution_m)?;
        let mut level = self.levels.resolution_to_level(target);
        while level > 0 && self.levels.count_in_sector(level, sector) > MAX_AVAILABILITY_TILES {
            level -= 1;
        }

        let keys = self.levels.keys_in_sector(level, sector);
        if keys.is_empty() {
            return Ok(1.0);
        }
        let ready = keys
            .iter()
            .filter(|k| matches!(self.cache.get(**k), Some(t) if t.is_ready()))
            .count();
        Ok(ready as f64 / keys.len() as f64)
    }

    /// The 3×3 neighbourhood of ground samples around a point, centre first,
    /// spaced `resolution_m` apart.
    pub fn ground_neighbourhood(&self, center: LatLon, resolution_m: f64) -> Result<Vec<(LatLon, QueryResult)>> {
        validate_point(center.lat, center.lon)?;
        let dlat = (resolution_m / EARTH_RADIUS_M).to_degrees();
        let dlon = dlat / center.lat_radians().cos().max(1e-6);

        let mut points = vec![center];
        for i in -1i32..=1 {
            for j in -1i32..=1 {
                if i != 0 || j != 0 {
                    points.push(LatLon::new(
                        center.lat + i as f64 * dlat,
                        center.lon + j as f64 * dlon,
                    ));
                }
            }
        }

        let batch = self.elevations(&points, resolution_m)?;
        Ok(points.into_iter().zip(batch.results).collect())
    }
}

pub(crate) fn validate_point(lat: f64, lon: f64) -> Result<()> {
    if !lat.is_finite() {
        return Err(ElevationError::InvalidInput {
            lat,
            lon,
            reason: "latitude is not finite",
        });
    }
    if !lon.is_finite() {
        return Err(ElevationError::InvalidInput {
            lat,
            lon,
            reason: "longitude is not finite",
        });
    }
    Ok(())
}

/// Meters to radians on the equator, rejecting nonsense.
pub(crate) fn target_radians(resolution_m: f64) -> Result<f64> {
    if !resolution_m.is_finite() || resolution_m <= 0.0 {
        return Err(ElevationError::InvalidResolution(resolution_m));
    }
    Ok(resolution_m / EARTH_RADIUS_M)
}

fn grid_points(sector: &Sector, spacing: f64) -> Vec<LatLon> {
    let steps = |extent: f64| ((extent / spacing).ceil() as usize).clamp(1, MAX_SAMPLES_PER_DIRECTION);
    let n_lat = steps(sector.delta_lat_radians());
    let mid_lat = sector.centroid().lat_radians().cos().abs();
    let n_lon = steps(sector.delta_lon_radians() * mid_lat);

    let mut points = Vec::with_capacity((n_lat + 1) * (n_lon + 1) + 1);
    for i in 0..=n_lat {
        let lat = sector.min_lat + (sector.max_lat - sector.min_lat) * i as f64 / n_lat as f64;
        for j in 0..=n_lon {
            let lon = sector.min_lon + (sector.max_lon - sector.min_lon) * j as f64 / n_lon as f64;
            points.push(LatLon::new(lat, lon));
        }
    }
    points.push(sector.centroid());
    points
}
