//! Quadtree tile addressing.
//!
//! The dataset is a single-root quadtree: level 0 is one tile covering the
//! whole projected range, and every level splits each tile into four. Tile
//! bounds are kept in *projected fractions* (`y` in `[-1, 1]`, longitude in
//! degrees) so that children partition their parent exactly; degrees are only
//! produced at the edges of the API.
//!
//! Row 0 is the southernmost row and column 0 the westernmost.

use std::f64::consts::{FRAC_PI_4, PI};
use std::fmt;

/// WGS84 equatorial radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Default tile edge length in samples.
pub const DEFAULT_TILE_SIZE: usize = 512;

/// Default number of levels (0..=13).
pub const DEFAULT_NUM_LEVELS: u8 = 14;

/// Address of one quadtree tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u8,
    pub row: u32,
    pub col: u32,
}

impl TileKey {
    pub const fn new(level: u8, row: u32, col: u32) -> Self {
        Self { level, row, col }
    }

    /// The tile one level coarser containing this one, or `None` at level 0.
    pub fn parent(&self) -> Option<TileKey> {
        if self.level == 0 {
            return None;
        }
        Some(TileKey::new(self.level - 1, self.row / 2, self.col / 2))
    }

    /// The four tiles one level finer, ordered SW, SE, NW, NE.
    pub fn children(&self) -> [TileKey; 4] {
        let level = self.level + 1;
        let row = self.row * 2;
        let col = self.col * 2;
        [
            TileKey::new(level, row, col),
            TileKey::new(level, row, col + 1),
            TileKey::new(level, row + 1, col),
            TileKey::new(level, row + 1, col + 1),
        ]
    }

    /// Iterate over this key and all of its ancestors, finest first.
    pub fn lineage(self) -> impl Iterator<Item = TileKey> {
        std::iter::successors(Some(self), TileKey::parent)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.row, self.col)
    }
}

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn lat_radians(&self) -> f64 {
        self.lat.to_radians()
    }

    pub fn lon_radians(&self) -> f64 {
        self.lon.to_radians()
    }
}

/// A rectangular geographic region in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sector {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Sector {
    /// Create a sector, reordering the bounds if they were given swapped.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat: min_lat.min(max_lat),
            max_lat: min_lat.max(max_lat),
            min_lon: min_lon.min(max_lon),
            max_lon: min_lon.max(max_lon),
        }
    }

    /// A zero-area sector at a single point.
    pub fn from_point(lat: f64, lon: f64) -> Self {
        Self::new(lat, lat, lon, lon)
    }

    /// The whole globe.
    pub fn full() -> Self {
        Self::new(-90.0, 90.0, -180.0, 180.0)
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    pub fn intersects(&self, other: &Sector) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    pub fn delta_lat_radians(&self) -> f64 {
        (self.max_lat - self.min_lat).to_radians()
    }

    pub fn delta_lon_radians(&self) -> f64 {
        (self.max_lon - self.min_lon).to_radians()
    }

    pub fn centroid(&self) -> LatLon {
        LatLon::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.min_lat.is_finite()
            && self.max_lat.is_finite()
            && self.min_lon.is_finite()
            && self.max_lon.is_finite()
    }

    /// Corners in SW, SE, NE, NW order.
    pub fn corners(&self) -> [LatLon; 4] {
        [
            LatLon::new(self.min_lat, self.min_lon),
            LatLon::new(self.min_lat, self.max_lon),
            LatLon::new(self.max_lat, self.max_lon),
            LatLon::new(self.max_lat, self.min_lon),
        ]
    }
}

/// Inverse Gudermannian function: latitude (radians) to Mercator fraction.
///
/// Maps ±85.0511° to ±1.
pub fn gudermannian_inverse(lat: f64) -> f64 {
    (FRAC_PI_4 + lat / 2.0).tan().ln() / PI
}

/// Gudermannian function: Mercator fraction to latitude (radians).
pub fn gudermannian(y: f64) -> f64 {
    (PI * y).sinh().atan()
}

/// How latitudes map onto the tile grid's `y` axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Web-Mercator style tiles; rows are linear in the Mercator fraction.
    #[default]
    Mercator,
    /// Equirectangular tiles; rows are linear in latitude.
    Geographic,
}

impl Projection {
    /// Latitude in degrees to projected fraction.
    pub fn lat_to_fraction(&self, lat: f64) -> f64 {
        let lat = lat.clamp(-90.0, 90.0);
        match self {
            Projection::Mercator => gudermannian_inverse(lat.to_radians()),
            Projection::Geographic => lat / 90.0,
        }
    }

    /// Projected fraction to latitude in degrees.
    pub fn fraction_to_lat(&self, y: f64) -> f64 {
        match self {
            Projection::Mercator => gudermannian(y).to_degrees(),
            Projection::Geographic => y * 90.0,
        }
    }
}

/// Normalize a longitude into `[-180, 180]`.
pub fn normalize_lon(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Bounds of a tile in projected fractions (y) and degrees (lon).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub min_y: f64,
    pub max_y: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl TileBounds {
    pub fn delta_y(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn delta_lon(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn contains(&self, y: f64, lon: f64) -> bool {
        (self.min_y..=self.max_y).contains(&y) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    pub fn to_sector(&self, projection: Projection) -> Sector {
        Sector {
            min_lat: projection.fraction_to_lat(self.min_y),
            max_lat: projection.fraction_to_lat(self.max_y),
            min_lon: self.min_lon,
            max_lon: self.max_lon,
        }
    }
}

/// Immutable description of one resolution tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelDescriptor {
    pub level_number: u8,
    pub tile_width: usize,
    pub tile_height: usize,
    /// Angular size of one sample in radians.
    pub texel_size: f64,
    /// Tile height in projected fraction units.
    pub tile_delta_y: f64,
    /// Tile width in degrees of longitude.
    pub tile_delta_lon: f64,
}

impl LevelDescriptor {
    /// Texel size converted to meters on the equator.
    pub fn texel_size_m(&self) -> f64 {
        self.texel_size * EARTH_RADIUS_M
    }

    /// Number of tile rows (and columns) at this level.
    pub fn tiles_per_side(&self) -> u32 {
        1u32 << self.level_number
    }
}

/// The full set of levels of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSet {
    projection: Projection,
    levels: Vec<LevelDescriptor>,
}

impl LevelSet {
    /// Create a level set with `num_levels` levels (at least one).
    pub fn new(projection: Projection, tile_width: usize, tile_height: usize, num_levels: u8) -> Self {
        let num_levels = num_levels.clamp(1, 30);
        let levels = (0..num_levels)
            .map(|n| {
                let scale = (-(n as i32) as f64).exp2();
                LevelDescriptor {
                    level_number: n,
                    tile_width,
                    tile_height,
                    // A tile spans 2^(1-n) fraction units, i.e. 90°·2^(1-n) = π/2^n radians.
                    texel_size: PI * scale / tile_height.max(1) as f64,
                    tile_delta_y: 2.0 * scale,
                    tile_delta_lon: 360.0 * scale,
                }
            })
            .collect();

        Self { projection, levels }
    }

    /// 512×512 Mercator tiles with 14 levels.
    pub fn mercator() -> Self {
        Self::new(
            Projection::Mercator,
            DEFAULT_TILE_SIZE,
            DEFAULT_TILE_SIZE,
            DEFAULT_NUM_LEVELS,
        )
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn max_level(&self) -> u8 {
        (self.levels.len() - 1) as u8
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Descriptor for `level`, clamped to the last level.
    pub fn level(&self, level: u8) -> &LevelDescriptor {
        &self.levels[(level as usize).min(self.levels.len() - 1)]
    }

    pub fn levels(&self) -> &[LevelDescriptor] {
        &self.levels
    }

    /// First level whose texel size is at most `target` radians, else the
    /// last level.
    pub fn resolution_to_level(&self, target: f64) -> u8 {
        self.levels
            .iter()
            .find(|l| l.texel_size <= target)
            .map(|l| l.level_number)
            .unwrap_or_else(|| self.max_level())
    }

    /// Projected fraction for a latitude, or `None` outside the dataset.
    pub fn fraction_for(&self, lat: f64) -> Option<f64> {
        let y = self.projection.lat_to_fraction(lat);
        (-1.0..=1.0).contains(&y).then_some(y)
    }

    /// Row containing projected fraction `y` at `level`.
    pub fn row_for_fraction(&self, level: u8, y: f64) -> u32 {
        let desc = self.level(level);
        let last = desc.tiles_per_side() - 1;
        let row = ((y + 1.0) / desc.tile_delta_y).floor();
        (row.max(0.0) as u32).min(last)
    }

    /// Column containing `lon` at `level`.
    pub fn col_for_lon(&self, level: u8, lon: f64) -> u32 {
        let desc = self.level(level);
        let last = desc.tiles_per_side() - 1;
        let col = ((normalize_lon(lon) + 180.0) / desc.tile_delta_lon).floor();
        (col.max(0.0) as u32).min(last)
    }

    /// Row containing `lat` at `level`, or `None` outside the dataset.
    pub fn compute_row(&self, level: u8, lat: f64) -> Option<u32> {
        self.fraction_for(lat)
            .map(|y| self.row_for_fraction(level, y))
    }

    /// The tile containing a point at `level`, or `None` outside the dataset.
    pub fn key_for(&self, level: u8, lat: f64, lon: f64) -> Option<TileKey> {
        let level = level.min(self.max_level());
        let row = self.compute_row(level, lat)?;
        Some(TileKey::new(level, row, self.col_for_lon(level, lon)))
    }

    /// Projected bounds of a tile.
    pub fn bounds_for(&self, key: TileKey) -> TileBounds {
        let desc = self.level(key.level);
        let min_y = -1.0 + desc.tile_delta_y * key.row as f64;
        let min_lon = -180.0 + desc.tile_delta_lon * key.col as f64;
        TileBounds {
            min_y,
            max_y: min_y + desc.tile_delta_y,
            min_lon,
            max_lon: min_lon + desc.tile_delta_lon,
        }
    }

    /// Geographic bounds of a tile in degrees.
    pub fn sector_for(&self, key: TileKey) -> Sector {
        self.bounds_for(key).to_sector(self.projection)
    }

    /// Number of tiles intersecting `sector` at `level`, without allocating.
    pub fn count_in_sector(&self, level: u8, sector: &Sector) -> u64 {
        match self.ranges_in_sector(level, sector) {
            Some((rows, cols)) => {
                (rows.end() - rows.start() + 1) as u64 * (cols.end() - cols.start() + 1) as u64
            }
            None => 0,
        }
    }

    /// All tiles intersecting `sector` at `level`, south-west first.
    pub fn keys_in_sector(&self, level: u8, sector: &Sector) -> Vec<TileKey> {
        let level = level.min(self.max_level());
        let Some((rows, cols)) = self.ranges_in_sector(level, sector) else {
            return Vec::new();
        };

        rows.flat_map(|row| cols.clone().map(move |col| TileKey::new(level, row, col)))
            .collect()
    }

    fn ranges_in_sector(
        &self,
        level: u8,
        sector: &Sector,
    ) -> Option<(std::ops::RangeInclusive<u32>, std::ops::RangeInclusive<u32>)> {
        let min_y = self.projection.lat_to_fraction(sector.min_lat);
        let max_y = self.projection.lat_to_fraction(sector.max_lat);
        if !sector.is_finite() || min_y > 1.0 || max_y < -1.0 {
            return None;
        }

        let rows = self.row_for_fraction(level, min_y.max(-1.0))
            ..=self.row_for_fraction(level, max_y.min(1.0));
        let cols = self.col_for_lon(level, sector.min_lon)..=self.col_for_lon(level, sector.max_lon);
        Some((rows, cols))
    }
}

impl Default for LevelSet {
    fn default() -> Self {
        Self::mercator()
    }
}

/// Largest latitude representable in a Mercator dataset (≈85.0511°).
pub fn mercator_lat_limit() -> f64 {
    gudermannian(1.0).to_degrees()
}
