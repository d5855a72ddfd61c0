//! The assembled elevation model with builder and environment configuration.
//!
//! [`ElevationService`] wires a [`TileSource`], a decoder, a task queue and
//! the in-memory caches into one datum-corrected [`ElevationSource`], and
//! adds path sampling on top.
//!
//! ```ignore
//! use qtdem::{ElevationServiceBuilder, download::DownloadConfig};
//!
//! let service = ElevationServiceBuilder::new()
//!     .cache_size(512)
//!     .cache_dir("/var/cache/qtdem")
//!     .download(DownloadConfig::terrain_rgb("token"))
//!     .build()?;
//!
//! // The first call requests tiles and answers with what it has.
//! let first = service.elevation_at(46.5, 7.9, 30.0)?;
//! service.run_pending_fetches();
//! let better = service.elevation_at(46.5, 7.9, 30.0)?;
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::addressing::{LatLon, LevelSet, Sector};
use crate::cache::{
    CacheStats, TileCache, TileCacheConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL,
};
use crate::datum::{ConstantOffset, DatumPipeline, DatumShift, Stage, UnavailablePolicy};
use crate::error::{ElevationError, Result};
use crate::extremes::{
    ExtremesCache, DEFAULT_EXTREMES_CAPACITY, DEFAULT_MAX_EXTREMES_LEVEL, DEFAULT_MODEL_EXTREMES,
};
use crate::fetch::{DeferredQueue, OfflineMode, PersistentCacheStore, TaskQueue, TileDecoder, TileSource};
use crate::path::{
    MinMax, PathSampler, Position, ProfileSample, TrackClearance, DEFAULT_SAMPLE_DISTANCE,
};
use crate::query::{BatchResult, ElevationEngine, QueryResult};
use crate::source::{ElevationSource, TileElevationModel};
use crate::store::{CachingTileSource, FileTileStore};

#[cfg(feature = "download")]
use crate::download::{DownloadConfig, HttpTileSource};

/// Capacity of the built-in deferred fetch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Elevation model with caching, datum correction and path sampling.
///
/// Queries never block on I/O. With the built-in queue, fetches requested by
/// queries run when [`run_pending_fetches`](Self::run_pending_fetches) is
/// called; with a custom [`TaskQueue`] they run wherever that queue runs them.
pub struct ElevationService {
    pipeline: DatumPipeline<TileElevationModel>,
    engine: ElevationEngine,
    sampler: PathSampler,
    deferred: Option<Arc<DeferredQueue>>,
    file_store: Option<Arc<FileTileStore>>,
}

impl ElevationService {
    pub fn builder() -> ElevationServiceBuilder {
        ElevationServiceBuilder::new()
    }

    /// Datum-corrected elevation at a point.
    ///
    /// # Errors
    ///
    /// Only invalid input is an error; missing or coarse data is reported in
    /// the [`QueryResult`].
    pub fn elevation_at(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<QueryResult> {
        self.pipeline.elevation_at(lat, lon, resolution_m)
    }

    /// Datum-corrected elevations for many points.
    ///
    /// Points sharing a tile look it up once. Missing points count as an
    /// infinite `worst_resolution`.
    pub fn elevations(&self, points: &[LatLon], resolution_m: f64) -> Result<BatchResult> {
        let batch = self
            .pipeline
            .with_source(|model| model.engine().elevations(points, resolution_m))?;
        Ok(BatchResult {
            results: self.shift_all(points, batch.results),
            ..batch
        })
    }

    /// `(min, max)` elevation inside a sector, widened by the datum envelope.
    pub fn extremes(&self, sector: &Sector) -> (f64, f64) {
        self.pipeline.extremes(sector)
    }

    pub fn model_extremes(&self) -> (f64, f64) {
        self.pipeline.model_extremes()
    }

    pub fn min_max_along_path(&self, from: LatLon, to: LatLon) -> Result<MinMax> {
        self.sampler.min_max_along_path(&self.pipeline, from, to)
    }

    pub fn min_max_around_point(&self, center: LatLon, radius_m: f64) -> Result<MinMax> {
        self.sampler.min_max_around_point(&self.pipeline, center, radius_m)
    }

    pub fn elevation_profile(&self, from: LatLon, to: LatLon) -> Result<Vec<ProfileSample>> {
        self.sampler.elevation_profile(&self.pipeline, from, to)
    }

    pub fn track_clearance(&self, from: Position, to: Position) -> Result<TrackClearance> {
        self.sampler.track_clearance(&self.pipeline, from, to)
    }

    pub fn position_over_ground(&self, position: Position, min_clearance: f64) -> Result<Position> {
        self.sampler
            .position_over_ground(&self.pipeline, position, min_clearance)
    }

    /// Whether usable data exists at a point.
    pub fn contains(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<bool> {
        self.pipeline.contains(lat, lon, resolution_m)
    }

    /// Fraction of the sector covered by ready tiles at the target level.
    pub fn data_availability(&self, sector: &Sector, resolution_m: f64) -> Result<f64> {
        self.pipeline
            .with_source(|model| model.engine().data_availability(sector, resolution_m))
    }

    /// Datum-corrected samples on a regular grid over a sector.
    pub fn sample_sector(&self, sector: &Sector, spacing_m: f64) -> Result<Vec<(LatLon, QueryResult)>> {
        let samples = self
            .pipeline
            .with_source(|model| model.engine().sample_sector(sector, spacing_m))?;
        let (points, results): (Vec<_>, Vec<_>) = samples.into_iter().unzip();
        let results = self.shift_all(&points, results);
        Ok(points.into_iter().zip(results).collect())
    }

    fn shift_all(&self, points: &[LatLon], results: Vec<QueryResult>) -> Vec<QueryResult> {
        points
            .iter()
            .zip(results)
            .map(|(p, r)| QueryResult {
                elevation: r.elevation.map(|v| self.pipeline.shift(v, Some(*p))),
                ..r
            })
            .collect()
    }

    /// Run fetches queued on the built-in queue, returning how many ran.
    ///
    /// Returns 0 when a custom queue was configured.
    pub fn run_pending_fetches(&self) -> usize {
        self.deferred.as_ref().map_or(0, |q| q.run_pending())
    }

    /// Number of tasks waiting on the built-in queue.
    pub fn pending_fetches(&self) -> usize {
        self.deferred.as_ref().map_or(0, |q| q.len())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.engine.cache().stats()
    }

    /// Drop every tile held in memory.
    pub fn clear_cache(&self) {
        self.engine.cache().clear();
    }

    pub fn set_offline(&self, offline: bool) {
        self.engine.cache().offline().set_offline(offline);
    }

    pub fn is_offline(&self) -> bool {
        self.engine.cache().offline().is_offline()
    }

    pub fn levels(&self) -> &LevelSet {
        self.engine.levels()
    }

    pub fn sample_distance(&self) -> f64 {
        self.sampler.sample_distance()
    }

    /// The on-disk tile store, if a cache directory was configured.
    pub fn file_store(&self) -> Option<&Arc<FileTileStore>> {
        self.file_store.as_ref()
    }

    pub fn engine(&self) -> &ElevationEngine {
        &self.engine
    }
}

impl ElevationSource for ElevationService {
    fn elevation_at(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<QueryResult> {
        self.pipeline.elevation_at(lat, lon, resolution_m)
    }

    fn extremes(&self, sector: &Sector) -> (f64, f64) {
        self.pipeline.extremes(sector)
    }

    fn model_extremes(&self) -> (f64, f64) {
        self.pipeline.model_extremes()
    }
}

/// Builder for configuring an [`ElevationService`].
///
/// # Example
///
/// ```ignore
/// use qtdem::ElevationServiceBuilder;
///
/// let service = ElevationServiceBuilder::new()
///     .max_level(11)
///     .geoid_offset(-47.0)
///     .source(my_source)
///     .build()?;
/// ```
pub struct ElevationServiceBuilder {
    levels: LevelSet,
    cache_size: u64,
    ttl: Duration,
    offline: bool,
    sample_distance: f64,
    source: Option<Arc<dyn TileSource>>,
    decoder: Option<Arc<dyn TileDecoder>>,
    queue: Option<Arc<dyn TaskQueue>>,
    cache_dir: Option<PathBuf>,
    stages: Vec<Stage>,
    policy: UnavailablePolicy,
    extremes_capacity: u64,
    max_extremes_level: u8,
    default_extremes: (f64, f64),
    #[cfg(feature = "download")]
    download: Option<DownloadConfig>,
}

impl Default for ElevationServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElevationServiceBuilder {
    /// A builder with default settings and no tile source.
    pub fn new() -> Self {
        Self {
            levels: LevelSet::mercator(),
            cache_size: DEFAULT_CACHE_CAPACITY,
            ttl: DEFAULT_CACHE_TTL,
            offline: false,
            sample_distance: DEFAULT_SAMPLE_DISTANCE,
            source: None,
            decoder: None,
            queue: None,
            cache_dir: None,
            stages: Vec::new(),
            policy: UnavailablePolicy::default(),
            extremes_capacity: DEFAULT_EXTREMES_CAPACITY,
            max_extremes_level: DEFAULT_MAX_EXTREMES_LEVEL,
            default_extremes: DEFAULT_MODEL_EXTREMES,
            #[cfg(feature = "download")]
            download: None,
        }
    }

    /// Create a builder from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QTDEM_TILE_URL`: URL template, or `terrain-rgb` (requires `download` feature)
    /// - `QTDEM_ACCESS_TOKEN`: access token for the tile server
    /// - `QTDEM_CACHE_DIR`: directory for the on-disk tile store
    /// - `QTDEM_CACHE_SIZE`: tiles kept in memory (default: 256)
    /// - `QTDEM_CACHE_TTL_DAYS`: dataset lifetime in days (default: 27)
    /// - `QTDEM_OFFLINE`: `true`/`1` to read only tiles already on disk
    /// - `QTDEM_SAMPLE_DISTANCE`: path sample spacing in meters (default: 10)
    /// - `QTDEM_GEOID_OFFSET`: constant datum shift in meters
    /// - `QTDEM_MAX_LEVEL`: finest level of the tile pyramid
    ///
    /// # Errors
    ///
    /// Returns [`ElevationError::Config`] if a variable is set to an
    /// unparseable value.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::new();

        if let Some(size) = env_var::<u64>("QTDEM_CACHE_SIZE")? {
            builder = builder.cache_size(size);
        }
        if let Some(days) = env_var::<u64>("QTDEM_CACHE_TTL_DAYS")? {
            let secs = days.checked_mul(24 * 60 * 60).ok_or_else(|| {
                ElevationError::Config(format!("QTDEM_CACHE_TTL_DAYS too large: {}", days))
            })?;
            builder = builder.ttl(Duration::from_secs(secs));
        }
        if let Some(offline) = env_flag("QTDEM_OFFLINE")? {
            builder = builder.offline(offline);
        }
        if let Some(distance) = env_var::<f64>("QTDEM_SAMPLE_DISTANCE")? {
            builder = builder.sample_distance(distance);
        }
        if let Some(offset) = env_var::<f64>("QTDEM_GEOID_OFFSET")? {
            builder = builder.geoid_offset(offset);
        }
        if let Some(level) = env_var::<u8>("QTDEM_MAX_LEVEL")? {
            builder = builder.max_level(level);
        }
        if let Ok(dir) = std::env::var("QTDEM_CACHE_DIR") {
            builder = builder.cache_dir(dir);
        }

        #[cfg(feature = "download")]
        let builder = Self {
            download: download_from_env()?,
            ..builder
        };
        #[cfg(not(feature = "download"))]
        if std::env::var("QTDEM_TILE_URL").is_ok() {
            tracing::warn!("QTDEM_TILE_URL ignored: built without the download feature");
        }

        Ok(builder)
    }

    /// Use a specific tile pyramid.
    pub fn levels(mut self, levels: LevelSet) -> Self {
        self.levels = levels;
        self
    }

    /// Keep the current tile layout but stop at `level`.
    pub fn max_level(mut self, level: u8) -> Self {
        let top = self.levels.level(0);
        self.levels = LevelSet::new(
            self.levels.projection(),
            top.tile_width,
            top.tile_height,
            level.saturating_add(1),
        );
        self
    }

    /// Set the number of tiles kept in memory.
    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Set how long a loaded dataset lives before it is dropped.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Never contact the remote source; tiles in the cache directory are
    /// still read.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Spacing between path and circle samples in meters.
    pub fn sample_distance(mut self, meters: f64) -> Self {
        self.sample_distance = meters;
        self
    }

    pub fn source(mut self, source: impl TileSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn decoder(mut self, decoder: impl TileDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Run fetches on `queue` instead of the built-in deferred queue.
    pub fn queue(mut self, queue: impl TaskQueue + 'static) -> Self {
        self.queue = Some(Arc::new(queue));
        self
    }

    /// Keep fetched tiles on disk under `dir`.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Append a datum stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a constant datum shift.
    pub fn geoid_offset(self, meters: f64) -> Self {
        self.stage(Stage::DatumShift(DatumShift::new(ConstantOffset(meters))))
    }

    pub fn unavailable_policy(mut self, policy: UnavailablePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Size and finest level of the sector extremes cache.
    pub fn extremes(mut self, capacity: u64, max_level: u8) -> Self {
        self.extremes_capacity = capacity;
        self.max_extremes_level = max_level;
        self
    }

    /// Model bounds reported before any tile has loaded.
    pub fn default_extremes(mut self, bounds: (f64, f64)) -> Self {
        self.default_extremes = bounds;
        self
    }

    /// Fetch tiles over HTTP.
    #[cfg(feature = "download")]
    pub fn download(mut self, config: DownloadConfig) -> Self {
        self.download = Some(config);
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns [`ElevationError::Config`] if no tile source is configured or
    /// a setting is out of range.
    pub fn build(self) -> Result<ElevationService> {
        if !(self.sample_distance > 0.0) {
            return Err(ElevationError::Config(format!(
                "sample distance must be positive, got {}",
                self.sample_distance
            )));
        }

        let source = self.source;
        #[cfg(feature = "download")]
        let source = match source {
            Some(source) => Some(source),
            None => self
                .download
                .map(HttpTileSource::new)
                .transpose()?
                .map(|s| Arc::new(s) as Arc<dyn TileSource>),
        };
        let source =
            source.ok_or_else(|| ElevationError::Config("no tile source configured".to_string()))?;

        let (source, file_store): (Arc<dyn TileSource>, _) = match self.cache_dir {
            Some(dir) => {
                let store = Arc::new(FileTileStore::new(dir));
                let caching = CachingTileSource::new(store.clone(), source);
                (Arc::new(caching) as Arc<dyn TileSource>, Some(store))
            }
            None => (source, None),
        };

        let top = self.levels.level(0);
        let decoder = self
            .decoder
            .unwrap_or_else(|| default_decoder(top.tile_width, top.tile_height));

        let (queue, deferred): (Arc<dyn TaskQueue>, _) = match self.queue {
            Some(queue) => (queue, None),
            None => {
                let deferred = Arc::new(DeferredQueue::new(DEFAULT_QUEUE_CAPACITY));
                (deferred.clone() as Arc<dyn TaskQueue>, Some(deferred))
            }
        };

        let levels = Arc::new(self.levels);
        let cache = TileCache::new(TileCacheConfig {
            levels: levels.clone(),
            source,
            decoder,
            queue,
            offline: OfflineMode::new(self.offline),
            store: file_store
                .clone()
                .map(|s| s as Arc<dyn PersistentCacheStore>),
            capacity: self.cache_size,
            ttl: self.ttl,
        });

        let extremes =
            ExtremesCache::with_options(cache.clone(), self.extremes_capacity, self.max_extremes_level)
                .default_extremes(self.default_extremes);
        let engine = ElevationEngine::new(cache);
        let model = TileElevationModel::new(engine.clone(), extremes);
        let pipeline = self
            .stages
            .into_iter()
            .fold(DatumPipeline::new(model), DatumPipeline::stage)
            .unavailable_policy(self.policy);

        tracing::info!(
            levels = levels.num_levels(),
            cache_size = self.cache_size,
            ttl_days = self.ttl.as_secs() / 86_400,
            stages = pipeline.stages().len(),
            offline = self.offline,
            "elevation service ready"
        );

        Ok(ElevationService {
            pipeline,
            engine,
            sampler: PathSampler::new(self.sample_distance),
            deferred,
            file_store,
        })
    }
}

#[cfg(feature = "terrain-rgb")]
fn default_decoder(_width: usize, _height: usize) -> Arc<dyn TileDecoder> {
    Arc::new(crate::decode::TerrainRgbDecoder)
}

#[cfg(not(feature = "terrain-rgb"))]
fn default_decoder(width: usize, height: usize) -> Arc<dyn TileDecoder> {
    Arc::new(crate::decode::RawGridDecoder::new(width, height))
}

#[cfg(feature = "download")]
fn download_from_env() -> Result<Option<DownloadConfig>> {
    match std::env::var("QTDEM_TILE_URL") {
        Ok(url) => DownloadConfig::parse(&url, std::env::var("QTDEM_ACCESS_TOKEN").ok()).map(Some),
        Err(_) => Ok(None),
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ElevationError::Config(format!("invalid {}: {:?}", name, value))),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "" | "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ElevationError::Config(format!("invalid {}: {:?}", name, value))),
        },
        Err(_) => Ok(None),
    }
}
