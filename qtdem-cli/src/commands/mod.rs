use anyhow::{Context, Result};
use clap::Args;
use qtdem::download::DownloadConfig;
use qtdem::ElevationService;
use std::path::PathBuf;

pub mod batch;
pub mod cache;
pub mod extremes;
pub mod path;
pub mod query;

/// Settings shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct ServiceArgs {
    /// Tile URL template with {z}/{x}/{y} placeholders, or "terrain-rgb"
    #[arg(long, env = "QTDEM_TILE_URL", global = true)]
    pub tile_url: Option<String>,

    /// Token substituted for {token} in the tile URL
    #[arg(long, env = "QTDEM_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub access_token: Option<String>,

    /// Directory for the on-disk tile cache
    #[arg(long, env = "QTDEM_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Maximum tiles in memory
    #[arg(short, long, env = "QTDEM_CACHE_SIZE", global = true)]
    pub cache_size: Option<u64>,

    /// Finest level of the tile pyramid
    #[arg(long, env = "QTDEM_MAX_LEVEL", global = true)]
    pub max_level: Option<u8>,

    /// Constant datum shift in meters
    #[arg(long, env = "QTDEM_GEOID_OFFSET", allow_hyphen_values = true, global = true)]
    pub geoid_offset: Option<f64>,

    /// Spacing of path and circle samples in meters
    #[arg(long, env = "QTDEM_SAMPLE_DISTANCE", global = true)]
    pub sample_distance: Option<f64>,

    /// Never download; answer from tiles already in the disk cache
    #[arg(long, env = "QTDEM_OFFLINE", global = true)]
    pub offline: bool,

    /// Fetch rounds before answering with whatever is loaded
    #[arg(long, default_value = "10", global = true)]
    pub max_rounds: usize,
}

impl ServiceArgs {
    pub fn build_service(&self) -> Result<ElevationService> {
        let mut builder = ElevationService::builder().offline(self.offline);

        if let Some(level) = self.max_level {
            builder = builder.max_level(level);
        }
        if let Some(size) = self.cache_size {
            builder = builder.cache_size(size);
        }
        if let Some(offset) = self.geoid_offset {
            builder = builder.geoid_offset(offset);
        }
        if let Some(distance) = self.sample_distance {
            builder = builder.sample_distance(distance);
        }
        if let Some(dir) = &self.cache_dir {
            builder = builder.cache_dir(dir);
        }
        if let Some(url) = &self.tile_url {
            let config = DownloadConfig::parse(url, self.access_token.clone())
                .context("Invalid tile URL")?;
            builder = builder.download(config);
        }

        builder.build().context(
            "Failed to create elevation service. Use --tile-url or set QTDEM_TILE_URL",
        )
    }

    pub fn cache_dir(&self) -> Result<&PathBuf> {
        self.cache_dir
            .as_ref()
            .context("No cache directory. Use --cache-dir or set QTDEM_CACHE_DIR")
    }
}

/// Repeat `query` until no fetches are queued or `max_rounds` is reached.
///
/// Each round answers from memory and then runs the fetches that answer
/// asked for, so later rounds see finer tiles.
pub fn settle<T>(
    service: &ElevationService,
    max_rounds: usize,
    mut query: impl FnMut(&ElevationService) -> qtdem::Result<T>,
) -> Result<T> {
    let mut rounds = 0;
    loop {
        let answer = query(service).context("Failed to get elevation")?;
        rounds += 1;
        if rounds >= max_rounds || service.run_pending_fetches() == 0 {
            return Ok(answer);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use qtdem::decode::RawGridDecoder;
    use qtdem::fetch::TileSource;
    use qtdem::tile::ElevationGrid;
    use qtdem::{ElevationService, ElevationServiceBuilder, LevelSet, Projection, TileKey};

    pub const TILE_SIZE: usize = 9;
    pub const NUM_LEVELS: u8 = 3;

    /// Height grows 100 m per degree of longitude east of 0°.
    struct Slope;

    impl TileSource for Slope {
        fn fetch(&self, key: TileKey) -> qtdem::Result<Vec<u8>> {
            let b = levels().bounds_for(key);
            let step = (TILE_SIZE - 1) as f64;
            let grid = ElevationGrid::from_fn(TILE_SIZE, TILE_SIZE, |_, col| {
                let lon = b.min_lon + b.delta_lon() * col as f64 / step;
                (lon * 100.0).max(0.0)
            });
            Ok(RawGridDecoder::encode(&grid))
        }
    }

    fn levels() -> LevelSet {
        LevelSet::new(Projection::Mercator, TILE_SIZE, TILE_SIZE, NUM_LEVELS)
    }

    pub fn builder() -> ElevationServiceBuilder {
        ElevationService::builder()
            .levels(levels())
            .source(Slope)
            .decoder(RawGridDecoder::new(TILE_SIZE, TILE_SIZE))
            .sample_distance(1000.0)
    }

    pub fn service() -> ElevationService {
        builder().build().unwrap()
    }
}
