//! HTTP tile source.
//!
//! This module provides [`HttpTileSource`], a blocking [`TileSource`] that
//! downloads tiles from an XYZ-style tile server. It is only available when
//! the `download` feature is enabled.
//!
//! # URL Template Placeholders
//!
//! - `{z}` - level
//! - `{x}` - column
//! - `{y}` - XYZ row, counted from the north (`2^z - 1 - row`)
//! - `{row}` - row counted from the south
//! - `{key}` - `level/row/col`
//! - `{token}` - access token, if configured

use std::io::{Cursor, Read};
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use zip::ZipArchive;

use crate::addressing::TileKey;
use crate::error::{ElevationError, Result};
use crate::fetch::TileSource;

/// Compression format for downloaded tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression
    #[default]
    None,
    /// Gzip compression (.gz)
    Gzip,
    /// ZIP archive (.zip); the first entry is the tile
    Zip,
}

impl Compression {
    /// Detect compression format from a URL or filename.
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.ends_with(".gz") {
            Compression::Gzip
        } else if lower.ends_with(".zip") {
            Compression::Zip
        } else {
            Compression::None
        }
    }
}

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// URL of the Mapbox Terrain-RGB tileset.
const TERRAIN_RGB_TEMPLATE: &str =
    "https://api.mapbox.com/v4/mapbox.terrain-rgb/{z}/{x}/{y}@2x.pngraw?access_token={token}";

/// Configuration for downloading tiles.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// URL template with placeholders.
    pub url_template: String,
    /// Compression format of the downloaded bytes.
    pub compression: Compression,
    /// Value substituted for `{token}`.
    pub access_token: Option<String>,
    /// Finest level the server provides.
    pub max_level: u8,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Number of retry attempts on failure.
    pub max_retries: u32,
}

impl DownloadConfig {
    /// Create a configuration for a URL template.
    ///
    /// Compression is auto-detected from the URL extension.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use qtdem::download::DownloadConfig;
    ///
    /// let config = DownloadConfig::with_url_template(
    ///     "https://example.com/dem/{z}/{x}/{y}.bin.gz",
    /// );
    /// ```
    pub fn with_url_template(url_template: impl Into<String>) -> Self {
        let url_template = url_template.into();
        let compression = Compression::from_url(&url_template);
        Self {
            url_template,
            compression,
            access_token: None,
            max_level: u8::MAX,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 3,
        }
    }

    /// Mapbox Terrain-RGB tiles (512 px, levels 0 to 13).
    pub fn terrain_rgb(access_token: impl Into<String>) -> Self {
        Self::with_url_template(TERRAIN_RGB_TEMPLATE)
            .with_access_token(access_token)
            .with_max_level(13)
    }

    /// Configuration from a URL template, or `terrain-rgb` for the Terrain-RGB
    /// preset (which requires a token).
    pub fn parse(url: &str, access_token: Option<String>) -> Result<Self> {
        if url.eq_ignore_ascii_case("terrain-rgb") {
            let token = access_token.ok_or_else(|| {
                ElevationError::Config("an access token is required for terrain-rgb".to_string())
            })?;
            return Ok(Self::terrain_rgb(token));
        }

        let config = Self::with_url_template(url);
        Ok(match access_token {
            Some(token) => config.with_access_token(token),
            None => config,
        })
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_max_level(mut self, max_level: u8) -> Self {
        self.max_level = max_level;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Downloads tiles over HTTP with retries.
pub struct HttpTileSource {
    client: Client,
    config: DownloadConfig,
}

impl HttpTileSource {
    /// Create a new source with the given configuration.
    pub fn new(config: DownloadConfig) -> Result<Self> {
        if config.url_template.is_empty() {
            return Err(ElevationError::Config(
                "No download URL template configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Build the download URL for a tile.
    pub fn build_url(&self, key: TileKey) -> String {
        build_url(&self.config, key)
    }

    fn download(&self, key: TileKey, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send()?;

        if !response.status().is_success() {
            return Err(ElevationError::FetchFailed {
                key,
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response.bytes()?;
        decompress(key, &bytes, self.config.compression)
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&self, key: TileKey) -> Result<Vec<u8>> {
        let url = self.build_url(key);

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Brief delay before retry
                std::thread::sleep(Duration::from_millis(500 * attempt as u64));
            }

            match self.download(key, &url) {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::debug!(%key, attempt, error = %e, "tile download attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ElevationError::FetchFailed {
            key,
            reason: "Unknown error".to_string(),
        }))
    }

    fn contains(&self, key: TileKey) -> bool {
        key.level <= self.config.max_level
    }
}

fn build_url(config: &DownloadConfig, key: TileKey) -> String {
    let xyz_row = (1u64 << key.level) - 1 - key.row as u64;
    config
        .url_template
        .replace("{z}", &key.level.to_string())
        .replace("{x}", &key.col.to_string())
        .replace("{y}", &xyz_row.to_string())
        .replace("{row}", &key.row.to_string())
        .replace("{key}", &key.to_string())
        .replace("{token}", config.access_token.as_deref().unwrap_or(""))
}

fn decompress(key: TileKey, bytes: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(bytes);
            let mut data = Vec::new();
            decoder
                .read_to_end(&mut data)
                .map_err(|e| ElevationError::FetchFailed {
                    key,
                    reason: format!("Failed to decompress gzip: {}", e),
                })?;
            Ok(data)
        }
        Compression::Zip => extract_first_from_zip(key, bytes),
    }
}

/// Extract the first file entry of a ZIP archive.
fn extract_first_from_zip(key: TileKey, data: &[u8]) -> Result<Vec<u8>> {
    let zip_error = |reason: String| ElevationError::FetchFailed { key, reason };

    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| zip_error(format!("Failed to read ZIP archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| zip_error(format!("Failed to read ZIP entry: {}", e)))?;
        if entry.is_dir() {
            continue;
        }
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| zip_error(format!("Failed to extract ZIP entry: {}", e)))?;
        return Ok(contents);
    }

    Err(zip_error("No file found in ZIP archive".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    #[test]
    fn test_build_url_flips_row() {
        let config = DownloadConfig::with_url_template("https://example.com/{z}/{x}/{y}.png");
        // Row 0 is south; the server counts from the north.
        assert_eq!(
            build_url(&config, TileKey::new(2, 0, 1)),
            "https://example.com/2/1/3.png"
        );
        assert_eq!(
            build_url(&config, TileKey::new(0, 0, 0)),
            "https://example.com/0/0/0.png"
        );
    }

    #[test]
    fn test_build_url_terrain_rgb() {
        let config = DownloadConfig::terrain_rgb("secret");
        let url = build_url(&config, TileKey::new(13, 5000, 4000));
        assert!(url.contains("/13/4000/3191@2x.pngraw"));
        assert!(url.ends_with("access_token=secret"));
    }

    #[test]
    fn test_build_url_south_row_placeholder() {
        let config = DownloadConfig::with_url_template("file:///{z}/{row}/{x}");
        assert_eq!(build_url(&config, TileKey::new(3, 2, 7)), "file:///3/2/7");
    }

    #[test]
    fn test_parse_presets() {
        assert!(matches!(
            DownloadConfig::parse("terrain-rgb", None),
            Err(ElevationError::Config(_))
        ));

        let config = DownloadConfig::parse("Terrain-RGB", Some("t".to_string())).unwrap();
        assert_eq!(config.max_level, 13);

        let config = DownloadConfig::parse("https://example.com/{z}/{x}/{y}.bin.gz", None).unwrap();
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.access_token, None);
    }

    #[test]
    fn test_empty_url_template() {
        let config = DownloadConfig::with_url_template("");
        assert!(matches!(
            HttpTileSource::new(config),
            Err(ElevationError::Config(_))
        ));
    }

    #[test]
    fn test_download_config_builder() {
        let config = DownloadConfig::with_url_template("https://example.com/{z}/{x}/{y}")
            .with_timeout(60)
            .with_max_retries(5)
            .with_max_level(10);

        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_level, 10);
        assert_eq!(config.compression, Compression::None);
    }

    #[test]
    fn test_max_level_limits_contains() {
        let source =
            HttpTileSource::new(DownloadConfig::terrain_rgb("t").with_timeout(1)).unwrap();
        assert!(source.contains(TileKey::new(13, 0, 0)));
        assert!(!source.contains(TileKey::new(14, 0, 0)));
    }

    #[test]
    fn test_compression_from_url() {
        assert_eq!(Compression::from_url("tile.bin.gz"), Compression::Gzip);
        assert_eq!(Compression::from_url("TILE.ZIP"), Compression::Zip);
        assert_eq!(Compression::from_url("tile.pngraw"), Compression::None);
    }

    #[test]
    fn test_decompress_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"elevation").unwrap();
        let bytes = encoder.finish().unwrap();

        let data = decompress(TileKey::new(0, 0, 0), &bytes, Compression::Gzip).unwrap();
        assert_eq!(data, b"elevation");
    }

    #[test]
    fn test_extract_first_from_zip() {
        let mut zip_buffer = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut zip_buffer));
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            zip.start_file("3/1/2.bin", options).unwrap();
            zip.write_all(&[7u8; 100]).unwrap();
            zip.finish().unwrap();
        }

        let result = extract_first_from_zip(TileKey::new(3, 1, 2), &zip_buffer).unwrap();
        assert_eq!(result.len(), 100);
    }

    #[test]
    fn test_extract_from_empty_zip_fails() {
        let mut zip_buffer = Vec::new();
        {
            let zip = zip::ZipWriter::new(Cursor::new(&mut zip_buffer));
            zip.finish().unwrap();
        }

        assert!(extract_first_from_zip(TileKey::new(0, 0, 0), &zip_buffer).is_err());
    }
}
