//! Decoders from tile bytes to elevation grids.
//!
//! - [`RawGridDecoder`]: big-endian `f64` samples, row 0 north.
//! - [`TerrainRgbDecoder`]: Terrain-RGB PNG tiles (requires the `terrain-rgb`
//!   feature).

use crate::addressing::TileKey;
use crate::error::{ElevationError, Result};
use crate::fetch::TileDecoder;
use crate::tile::{ElevationGrid, MISSING_DATA_SIGNAL};

/// Decodes a headerless grid of big-endian `f64` samples.
///
/// NaN samples become the missing-data signal.
#[derive(Debug, Clone, Copy)]
pub struct RawGridDecoder {
    width: usize,
    height: usize,
}

impl RawGridDecoder {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Encode a grid in the format this decoder reads.
    pub fn encode(grid: &ElevationGrid) -> Vec<u8> {
        grid.samples()
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect()
    }
}

impl TileDecoder for RawGridDecoder {
    fn decode(&self, key: TileKey, bytes: &[u8]) -> Result<ElevationGrid> {
        let expected = self.width * self.height * 8;
        if bytes.len() != expected {
            return Err(ElevationError::Decode {
                key,
                reason: format!("expected {} bytes, got {}", expected, bytes.len()),
            });
        }

        let samples = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                let v = f64::from_be_bytes(buf);
                if v.is_nan() {
                    MISSING_DATA_SIGNAL
                } else {
                    v
                }
            })
            .collect();

        ElevationGrid::new(self.width, self.height, samples)
    }
}

/// Height in meters encoded by a Terrain-RGB pixel.
///
/// `height = -10000 + (R·65536 + G·256 + B) · 0.1`. A black pixel decodes
/// to exactly the missing-data signal.
#[inline]
pub fn terrain_rgb_height(r: u8, g: u8, b: u8) -> f64 {
    -10000.0 + ((r as u32 * 65536 + g as u32 * 256 + b as u32) as f64) * 0.1
}

/// The Terrain-RGB pixel closest to `height`.
pub fn terrain_rgb_encode(height: f64) -> [u8; 3] {
    let code = ((height + 10000.0) * 10.0).round().clamp(0.0, 16_777_215.0) as u32;
    [(code >> 16) as u8, (code >> 8) as u8, code as u8]
}

#[cfg(feature = "terrain-rgb")]
pub use self::terrain_rgb::TerrainRgbDecoder;

#[cfg(feature = "terrain-rgb")]
mod terrain_rgb {
    use image::ImageFormat;

    use super::terrain_rgb_height;
    use crate::addressing::TileKey;
    use crate::error::{ElevationError, Result};
    use crate::fetch::TileDecoder;
    use crate::tile::{ElevationGrid, MISSING_DATA_SIGNAL};

    /// Decodes Terrain-RGB PNG tiles.
    ///
    /// Fully transparent pixels are missing data.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TerrainRgbDecoder;

    impl TileDecoder for TerrainRgbDecoder {
        fn decode(&self, key: TileKey, bytes: &[u8]) -> Result<ElevationGrid> {
            let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
                .map_err(|e| ElevationError::Decode {
                    key,
                    reason: e.to_string(),
                })?
                .to_rgba8();

            let (width, height) = image.dimensions();
            let samples = image
                .pixels()
                .map(|p| {
                    let [r, g, b, a] = p.0;
                    if a == 0 {
                        MISSING_DATA_SIGNAL
                    } else {
                        terrain_rgb_height(r, g, b)
                    }
                })
                .collect();

            ElevationGrid::new(width as usize, height as usize, samples)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_terrain_rgb_formula() {
        assert_eq!(terrain_rgb_height(0, 0, 0), MISSING_DATA_SIGNAL);
        // 0x0186A0 = 100000 -> 0 m
        assert_relative_eq!(terrain_rgb_height(1, 134, 160), 0.0, epsilon = 1e-9);
        assert_relative_eq!(terrain_rgb_height(255, 255, 255), 1_667_721.5, epsilon = 1e-6);
    }

    #[test]
    fn test_terrain_rgb_encode_inverts_formula() {
        for height in [-412.3, 0.0, 8848.8] {
            let [r, g, b] = terrain_rgb_encode(height);
            assert_relative_eq!(terrain_rgb_height(r, g, b), height, epsilon = 0.05);
        }
    }

    #[test]
    fn test_raw_grid() {
        let grid = ElevationGrid::from_fn(3, 2, |r, c| (r * 3 + c) as f64 * 1.5);
        let mut bytes = RawGridDecoder::encode(&grid);
        let decoded = RawGridDecoder::new(3, 2)
            .decode(TileKey::new(0, 0, 0), &bytes)
            .unwrap();
        assert_eq!(decoded, grid);

        bytes[..8].copy_from_slice(&f64::NAN.to_be_bytes());
        let decoded = RawGridDecoder::new(3, 2)
            .decode(TileKey::new(0, 0, 0), &bytes)
            .unwrap();
        assert_eq!(decoded.get(0, 0), MISSING_DATA_SIGNAL);
    }

    #[test]
    fn test_raw_grid_wrong_size() {
        let result = RawGridDecoder::new(4, 4).decode(TileKey::new(1, 0, 0), &[0u8; 16]);
        match result {
            Err(ElevationError::Decode { key, reason }) => {
                assert_eq!(key, TileKey::new(1, 0, 0));
                assert!(reason.contains("128"));
            }
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }
}
