//! Basic example: progressive refinement of a point query.
//!
//! Run with: cargo run --example basic
//!
//! Tiles come from an in-memory synthetic terrain, so no network access is
//! needed. Each round answers with what is loaded, then lets the queued
//! fetches run.

use qtdem::decode::RawGridDecoder;
use qtdem::fetch::TileSource;
use qtdem::tile::ElevationGrid;
use qtdem::{ElevationError, ElevationService, LevelSet, Projection, TileKey};

const TILE_SIZE: usize = 33;

struct Hills(LevelSet);

impl TileSource for Hills {
    fn fetch(&self, key: TileKey) -> qtdem::Result<Vec<u8>> {
        let b = self.0.bounds_for(key);
        let step = (TILE_SIZE - 1) as f64;
        let grid = ElevationGrid::from_fn(TILE_SIZE, TILE_SIZE, |row, col| {
            let y = b.max_y - b.delta_y() * row as f64 / step;
            let lon = b.min_lon + b.delta_lon() * col as f64 / step;
            1500.0 + 1200.0 * (y * 40.0).sin() * (lon.to_radians() * 30.0).cos()
        });
        Ok(RawGridDecoder::encode(&grid))
    }
}

fn main() -> Result<(), ElevationError> {
    let levels = LevelSet::new(Projection::Mercator, TILE_SIZE, TILE_SIZE, 12);
    let service = ElevationService::builder()
        .levels(levels.clone())
        .source(Hills(levels))
        .decoder(RawGridDecoder::new(TILE_SIZE, TILE_SIZE))
        .build()?;

    let (lat, lon, resolution) = (46.5577, 7.9857, 100.0);
    println!("Refining elevation at ({}, {}) towards {}m:", lat, lon, resolution);
    println!("{:-<60}", "");

    for round in 1..=4 {
        let result = service.elevation_at(lat, lon, resolution)?;
        match result.elevation {
            Some(h) => println!(
                "round {}: {:8.2}m at {:9.1}m resolution ({:?})",
                round,
                h,
                result.achieved_resolution_m(),
                result.status()
            ),
            None => println!("round {}: no data yet", round),
        }
        if result.is_fully_resolved() {
            break;
        }
        service.run_pending_fetches();
    }

    let stats = service.cache_stats();
    println!("\nCache statistics:");
    println!("  Ready tiles: {}", stats.ready_count);
    println!("  Fetches: {}", stats.fetch_count);
    println!("  Hit rate: {:.1}%", stats.hit_rate() * 100.0);

    Ok(())
}
