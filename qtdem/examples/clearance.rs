//! Path and turn-circle clearance over synthetic terrain.
//!
//! Run with: cargo run --example clearance

use qtdem::decode::RawGridDecoder;
use qtdem::fetch::TileSource;
use qtdem::path::MIN_LEVEL_OVER_GROUND;
use qtdem::tile::ElevationGrid;
use qtdem::{ElevationError, ElevationService, LatLon, LevelSet, Position, Projection, TileKey};

const TILE_SIZE: usize = 33;

struct Ridge(LevelSet);

impl TileSource for Ridge {
    fn fetch(&self, key: TileKey) -> qtdem::Result<Vec<u8>> {
        let b = self.0.bounds_for(key);
        let step = (TILE_SIZE - 1) as f64;
        let grid = ElevationGrid::from_fn(TILE_SIZE, TILE_SIZE, |_, col| {
            let lon = b.min_lon + b.delta_lon() * col as f64 / step;
            // A ridge along 8°E.
            400.0 + 1500.0 * (-((lon - 8.0) * 20.0).powi(2)).exp()
        });
        Ok(RawGridDecoder::encode(&grid))
    }
}

fn main() -> Result<(), ElevationError> {
    let levels = LevelSet::new(Projection::Mercator, TILE_SIZE, TILE_SIZE, 12);
    let service = ElevationService::builder()
        .levels(levels.clone())
        .source(Ridge(levels))
        .decoder(RawGridDecoder::new(TILE_SIZE, TILE_SIZE))
        .sample_distance(250.0)
        .build()?;

    let from = Position::new(46.0, 7.8, 1800.0);
    let to = Position::new(46.0, 8.2, 1800.0);

    // Two passes: the first requests tiles, the second uses them.
    service.track_clearance(from, to)?;
    while service.run_pending_fetches() > 0 {
        service.track_clearance(from, to)?;
    }

    let track = service.track_clearance(from, to)?;
    println!("Ground along track: {:.0}m to {:.0}m", track.ground.min, track.ground.max);
    println!("Lowest clearance:   {:.0}m", track.clearance.min);

    let center = LatLon::new(46.0, 8.0);
    let circle = service.min_max_around_point(center, 2000.0)?;
    println!(
        "Turn circle (2 km): {:.0}m to {:.0}m over {} samples",
        circle.min, circle.max, circle.samples
    );

    let lifted = service.position_over_ground(Position::new(46.0, 8.0, 0.0), MIN_LEVEL_OVER_GROUND)?;
    println!("Lifted position:    {:.1}m", lifted.altitude);

    Ok(())
}
