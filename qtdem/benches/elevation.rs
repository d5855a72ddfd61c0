use criterion::{black_box, criterion_group, criterion_main, Criterion};

use qtdem::decode::RawGridDecoder;
use qtdem::fetch::TileSource;
use qtdem::tile::ElevationGrid;
use qtdem::{ElevationService, LatLon, LevelSet, Projection, Sector, TileKey};

const TILE_SIZE: usize = 65;
const NUM_LEVELS: u8 = 8;

/// Serves tiles with a smooth synthetic terrain.
struct Synthetic(LevelSet);

impl TileSource for Synthetic {
    fn fetch(&self, key: TileKey) -> qtdem::Result<Vec<u8>> {
        let b = self.0.bounds_for(key);
        let step = (TILE_SIZE - 1) as f64;
        let grid = ElevationGrid::from_fn(TILE_SIZE, TILE_SIZE, |row, col| {
            let y = b.max_y - b.delta_y() * row as f64 / step;
            let lon = b.min_lon + b.delta_lon() * col as f64 / step;
            1000.0 + 800.0 * (y * 7.0).sin() * (lon.to_radians() * 5.0).cos()
        });
        Ok(RawGridDecoder::encode(&grid))
    }
}

fn levels() -> LevelSet {
    LevelSet::new(Projection::Mercator, TILE_SIZE, TILE_SIZE, NUM_LEVELS)
}

/// A service with every tile touched by `warm` already loaded.
fn warm_service(warm: impl Fn(&ElevationService)) -> ElevationService {
    let service = ElevationService::builder()
        .levels(levels())
        .source(Synthetic(levels()))
        .decoder(RawGridDecoder::new(TILE_SIZE, TILE_SIZE))
        .cache_size(10_000)
        .build()
        .unwrap();
    warm(&service);
    service.run_pending_fetches();
    warm(&service);
    service
}

fn bench_single_point(c: &mut Criterion) {
    let service = warm_service(|s| {
        let _ = s.elevation_at(35.3606, 138.7274, 100.0);
    });

    c.bench_function("single_point_cached", |b| {
        b.iter(|| {
            black_box(
                service
                    .elevation_at(black_box(35.3606), black_box(138.7274), 100.0)
                    .unwrap(),
            );
        });
    });
}

fn bench_ancestor_fallback(c: &mut Criterion) {
    // Only the root is loaded; every query walks the whole lineage.
    let service = warm_service(|s| {
        let _ = s.elevation_at(0.0, 0.0, 1e9);
    });
    service.set_offline(true);

    c.bench_function("ancestor_fallback", |b| {
        b.iter(|| {
            black_box(
                service
                    .elevation_at(black_box(12.5), black_box(-40.25), 100.0)
                    .unwrap(),
            );
        });
    });
}

fn bench_batch_same_tile(c: &mut Criterion) {
    let points: Vec<LatLon> = (0..1000)
        .map(|i| {
            let frac = i as f64 / 1000.0;
            LatLon::new(35.0 + frac * 0.5, 138.0 + frac * 0.5)
        })
        .collect();
    let service = warm_service(|s| {
        let _ = s.elevations(&points, 100.0);
    });

    c.bench_function("batch_1000_points", |b| {
        b.iter(|| {
            black_box(service.elevations(black_box(&points), 100.0).unwrap());
        });
    });
}

fn bench_path(c: &mut Criterion) {
    let from = LatLon::new(46.0, 7.0);
    let to = LatLon::new(46.05, 7.05);
    let service = warm_service(|s| {
        let _ = s.min_max_along_path(from, to);
    });

    c.bench_function("min_max_along_path_7km", |b| {
        b.iter(|| {
            black_box(service.min_max_along_path(black_box(from), black_box(to)).unwrap());
        });
    });
}

fn bench_extremes(c: &mut Criterion) {
    let sector = Sector::new(40.0, 45.0, 5.0, 10.0);
    let service = warm_service(|s| {
        s.extremes(&sector);
    });

    c.bench_function("sector_extremes_cached", |b| {
        b.iter(|| black_box(service.extremes(black_box(&sector))));
    });
}

criterion_group!(
    benches,
    bench_single_point,
    bench_ancestor_fallback,
    bench_batch_same_tile,
    bench_path,
    bench_extremes
);
criterion_main!(benches);
