//! End-to-end properties of the assembled elevation model.

use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};

use approx::assert_relative_eq;
use proptest::prelude::*;

use qtdem::datum::FnDatum;
use qtdem::decode::RawGridDecoder;
use qtdem::fetch::TileSource;
use qtdem::query::{MAX_PLAUSIBLE_ELEVATION, MIN_PLAUSIBLE_ELEVATION};
use qtdem::tile::{ElevationGrid, Tile};
use qtdem::{
    DatumShift, ElevationError, ElevationService, ElevationServiceBuilder, LatLon, LevelSet,
    Projection, Sector, Stage, TileKey,
};

const TILE_SIZE: usize = 17;
const NUM_LEVELS: u8 = 4;

fn terrain(lat: f64, lon: f64) -> f64 {
    800.0 + 600.0 * (lat.to_radians() * 4.0).sin() * (lon.to_radians() * 3.0).cos()
}

fn levels() -> LevelSet {
    LevelSet::new(Projection::Mercator, TILE_SIZE, TILE_SIZE, NUM_LEVELS)
}

fn grid_for(levels: &LevelSet, key: TileKey) -> ElevationGrid {
    let b = levels.bounds_for(key);
    let projection = levels.projection();
    let step = (TILE_SIZE - 1) as f64;
    ElevationGrid::from_fn(TILE_SIZE, TILE_SIZE, |row, col| {
        let y = b.max_y - b.delta_y() * row as f64 / step;
        let lon = b.min_lon + b.delta_lon() * col as f64 / step;
        terrain(projection.fraction_to_lat(y), lon)
    })
}

/// Synthetic source that records how often each key was fetched.
struct MockSource {
    levels: LevelSet,
    fetches: Mutex<HashMap<TileKey, usize>>,
}

impl MockSource {
    fn new() -> Self {
        Self {
            levels: levels(),
            fetches: Mutex::new(HashMap::new()),
        }
    }

    fn fetches(&self) -> HashMap<TileKey, usize> {
        self.fetches.lock().unwrap().clone()
    }
}

impl TileSource for MockSource {
    fn fetch(&self, key: TileKey) -> qtdem::Result<Vec<u8>> {
        *self.fetches.lock().unwrap().entry(key).or_default() += 1;
        Ok(RawGridDecoder::encode(&grid_for(&self.levels, key)))
    }
}

fn builder(source: impl TileSource + 'static) -> ElevationServiceBuilder {
    ElevationService::builder()
        .levels(levels())
        .source(source)
        .decoder(RawGridDecoder::new(TILE_SIZE, TILE_SIZE))
        .extremes(1000, NUM_LEVELS - 1)
}

/// Query until the answer stops improving.
fn settled(service: &ElevationService, lat: f64, lon: f64, resolution_m: f64) -> qtdem::QueryResult {
    loop {
        let result = service.elevation_at(lat, lon, resolution_m).unwrap();
        if service.run_pending_fetches() == 0 {
            return result;
        }
    }
}

#[test]
fn concurrent_queries_fetch_each_tile_once() {
    let source = Arc::new(MockSource::new());
    let service = Arc::new(builder(source.clone()).build().unwrap());
    let barrier = Arc::new(Barrier::new(100));

    std::thread::scope(|scope| {
        for _ in 0..100 {
            let service = service.clone();
            let barrier = barrier.clone();
            scope.spawn(move || {
                barrier.wait();
                let result = service.elevation_at(27.9881, 86.925, 10.0).unwrap();
                assert!(result.is_missing());
            });
        }
    });

    service.run_pending_fetches();
    let fetches = source.fetches();
    assert_eq!(fetches.len(), NUM_LEVELS as usize);
    assert!(fetches.values().all(|&n| n == 1), "{fetches:?}");
}

#[test]
fn finite_queries_are_missing_or_plausible() {
    let service = builder(MockSource::new()).build().unwrap();
    settled(&service, 0.0, 0.0, 1e9);

    proptest!(|(lat in -90.0f64..=90.0, lon in -720.0f64..720.0, res in 1.0f64..1e6)| {
        let result = service.elevation_at(lat, lon, res).unwrap();
        if let Some(v) = result.elevation {
            prop_assert!((MIN_PLAUSIBLE_ELEVATION..=MAX_PLAUSIBLE_ELEVATION).contains(&v));
        }
    });
}

#[test]
fn non_finite_queries_fail_fast() {
    let source = Arc::new(MockSource::new());
    let service = builder(source.clone()).build().unwrap();

    for (lat, lon) in [(f64::NAN, 0.0), (0.0, f64::INFINITY), (f64::NEG_INFINITY, 1.0)] {
        assert!(matches!(
            service.elevation_at(lat, lon, 10.0),
            Err(ElevationError::InvalidInput { .. })
        ));
    }
    assert_eq!(service.pending_fetches(), 0);
    assert!(source.fetches().is_empty());
}

#[test]
fn repeated_queries_are_idempotent() {
    let service = builder(MockSource::new()).build().unwrap();
    settled(&service, 0.0, 0.0, 1e9);

    let a = service.elevation_at(-33.9, 18.4, 10.0).unwrap();
    let b = service.elevation_at(-33.9, 18.4, 10.0).unwrap();
    assert_eq!(a, b);
}

#[test]
fn tile_edges_agree_with_neighbours() {
    let levels = levels();
    let level = NUM_LEVELS - 1;
    let key = TileKey::new(level, 4, 3);
    let east = TileKey::new(level, 4, 4);
    let south = TileKey::new(level, 3, 3);

    let tile = |k| Tile::ready(k, levels.bounds_for(k), grid_for(&levels, k));
    let (here, east_tile, south_tile) = (tile(key), tile(east), tile(south));
    let b = levels.bounds_for(key);

    for i in 0..=10 {
        let t = i as f64 / 10.0;

        let y = b.min_y + b.delta_y() * t;
        let from_here = here.elevation_at(y, b.max_lon).unwrap();
        let from_east = east_tile.elevation_at(y, b.max_lon).unwrap();
        assert_relative_eq!(from_here, from_east, epsilon = 1e-6);

        let lon = b.min_lon + b.delta_lon() * t;
        let from_here = here.elevation_at(b.min_y, lon).unwrap();
        let from_south = south_tile.elevation_at(b.min_y, lon).unwrap();
        assert_relative_eq!(from_here, from_south, epsilon = 1e-6);
    }
}

#[test]
fn extremes_bound_samples_with_datum_widening() {
    let datum = FnDatum::new(|lat: f64, lon: f64| 20.0 * (lat + lon).to_radians().sin(), (-20.0, 20.0));
    let service = builder(MockSource::new())
        .stage(Stage::DatumShift(DatumShift::new(datum)))
        .build()
        .unwrap();
    let sector = Sector::new(5.0, 30.0, 10.0, 40.0);
    let finest = service.levels().level(NUM_LEVELS - 1).texel_size_m();

    service.extremes(&sector);
    service.sample_sector(&sector, finest).unwrap();
    while service.run_pending_fetches() > 0 {}

    let (min, max) = service.extremes(&sector);
    for (p, r) in service.sample_sector(&sector, finest).unwrap() {
        let v = r.elevation.unwrap();
        assert!(min <= v && v <= max, "{v} at {p:?} outside [{min}, {max}]");
    }
}

#[test]
fn coarse_extremes_cover_finer_point_queries() {
    let service = builder(MockSource::new()).extremes(1000, 1).build().unwrap();
    let sector = Sector::new(5.0, 30.0, 10.0, 40.0);
    let finest = service.levels().level(NUM_LEVELS - 1).texel_size_m();

    service.extremes(&sector);
    while service.run_pending_fetches() > 0 {}
    service.extremes(&sector);
    service.sample_sector(&sector, finest).unwrap();
    while service.run_pending_fetches() > 0 {}

    let (min, max) = service.extremes(&sector);
    for (p, r) in service.sample_sector(&sector, finest).unwrap() {
        assert_eq!(r.achieved_resolution, service.levels().level(NUM_LEVELS - 1).texel_size);
        let v = r.elevation.unwrap();
        assert!(min <= v && v <= max, "{v} at {p:?} outside [{min}, {max}]");
    }
}

#[test]
fn datum_shift_composes_with_plain_model() {
    let offset = |lat: f64, lon: f64| lat * 0.5 - lon * 0.1;
    let plain = builder(MockSource::new()).build().unwrap();
    let shifted = builder(MockSource::new())
        .stage(Stage::DatumShift(DatumShift::new(FnDatum::new(offset, (-63.0, 63.0)))))
        .stage(Stage::PassThrough)
        .build()
        .unwrap();

    for (lat, lon) in [(10.0, 20.0), (-45.0, 170.0), (60.0, -100.0)] {
        let a = settled(&plain, lat, lon, 1000.0);
        let b = settled(&shifted, lat, lon, 1000.0);
        assert_eq!(a.achieved_resolution, b.achieved_resolution);
        assert_relative_eq!(
            b.elevation.unwrap(),
            a.elevation.unwrap() + offset(lat, lon),
            epsilon = 1e-9
        );
    }
}

#[test]
fn degenerate_path_is_the_point_query() {
    let service = builder(MockSource::new()).build().unwrap();
    let p = LatLon::new(35.3606, 138.7274);
    let e = settled(&service, p.lat, p.lon, service.sample_distance())
        .elevation
        .unwrap();

    let bound = service.min_max_along_path(p, p).unwrap();
    assert_eq!((bound.min, bound.max), (e, e));
    assert_eq!(bound.samples, 1);
}

#[test]
fn path_bounds_every_profile_sample() {
    let service = builder(MockSource::new()).sample_distance(5_000.0).build().unwrap();
    let (from, to) = (LatLon::new(40.0, -3.0), LatLon::new(41.0, 2.0));

    service.elevation_profile(from, to).unwrap();
    while service.run_pending_fetches() > 0 {
        service.elevation_profile(from, to).unwrap();
    }

    let bound = service.min_max_along_path(from, to).unwrap();
    let profile = service.elevation_profile(from, to).unwrap();
    assert_eq!(profile.len(), bound.samples + bound.missing);
    for sample in profile {
        let v = sample.elevation.unwrap();
        assert!(bound.min <= v && v <= bound.max);
    }
}
