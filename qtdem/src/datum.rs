//! Vertical datum correction as composable stages.
//!
//! A [`DatumPipeline`] wraps any [`ElevationSource`], applies an ordered list
//! of [`Stage`]s to every value it returns, and serializes all calls into the
//! wrapped source through one mutex. It implements [`ElevationSource`]
//! itself, so pipelines can be stacked.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::addressing::{normalize_lon, LatLon, Sector};
use crate::error::{ElevationError, Result};
use crate::query::QueryResult;
use crate::source::ElevationSource;

/// A vertical offset surface, e.g. geoid undulation above the ellipsoid.
pub trait VerticalDatum: Send + Sync {
    /// Offset in meters to add at a point.
    fn offset(&self, lat: f64, lon: f64) -> f64;

    /// Smallest and largest offset anywhere.
    fn bounds(&self) -> (f64, f64);
}

/// The same offset everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantOffset(pub f64);

impl VerticalDatum for ConstantOffset {
    fn offset(&self, _lat: f64, _lon: f64) -> f64 {
        self.0
    }

    fn bounds(&self) -> (f64, f64) {
        (self.0, self.0)
    }
}

/// An offset computed by a closure, with caller-declared bounds.
pub struct FnDatum<F> {
    f: F,
    bounds: (f64, f64),
}

impl<F: Fn(f64, f64) -> f64 + Send + Sync> FnDatum<F> {
    pub fn new(f: F, bounds: (f64, f64)) -> Self {
        Self { f, bounds }
    }
}

impl<F: Fn(f64, f64) -> f64 + Send + Sync> VerticalDatum for FnDatum<F> {
    fn offset(&self, lat: f64, lon: f64) -> f64 {
        (self.f)(lat, lon)
    }

    fn bounds(&self) -> (f64, f64) {
        self.bounds
    }
}

/// Global geoid undulations on a regular lat/lon grid.
///
/// Row 0 is the northernmost row; longitudes wrap around the globe.
#[derive(Debug, Clone)]
pub struct GeoidGrid {
    north_lat: f64,
    west_lon: f64,
    spacing: f64,
    rows: usize,
    cols: usize,
    values: Vec<f64>,
    bounds: (f64, f64),
}

impl GeoidGrid {
    /// Wrap a row-major grid of undulations in meters.
    ///
    /// # Errors
    ///
    /// Returns [`ElevationError::InvalidTileSize`] if `values.len()` is not
    /// `rows * cols`, and [`ElevationError::Config`] for a non-positive
    /// spacing.
    pub fn new(
        north_lat: f64,
        west_lon: f64,
        spacing_deg: f64,
        rows: usize,
        cols: usize,
        values: Vec<f64>,
    ) -> Result<Self> {
        if values.len() != rows * cols || values.is_empty() {
            return Err(ElevationError::InvalidTileSize {
                expected: rows * cols,
                actual: values.len(),
            });
        }
        if !(spacing_deg > 0.0) {
            return Err(ElevationError::Config(format!(
                "geoid grid spacing must be positive, got {}",
                spacing_deg
            )));
        }

        let bounds = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Ok(Self {
            north_lat,
            west_lon,
            spacing: spacing_deg,
            rows,
            cols,
            values,
            bounds,
        })
    }

    /// Parse an EGM96 15-minute `WW15MGH.DAC` file: 721 × 1440 big-endian
    /// `i16` centimeters, starting at 90°N 0°E.
    pub fn from_egm96_dac(bytes: &[u8]) -> Result<Self> {
        const ROWS: usize = 721;
        const COLS: usize = 1440;
        if bytes.len() != ROWS * COLS * 2 {
            return Err(ElevationError::InvalidTileSize {
                expected: ROWS * COLS * 2,
                actual: bytes.len(),
            });
        }
        let values = bytes
            .chunks_exact(2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]) as f64 / 100.0)
            .collect();
        Self::new(90.0, 0.0, 0.25, ROWS, COLS, values)
    }

    fn sample(&self, row: usize, col: usize) -> f64 {
        self.values[row.min(self.rows - 1) * self.cols + col % self.cols]
    }
}

impl VerticalDatum for GeoidGrid {
    fn offset(&self, lat: f64, lon: f64) -> f64 {
        let y = ((self.north_lat - lat) / self.spacing).clamp(0.0, (self.rows - 1) as f64);
        let x = (normalize_lon(lon) - self.west_lon).rem_euclid(360.0) / self.spacing;

        let r0 = y.floor() as usize;
        let c0 = x.floor() as usize;
        let fy = y - r0 as f64;
        let fx = x - c0 as f64;

        let north = self.sample(r0, c0) * (1.0 - fx) + self.sample(r0, c0 + 1) * fx;
        let south = self.sample(r0 + 1, c0) * (1.0 - fx) + self.sample(r0 + 1, c0 + 1) * fx;
        north * (1.0 - fy) + south * fy
    }

    fn bounds(&self) -> (f64, f64) {
        self.bounds
    }
}

/// A datum offset plus the envelope used to widen extremes.
#[derive(Clone)]
pub struct DatumShift {
    datum: Arc<dyn VerticalDatum>,
    min_shift: f64,
    max_shift: f64,
}

impl DatumShift {
    /// Shift by `datum`, using its own bounds as the envelope.
    pub fn new(datum: impl VerticalDatum + 'static) -> Self {
        let (min_shift, max_shift) = datum.bounds();
        Self {
            datum: Arc::new(datum),
            min_shift,
            max_shift,
        }
    }

    /// Override the conservative envelope.
    pub fn with_envelope(mut self, min_shift: f64, max_shift: f64) -> Self {
        self.min_shift = min_shift.min(max_shift);
        self.max_shift = min_shift.max(max_shift);
        self
    }

    /// Shifted value. Without a position the value passes through unchanged.
    pub fn shift(&self, value: f64, at: Option<LatLon>) -> f64 {
        match at {
            Some(p) => value + self.datum.offset(p.lat, p.lon),
            None => value,
        }
    }

    pub fn envelope(&self) -> (f64, f64) {
        (self.min_shift, self.max_shift)
    }
}

impl std::fmt::Debug for DatumShift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatumShift")
            .field("min_shift", &self.min_shift)
            .field("max_shift", &self.max_shift)
            .finish_non_exhaustive()
    }
}

/// One step of a [`DatumPipeline`].
#[derive(Debug, Clone)]
pub enum Stage {
    DatumShift(DatumShift),
    PassThrough,
}

impl Stage {
    pub fn apply(&self, value: f64, at: Option<LatLon>) -> f64 {
        match self {
            Stage::DatumShift(shift) => shift.shift(value, at),
            Stage::PassThrough => value,
        }
    }

    pub fn envelope(&self) -> (f64, f64) {
        match self {
            Stage::DatumShift(shift) => shift.envelope(),
            Stage::PassThrough => (0.0, 0.0),
        }
    }
}

/// When a returned value counts as real data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnavailablePolicy {
    /// Only the missing-data signal means unavailable.
    #[default]
    SentinelOnly,
    /// Values near zero, or below -1000 m, are also unavailable. Some
    /// datasets fill unknown cells (or the ocean) with zero.
    ZeroAsUnavailable,
}

impl UnavailablePolicy {
    pub fn is_available(&self, value: Option<f64>) -> bool {
        match (self, value) {
            (_, None) => false,
            (UnavailablePolicy::SentinelOnly, Some(_)) => true,
            (UnavailablePolicy::ZeroAsUnavailable, Some(v)) => v.abs() > 0.001 && v > -1000.0,
        }
    }
}

type MemoKey = (u64, u64, u64);

struct Guarded<S> {
    source: S,
    memo: Option<(MemoKey, QueryResult)>,
}

/// Serialized, datum-corrected view of an [`ElevationSource`].
pub struct DatumPipeline<S> {
    guarded: Mutex<Guarded<S>>,
    stages: Vec<Stage>,
    policy: UnavailablePolicy,
}

impl<S: ElevationSource> DatumPipeline<S> {
    /// A pipeline with no stages.
    pub fn new(source: S) -> Self {
        Self {
            guarded: Mutex::new(Guarded { source, memo: None }),
            stages: Vec::new(),
            policy: UnavailablePolicy::default(),
        }
    }

    /// Append a stage; stages run in insertion order.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a datum shift stage.
    pub fn datum_shift(self, shift: DatumShift) -> Self {
        self.stage(Stage::DatumShift(shift))
    }

    pub fn unavailable_policy(mut self, policy: UnavailablePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Summed envelope of all stages.
    pub fn envelope(&self) -> (f64, f64) {
        self.stages.iter().fold((0.0, 0.0), |(lo, hi), s| {
            let (a, b) = s.envelope();
            (lo + a, hi + b)
        })
    }

    /// Run `value` through every stage.
    pub fn shift(&self, value: f64, at: Option<LatLon>) -> f64 {
        self.stages.iter().fold(value, |v, s| s.apply(v, at))
    }

    /// Run `f` with exclusive access to the wrapped source.
    pub fn with_source<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock().source)
    }

    /// Whether usable data exists at a point under the configured policy.
    pub fn contains(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<bool> {
        let result = self.elevation_at(lat, lon, resolution_m)?;
        Ok(self.policy.is_available(result.elevation))
    }

    pub fn into_inner(self) -> S {
        self.guarded
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .source
    }

    fn lock(&self) -> MutexGuard<'_, Guarded<S>> {
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: ElevationSource> ElevationSource for DatumPipeline<S> {
    fn elevation_at(&self, lat: f64, lon: f64, resolution_m: f64) -> Result<QueryResult> {
        let key = (lat.to_bits(), lon.to_bits(), resolution_m.to_bits());
        let raw = {
            let mut guarded = self.lock();
            match guarded.memo {
                Some((k, result)) if k == key => result,
                _ => {
                    let result = guarded.source.elevation_at(lat, lon, resolution_m)?;
                    // Partial answers must not mask later refinement.
                    if result.is_fully_resolved() {
                        guarded.memo = Some((key, result));
                    }
                    result
                }
            }
        };

        let at = Some(LatLon::new(lat, lon));
        Ok(QueryResult {
            elevation: raw.elevation.map(|v| self.shift(v, at)),
            ..raw
        })
    }

    fn extremes(&self, sector: &Sector) -> (f64, f64) {
        let (min, max) = self.lock().source.extremes(sector);
        let (lo, hi) = self.envelope();
        (min + lo, max + hi)
    }

    fn model_extremes(&self) -> (f64, f64) {
        let (min, max) = self.lock().source.model_extremes();
        let (lo, hi) = self.envelope();
        (self.shift(min, None) + lo, self.shift(max, None) + hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::TileKey;
    use crate::source::TileElevationModel;
    use crate::testing::Harness;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        value: Option<f64>,
        resolved: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(value: Option<f64>, resolved: bool) -> Self {
            Self {
                value,
                resolved,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ElevationSource for Fixed {
        fn elevation_at(&self, _lat: f64, _lon: f64, resolution_m: f64) -> Result<QueryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let target = resolution_m / crate::EARTH_RADIUS_M;
            Ok(QueryResult {
                elevation: self.value,
                achieved_resolution: if self.resolved { target } else { target * 4.0 },
                target_resolution: target,
            })
        }

        fn extremes(&self, _sector: &Sector) -> (f64, f64) {
            (100.0, 200.0)
        }

        fn model_extremes(&self) -> (f64, f64) {
            (-10.0, 300.0)
        }
    }

    fn tilted() -> DatumShift {
        DatumShift::new(FnDatum::new(|lat, _| lat / 10.0, (-9.0, 9.0)))
    }

    #[test]
    fn test_composition_law() {
        let h = Harness::new(4);
        h.install(TileKey::new(0, 0, 0));
        let cache = h.engine.cache().clone();
        let plain = TileElevationModel::from_cache(cache.clone());
        let shifted = DatumPipeline::new(TileElevationModel::from_cache(cache)).datum_shift(tilted());

        for (lat, lon) in [(10.0, 20.0), (-45.5, 170.0), (60.0, -3.0)] {
            let a = plain.elevation_at(lat, lon, 1000.0).unwrap();
            let b = shifted.elevation_at(lat, lon, 1000.0).unwrap();
            assert_relative_eq!(b.elevation.unwrap(), a.elevation.unwrap() + lat / 10.0);
            assert_eq!(a.achieved_resolution, b.achieved_resolution);
        }
    }

    #[test]
    fn test_missing_stays_missing() {
        let pipeline = DatumPipeline::new(Fixed::new(None, false)).datum_shift(tilted());
        assert!(pipeline.elevation_at(1.0, 1.0, 10.0).unwrap().is_missing());
    }

    #[test]
    fn test_stages_compose_in_order() {
        let pipeline = DatumPipeline::new(Fixed::new(Some(50.0), true))
            .datum_shift(DatumShift::new(ConstantOffset(10.0)))
            .stage(Stage::PassThrough)
            .datum_shift(DatumShift::new(ConstantOffset(-3.0)));
        let result = pipeline.elevation_at(0.0, 0.0, 10.0).unwrap();
        assert_eq!(result.elevation, Some(57.0));
        assert_eq!(pipeline.envelope(), (7.0, 7.0));
    }

    #[test]
    fn test_nested_pipelines() {
        let inner = DatumPipeline::new(Fixed::new(Some(50.0), true))
            .datum_shift(DatumShift::new(ConstantOffset(10.0)));
        let outer = DatumPipeline::new(inner).datum_shift(DatumShift::new(ConstantOffset(1.0)));
        assert_eq!(outer.elevation_at(0.0, 0.0, 10.0).unwrap().elevation, Some(61.0));
        assert_eq!(outer.extremes(&Sector::full()), (111.0, 211.0));
    }

    #[test]
    fn test_extremes_widened_by_envelope() {
        let pipeline = DatumPipeline::new(Fixed::new(Some(0.0), true))
            .datum_shift(tilted().with_envelope(-20.0, 30.0));
        assert_eq!(pipeline.extremes(&Sector::full()), (80.0, 230.0));
    }

    #[test]
    fn test_model_extremes_pass_through_then_widen() {
        let pipeline = DatumPipeline::new(Fixed::new(Some(0.0), true)).datum_shift(tilted());
        assert_eq!(pipeline.model_extremes(), (-19.0, 309.0));
    }

    #[test]
    fn test_memo_is_value_keyed_and_skips_partial() {
        let pipeline = DatumPipeline::new(Fixed::new(Some(5.0), true));
        pipeline.elevation_at(1.0, 2.0, 10.0).unwrap();
        pipeline.elevation_at(1.0, 2.0, 10.0).unwrap();
        pipeline.elevation_at(1.0, 2.5, 10.0).unwrap();
        assert_eq!(pipeline.with_source(|s| s.calls.load(Ordering::SeqCst)), 2);

        let partial = DatumPipeline::new(Fixed::new(Some(5.0), false));
        partial.elevation_at(1.0, 2.0, 10.0).unwrap();
        partial.elevation_at(1.0, 2.0, 10.0).unwrap();
        assert_eq!(partial.into_inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unavailable_policy() {
        assert!(UnavailablePolicy::SentinelOnly.is_available(Some(0.0)));
        assert!(!UnavailablePolicy::SentinelOnly.is_available(None));
        assert!(!UnavailablePolicy::ZeroAsUnavailable.is_available(Some(0.0)));
        assert!(!UnavailablePolicy::ZeroAsUnavailable.is_available(Some(-1500.0)));
        assert!(UnavailablePolicy::ZeroAsUnavailable.is_available(Some(-1.0)));

        let zeros = DatumPipeline::new(Fixed::new(Some(0.0), true))
            .unavailable_policy(UnavailablePolicy::ZeroAsUnavailable);
        assert!(!zeros.contains(0.0, 0.0, 10.0).unwrap());
    }

    #[test]
    fn test_geoid_grid_interpolates_and_wraps() {
        // 3 rows (90, 0, -90) × 4 cols (0, 90, 180, 270).
        let values = vec![
            10.0, 10.0, 10.0, 10.0, //
            0.0, 20.0, 40.0, 60.0, //
            -10.0, -10.0, -10.0, -10.0,
        ];
        let grid = GeoidGrid::new(90.0, 0.0, 90.0, 3, 4, values).unwrap();
        assert_relative_eq!(grid.offset(0.0, 45.0), 10.0);
        assert_relative_eq!(grid.offset(0.0, -45.0), 30.0);
        assert_relative_eq!(grid.offset(45.0, 90.0), 15.0);
        assert_eq!(grid.bounds(), (-10.0, 60.0));
    }

    #[test]
    fn test_egm96_size_check() {
        assert!(GeoidGrid::from_egm96_dac(&[0u8; 10]).is_err());
        let grid = GeoidGrid::from_egm96_dac(&vec![0u8; 721 * 1440 * 2]).unwrap();
        assert_eq!(grid.offset(12.0, 34.0), 0.0);
    }
}
