//! Great-circle and circle sampling for clearance checks.
//!
//! Everything here is built on [`ElevationSource::elevation_at`]. Missing
//! samples are counted but never folded into a bound.

use std::f64::consts::PI;

use crate::addressing::{normalize_lon, LatLon, EARTH_RADIUS_M};
use crate::error::{ElevationError, Result};
use crate::query::validate_point;
use crate::source::ElevationSource;

/// Default spacing between samples in meters.
pub const DEFAULT_SAMPLE_DISTANCE: f64 = 10.0;

/// Hard cap on samples along one path or circle.
pub const MAX_SAMPLES: usize = 100_000;

/// Default minimum height above ground for
/// [`PathSampler::position_over_ground`].
pub const MIN_LEVEL_OVER_GROUND: f64 = 2.0;

/// Great-circle distance in meters.
pub fn distance(a: LatLon, b: LatLon) -> f64 {
    central_angle(a, b) * EARTH_RADIUS_M
}

/// Angle subtended at the earth's centre (radians), haversine form.
fn central_angle(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lat2) = (a.lat_radians(), b.lat_radians());
    let dlat = lat2 - lat1;
    let dlon = b.lon_radians() - a.lon_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` towards `b`, radians clockwise from north.
pub fn azimuth(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lat2) = (a.lat_radians(), b.lat_radians());
    let dlon = b.lon_radians() - a.lon_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x).rem_euclid(2.0 * PI)
}

/// Point reached from `start` travelling `distance_m` along `azimuth`.
pub fn destination(start: LatLon, azimuth: f64, distance_m: f64) -> LatLon {
    let delta = distance_m / EARTH_RADIUS_M;
    let lat1 = start.lat_radians();
    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * azimuth.cos()).asin();
    let lon2 = start.lon_radians()
        + (azimuth.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());
    LatLon::new(lat2.to_degrees(), normalize_lon(lon2.to_degrees()))
}

/// Point a fraction `t` of the way from `a` to `b` along the great circle.
pub fn interpolate(a: LatLon, b: LatLon, t: f64) -> LatLon {
    let delta = central_angle(a, b);
    if delta < 1e-12 {
        return a;
    }
    let wa = ((1.0 - t) * delta).sin() / delta.sin();
    let wb = (t * delta).sin() / delta.sin();

    let (lat1, lon1) = (a.lat_radians(), a.lon_radians());
    let (lat2, lon2) = (b.lat_radians(), b.lon_radians());
    let x = wa * lat1.cos() * lon1.cos() + wb * lat2.cos() * lon2.cos();
    let y = wa * lat1.cos() * lon1.sin() + wb * lat2.cos() * lon2.sin();
    let z = wa * lat1.sin() + wb * lat2.sin();

    LatLon::new(
        z.atan2((x * x + y * y).sqrt()).to_degrees(),
        y.atan2(x).to_degrees(),
    )
}

/// Running `(min, max)` over elevation samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
    /// Samples folded into the bound.
    pub samples: usize,
    /// Samples skipped as missing.
    pub missing: usize,
}

impl MinMax {
    pub fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: 0,
            missing: 0,
        }
    }

    /// Fold one sample; `None` only bumps the missing count.
    pub fn update(&mut self, value: Option<f64>) {
        match value {
            Some(v) => {
                self.min = self.min.min(v);
                self.max = self.max.max(v);
                self.samples += 1;
            }
            None => self.missing += 1,
        }
    }

    /// Merge another bound into this one.
    pub fn enlarge(&mut self, other: &MinMax) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.samples += other.samples;
        self.missing += other.missing;
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// `max - min`, or 0 when empty.
    pub fn size(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max - self.min
        }
    }

    /// `(min, max)` if any sample was folded.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        (!self.is_empty()).then_some((self.min, self.max))
    }
}

impl Default for MinMax {
    fn default() -> Self {
        Self::empty()
    }
}

/// A position with altitude in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, altitude: f64) -> Self {
        Self { lat, lon, altitude }
    }

    pub fn lat_lon(&self) -> LatLon {
        LatLon::new(self.lat, self.lon)
    }
}

/// Ground and clearance bounds along a flown track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackClearance {
    /// Height of the track above the ground.
    pub clearance: MinMax,
    /// Ground elevation under the track.
    pub ground: MinMax,
}

/// One sample of an elevation profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSample {
    pub position: LatLon,
    /// Distance from the start of the path in meters.
    pub distance: f64,
    pub elevation: Option<f64>,
}

/// Samples elevation along great circles and around points.
#[derive(Debug, Clone, Copy)]
pub struct PathSampler {
    sample_distance: f64,
    resolution: f64,
}

impl Default for PathSampler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_DISTANCE)
    }
}

impl PathSampler {
    /// Sample every `sample_distance` meters, querying at that resolution.
    pub fn new(sample_distance: f64) -> Self {
        Self {
            sample_distance,
            resolution: sample_distance,
        }
    }

    /// Query resolution in meters (defaults to the sample distance).
    pub fn resolution(mut self, resolution_m: f64) -> Self {
        self.resolution = resolution_m;
        self
    }

    pub fn sample_distance(&self) -> f64 {
        self.sample_distance
    }

    fn check(&self) -> Result<()> {
        if !self.sample_distance.is_finite() || self.sample_distance <= 0.0 {
            return Err(ElevationError::InvalidResolution(self.sample_distance));
        }
        Ok(())
    }

    /// Sample positions from `a` to `b`, both ends included.
    pub fn path_points(&self, a: LatLon, b: LatLon) -> Result<Vec<LatLon>> {
        validate_point(a.lat, a.lon)?;
        validate_point(b.lat, b.lon)?;
        self.check()?;
        if a == b {
            return Ok(vec![a]);
        }

        let steps = ((distance(a, b) / self.sample_distance).ceil() as usize).clamp(1, MAX_SAMPLES);
        Ok((0..=steps)
            .map(|i| match i {
                0 => a,
                i if i == steps => b,
                i => interpolate(a, b, i as f64 / steps as f64),
            })
            .collect())
    }

    /// Sample positions on a circle of `radius_m` around `center`.
    pub fn circle_points(&self, center: LatLon, radius_m: f64) -> Result<Vec<LatLon>> {
        validate_point(center.lat, center.lon)?;
        self.check()?;
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(ElevationError::InvalidResolution(radius_m));
        }

        let circumference = 2.0 * PI * radius_m;
        let steps = ((circumference / self.sample_distance).ceil() as usize).clamp(4, MAX_SAMPLES);
        Ok((0..steps)
            .map(|i| destination(center, 2.0 * PI * i as f64 / steps as f64, radius_m))
            .collect())
    }

    /// `(min, max)` ground elevation along the great circle from `a` to `b`.
    ///
    /// When `a == b` this is a single sample.
    pub fn min_max_along_path<S: ElevationSource + ?Sized>(
        &self,
        source: &S,
        a: LatLon,
        b: LatLon,
    ) -> Result<MinMax> {
        self.fold(source, &self.path_points(a, b)?)
    }

    /// `(min, max)` ground elevation on a circle around `center`.
    pub fn min_max_around_point<S: ElevationSource + ?Sized>(
        &self,
        source: &S,
        center: LatLon,
        radius_m: f64,
    ) -> Result<MinMax> {
        self.fold(source, &self.circle_points(center, radius_m)?)
    }

    /// Every sample along the path, with its distance from `a`.
    pub fn elevation_profile<S: ElevationSource + ?Sized>(
        &self,
        source: &S,
        a: LatLon,
        b: LatLon,
    ) -> Result<Vec<ProfileSample>> {
        self.path_points(a, b)?
            .into_iter()
            .map(|p| {
                Ok(ProfileSample {
                    position: p,
                    distance: distance(a, p),
                    elevation: source.elevation_at(p.lat, p.lon, self.resolution)?.elevation,
                })
            })
            .collect()
    }

    /// Clearance of a straight track between two positions.
    ///
    /// Altitude is interpolated linearly along the track.
    pub fn track_clearance<S: ElevationSource + ?Sized>(
        &self,
        source: &S,
        from: Position,
        to: Position,
    ) -> Result<TrackClearance> {
        let points = self.path_points(from.lat_lon(), to.lat_lon())?;
        let last = (points.len() - 1).max(1) as f64;

        let mut ground = MinMax::empty();
        let mut clearance = MinMax::empty();
        for (i, p) in points.iter().enumerate() {
            let altitude = from.altitude + (to.altitude - from.altitude) * i as f64 / last;
            let elevation = source.elevation_at(p.lat, p.lon, self.resolution)?.elevation;
            ground.update(elevation);
            clearance.update(elevation.map(|e| altitude - e));
        }

        Ok(TrackClearance { clearance, ground })
    }

    /// Lift `position` so it is at least `min_clearance` above the ground.
    ///
    /// Uses the highest ground at the point and on a circle one sample
    /// distance around it.
    /// Positions over missing data are returned unchanged.
    pub fn position_over_ground<S: ElevationSource + ?Sized>(
        &self,
        source: &S,
        position: Position,
        min_clearance: f64,
    ) -> Result<Position> {
        let center = position.lat_lon();
        let around = self.min_max_around_point(source, center, self.sample_distance)?;
        let mut ground = MinMax::empty();
        ground.update(source.elevation_at(center.lat, center.lon, self.resolution)?.elevation);
        ground.enlarge(&around);

        Ok(match ground.bounds() {
            Some((_, max)) if position.altitude < max + min_clearance => {
                Position::new(position.lat, position.lon, max + min_clearance)
            }
            _ => position,
        })
    }

    fn fold<S: ElevationSource + ?Sized>(&self, source: &S, points: &[LatLon]) -> Result<MinMax> {
        let mut bound = MinMax::empty();
        for p in points {
            bound.update(source.elevation_at(p.lat, p.lon, self.resolution)?.elevation);
        }
        Ok(bound)
    }
}
