//! GeoJSON elevation enrichment.
//!
//! This module adds elevations to GeoJSON geometries using any
//! [`ElevationSource`]. Enable the `geojson` feature to use this module.
//!
//! # Example
//!
//! ```ignore
//! use qtdem::geojson::add_elevations_to_geometry;
//! use geojson::Geometry;
//!
//! let geometry: Geometry = r#"{"type": "Point", "coordinates": [7.9, 46.5]}"#
//!     .parse()
//!     .unwrap();
//!
//! let enriched = add_elevations_to_geometry(&service, geometry, 30.0)?;
//! // {"type": "Point", "coordinates": [7.9, 46.5, 3466.2]}
//! ```

use geojson::{Geometry, Value as GeoJsonValue};

use crate::error::{ElevationError, Result};
use crate::source::ElevationSource;

/// Add elevations to all coordinates in a GeoJSON geometry.
///
/// Coordinates are in GeoJSON order, `[longitude, latitude, ...]`. Every
/// coordinate with data becomes `[lon, lat, elevation]`; coordinates without
/// data are returned as `[lon, lat]`. Elevations are the best currently
/// available for `resolution_m`.
///
/// # Errors
///
/// Returns an error if a coordinate has fewer than 2 elements or is not
/// finite.
pub fn add_elevations_to_geometry<S: ElevationSource + ?Sized>(
    source: &S,
    geometry: Geometry,
    resolution_m: f64,
) -> Result<Geometry> {
    let new_value = match geometry.value {
        GeoJsonValue::Point(coord) => {
            GeoJsonValue::Point(add_elevation_to_coord(source, &coord, resolution_m)?)
        }
        GeoJsonValue::MultiPoint(coords) => {
            GeoJsonValue::MultiPoint(add_elevation_to_coords(source, &coords, resolution_m)?)
        }
        GeoJsonValue::LineString(coords) => {
            GeoJsonValue::LineString(add_elevation_to_coords(source, &coords, resolution_m)?)
        }
        GeoJsonValue::MultiLineString(lines) => {
            let elevated: Result<Vec<_>> = lines
                .iter()
                .map(|line| add_elevation_to_coords(source, line, resolution_m))
                .collect();
            GeoJsonValue::MultiLineString(elevated?)
        }
        GeoJsonValue::Polygon(rings) => {
            let elevated: Result<Vec<_>> = rings
                .iter()
                .map(|ring| add_elevation_to_coords(source, ring, resolution_m))
                .collect();
            GeoJsonValue::Polygon(elevated?)
        }
        GeoJsonValue::MultiPolygon(polygons) => {
            let elevated: Result<Vec<_>> = polygons
                .iter()
                .map(|polygon| {
                    polygon
                        .iter()
                        .map(|ring| add_elevation_to_coords(source, ring, resolution_m))
                        .collect::<Result<Vec<_>>>()
                })
                .collect();
            GeoJsonValue::MultiPolygon(elevated?)
        }
        GeoJsonValue::GeometryCollection(geometries) => {
            let elevated: Result<Vec<_>> = geometries
                .into_iter()
                .map(|g| add_elevations_to_geometry(source, g, resolution_m))
                .collect();
            GeoJsonValue::GeometryCollection(elevated?)
        }
    };

    Ok(Geometry::new(new_value))
}

/// Add elevation to a single `[lon, lat, ...]` coordinate.
pub fn add_elevation_to_coord<S: ElevationSource + ?Sized>(
    source: &S,
    coord: &[f64],
    resolution_m: f64,
) -> Result<Vec<f64>> {
    let &[lon, lat, ..] = coord else {
        return Err(ElevationError::InvalidInput {
            lat: f64::NAN,
            lon: coord.first().copied().unwrap_or(f64::NAN),
            reason: "coordinate must have at least 2 elements (lon, lat)",
        });
    };

    Ok(match source.elevation_at(lat, lon, resolution_m)?.elevation {
        Some(elevation) => vec![lon, lat, elevation],
        None => vec![lon, lat],
    })
}

/// Add elevations to a list of `[lon, lat, ...]` coordinates.
pub fn add_elevation_to_coords<S: ElevationSource + ?Sized>(
    source: &S,
    coords: &[Vec<f64>],
    resolution_m: f64,
) -> Result<Vec<Vec<f64>>> {
    coords
        .iter()
        .map(|coord| add_elevation_to_coord(source, coord, resolution_m))
        .collect()
}
