use anyhow::{bail, Context, Result};
use geojson::{GeoJson, Geometry};
use indicatif::{ProgressBar, ProgressStyle};
use qtdem::geojson::add_elevations_to_geometry;
use qtdem::{ElevationService, LatLon};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{settle, ServiceArgs};

pub fn run(
    args: &ServiceArgs,
    input: PathBuf,
    output: Option<PathBuf>,
    lat_col: String,
    lon_col: String,
    resolution: f64,
) -> Result<()> {
    let service = args.build_service()?;

    // Detect file format
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let output_path = match output {
        Some(path) => path,
        None => default_output(&input, &extension)?,
    };

    match extension.as_str() {
        "csv" => {
            let file = File::open(&input).context("Failed to open input file")?;
            let output_file = File::create(&output_path).context("Failed to create output file")?;
            process_csv(
                &service,
                args.max_rounds,
                BufReader::new(file),
                BufWriter::new(output_file),
                &lat_col,
                &lon_col,
                resolution,
            )?
        }
        "geojson" | "json" => {
            let file = File::open(&input).context("Failed to open input file")?;
            let output_file = File::create(&output_path).context("Failed to create output file")?;
            process_geojson(
                &service,
                args.max_rounds,
                BufReader::new(file),
                BufWriter::new(output_file),
                resolution,
            )?
        }
        _ => bail!(
            "Unsupported file format: {}. Use .csv or .geojson",
            extension
        ),
    }

    println!("Output written to: {}", output_path.display());
    Ok(())
}

fn default_output(input: &Path, extension: &str) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .context("Input path has no file name")?
        .to_string_lossy();
    Ok(input.with_file_name(format!("{}_elevation.{}", stem, extension)))
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Load tiles for every point, one refinement round per tick.
fn warm(service: &ElevationService, max_rounds: usize, points: &[LatLon], resolution: f64) -> Result<()> {
    let pb = progress_bar(max_rounds as u64)?;
    pb.set_message("fetching tiles");
    settle(service, max_rounds, |s| {
        pb.inc(1);
        s.elevations(points, resolution)
    })?;
    pb.finish_and_clear();
    Ok(())
}

fn process_csv<R: std::io::Read, W: Write>(
    service: &ElevationService,
    max_rounds: usize,
    input: R,
    output: W,
    lat_col: &str,
    lon_col: &str,
    resolution: f64,
) -> Result<()> {
    let mut reader = csv::Reader::from_reader(input);

    // Find column indices
    let headers = reader.headers()?.clone();
    let lat_idx = headers
        .iter()
        .position(|h| h == lat_col)
        .with_context(|| format!("Column '{}' not found in CSV", lat_col))?;
    let lon_idx = headers
        .iter()
        .position(|h| h == lon_col)
        .with_context(|| format!("Column '{}' not found in CSV", lon_col))?;

    let records: Vec<_> = reader.records().collect::<Result<_, _>>()?;
    let points = records
        .iter()
        .map(|record| {
            let lat: f64 = record
                .get(lat_idx)
                .context("Missing latitude")?
                .trim()
                .parse()
                .context("Invalid latitude")?;
            let lon: f64 = record
                .get(lon_idx)
                .context("Missing longitude")?
                .trim()
                .parse()
                .context("Invalid longitude")?;
            Ok(LatLon::new(lat, lon))
        })
        .collect::<Result<Vec<_>>>()?;

    warm(service, max_rounds, &points, resolution)?;
    let answers = service
        .elevations(&points, resolution)
        .context("Failed to get elevations")?;

    let mut writer = csv::Writer::from_writer(output);
    let mut new_headers: Vec<&str> = headers.iter().collect();
    new_headers.push("elevation");
    writer.write_record(&new_headers)?;

    let pb = progress_bar(records.len() as u64)?;
    for (record, answer) in records.iter().zip(&answers.results) {
        let elevation = answer
            .elevation
            .map(|e| format!("{:.2}", e))
            .unwrap_or_default();

        let mut new_record: Vec<&str> = record.iter().collect();
        new_record.push(&elevation);
        writer.write_record(&new_record)?;

        pb.inc(1);
    }

    pb.finish_with_message("done");
    writer.flush()?;
    Ok(())
}

fn process_geojson<R: std::io::Read, W: Write>(
    service: &ElevationService,
    max_rounds: usize,
    input: R,
    mut output: W,
    resolution: f64,
) -> Result<()> {
    let geojson: GeoJson = serde_json::from_reader(input).context("Failed to parse GeoJSON")?;

    let mut geometries = Vec::new();
    collect_geometries(&geojson, &mut geometries);
    let mut points = Vec::new();
    for geometry in geometries {
        collect_points(&geometry.value, &mut points);
    }
    warm(service, max_rounds, &points, resolution)?;

    let enrich = |geometry: Geometry| {
        add_elevations_to_geometry(service, geometry, resolution)
            .context("Failed to add elevations")
    };

    let result = match geojson {
        GeoJson::Geometry(geometry) => GeoJson::Geometry(enrich(geometry)?),
        GeoJson::Feature(mut feature) => {
            if let Some(geometry) = feature.geometry.take() {
                feature.geometry = Some(enrich(geometry)?);
            }
            GeoJson::Feature(feature)
        }
        GeoJson::FeatureCollection(mut fc) => {
            let pb = progress_bar(fc.features.len() as u64)?;
            for feature in &mut fc.features {
                if let Some(geometry) = feature.geometry.take() {
                    feature.geometry = Some(enrich(geometry)?);
                }
                pb.inc(1);
            }
            pb.finish_with_message("done");
            GeoJson::FeatureCollection(fc)
        }
    };

    serde_json::to_writer_pretty(&mut output, &result)?;
    output.flush()?;
    Ok(())
}

fn collect_geometries<'a>(geojson: &'a GeoJson, out: &mut Vec<&'a Geometry>) {
    match geojson {
        GeoJson::Geometry(geometry) => out.push(geometry),
        GeoJson::Feature(feature) => out.extend(feature.geometry.as_ref()),
        GeoJson::FeatureCollection(fc) => {
            out.extend(fc.features.iter().filter_map(|f| f.geometry.as_ref()))
        }
    }
}

fn collect_points(value: &geojson::Value, out: &mut Vec<LatLon>) {
    use geojson::Value;

    let mut push = |pos: &Vec<f64>| {
        if let [lon, lat, ..] = pos[..] {
            out.push(LatLon::new(lat, lon));
        }
    };

    match value {
        Value::Point(pos) => push(pos),
        Value::MultiPoint(line) | Value::LineString(line) => line.iter().for_each(push),
        Value::MultiLineString(lines) | Value::Polygon(lines) => {
            lines.iter().flatten().for_each(push)
        }
        Value::MultiPolygon(polys) => polys.iter().flatten().flatten().for_each(push),
        Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                collect_points(&geometry.value, out);
            }
        }
    }
}
