use anyhow::Result;
use qtdem::path::ProfileSample;
use qtdem::{LatLon, MinMax};
use serde::Serialize;
use std::io::Write;

use super::{settle, ServiceArgs};

#[derive(Serialize)]
struct MinMaxResponse {
    min: Option<f64>,
    max: Option<f64>,
    samples: usize,
    missing: usize,
}

impl From<&MinMax> for MinMaxResponse {
    fn from(bound: &MinMax) -> Self {
        let bounds = bound.bounds();
        Self {
            min: bounds.map(|(min, _)| min),
            max: bounds.map(|(_, max)| max),
            samples: bound.samples,
            missing: bound.missing,
        }
    }
}

pub fn run(
    args: &ServiceArgs,
    (from_lat, from_lon): (f64, f64),
    (to_lat, to_lon): (f64, f64),
    profile: bool,
    json: bool,
) -> Result<()> {
    let service = args.build_service()?;
    let from = LatLon::new(from_lat, from_lon);
    let to = LatLon::new(to_lat, to_lon);

    if profile {
        let samples = settle(&service, args.max_rounds, |s| s.elevation_profile(from, to))?;
        let stdout = std::io::stdout();
        return write_profile(&mut stdout.lock(), &samples);
    }

    let bound = settle(&service, args.max_rounds, |s| s.min_max_along_path(from, to))?;
    print_bound(&bound, json)
}

pub fn run_circle(args: &ServiceArgs, lat: f64, lon: f64, radius: f64, json: bool) -> Result<()> {
    let service = args.build_service()?;
    let center = LatLon::new(lat, lon);
    let bound = settle(&service, args.max_rounds, |s| s.min_max_around_point(center, radius))?;
    print_bound(&bound, json)
}

fn print_bound(bound: &MinMax, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&MinMaxResponse::from(bound))?);
        return Ok(());
    }

    match bound.bounds() {
        Some((min, max)) => println!("min: {:.2}\nmax: {:.2}", min, max),
        None => println!("missing"),
    }
    if bound.missing > 0 {
        println!("{} of {} samples without data", bound.missing, bound.samples + bound.missing);
    }
    Ok(())
}

fn write_profile<W: Write>(out: W, samples: &[ProfileSample]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["lat", "lon", "distance", "elevation"])?;
    for sample in samples {
        writer.write_record([
            sample.position.lat.to_string(),
            sample.position.lon.to_string(),
            format!("{:.1}", sample.distance),
            sample
                .elevation
                .map(|e| format!("{:.2}", e))
                .unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
