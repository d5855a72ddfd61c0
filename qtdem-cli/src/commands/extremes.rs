use anyhow::{bail, Result};
use qtdem::Sector;
use serde::Serialize;

use super::{settle, ServiceArgs};

#[derive(Serialize)]
struct ExtremesResponse {
    min: f64,
    max: f64,
}

pub fn run(
    args: &ServiceArgs,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    json: bool,
) -> Result<()> {
    let sector = Sector::new(min_lat, max_lat, min_lon, max_lon);
    if !sector.is_finite() {
        bail!("Sector bounds must be finite");
    }

    let service = args.build_service()?;
    let (min, max) = settle(&service, args.max_rounds, |s| Ok(s.extremes(&sector)))?;

    if json {
        println!("{}", serde_json::to_string(&ExtremesResponse { min, max })?);
    } else {
        println!("min: {:.2}\nmax: {:.2}", min, max);
    }

    Ok(())
}
