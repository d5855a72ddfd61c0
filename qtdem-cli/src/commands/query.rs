use anyhow::Result;
use qtdem::{QueryResult, QueryStatus};
use serde::Serialize;

use super::{settle, ServiceArgs};

#[derive(Serialize)]
struct ElevationResponse {
    lat: f64,
    lon: f64,
    elevation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    achieved_resolution_m: Option<f64>,
    resolved: bool,
}

impl ElevationResponse {
    fn new(lat: f64, lon: f64, result: &QueryResult) -> Self {
        Self {
            lat,
            lon,
            elevation: result.elevation,
            achieved_resolution_m: (!result.is_missing()).then(|| result.achieved_resolution_m()),
            resolved: result.is_fully_resolved(),
        }
    }
}

pub fn run(args: &ServiceArgs, lat: f64, lon: f64, resolution: f64, json: bool) -> Result<()> {
    let service = args.build_service()?;
    let result = settle(&service, args.max_rounds, |s| s.elevation_at(lat, lon, resolution))?;

    if json {
        println!("{}", serde_json::to_string(&ElevationResponse::new(lat, lon, &result))?);
    } else {
        println!("{}", format_result(&result));
    }

    Ok(())
}

fn format_result(result: &QueryResult) -> String {
    match (result.elevation, result.status()) {
        (None, _) => "missing".to_string(),
        (Some(elev), QueryStatus::ResolutionNotAchieved) => {
            format!("{:.2} (at {:.0} m)", elev, result.achieved_resolution_m())
        }
        (Some(elev), _) => format!("{:.2}", elev),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;

    #[test]
    fn test_format_missing() {
        let service = testing::service();
        let result = service.elevation_at(10.0, 20.0, 30.0).unwrap();
        assert_eq!(format_result(&result), "missing");

        let json = serde_json::to_value(ElevationResponse::new(10.0, 20.0, &result)).unwrap();
        assert!(json["elevation"].is_null());
        assert!(json.get("achieved_resolution_m").is_none());
    }

    #[test]
    fn test_format_coarse() {
        let service = testing::service();
        let result = settle(&service, 10, |s| s.elevation_at(10.0, 20.0, 1.0)).unwrap();
        let text = format_result(&result);
        assert!(text.starts_with("2000.00 (at "), "{text}");

        let json = serde_json::to_value(ElevationResponse::new(10.0, 20.0, &result)).unwrap();
        assert_eq!(json["resolved"], false);
    }
}
