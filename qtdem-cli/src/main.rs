use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::ServiceArgs;

/// Quadtree elevation model CLI tool
#[derive(Parser)]
#[command(name = "qtdem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query elevation for a single coordinate
    Query {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Target resolution in meters
        #[arg(short, long, default_value = "30")]
        resolution: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Ground elevation bounds along a great-circle path
    Path {
        /// Start latitude
        #[arg(long, allow_hyphen_values = true)]
        from_lat: f64,

        /// Start longitude
        #[arg(long, allow_hyphen_values = true)]
        from_lon: f64,

        /// End latitude
        #[arg(long, allow_hyphen_values = true)]
        to_lat: f64,

        /// End longitude
        #[arg(long, allow_hyphen_values = true)]
        to_lon: f64,

        /// Print every sample as CSV instead of the bounds
        #[arg(short, long)]
        profile: bool,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Ground elevation bounds on a circle around a point
    Circle {
        /// Center latitude
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Center longitude
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Radius in meters
        #[arg(long)]
        radius: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Conservative elevation bounds inside a sector
    Extremes {
        #[arg(long, allow_hyphen_values = true)]
        min_lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        max_lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        min_lon: f64,

        #[arg(long, allow_hyphen_values = true)]
        max_lon: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Process elevation for multiple coordinates from a file
    Batch {
        /// Input file (CSV or GeoJSON)
        input: PathBuf,

        /// Output file (same format as input if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column name for latitude (CSV only)
        #[arg(long, default_value = "lat")]
        lat_col: String,

        /// Column name for longitude (CSV only)
        #[arg(long, default_value = "lon")]
        lon_col: String,

        /// Target resolution in meters
        #[arg(short, long, default_value = "30")]
        resolution: f64,
    },

    /// Inspect or clean the on-disk tile cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show how many tiles are stored
    Stats,

    /// Delete stored tiles older than a given age
    Drop {
        /// Minimum age in days of the tiles to delete
        #[arg(long, default_value = "14")]
        older_than_days: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let args = cli.service;

    match cli.command {
        Commands::Query {
            lat,
            lon,
            resolution,
            json,
        } => commands::query::run(&args, lat, lon, resolution, json),
        Commands::Path {
            from_lat,
            from_lon,
            to_lat,
            to_lon,
            profile,
            json,
        } => commands::path::run(&args, (from_lat, from_lon), (to_lat, to_lon), profile, json),
        Commands::Circle {
            lat,
            lon,
            radius,
            json,
        } => commands::path::run_circle(&args, lat, lon, radius, json),
        Commands::Extremes {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
            json,
        } => commands::extremes::run(&args, min_lat, max_lat, min_lon, max_lon, json),
        Commands::Batch {
            input,
            output,
            lat_col,
            lon_col,
            resolution,
        } => commands::batch::run(&args, input, output, lat_col, lon_col, resolution),
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::cache::stats(&args),
            CacheAction::Drop { older_than_days } => commands::cache::drop_older(&args, older_than_days),
        },
    }
}
