use anyhow::{Context, Result};
use qtdem::fetch::PersistentCacheStore;
use qtdem::store::FileTileStore;
use std::time::Duration;

use super::ServiceArgs;

pub fn stats(args: &ServiceArgs) -> Result<()> {
    let store = FileTileStore::new(args.cache_dir()?);
    let stats = store.stats().context("Failed to read cache directory")?;

    println!("Cache directory: {}", store.root().display());
    println!("Tiles: {}", stats.tile_count);
    println!("Total size: {}", format_size(stats.total_bytes));
    Ok(())
}

pub fn drop_older(args: &ServiceArgs, older_than_days: u64) -> Result<()> {
    let store = FileTileStore::new(args.cache_dir()?);
    let age = Duration::from_secs(older_than_days * 24 * 60 * 60);
    let removed = store
        .drop_older_than(age)
        .context("Failed to clean cache directory")?;

    println!(
        "Removed {} tiles older than {} days from {}",
        removed,
        older_than_days,
        store.root().display()
    );
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
