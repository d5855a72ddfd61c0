//! Directory-backed tile byte cache.
//!
//! Tiles are stored as `<root>/<level>/<row>/<col>.tile`. Freshness is judged
//! from the file modification time; the layout is a convenience and not a
//! stable format.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::addressing::TileKey;
use crate::error::Result;
use crate::fetch::{PersistentCacheStore, TileSource};

const TILE_EXTENSION: &str = "tile";

/// Default age after which a stored tile is fetched again (14 days).
pub const DEFAULT_REFRESH_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Summary of what a [`FileTileStore`] holds on disk.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub tile_count: u64,
    pub total_bytes: u64,
}

/// Raw tile bytes on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileTileStore {
    root: PathBuf,
}

impl FileTileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: TileKey) -> PathBuf {
        self.root
            .join(key.level.to_string())
            .join(key.row.to_string())
            .join(format!("{}.{}", key.col, TILE_EXTENSION))
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Stored bytes and their age, or `None` if the tile is not stored.
    pub fn read(&self, key: TileKey) -> Result<Option<(Vec<u8>, Duration)>> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Ok(None);
        }
        let age = file_age(&path)?;
        Ok(Some((fs::read(&path)?, age)))
    }

    /// Write a tile atomically (temp file, then rename).
    pub fn write(&self, key: TileKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Count stored tiles and their total size.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for path in self.tile_files()? {
            stats.tile_count += 1;
            stats.total_bytes += fs::metadata(&path)?.len();
        }
        Ok(stats)
    }

    /// All tile files below the root.
    fn tile_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.root.is_dir() {
            return Ok(files);
        }

        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            for entry in fs::read_dir(&dir)?.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    dirs.push(path);
                } else if path.extension().is_some_and(|ext| ext == TILE_EXTENSION) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

impl PersistentCacheStore for FileTileStore {
    fn drop_older_than(&self, age: Duration) -> Result<usize> {
        let mut removed = 0;
        for path in self.tile_files()? {
            if file_age(&path)? >= age {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn file_age(path: &Path) -> Result<Duration> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}

/// A [`TileSource`] that keeps a local copy of everything it fetches.
///
/// Fresh stored tiles are served from disk. Stale ones are fetched again, but
/// still served if the remote fetch fails.
pub struct CachingTileSource<S> {
    store: Arc<FileTileStore>,
    remote: S,
    refresh_age: Duration,
}

impl<S: TileSource> CachingTileSource<S> {
    pub fn new(store: Arc<FileTileStore>, remote: S) -> Self {
        Self {
            store,
            remote,
            refresh_age: DEFAULT_REFRESH_AGE,
        }
    }

    /// Age after which stored tiles are fetched again.
    pub fn refresh_age(mut self, age: Duration) -> Self {
        self.refresh_age = age;
        self
    }

    pub fn store(&self) -> &Arc<FileTileStore> {
        &self.store
    }
}

impl<S: TileSource> TileSource for CachingTileSource<S> {
    fn fetch(&self, key: TileKey) -> Result<Vec<u8>> {
        let stored = match self.store.read(key) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(%key, error = %e, "unreadable stored tile");
                None
            }
        };

        match stored {
            Some((bytes, age)) if age < self.refresh_age => Ok(bytes),
            stale => match self.remote.fetch(key) {
                Ok(bytes) => {
                    if let Err(e) = self.store.write(key, &bytes) {
                        tracing::warn!(%key, error = %e, "failed to store tile");
                    }
                    Ok(bytes)
                }
                Err(e) => match stale {
                    Some((bytes, _)) => {
                        tracing::debug!(%key, error = %e, "serving stale tile");
                        Ok(bytes)
                    }
                    None => Err(e),
                },
            },
        }
    }

    fn contains(&self, key: TileKey) -> bool {
        self.remote.contains(key) || self.store.contains(key)
    }

    fn has_local(&self, key: TileKey) -> bool {
        self.store.contains(key)
    }

    /// Stored bytes regardless of age.
    fn fetch_local(&self, key: TileKey) -> Result<Option<Vec<u8>>> {
        Ok(self.store.read(key)?.map(|(bytes, _)| bytes))
    }
}
