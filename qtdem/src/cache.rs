//! In-memory tile cache with fetch de-duplication and dataset-wide expiry.
//!
//! [`TileCache`] is cheap to clone; clones share the same tiles. Lookups
//! never block on I/O: a missing tile is requested with
//! [`ensure_fetching`](TileCache::ensure_fetching) and shows up on a later
//! lookup once its fetch task has run.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use moka::sync::Cache;

use crate::addressing::{LevelSet, TileKey};
use crate::error::ElevationError;
use crate::fetch::{OfflineMode, PersistentCacheStore, TaskQueue, TileDecoder, TileSource};
use crate::tile::{ElevationGrid, Tile};

/// Default number of tiles kept in memory.
pub const DEFAULT_CACHE_CAPACITY: u64 = 256;

/// Default dataset time-to-live (27 days).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(27 * 24 * 60 * 60);

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of tiles currently held, ready or not.
    pub entry_count: u64,
    /// Number of tiles with usable data.
    pub ready_count: u64,
    /// Number of fetches currently outstanding.
    pub pending_count: u64,
    /// Lookups answered by a ready tile.
    pub hit_count: u64,
    /// Lookups that found no ready tile.
    pub miss_count: u64,
    /// Fetch tasks submitted.
    pub fetch_count: u64,
    /// Fetch tasks that failed.
    pub failure_count: u64,
    /// Dataset-wide drops performed.
    pub drop_count: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Everything a [`TileCache`] needs from the outside world.
pub struct TileCacheConfig {
    pub levels: Arc<LevelSet>,
    pub source: Arc<dyn TileSource>,
    pub decoder: Arc<dyn TileDecoder>,
    pub queue: Arc<dyn TaskQueue>,
    pub offline: OfflineMode,
    pub store: Option<Arc<dyn PersistentCacheStore>>,
    pub capacity: u64,
    pub ttl: Duration,
}

struct Inner {
    levels: Arc<LevelSet>,
    tiles: Cache<TileKey, Arc<Tile>>,
    /// Outstanding fetches. Installs and drops happen while holding it.
    pending: Mutex<HashSet<TileKey>>,
    /// `(min, max)` over every ready tile at or below each key.
    subtree_extremes: Mutex<HashMap<TileKey, (f64, f64)>>,
    source: Arc<dyn TileSource>,
    decoder: Arc<dyn TileDecoder>,
    queue: Arc<dyn TaskQueue>,
    offline: OfflineMode,
    store: Option<Arc<dyn PersistentCacheStore>>,
    ttl: Duration,
    epoch: Instant,
    /// Bumped on every dataset drop; derived caches compare against it.
    generation: AtomicU64,
    /// Bumped whenever a tile becomes ready or the dataset is dropped.
    data_version: AtomicU64,
    /// Millis since `epoch` at which the in-memory tiles were last dropped.
    memory_since_ms: AtomicU64,
    /// Earliest millis since `epoch` at which another drop may be scheduled.
    next_check_ms: AtomicU64,
    drop_in_flight: AtomicBool,
    model_bounds: Mutex<Option<(f64, f64)>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    fetch_count: AtomicU64,
    failure_count: AtomicU64,
    drop_count: AtomicU64,
}

/// Shared store of [`TileKey`] to [`Tile`].
///
/// # Guarantees
///
/// - At most one fetch is outstanding per key, regardless of how many
///   callers ask for it concurrently.
/// - A ready tile is never replaced by a placeholder.
/// - A failed fetch leaves the key absent so that a later query retries.
/// - A fetch scheduled before a dataset drop is discarded when it lands.
/// - Expiry drops the whole dataset, at most once per TTL window.
#[derive(Clone)]
pub struct TileCache {
    inner: Arc<Inner>,
}

impl TileCache {
    pub fn new(config: TileCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                levels: config.levels,
                tiles: Cache::builder().max_capacity(config.capacity).build(),
                pending: Mutex::new(HashSet::new()),
                subtree_extremes: Mutex::new(HashMap::new()),
                source: config.source,
                decoder: config.decoder,
                queue: config.queue,
                offline: config.offline,
                store: config.store,
                ttl: config.ttl,
                epoch: Instant::now(),
                generation: AtomicU64::new(0),
                data_version: AtomicU64::new(0),
                memory_since_ms: AtomicU64::new(0),
                next_check_ms: AtomicU64::new(0),
                drop_in_flight: AtomicBool::new(false),
                model_bounds: Mutex::new(None),
                hit_count: AtomicU64::new(0),
                miss_count: AtomicU64::new(0),
                fetch_count: AtomicU64::new(0),
                failure_count: AtomicU64::new(0),
                drop_count: AtomicU64::new(0),
            }),
        }
    }

    pub fn levels(&self) -> &Arc<LevelSet> {
        &self.inner.levels
    }

    pub fn offline(&self) -> &OfflineMode {
        &self.inner.offline
    }

    /// Current tile entry, ready or placeholder. Never blocks.
    pub fn get(&self, key: TileKey) -> Option<Arc<Tile>> {
        self.inner.tiles.get(&key)
    }

    /// The tile if it holds usable data. Counts a hit or a miss.
    pub fn get_ready(&self, key: TileKey) -> Option<Arc<Tile>> {
        match self.inner.tiles.get(&key) {
            Some(tile) if tile.is_ready() => {
                self.inner.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(tile)
            }
            _ => {
                self.inner.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether a fetch for `key` is outstanding.
    pub fn is_pending(&self, key: TileKey) -> bool {
        self.lock_pending().contains(&key)
    }

    /// Make sure `key` is either ready or being fetched.
    ///
    /// Does nothing when the tile is already ready or pending, when the task
    /// queue is saturated, or when the source cannot have the tile. While
    /// offline only tiles the source holds locally are scheduled. Never
    /// blocks on the fetch itself.
    pub fn ensure_fetching(&self, key: TileKey) {
        let inner = &self.inner;
        if self.is_ready(key) {
            return;
        }
        if inner.offline.is_offline() && !inner.source.has_local(key) {
            return;
        }
        if inner.queue.is_full() || !inner.source.contains(key) {
            return;
        }

        let generation = {
            let mut pending = self.lock_pending();
            // A fetch may have landed since the first check.
            if self.is_ready(key) || !pending.insert(key) {
                return;
            }
            let bounds = inner.levels.bounds_for(key);
            inner
                .tiles
                .insert(key, Arc::new(Tile::placeholder(key, bounds)));
            self.generation()
        };
        inner.fetch_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%key, generation, "scheduling tile fetch");

        let cache = self.clone();
        inner
            .queue
            .submit(Box::new(move || cache.run_fetch(key, generation)));
    }

    fn is_ready(&self, key: TileKey) -> bool {
        matches!(self.inner.tiles.get(&key), Some(t) if t.is_ready())
    }

    fn run_fetch(&self, key: TileKey, generation: u64) {
        let inner = &self.inner;
        let bytes = if inner.offline.is_offline() {
            inner.source.fetch_local(key).and_then(|bytes| {
                bytes.ok_or_else(|| ElevationError::FetchFailed {
                    key,
                    reason: "not stored locally and offline".to_string(),
                })
            })
        } else {
            inner.source.fetch(key)
        };

        match bytes.and_then(|bytes| inner.decoder.decode(key, &bytes)) {
            Ok(grid) => self.install(key, grid, generation),
            Err(e) => {
                tracing::warn!(%key, error = %e, "tile fetch failed");
                self.forget(key, generation);
            }
        }
    }

    /// Install decoded data for `key`: Placeholder becomes Ready.
    pub fn on_fetch_complete(&self, key: TileKey, grid: ElevationGrid) {
        self.install(key, grid, self.generation());
    }

    /// Forget a failed fetch so a later query may retry it.
    pub fn on_fetch_failed(&self, key: TileKey) {
        self.forget(key, self.generation());
    }

    fn install(&self, key: TileKey, grid: ElevationGrid, generation: u64) {
        let inner = &self.inner;
        let bounds = inner.levels.bounds_for(key);
        let tile = Tile::ready(key, bounds, grid);
        let extremes = tile.extremes();

        let mut pending = self.lock_pending();
        if self.generation() != generation {
            tracing::debug!(%key, generation, "discarding tile fetched before a dataset drop");
            return;
        }
        if let Some(extremes) = extremes {
            self.fold_extremes(key, extremes);
        }
        inner.tiles.insert(key, Arc::new(tile));
        pending.remove(&key);
        inner.data_version.fetch_add(1, Ordering::AcqRel);
        drop(pending);
        tracing::debug!(%key, "tile ready");
    }

    fn forget(&self, key: TileKey, generation: u64) {
        let inner = &self.inner;
        inner.failure_count.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.lock_pending();
        if self.generation() != generation {
            return;
        }
        if matches!(inner.tiles.get(&key), Some(t) if !t.is_ready()) {
            inner.tiles.invalidate(&key);
        }
        pending.remove(&key);
    }

    /// Widen the running bounds of `key` and every ancestor.
    fn fold_extremes(&self, key: TileKey, (min, max): (f64, f64)) {
        let widen = |bounds: Option<(f64, f64)>| match bounds {
            Some((lo, hi)) => (lo.min(min), hi.max(max)),
            None => (min, max),
        };

        let mut model = self
            .inner
            .model_bounds
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *model = Some(widen(*model));

        let mut subtree = self.lock_subtree();
        for k in key.lineage() {
            let entry = subtree.get(&k).copied();
            subtree.insert(k, widen(entry));
        }
    }

    /// `(min, max)` over every ready tile at or below `key` in this dataset
    /// generation, including tiles since evicted from memory.
    pub fn subtree_extremes(&self, key: TileKey) -> Option<(f64, f64)> {
        self.lock_subtree().get(&key).copied()
    }

    /// Changes whenever a tile becomes ready or the dataset is dropped.
    pub fn data_version(&self) -> u64 {
        self.inner.data_version.load(Ordering::Acquire)
    }

    /// Running `(min, max)` over every tile that has become ready.
    pub fn model_bounds(&self) -> Option<(f64, f64)> {
        *self
            .inner
            .model_bounds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Dataset generation; changes whenever the dataset is dropped.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Rate-limited expiry check.
    ///
    /// Schedules at most one drop task per TTL window. Returns `true` if a
    /// task was scheduled by this call.
    pub fn check_expiration(&self) -> bool {
        self.check_expiration_at(self.inner.epoch.elapsed())
    }

    fn check_expiration_at(&self, now: Duration) -> bool {
        let inner = &self.inner;
        let now_ms = now.as_millis() as u64;
        let next = inner.next_check_ms.load(Ordering::Acquire);
        if now_ms < next {
            return false;
        }
        if inner
            .drop_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if inner
            .next_check_ms
            .compare_exchange(
                next,
                now_ms.saturating_add(inner.ttl.as_millis() as u64),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            inner.drop_in_flight.store(false, Ordering::Release);
            return false;
        }

        let cache = self.clone();
        inner
            .queue
            .submit(Box::new(move || cache.run_drop(now_ms)));
        true
    }

    fn run_drop(&self, now_ms: u64) {
        let inner = &self.inner;
        if let Some(store) = &inner.store {
            match store.drop_older_than(inner.ttl) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "dropped expired tiles from persistent cache")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "failed to drop persistent cache"),
            }
        }

        let since = inner.memory_since_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(since) >= inner.ttl.as_millis() as u64 {
            self.drop_dataset();
            inner.memory_since_ms.store(now_ms, Ordering::Release);
        }

        inner.drop_in_flight.store(false, Ordering::Release);
    }

    /// Drop every in-memory tile and advance the dataset generation.
    ///
    /// Fetches still in flight are forgotten; their results are discarded.
    fn drop_dataset(&self) {
        let inner = &self.inner;
        let mut pending = self.lock_pending();
        inner.tiles.invalidate_all();
        inner.generation.fetch_add(1, Ordering::AcqRel);
        inner.data_version.fetch_add(1, Ordering::AcqRel);
        pending.clear();
        self.lock_subtree().clear();
        drop(pending);
        inner.drop_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(generation = self.generation(), "dropped in-memory tile dataset");
    }

    /// Clear all tiles from the cache.
    pub fn clear(&self) {
        self.drop_dataset();
        self.inner
            .memory_since_ms
            .store(self.inner.epoch.elapsed().as_millis() as u64, Ordering::Release);
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        inner.tiles.run_pending_tasks();
        let ready_count = inner.tiles.iter().filter(|(_, t)| t.is_ready()).count() as u64;

        CacheStats {
            entry_count: inner.tiles.entry_count(),
            ready_count,
            pending_count: self.lock_pending().len() as u64,
            hit_count: inner.hit_count.load(Ordering::Relaxed),
            miss_count: inner.miss_count.load(Ordering::Relaxed),
            fetch_count: inner.fetch_count.load(Ordering::Relaxed),
            failure_count: inner.failure_count.load(Ordering::Relaxed),
            drop_count: inner.drop_count.load(Ordering::Relaxed),
        }
    }

    /// Get the maximum cache size.
    pub fn capacity(&self) -> u64 {
        self.inner.tiles.policy().max_capacity().unwrap_or(0)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashSet<TileKey>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subtree(&self) -> std::sync::MutexGuard<'_, HashMap<TileKey, (f64, f64)>> {
        self.inner
            .subtree_extremes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::Projection;
    use crate::error::{ElevationError, Result};
    use crate::fetch::DeferredQueue;
    use crate::tile::TileState;
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;

    struct CountingSource {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl TileSource for CountingSource {
        fn fetch(&self, key: TileKey) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ElevationError::FetchFailed {
                    key,
                    reason: "boom".to_string(),
                });
            }
            Ok(vec![key.level])
        }
    }

    struct FlatDecoder;

    impl TileDecoder for FlatDecoder {
        fn decode(&self, _key: TileKey, bytes: &[u8]) -> Result<ElevationGrid> {
            Ok(ElevationGrid::filled(4, 4, bytes[0] as f64 * 100.0))
        }
    }

    #[derive(Default)]
    struct CountingStore {
        drops: AtomicUsize,
    }

    impl PersistentCacheStore for CountingStore {
        fn drop_older_than(&self, _age: Duration) -> Result<usize> {
            self.drops.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    struct Fixture {
        cache: TileCache,
        queue: Arc<DeferredQueue>,
        source: Arc<CountingSource>,
        store: Arc<CountingStore>,
    }

    fn fixture(ttl: Duration) -> Fixture {
        let queue = Arc::new(DeferredQueue::new(64));
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let store = Arc::new(CountingStore::default());
        let cache = TileCache::new(TileCacheConfig {
            levels: Arc::new(LevelSet::new(Projection::Mercator, 4, 4, 6)),
            source: source.clone(),
            decoder: Arc::new(FlatDecoder),
            queue: queue.clone(),
            offline: OfflineMode::default(),
            store: Some(store.clone()),
            capacity: 100,
            ttl,
        });
        Fixture {
            cache,
            queue,
            source,
            store,
        }
    }

    #[test]
    fn test_placeholder_then_ready() {
        let f = fixture(DEFAULT_CACHE_TTL);
        let key = TileKey::new(2, 1, 3);

        assert!(f.cache.get_ready(key).is_none());
        f.cache.ensure_fetching(key);
        assert_eq!(f.cache.get(key).unwrap().state(), TileState::Placeholder);
        assert!(f.cache.is_pending(key));

        assert_eq!(f.queue.run_pending(), 1);
        let tile = f.cache.get_ready(key).unwrap();
        assert_eq!(tile.extremes(), Some((200.0, 200.0)));
        assert!(!f.cache.is_pending(key));
        assert_eq!(f.cache.model_bounds(), Some((200.0, 200.0)));
    }

    #[test]
    fn test_duplicate_requests_fetch_once() {
        let f = fixture(DEFAULT_CACHE_TTL);
        let key = TileKey::new(3, 0, 0);
        for _ in 0..10 {
            f.cache.ensure_fetching(key);
        }
        f.queue.run_pending();
        f.cache.ensure_fetching(key);
        f.queue.run_pending();

        assert_eq!(f.source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.stats().fetch_count, 1);
    }

    #[test]
    fn test_failed_fetch_is_retried_later() {
        let f = fixture(DEFAULT_CACHE_TTL);
        let key = TileKey::new(1, 0, 1);
        f.source.fail.store(true, Ordering::SeqCst);

        f.cache.ensure_fetching(key);
        f.queue.run_pending();
        assert!(f.cache.get(key).is_none());
        assert!(!f.cache.is_pending(key));
        assert_eq!(f.cache.stats().failure_count, 1);

        f.source.fail.store(false, Ordering::SeqCst);
        f.cache.ensure_fetching(key);
        f.queue.run_pending();
        assert!(f.cache.get_ready(key).is_some());
        assert_eq!(f.source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_offline_and_saturated_skip_fetch() {
        // CountingSource keeps nothing locally, so offline means no fetch.
        let f = fixture(DEFAULT_CACHE_TTL);
        f.cache.offline().set_offline(true);
        f.cache.ensure_fetching(TileKey::new(1, 1, 1));
        assert!(f.cache.get(TileKey::new(1, 1, 1)).is_none());
        assert!(f.queue.is_empty());

        f.cache.offline().set_offline(false);
        let small_queue = Arc::new(DeferredQueue::new(1));
        let cache = TileCache::new(TileCacheConfig {
            levels: Arc::new(LevelSet::new(Projection::Mercator, 4, 4, 6)),
            source: f.source.clone(),
            decoder: Arc::new(FlatDecoder),
            queue: small_queue.clone(),
            offline: OfflineMode::default(),
            store: None,
            capacity: 100,
            ttl: DEFAULT_CACHE_TTL,
        });
        cache.ensure_fetching(TileKey::new(1, 0, 0));
        cache.ensure_fetching(TileKey::new(1, 0, 1));
        assert_eq!(small_queue.len(), 1);
        assert!(cache.get(TileKey::new(1, 0, 1)).is_none());
    }

    #[test]
    fn test_expiration_is_rate_limited() {
        let ttl = Duration::from_secs(60);
        let f = fixture(ttl);

        assert!(f.cache.check_expiration_at(Duration::from_secs(0)));
        // A second check in the same window schedules nothing, even before
        // the first drop task has run.
        assert!(!f.cache.check_expiration_at(Duration::from_secs(1)));
        f.queue.run_pending();
        assert!(!f.cache.check_expiration_at(Duration::from_secs(59)));
        assert_eq!(f.store.drops.load(Ordering::SeqCst), 1);

        assert!(f.cache.check_expiration_at(Duration::from_secs(61)));
        f.queue.run_pending();
        assert_eq!(f.store.drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expiration_drops_memory_after_ttl() {
        let ttl = Duration::from_secs(60);
        let f = fixture(ttl);
        let key = TileKey::new(1, 1, 0);
        f.cache.ensure_fetching(key);
        f.queue.run_pending();

        // Startup check only cleans the persistent store.
        f.cache.check_expiration_at(Duration::from_secs(0));
        f.queue.run_pending();
        assert!(f.cache.get_ready(key).is_some());
        assert_eq!(f.cache.generation(), 0);

        f.cache.check_expiration_at(Duration::from_secs(120));
        f.queue.run_pending();
        assert!(f.cache.get(key).is_none());
        assert_eq!(f.cache.generation(), 1);
        assert_eq!(f.cache.stats().drop_count, 1);
    }

    #[test]
    fn test_clear_bumps_generation() {
        let f = fixture(DEFAULT_CACHE_TTL);
        f.cache.ensure_fetching(TileKey::new(0, 0, 0));
        f.queue.run_pending();
        f.cache.clear();
        assert!(f.cache.get(TileKey::new(0, 0, 0)).is_none());
        assert_eq!(f.cache.generation(), 1);
    }

    /// Completes the fetch itself the first time it is asked whether it
    /// has a tile, as a concurrent caller's fetch landing would.
    #[derive(Default)]
    struct RacingSource {
        cache: OnceLock<TileCache>,
        raced: AtomicBool,
    }

    impl TileSource for RacingSource {
        fn fetch(&self, key: TileKey) -> Result<Vec<u8>> {
            Ok(vec![key.level])
        }

        fn contains(&self, key: TileKey) -> bool {
            if !self.raced.swap(true, Ordering::SeqCst) {
                if let Some(cache) = self.cache.get() {
                    cache.on_fetch_complete(key, ElevationGrid::filled(4, 4, 7.0));
                }
            }
            true
        }
    }

    #[test]
    fn test_fetch_landing_during_scheduling_keeps_ready_tile() {
        let queue = Arc::new(DeferredQueue::new(64));
        let source = Arc::new(RacingSource::default());
        let cache = TileCache::new(TileCacheConfig {
            levels: Arc::new(LevelSet::new(Projection::Mercator, 4, 4, 6)),
            source: source.clone(),
            decoder: Arc::new(FlatDecoder),
            queue: queue.clone(),
            offline: OfflineMode::default(),
            store: None,
            capacity: 100,
            ttl: DEFAULT_CACHE_TTL,
        });
        assert!(source.cache.set(cache.clone()).is_ok());
        let key = TileKey::new(2, 1, 1);

        cache.ensure_fetching(key);

        assert_eq!(cache.get(key).unwrap().state(), TileState::Ready);
        assert!(!cache.is_pending(key));
        assert!(queue.is_empty());
        assert_eq!(cache.stats().fetch_count, 0);
    }

    #[test]
    fn test_fetch_landing_after_clear_is_discarded() {
        let f = fixture(DEFAULT_CACHE_TTL);
        let key = TileKey::new(1, 0, 0);
        f.cache.ensure_fetching(key);
        f.cache.clear();
        assert!(!f.cache.is_pending(key));

        assert_eq!(f.queue.run_pending(), 1);
        assert!(f.cache.get(key).is_none());
        assert_eq!(f.cache.subtree_extremes(key), None);
        assert_eq!(f.cache.model_bounds(), None);

        f.cache.ensure_fetching(key);
        f.queue.run_pending();
        assert!(f.cache.get_ready(key).is_some());
        assert_eq!(f.source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_fetch_does_not_disturb_newer_one() {
        let f = fixture(DEFAULT_CACHE_TTL);
        let key = TileKey::new(2, 3, 0);
        f.cache.ensure_fetching(key);
        f.cache.clear();
        f.cache.ensure_fetching(key);
        assert_eq!(f.queue.len(), 2);

        f.source.fail.store(true, Ordering::SeqCst);
        f.queue.run_pending();
        assert!(f.cache.get(key).is_none());
        assert!(!f.cache.is_pending(key));
        assert_eq!(f.cache.stats().failure_count, 2);
    }

    #[test]
    fn test_subtree_extremes_cover_descendants() {
        let f = fixture(DEFAULT_CACHE_TTL);
        let version = f.cache.data_version();
        f.cache
            .on_fetch_complete(TileKey::new(3, 2, 5), ElevationGrid::filled(4, 4, 300.0));
        f.cache
            .on_fetch_complete(TileKey::new(3, 2, 4), ElevationGrid::filled(4, 4, 500.0));
        assert_eq!(f.cache.data_version(), version + 2);

        assert_eq!(f.cache.subtree_extremes(TileKey::new(3, 2, 5)), Some((300.0, 300.0)));
        assert_eq!(f.cache.subtree_extremes(TileKey::new(2, 1, 2)), Some((300.0, 500.0)));
        assert_eq!(f.cache.subtree_extremes(TileKey::new(0, 0, 0)), Some((300.0, 500.0)));
        assert_eq!(f.cache.subtree_extremes(TileKey::new(2, 0, 0)), None);

        f.cache.clear();
        assert_eq!(f.cache.subtree_extremes(TileKey::new(0, 0, 0)), None);
        assert_eq!(f.cache.model_bounds(), Some((300.0, 500.0)));
    }

    #[test]
    fn test_offline_fetches_only_local_tiles() {
        struct LocalOnly;

        impl TileSource for LocalOnly {
            fn fetch(&self, key: TileKey) -> Result<Vec<u8>> {
                Err(ElevationError::FetchFailed {
                    key,
                    reason: "no network".to_string(),
                })
            }

            fn has_local(&self, key: TileKey) -> bool {
                key.level <= 1
            }

            fn fetch_local(&self, key: TileKey) -> Result<Option<Vec<u8>>> {
                Ok(self.has_local(key).then(|| vec![key.level]))
            }
        }

        let queue = Arc::new(DeferredQueue::new(64));
        let cache = TileCache::new(TileCacheConfig {
            levels: Arc::new(LevelSet::new(Projection::Mercator, 4, 4, 6)),
            source: Arc::new(LocalOnly),
            decoder: Arc::new(FlatDecoder),
            queue: queue.clone(),
            offline: OfflineMode::new(true),
            store: None,
            capacity: 100,
            ttl: DEFAULT_CACHE_TTL,
        });

        cache.ensure_fetching(TileKey::new(2, 0, 0));
        assert!(queue.is_empty());

        let key = TileKey::new(1, 1, 0);
        cache.ensure_fetching(key);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(cache.get_ready(key).unwrap().extremes(), Some((100.0, 100.0)));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hit_count: 3,
            miss_count: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
