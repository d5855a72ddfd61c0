//! Collaborator interfaces for fetching tiles, and the built-in task queues.
//!
//! The core never performs I/O on a query path. A missing tile is turned into
//! a [`FetchTask`] and handed to a [`TaskQueue`]; the task calls the
//! [`TileSource`], decodes the bytes with a [`TileDecoder`] and reports back
//! to the cache.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::addressing::TileKey;
use crate::error::Result;
use crate::tile::ElevationGrid;

/// Anything that can deliver the raw bytes of a tile.
///
/// Called from background tasks only; implementations may block.
pub trait TileSource: Send + Sync {
    fn fetch(&self, key: TileKey) -> Result<Vec<u8>>;

    /// Whether the source can possibly have this tile. Fetches are skipped
    /// for keys that return `false`.
    fn contains(&self, key: TileKey) -> bool {
        let _ = key;
        true
    }

    /// Whether the tile can be delivered without network access.
    fn has_local(&self, key: TileKey) -> bool {
        let _ = key;
        false
    }

    /// The tile's bytes from local storage only, used while offline.
    fn fetch_local(&self, key: TileKey) -> Result<Option<Vec<u8>>> {
        let _ = key;
        Ok(None)
    }
}

impl<T: TileSource + ?Sized> TileSource for Arc<T> {
    fn fetch(&self, key: TileKey) -> Result<Vec<u8>> {
        (**self).fetch(key)
    }

    fn contains(&self, key: TileKey) -> bool {
        (**self).contains(key)
    }

    fn has_local(&self, key: TileKey) -> bool {
        (**self).has_local(key)
    }

    fn fetch_local(&self, key: TileKey) -> Result<Option<Vec<u8>>> {
        (**self).fetch_local(key)
    }
}

/// Converts source-specific bytes into an elevation grid.
pub trait TileDecoder: Send + Sync {
    fn decode(&self, key: TileKey, bytes: &[u8]) -> Result<ElevationGrid>;
}

/// A unit of background work.
pub type FetchTask = Box<dyn FnOnce() + Send + 'static>;

/// Where fetch tasks go to run.
pub trait TaskQueue: Send + Sync {
    /// Saturation check consulted before enqueueing a fetch.
    fn is_full(&self) -> bool;

    fn submit(&self, task: FetchTask);
}

/// A file-backed byte cache with its own expiry.
pub trait PersistentCacheStore: Send + Sync {
    /// Remove every entry older than `age`, returning how many were removed.
    fn drop_older_than(&self, age: Duration) -> Result<usize>;
}

/// Shared "we are offline" switch. While it is set only locally stored
/// tiles are fetched.
#[derive(Debug, Clone, Default)]
pub struct OfflineMode(Arc<AtomicBool>);

impl OfflineMode {
    pub fn new(offline: bool) -> Self {
        Self(Arc::new(AtomicBool::new(offline)))
    }

    pub fn is_offline(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_offline(&self, offline: bool) {
        self.0.store(offline, Ordering::Relaxed);
    }
}

/// A queue that holds tasks until [`run_pending`](Self::run_pending) is
/// called.
///
/// Used by the command-line refinement loop and by tests that need to control
/// exactly when fetches complete.
pub struct DeferredQueue {
    tasks: Mutex<VecDeque<FetchTask>>,
    capacity: usize,
}

impl DeferredQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every task queued so far, including tasks they enqueue.
    ///
    /// Returns the number of tasks executed.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // The lock is released before running so tasks may submit more work.
            let next = self
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl TaskQueue for DeferredQueue {
    fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    fn submit(&self, task: FetchTask) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }
}

impl<T: TaskQueue + ?Sized> TaskQueue for Arc<T> {
    fn is_full(&self) -> bool {
        (**self).is_full()
    }

    fn submit(&self, task: FetchTask) {
        (**self).submit(task)
    }
}

#[cfg(feature = "tokio")]
pub use self::tokio_queue::TokioQueue;

#[cfg(feature = "tokio")]
mod tokio_queue {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::runtime::Handle;

    use super::{FetchTask, TaskQueue};
    use crate::error::{ElevationError, Result};

    /// Runs fetch tasks on the blocking pool of a Tokio runtime.
    ///
    /// Saturation is tracked with an in-flight counter.
    pub struct TokioQueue {
        handle: Handle,
        in_flight: Arc<AtomicUsize>,
        capacity: usize,
    }

    impl TokioQueue {
        pub fn new(handle: Handle, capacity: usize) -> Self {
            Self {
                handle,
                in_flight: Arc::new(AtomicUsize::new(0)),
                capacity,
            }
        }

        /// Bind to the runtime of the calling context.
        ///
        /// # Errors
        ///
        /// Returns [`ElevationError::Config`] when called outside a runtime.
        pub fn current(capacity: usize) -> Result<Self> {
            let handle = Handle::try_current()
                .map_err(|e| ElevationError::Config(format!("no Tokio runtime: {}", e)))?;
            Ok(Self::new(handle, capacity))
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::Relaxed)
        }
    }

    impl TaskQueue for TokioQueue {
        fn is_full(&self) -> bool {
            self.in_flight() >= self.capacity
        }

        fn submit(&self, task: FetchTask) {
            self.in_flight.fetch_add(1, Ordering::Relaxed);
            let guard = InFlight(self.in_flight.clone());
            self.handle.spawn_blocking(move || {
                let _guard = guard;
                task();
            });
        }
    }

    /// Releases one in-flight slot when dropped, even if the task panics.
    struct InFlight(Arc<AtomicUsize>);

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
