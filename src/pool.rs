//! Object pools for `TimeSeries`, `Labels`, and sample buffers.
//!
//! A pool bounds allocator churn on the hot write path: callers borrow a
//! cleared object, use it, and give it back. Pool exhaustion is never a
//! failure mode -- `acquire` falls back to a fresh allocation whenever the
//! free list is empty or `max_size` would be exceeded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::label::Labels;
use crate::sample::{Sample, TimeSeries};

/// Counters exposed through the stats surface for one pool.
#[derive(Debug, Default)]
pub struct PoolCounters {
    pub created: AtomicU64,
    pub acquired: AtomicU64,
    pub released: AtomicU64,
}

impl PoolCounters {
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct PoolStats {
    pub created: u64,
    pub acquired: u64,
    pub released: u64,
}

/// A generic thread-safe free-list pool over `T`.
///
/// `T` must implement [`Poolable`] to describe how to clear an instance
/// before it's handed back out.
pub struct Pool<T: Poolable> {
    free: Mutex<Vec<T>>,
    max_size: usize,
    counters: PoolCounters,
}

/// Types that can be reset to an empty/default state for reuse.
pub trait Poolable {
    fn new_empty() -> Self;
    fn clear(&mut self);
}

impl<T: Poolable> Pool<T> {
    #[must_use]
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        let mut free = Vec::with_capacity(initial_size);
        for _ in 0..initial_size {
            free.push(T::new_empty());
        }
        let counters = PoolCounters::default();
        counters.created.fetch_add(initial_size as u64, Ordering::Relaxed);
        Self {
            free: Mutex::new(free),
            max_size,
            counters,
        }
    }

    /// Borrows a cleared object from the free list, or allocates a new one.
    pub fn acquire(&self) -> T {
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);

        let mut free = self.free.lock().expect("lock is poisoned");
        if let Some(mut obj) = free.pop() {
            obj.clear();
            return obj;
        }
        drop(free);

        self.counters.created.fetch_add(1, Ordering::Relaxed);
        T::new_empty()
    }

    /// Returns an object to the free list, clearing it first. Dropped
    /// instead of retained if the free list is already at `max_size`.
    pub fn release(&self, mut obj: T) {
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        obj.clear();

        let mut free = self.free.lock().expect("lock is poisoned");
        if free.len() < self.max_size {
            free.push(obj);
        }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }
}

impl Poolable for TimeSeries {
    fn new_empty() -> Self {
        TimeSeries::new(Labels::new())
    }

    fn clear(&mut self) {
        self.labels = Labels::new();
        self.samples.clear();
    }
}

impl Poolable for Labels {
    fn new_empty() -> Self {
        Labels::new()
    }

    fn clear(&mut self) {
        *self = Labels::new();
    }
}

impl Poolable for Vec<Sample> {
    fn new_empty() -> Self {
        Vec::new()
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }
}

/// The three pools the engine keeps, one per hot-path allocation shape.
pub struct ObjectPools {
    pub time_series: Pool<TimeSeries>,
    pub labels: Pool<Labels>,
    pub samples: Pool<Vec<Sample>>,
}

/// Per-pool `{initial_size, max_size}` configuration.
#[derive(Copy, Clone, Debug)]
pub struct PoolConfig {
    pub initial_size: usize,
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 16,
            max_size: 1024,
        }
    }
}

impl ObjectPools {
    #[must_use]
    pub fn new(time_series: PoolConfig, labels: PoolConfig, samples: PoolConfig) -> Self {
        Self {
            time_series: Pool::new(time_series.initial_size, time_series.max_size),
            labels: Pool::new(labels.initial_size, labels.max_size),
            samples: Pool::new(samples.initial_size, samples.max_size),
        }
    }
}

impl Default for ObjectPools {
    fn default() -> Self {
        Self::new(PoolConfig::default(), PoolConfig::default(), PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_released_objects() {
        let pool: Pool<Vec<Sample>> = Pool::new(1, 4);
        let mut buf = pool.acquire();
        buf.push(Sample::new(1, 1.0));
        pool.release(buf);

        let stats = pool.stats();
        assert_eq!(1, stats.created);
        assert_eq!(1, stats.acquired);
        assert_eq!(1, stats.released);

        let buf2 = pool.acquire();
        assert!(buf2.is_empty());
        assert_eq!(2, pool.stats().acquired);
        assert_eq!(1, pool.stats().created);
    }

    #[test]
    fn release_beyond_max_size_drops_object() {
        let pool: Pool<Vec<Sample>> = Pool::new(0, 1);
        pool.release(Vec::new());
        pool.release(Vec::new());
        assert_eq!(1, pool.free.lock().expect("lock is poisoned").len());
    }
}
