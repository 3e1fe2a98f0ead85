//! The working-set, multi-tier cache: L1 (small, always on), L2
//! (larger, may be disabled), and L3 (the cold files themselves, read
//! through by the caller). Promotion/demotion move a series between
//! L1 and L2 based on recent access frequency and idle time; L3 is
//! served by the engine's cold-file path, not cached here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use quick_cache::sync::Cache as QuickCache;
use quick_cache::Weighter;
use rustc_hash::FxBuildHasher;

use crate::label::SeriesId;
use crate::metrics::{CacheLevelMetrics, GlobalMetrics};
use crate::sample::TimeSeries;

const PROMOTE_L3_TO_L2_AT_READS: u32 = 2;
const PROMOTE_L2_TO_L1_AT_READS: u32 = 5;

pub const DEFAULT_L1_IDLE_DEMOTE_MS: i64 = 5 * 60 * 1000;
pub const DEFAULT_L2_IDLE_DEMOTE_MS: i64 = 60 * 60 * 1000;

#[derive(Clone)]
struct SeriesWeighter;

impl Weighter<SeriesId, Arc<TimeSeries>> for SeriesWeighter {
    fn weight(&self, _key: &SeriesId, value: &Arc<TimeSeries>) -> u64 {
        let labels_bytes = value.labels.canonical().len() as u64;
        let sample_bytes = value.samples.len() as u64 * 16;
        (labels_bytes + sample_bytes).max(1)
    }
}

type Level = QuickCache<SeriesId, Arc<TimeSeries>, SeriesWeighter, FxBuildHasher>;

fn new_level(capacity_bytes: u64) -> Level {
    QuickCache::with(
        (capacity_bytes / 256).max(16) as usize,
        capacity_bytes,
        SeriesWeighter,
        FxBuildHasher,
    )
}

/// Tracks, per SeriesID, a read count (used for promotion thresholds)
/// and the millisecond timestamp of last access (used for idle-based
/// demotion). Kept outside the `quick_cache` levels themselves since an
/// entry not yet cached anywhere (a cold read) still needs its access
/// count remembered across calls.
#[derive(Default)]
struct AccessTracker {
    read_counts: HashMap<SeriesId, u32>,
    last_access_ms: HashMap<SeriesId, i64>,
}

/// The engine's tiered cache over decoded series.
pub struct TieredCache {
    l1: Level,
    l2: Option<Level>,
    tracker: Mutex<AccessTracker>,
}

impl TieredCache {
    /// `l2_capacity_bytes = None` disables L2 entirely; demotions from
    /// L1 then simply evict rather than moving down a tier, and cold
    /// reads are never promoted into a disabled L2.
    #[must_use]
    pub fn new(l1_capacity_bytes: u64, l2_capacity_bytes: Option<u64>) -> Self {
        Self {
            l1: new_level(l1_capacity_bytes),
            l2: l2_capacity_bytes.map(new_level),
            tracker: Mutex::new(AccessTracker::default()),
        }
    }

    fn note_access(&self, sid: SeriesId, now_ms: i64) -> u32 {
        let mut tracker = self.tracker.lock().expect("lock is poisoned");
        tracker.last_access_ms.insert(sid, now_ms);
        let count = tracker.read_counts.entry(sid).or_insert(0);
        *count += 1;
        *count
    }

    /// Looks up `sid`, checking L1 then L2, promoting to L1 once the L2
    /// read count crosses the threshold. Returns `None` on a full miss.
    /// A hit is never a complete substitute for the cold-tier scan: an L1
    /// entry refreshed by [`TieredCache::insert_on_write`] only ever holds
    /// one `write()` call's samples, a strict subset of what may already
    /// be on disk, so callers must still merge the cold-tier result.
    pub fn get(&self, sid: SeriesId, metrics: &GlobalMetrics, now_ms: i64) -> Option<Arc<TimeSeries>> {
        if let Some(series) = self.l1.get(&sid) {
            record_hit(&metrics.cache_l1);
            self.note_access(sid, now_ms);
            return Some(series);
        }
        record_miss(&metrics.cache_l1);

        if let Some(l2) = &self.l2 {
            if let Some(series) = l2.get(&sid) {
                record_hit(&metrics.cache_l2);
                let reads = self.note_access(sid, now_ms);
                if reads >= PROMOTE_L2_TO_L1_AT_READS {
                    l2.remove(&sid);
                    self.l1.insert(sid, Arc::clone(&series));
                    metrics.cache_l1.promotions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                return Some(series);
            }
            record_miss(&metrics.cache_l2);
        }

        None
    }

    /// Records that `sid` was just served from L3 (a cold file) and
    /// promotes it into L2 once its recent read count crosses the
    /// threshold. No-op if L2 is disabled.
    pub fn record_cold_read(&self, sid: SeriesId, series: Arc<TimeSeries>, metrics: &GlobalMetrics, now_ms: i64) {
        metrics.cache_l3.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let reads = self.note_access(sid, now_ms);
        if reads >= PROMOTE_L3_TO_L2_AT_READS {
            if let Some(l2) = &self.l2 {
                l2.insert(sid, series);
                metrics.cache_l2.promotions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    /// Inserts (or refreshes) `series` into L1, as every accepted write
    /// does. `series` is only the samples from that one `write()` call --
    /// the caller must not treat a later [`TieredCache::get`] hit built
    /// from this as a complete view of the series.
    pub fn insert_on_write(&self, sid: SeriesId, series: Arc<TimeSeries>, now_ms: i64) {
        self.l1.insert(sid, series);
        self.note_access(sid, now_ms);
    }

    /// Sweeps idle entries: L1 entries idle ≥ `l1_idle_ms` move to L2 (or
    /// are simply evicted if L2 is disabled); L2 entries idle ≥
    /// `l2_idle_ms` are evicted (conceptually demoted to L3, i.e. the
    /// cold files, which always still hold the data).
    pub fn demotion_sweep(&self, now_ms: i64, l1_idle_ms: i64, l2_idle_ms: i64, metrics: &GlobalMetrics) {
        let stale: Vec<SeriesId> = {
            let tracker = self.tracker.lock().expect("lock is poisoned");
            tracker
                .last_access_ms
                .iter()
                .filter(|(sid, &last)| now_ms - last >= l1_idle_ms && self.l1.get(sid).is_some())
                .map(|(&sid, _)| sid)
                .collect()
        };

        for sid in stale {
            if let Some(series) = self.l1.get(&sid) {
                self.l1.remove(&sid);
                metrics.cache_l1.demotions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if let Some(l2) = &self.l2 {
                    l2.insert(sid, series);
                }
            }
        }

        if let Some(l2) = &self.l2 {
            let stale: Vec<SeriesId> = {
                let tracker = self.tracker.lock().expect("lock is poisoned");
                tracker
                    .last_access_ms
                    .iter()
                    .filter(|(sid, &last)| now_ms - last >= l2_idle_ms && l2.get(sid).is_some())
                    .map(|(&sid, _)| sid)
                    .collect()
            };
            for sid in stale {
                l2.remove(&sid);
                metrics.cache_l2.demotions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let mut tracker = self.tracker.lock().expect("lock is poisoned");
                tracker.last_access_ms.remove(&sid);
                tracker.read_counts.remove(&sid);
            }
        }
    }

    #[must_use]
    pub fn l1_size_bytes(&self) -> u64 {
        self.l1.weight()
    }

    #[must_use]
    pub fn l2_size_bytes(&self) -> u64 {
        self.l2.as_ref().map_or(0, QuickCache::weight)
    }

    /// Removes any cached entry for `sid` from every level. Used when a
    /// series is deleted.
    pub fn evict(&self, sid: SeriesId) {
        self.l1.remove(&sid);
        if let Some(l2) = &self.l2 {
            l2.remove(&sid);
        }
        let mut tracker = self.tracker.lock().expect("lock is poisoned");
        tracker.last_access_ms.remove(&sid);
        tracker.read_counts.remove(&sid);
    }
}

fn record_hit(level: &CacheLevelMetrics) {
    level.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
}

fn record_miss(level: &CacheLevelMetrics) {
    level.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Labels;

    fn series() -> Arc<TimeSeries> {
        Arc::new(TimeSeries::new(Labels::from_pairs([("__name__", "cpu")])))
    }

    #[test]
    fn write_then_read_hits_l1() {
        let cache = TieredCache::new(1_000_000, Some(4_000_000));
        let metrics = GlobalMetrics::new();
        cache.insert_on_write(1, series(), 0);
        assert!(cache.get(1, &metrics, 1).is_some());
        assert_eq!(1, metrics.cache_l1.hits.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn cold_read_promotes_to_l2_after_threshold() {
        let cache = TieredCache::new(1_000_000, Some(4_000_000));
        let metrics = GlobalMetrics::new();
        cache.record_cold_read(2, series(), &metrics, 0);
        assert_eq!(0, metrics.cache_l2.promotions.load(std::sync::atomic::Ordering::Relaxed));
        cache.record_cold_read(2, series(), &metrics, 1);
        assert_eq!(1, metrics.cache_l2.promotions.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn disabled_l2_never_receives_promotions() {
        let cache = TieredCache::new(1_000_000, None);
        let metrics = GlobalMetrics::new();
        for t in 0..5 {
            cache.record_cold_read(3, series(), &metrics, t);
        }
        assert_eq!(0, metrics.cache_l2.promotions.load(std::sync::atomic::Ordering::Relaxed));
        assert_eq!(0, cache.l2_size_bytes());
    }

    #[test]
    fn demotion_sweep_moves_idle_l1_entries_to_l2() {
        let cache = TieredCache::new(1_000_000, Some(4_000_000));
        let metrics = GlobalMetrics::new();
        cache.insert_on_write(4, series(), 0);
        cache.demotion_sweep(DEFAULT_L1_IDLE_DEMOTE_MS + 1, DEFAULT_L1_IDLE_DEMOTE_MS, DEFAULT_L2_IDLE_DEMOTE_MS, &metrics);
        assert_eq!(1, metrics.cache_l1.demotions.load(std::sync::atomic::Ordering::Relaxed));
    }
}
