//! The storage engine orchestrator: wires together the
//! WAL, mutable/sealed blocks, inverted index, tiered cache, catalog, and
//! background processor behind one handle.
//!
//! `StorageEngine` is a thin `Arc<EngineInner>` handle -- cheap to clone,
//! and it lets the background processor's task handler close over an
//! `Arc<EngineInner>` to call back into the engine without the handle
//! owning itself.

pub mod caches;
pub mod config;

use std::collections::HashSet;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use crate::background::{BackgroundProcessor, TaskKind, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::block::{MutableBlock, SealedBlock};
use crate::cache::TieredCache;
use crate::catalog::FileCatalog;
use crate::coldfile::{self, bloom_sidecar_path, index_sidecar_path, query_cold_file, ColdFileReader, ColdFileWriter, Row};
use crate::error::{Error, Result};
use crate::id::IdGenerator;
use crate::index::InvertedIndex;
use crate::label::{LabelMatcher, Labels};
use crate::metrics::{GlobalMetrics, MetricsSnapshot, ScopedTimer, TimedOp};
use crate::pool::ObjectPools;
use crate::sample::{Sample, TimeSeries};
use crate::time::unix_timestamp_ms;
use crate::wal::Wal;

use caches::{BloomFilterCache, SecondaryIndexCache};
pub use config::{BackgroundConfig, Config, PersistedConfig, PoolsConfig};

/// How often the maintenance worker submits `Retention`/`CacheMaintenance`
/// /`MetricsCollection` (and considers `Compaction`) in the background.
const MAINTENANCE_INTERVAL_MS: u64 = 30_000;

const TIER_1: u32 = 1;

fn estimate_bytes(series: &TimeSeries) -> usize {
    series.labels.canonical().len() + series.samples.len() * 16
}

fn file_meta_from_stats(row_groups: Vec<coldfile::RowGroupStats>, file_size: u64) -> crate::catalog::FileMeta {
    let min_ts = row_groups.iter().map(|rg| rg.min_ts).min().unwrap_or(0);
    let max_ts = row_groups.iter().map(|rg| rg.max_ts).max().unwrap_or(0);
    crate::catalog::FileMeta { min_ts, max_ts, row_groups, file_size }
}

struct MaintenanceWorker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

fn spawn_maintenance_worker(engine: Arc<EngineInner>, interval_ms: u64) -> MaintenanceWorker {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let handle = std::thread::Builder::new()
        .name("tsdb-maintenance".into())
        .spawn(move || loop {
            match stop_rx.recv_timeout(Duration::from_millis(interval_ms)) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => engine.run_periodic_maintenance(),
            }
        })
        .expect("failed to spawn tsdb-maintenance thread");

    MaintenanceWorker { stop: stop_tx, handle }
}

/// All engine state. Reachable only through [`StorageEngine`]; methods here
/// take `&self` since every field manages its own interior mutability.
pub struct EngineInner {
    config: Config,
    wal: Wal,
    mutable_block: RwLock<Arc<MutableBlock>>,
    sealed_blocks: RwLock<Arc<Vec<Arc<SealedBlock>>>>,
    index: InvertedIndex,
    catalog: FileCatalog,
    cold_file_paths: RwLock<Vec<PathBuf>>,
    cache: TieredCache,
    bloom_cache: BloomFilterCache,
    secondary_index_cache: SecondaryIndexCache,
    metrics: GlobalMetrics,
    background: Mutex<Option<BackgroundProcessor>>,
    maintenance: Mutex<Option<MaintenanceWorker>>,
    block_ids: IdGenerator,
    file_ids: IdGenerator,
    pools: Arc<ObjectPools>,
}

impl EngineInner {
    fn blocks_dir(&self) -> PathBuf {
        self.config.data_dir.join("blocks")
    }

    fn cold_tier_dir(&self, tier: u32) -> PathBuf {
        self.config.data_dir.join(tier.to_string())
    }

    fn sealed_block_path(&self, id: u64) -> PathBuf {
        self.blocks_dir().join(format!("{id}.block"))
    }

    fn cold_file_path(&self, tier: u32, file_id: u64) -> PathBuf {
        self.cold_tier_dir(tier).join(format!("{file_id}.parquet"))
    }

    fn persist_sealed_block_file(&self, block: &SealedBlock) -> Result<()> {
        fs::create_dir_all(self.blocks_dir())?;
        fs::write(self.sealed_block_path(block.id()), block.serialize()?)?;
        Ok(())
    }

    fn remove_sealed_block_file(&self, id: u64) {
        let _ = fs::remove_file(self.sealed_block_path(id));
    }

    fn register_cold_file(&self, path: PathBuf) {
        self.cold_file_paths.write().expect("lock is poisoned").push(path);
    }

    fn unregister_cold_file(&self, path: &Path) {
        self.cold_file_paths.write().expect("lock is poisoned").retain(|p| p != path);
    }

    #[must_use]
    fn known_cold_files(&self) -> Vec<PathBuf> {
        self.cold_file_paths.read().expect("lock is poisoned").clone()
    }

    fn evict_cold_file(&self, path: &Path) {
        caches::evict_all(&self.catalog, &self.bloom_cache, &self.secondary_index_cache, path);
        self.unregister_cold_file(path);
    }

    fn delete_cold_file(&self, path: &Path) -> Result<()> {
        self.evict_cold_file(path);
        let _ = fs::remove_file(bloom_sidecar_path(path));
        let _ = fs::remove_file(index_sidecar_path(path));
        fs::remove_file(path)?;
        Ok(())
    }

    fn tier_of(path: &Path) -> u32 {
        path.parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse().ok())
            .unwrap_or(TIER_1)
    }

    // --- write path ----------------------------------------------------

    /// Appends `series` to the WAL and current mutable block, rotating and
    /// enqueueing a flush if the block is now full or old enough.
    pub fn write(&self, series: TimeSeries) -> Result<()> {
        let _total = ScopedTimer::start(&self.metrics, TimedOp::WriteTotal);

        if series.labels.is_empty() {
            return Err(Error::InvalidArgument("series labels must not be empty".into()));
        }

        let now = unix_timestamp_ms();
        let bytes = estimate_bytes(&series);

        {
            let _t = ScopedTimer::start(&self.metrics, TimedOp::IndexInsert);
            self.index.insert(&series.labels);
        }

        {
            let _t = ScopedTimer::start(&self.metrics, TimedOp::WalWrite);
            self.wal.append(&series)?;
        }

        let block = {
            let guard = self.mutable_block.read().expect("lock is poisoned");
            guard.begin_write();
            Arc::clone(&*guard)
        };

        {
            let _t = ScopedTimer::start(&self.metrics, TimedOp::SampleAppend);
            for sample in &series.samples {
                block.append(&series.labels, sample.clone());
            }
        }
        block.end_write();

        self.metrics.writes.count.fetch_add(1, Ordering::Relaxed);
        self.metrics.writes.bytes.fetch_add(bytes as u64, Ordering::Relaxed);

        if block.should_rotate(self.config.block_size, self.config.block_duration_ms, now) && block.try_begin_rotation() {
            self.rotate(&block)?;
        }

        {
            let _t = ScopedTimer::start(&self.metrics, TimedOp::CacheUpdate);
            let sid = series.labels.series_id();
            self.cache.insert_on_write(sid, Arc::new(series), now);
        }

        Ok(())
    }

    /// Seals `current`, persists it for crash-forensics, publishes a fresh
    /// mutable block, then enqueues a flush of the newly sealed block.
    /// `current.try_begin_rotation()` must already have won before this is
    /// called, so at most one caller ever rotates a given block.
    fn rotate(&self, current: &Arc<MutableBlock>) -> Result<()> {
        let new_block = Arc::new(MutableBlock::new(self.block_ids.next()));
        *self.mutable_block.write().expect("lock is poisoned") = Arc::clone(&new_block);

        // Any writer that grabbed `current` before the swap above already
        // called `begin_write` while holding the read lock; this waits out
        // whichever of those are still mid-append before we read a final,
        // consistent snapshot of `current`'s buffers.
        current.wait_quiescent();

        let sealed = {
            let _t = ScopedTimer::start(&self.metrics, TimedOp::BlockSeal);
            Arc::new(current.seal(&self.config.compression))
        };

        if let Err(err) = self.persist_sealed_block_file(&sealed) {
            warn!("failed to persist sealed block {} to disk: {err}", sealed.id());
        }

        {
            let mut guard = self.sealed_blocks.write().expect("lock is poisoned");
            let mut next = (**guard).clone();
            next.push(Arc::clone(&sealed));
            *guard = Arc::new(next);
        }

        self.trigger(TaskKind::Flush);
        Ok(())
    }

    // --- read path -------------------------------------------------------

    /// Returns the union of hot, sealed-but-unflushed, and cold-tier
    /// samples for `labels` in `[t0, t1]`, deduplicated by timestamp.
    /// `t0 > t1` returns an empty series rather than an error.
    pub fn read(&self, labels: &Labels, t0: i64, t1: i64) -> Result<TimeSeries> {
        let _total = ScopedTimer::start(&self.metrics, TimedOp::ReadTotal);

        let mut out = TimeSeries::new(labels.clone());
        if t0 > t1 {
            return Ok(out);
        }

        let now = unix_timestamp_ms();
        let sid = labels.series_id();

        {
            let _t = ScopedTimer::start(&self.metrics, TimedOp::BlockLookup);
            let mutable = Arc::clone(&*self.mutable_block.read().expect("lock is poisoned"));
            out.samples.extend(mutable.read(labels).samples);

            let sealed = Arc::clone(&*self.sealed_blocks.read().expect("lock is poisoned"));
            for block in sealed.iter() {
                out.samples.extend(block.read(labels).samples);
            }
        }

        // A cache hit here only tells us a prior write or cold read touched
        // this series -- it is never a complete substitute for the cold-tier
        // scan below. `insert_on_write` refreshes L1 with only the samples
        // from one `write()` call, which is a strict subset of whatever has
        // already reached cold storage; treating that hit as authoritative
        // would mask already-flushed samples once the hot/sealed blocks
        // above no longer hold them (e.g. after a flush followed by more
        // writes). So every read always merges the cold-tier result too;
        // the cache's job is to avoid garbage-collecting this series'
        // decoded form between reads (promotion/demotion, hit-ratio stats),
        // not to let a read skip the cold scan entirely. Bloom-filter Phase
        // 0 pruning keeps that scan cheap when the series has no cold data.
        if let Some(cached) = self.cache.get(sid, &self.metrics, now) {
            out.samples.extend(cached.samples.iter().cloned());
        }

        let cold = self.read_cold(labels, sid, i64::MIN, i64::MAX)?;
        if !cold.samples.is_empty() {
            self.cache.record_cold_read(sid, Arc::new(cold.clone()), &self.metrics, now);
        }
        out.samples.extend(cold.samples);

        self.metrics.reads.count.fetch_add(1, Ordering::Relaxed);
        self.metrics.reads.samples_scanned.fetch_add(out.samples.len() as u64, Ordering::Relaxed);

        out.clip(t0, t1);
        out.sort_and_dedup();
        self.metrics.reads.bytes.fetch_add(estimate_bytes(&out) as u64, Ordering::Relaxed);
        Ok(out)
    }

    /// Scans every cold file whose file-level range overlaps `[t0, t1]`,
    /// Phase-0-pruning with the bloom filter before opening the file at
    /// all, then delegating Phase 1 (time + tag pruning) to
    /// [`query_cold_file`].
    fn read_cold(&self, labels: &Labels, sid: crate::label::SeriesId, t0: i64, t1: i64) -> Result<TimeSeries> {
        let mut out = TimeSeries::new(labels.clone());
        let matchers: Vec<LabelMatcher> = labels
            .iter()
            .map(|(name, value)| LabelMatcher::Equal { name: name.into(), value: value.into() })
            .collect();

        for path in self.known_cold_files() {
            let meta = self.catalog.get_file_meta(&path)?;
            if meta.max_ts < t0 || meta.min_ts > t1 {
                continue;
            }

            self.metrics.bloom.checks.fetch_add(1, Ordering::Relaxed);
            let bloom = {
                let _t = ScopedTimer::start(&self.metrics, TimedOp::BloomLookup);
                self.bloom_cache.get_or_load(&path)?
            };
            if !bloom.might_contain(sid) {
                self.metrics.bloom.skips.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.metrics.bloom.passes.fetch_add(1, Ordering::Relaxed);

            let _t = ScopedTimer::start(&self.metrics, TimedOp::ColdProcessing);
            let mut reader = ColdFileReader::open(&path)?;
            let (series, prune) = query_cold_file(&mut reader, &matchers, t0, t1)?;
            self.record_prune_stats(prune);
            for s in series {
                out.samples.extend(s.samples);
            }
        }

        Ok(out)
    }

    fn record_prune_stats(&self, prune: coldfile::PruneStats) {
        let m = &self.metrics.cold_query;
        m.row_groups_total.fetch_add(u64::from(prune.total), Ordering::Relaxed);
        m.row_groups_pruned_time.fetch_add(u64::from(prune.pruned_time), Ordering::Relaxed);
        m.row_groups_pruned_tags.fetch_add(u64::from(prune.pruned_tags), Ordering::Relaxed);
        m.row_groups_read.fetch_add(u64::from(prune.read), Ordering::Relaxed);
        m.bytes_skipped.fetch_add(prune.bytes_skipped, Ordering::Relaxed);
        m.bytes_read.fetch_add(prune.bytes_read, Ordering::Relaxed);
    }

    /// Resolves `matchers` against the index, then runs [`EngineInner::read`]'s
    /// per-series pipeline for each candidate.
    pub fn query(&self, matchers: &[LabelMatcher], t0: i64, t1: i64) -> Result<Vec<TimeSeries>> {
        if t0 > t1 {
            return Ok(Vec::new());
        }
        let candidates = {
            let _t = ScopedTimer::start(&self.metrics, TimedOp::IndexSearch);
            self.index.query(matchers)
        };

        let mut out = Vec::with_capacity(candidates.len());
        for labels in candidates {
            out.push(self.read(&labels, t0, t1)?);
        }
        Ok(out)
    }

    #[must_use]
    pub fn label_names(&self) -> Vec<String> {
        self.index.label_names()
    }

    #[must_use]
    pub fn label_values(&self, name: &str) -> Vec<String> {
        self.index.label_values(name)
    }

    /// Removes matching series from the index immediately; their samples
    /// remain in already-written WAL segments, blocks, and cold files
    /// until a subsequent compaction drops them.
    pub fn delete_series(&self, matchers: &[LabelMatcher]) -> Result<()> {
        let victims = self.index.delete_series(matchers);
        for labels in victims {
            self.cache.evict(labels.series_id());
        }
        Ok(())
    }

    // --- lifecycle -------------------------------------------------------

    fn new(config: Config) -> Result<(Self, Vec<TimeSeries>)> {
        if config.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("data_dir must not be empty".into()));
        }
        fs::create_dir_all(&config.data_dir)?;

        if let Some(persisted) = PersistedConfig::load(&config.data_dir)? {
            let current = config.persisted();
            if persisted != current {
                warn!("engine config at {:?} differs from the config stored in CONFIG; proceeding with the supplied config", config.data_dir);
            }
        }
        config.persisted().save(&config.data_dir)?;

        // Sealed-but-unflushed blocks persisted for crash forensics are
        // superseded by WAL replay below (the WAL is only ever truncated on
        // a clean close), so any left over from a previous run are stale.
        if let Ok(entries) = fs::read_dir(config.data_dir.join("blocks")) {
            for entry in entries.filter_map(|e| e.ok()) {
                let _ = fs::remove_file(entry.path());
            }
        }

        let mut replayed = Vec::new();
        let wal = Wal::open(&config.data_dir, config.wal_segment_max_bytes, config.wal_fsync_policy, |series| {
            replayed.push(series);
        })?;

        let index = InvertedIndex::new();
        let catalog = FileCatalog::new();
        let mut cold_file_paths = Vec::new();
        let mut max_file_id = 0u64;

        if let Ok(tiers) = fs::read_dir(&config.data_dir) {
            for tier_entry in tiers.filter_map(|e| e.ok()) {
                let tier_path = tier_entry.path();
                if !tier_path.is_dir() || tier_path.file_name().and_then(|n| n.to_str()).and_then(|n| n.parse::<u32>().ok()).is_none() {
                    continue;
                }
                let Ok(files) = fs::read_dir(&tier_path) else { continue };
                for file_entry in files.filter_map(|e| e.ok()) {
                    let path = file_entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                        continue;
                    }
                    if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u64>().ok()) {
                        max_file_id = max_file_id.max(id + 1);
                    }
                    cold_file_paths.push(path);
                }
            }
        }

        let engine = Self {
            wal,
            mutable_block: RwLock::new(Arc::new(MutableBlock::new(0))),
            sealed_blocks: RwLock::new(Arc::new(Vec::new())),
            index,
            catalog,
            cold_file_paths: RwLock::new(cold_file_paths),
            cache: TieredCache::new(config.cache_size_bytes, config.l2_cache_size_bytes),
            bloom_cache: BloomFilterCache::new(),
            secondary_index_cache: SecondaryIndexCache::new(),
            metrics: GlobalMetrics::new(),
            background: Mutex::new(None),
            maintenance: Mutex::new(None),
            block_ids: IdGenerator::starting_at(1),
            file_ids: IdGenerator::starting_at(max_file_id),
            pools: Arc::clone(&config.object_pools),
            config,
        };

        Ok((engine, replayed))
    }

    /// Seals the current block (if non-empty) and synchronously flushes
    /// every sealed-but-unflushed block to cold storage.
    pub fn flush(&self) -> Result<()> {
        let block = {
            let guard = self.mutable_block.read().expect("lock is poisoned");
            guard.begin_write();
            Arc::clone(&*guard)
        };
        block.end_write();

        if block.sample_count() > 0 && block.try_begin_rotation() {
            self.rotate(&block)?;
        }
        self.do_flush()
    }

    /// Drains the sealed-but-unflushed block list, writing each to a new
    /// tier-1 cold file. A block that fails to flush is put back for a
    /// later retry; its samples are never lost since the WAL still has
    /// them.
    fn do_flush(&self) -> Result<()> {
        let blocks: Vec<Arc<SealedBlock>> = {
            let mut guard = self.sealed_blocks.write().expect("lock is poisoned");
            let drained = (**guard).clone();
            *guard = Arc::new(Vec::new());
            drained
        };

        let mut failed = Vec::new();
        let mut first_err = None;

        for block in blocks {
            match self.flush_one(&block) {
                Ok(()) => self.remove_sealed_block_file(block.id()),
                Err(err) => {
                    warn!("flush of block {} failed, will retry: {err}", block.id());
                    first_err.get_or_insert_with(|| Error::Internal(err.to_string()));
                    failed.push(block);
                }
            }
        }

        if !failed.is_empty() {
            let mut guard = self.sealed_blocks.write().expect("lock is poisoned");
            let mut next = (**guard).clone();
            next.extend(failed);
            *guard = Arc::new(next);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn flush_one(&self, block: &SealedBlock) -> Result<()> {
        let _t = ScopedTimer::start(&self.metrics, TimedOp::BlockPersist);

        fs::create_dir_all(self.cold_tier_dir(TIER_1))?;
        let file_id = self.file_ids.next();
        let path = self.cold_file_path(TIER_1, file_id);

        let mut writer = ColdFileWriter::create(&path, self.config.row_group_bytes, self.config.bloom_ndv, self.config.bloom_fpp)?;

        // `SealedBlock` only exposes `read`/`query`, not a raw per-series
        // iterator, so every label the index knows about is probed; labels
        // this block never buffered simply return an empty series.
        for labels in self.index_known_labels() {
            let series = block.read(&labels);
            if series.samples.is_empty() {
                continue;
            }
            let crc = labels.crc32();
            let canonical = labels.canonical();
            let sid = labels.series_id();
            for sample in &series.samples {
                writer.append_row(Row {
                    series_id: sid,
                    labels_crc32: crc,
                    canonical_labels: canonical.clone(),
                    timestamp: sample.timestamp,
                    value: sample.value,
                })?;
            }
        }

        let stats = writer.finish()?;
        let file_size = fs::metadata(&path)?.len();
        self.catalog.insert(path.clone(), file_meta_from_stats(stats, file_size));
        self.register_cold_file(path);
        Ok(())
    }

    fn index_known_labels(&self) -> Vec<Labels> {
        self.index.query(&[])
    }

    // --- compaction / retention / cache maintenance ----------------------

    /// Synchronously merges the smallest adjacent tier-1 cold files (at
    /// least [`Config::min_files_to_compact`]) into one tier-(N+1) file,
    /// evicting and deleting the originals only once the merged file is
    /// durable.
    pub fn compact(&self) -> Result<()> {
        self.do_compaction()
    }

    fn do_compaction(&self) -> Result<()> {
        let mut candidates = self.known_cold_files();
        candidates.sort_by_key(|p| fs::metadata(p).map(|m| m.len()).unwrap_or(0));

        if candidates.len() < self.config.min_files_to_compact {
            return Ok(());
        }
        let inputs: Vec<PathBuf> = candidates.into_iter().take(self.config.min_files_to_compact).collect();

        let tier = inputs.iter().map(|p| Self::tier_of(p) + 1).max().unwrap_or(TIER_1 + 1);
        fs::create_dir_all(self.cold_tier_dir(tier))?;
        let file_id = self.file_ids.next();
        let output_path = self.cold_file_path(tier, file_id);

        match self.merge_cold_files(&inputs, &output_path) {
            Ok(stats) => {
                let file_size = fs::metadata(&output_path)?.len();
                self.catalog.insert(output_path.clone(), file_meta_from_stats(stats, file_size));
                self.register_cold_file(output_path);
                for input in &inputs {
                    if let Err(err) = self.delete_cold_file(input) {
                        warn!("failed to remove compacted input {input:?}: {err}");
                    }
                }
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&output_path);
                Err(err)
            }
        }
    }

    fn merge_cold_files(&self, inputs: &[PathBuf], output_path: &Path) -> Result<Vec<coldfile::RowGroupStats>> {
        let mut rows: Vec<Row> = Vec::new();
        for input in inputs {
            let mut reader = ColdFileReader::open(input)?;
            for i in 0..reader.num_row_groups() {
                rows.extend(reader.read_row_group(i)?.rows);
            }
        }
        rows.sort_by(|a, b| a.series_id.cmp(&b.series_id).then(a.timestamp.cmp(&b.timestamp)));
        rows.dedup_by(|a, b| a.series_id == b.series_id && a.timestamp == b.timestamp);

        let mut writer = ColdFileWriter::create(output_path, self.config.row_group_bytes, self.config.bloom_ndv, self.config.bloom_fpp)?;
        for row in rows {
            writer.append_row(row)?;
        }
        writer.finish()
    }

    fn do_retention(&self) -> Result<()> {
        let now = unix_timestamp_ms();
        let cutoff = now.saturating_sub(self.config.retention_period_ms);

        for path in self.known_cold_files() {
            let meta = self.catalog.get_file_meta(&path)?;
            if meta.max_ts < cutoff {
                self.delete_cold_file(&path)?;
            }
        }
        Ok(())
    }

    fn do_cache_maintenance(&self) {
        let now = unix_timestamp_ms();
        self.cache.demotion_sweep(
            now,
            crate::cache::DEFAULT_L1_IDLE_DEMOTE_MS,
            crate::cache::DEFAULT_L2_IDLE_DEMOTE_MS,
            &self.metrics,
        );
    }

    /// Pushes a snapshot of a handful of headline counters into their own
    /// self-monitoring series, so operators can query the engine's own
    /// metrics the same way they'd query any other series.
    fn do_metrics_collection(&self) -> Result<()> {
        let snapshot = self.metrics.snapshot();
        let now = unix_timestamp_ms();

        for (name, value) in self_monitoring_series(&snapshot) {
            let labels = Labels::from_pairs([("__name__", name)]);
            self.wal.append(&TimeSeries::with_samples(labels.clone(), vec![Sample::new(now, value)]))?;
            let block = {
                let guard = self.mutable_block.read().expect("lock is poisoned");
                guard.begin_write();
                Arc::clone(&*guard)
            };
            block.append(&labels, Sample::new(now, value));
            block.end_write();
        }
        Ok(())
    }

    fn run_periodic_maintenance(&self) {
        if self.config.background.enable_auto_cleanup {
            self.trigger(TaskKind::Retention);
            self.trigger(TaskKind::CacheMaintenance);
        }
        if self.config.background.enable_metrics_collection {
            self.trigger(TaskKind::MetricsCollection);
        }
        if self.config.background.enable_auto_compaction && self.known_cold_files().len() >= self.config.min_files_to_compact {
            self.trigger(TaskKind::Compaction);
        }
    }

    fn dispatch(&self, kind: TaskKind) {
        let result = match kind {
            TaskKind::Flush => self.do_flush(),
            TaskKind::Compaction => self.do_compaction(),
            TaskKind::Retention => self.do_retention(),
            TaskKind::CacheMaintenance => {
                self.do_cache_maintenance();
                Ok(())
            }
            TaskKind::MetricsCollection => self.do_metrics_collection(),
        };
        if let Err(err) = result {
            warn!("background task {kind:?} failed: {err}");
        }
    }

    /// Submits `kind` to the background processor if one is running;
    /// otherwise (or if the processor has no room) runs it inline.
    fn trigger(&self, kind: TaskKind) {
        let submitted = {
            let guard = self.background.lock().expect("lock is poisoned");
            guard.as_ref().map(|bp| bp.submit(kind))
        };
        match submitted {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                debug!("background processor rejected {kind:?} ({err}), running inline");
                self.dispatch(kind);
            }
            None => self.dispatch(kind),
        }
    }

    /// Renders a human-readable snapshot of every metric named in
    /// human-readable summary plus a JSON variant for self-monitoring.
    #[must_use]
    pub fn stats(&self) -> String {
        let s = self.metrics.snapshot();
        format!(
            "writes: count={} bytes={} avg_ns={:.0}\n\
             reads: count={} bytes={} avg_ns={:.0}\n\
             cold_query: row_groups_total={} row_groups_read={}\n\
             bloom: skip_ratio={:.4}\n\
             cache: l1_hit_ratio={:.4} l2_hit_ratio={:.4} l3_hit_ratio={:.4}\n\
             compression: ratio={:.4}\n\
             series_count={}",
            s.write_count,
            s.write_bytes,
            s.write_avg_ns,
            s.read_count,
            s.read_bytes,
            s.read_avg_ns,
            s.cold_row_groups_total,
            s.cold_row_groups_read,
            s.bloom_skip_ratio,
            s.cache_l1_hit_ratio,
            s.cache_l2_hit_ratio,
            s.cache_l3_hit_ratio,
            s.compression_ratio,
            self.index.series_count(),
        )
    }

    /// Hand-built JSON rendering of the same snapshot as [`EngineInner::stats`],
    /// for self-monitoring front-ends. No `serde_json` dependency: this is
    /// a small, fixed set of fields assembled with `write!`.
    #[must_use]
    pub fn stats_json(&self) -> String {
        let s = self.metrics.snapshot();
        format!(
            "{{\"write_count\":{},\"write_bytes\":{},\"read_count\":{},\"read_bytes\":{},\
             \"cold_row_groups_total\":{},\"cold_row_groups_read\":{},\"bloom_skip_ratio\":{:.6},\
             \"cache_l1_hit_ratio\":{:.6},\"cache_l2_hit_ratio\":{:.6},\"cache_l3_hit_ratio\":{:.6},\
             \"compression_ratio\":{:.6},\"series_count\":{}}}",
            s.write_count,
            s.write_bytes,
            s.read_count,
            s.read_bytes,
            s.cold_row_groups_total,
            s.cold_row_groups_read,
            s.bloom_skip_ratio,
            s.cache_l1_hit_ratio,
            s.cache_l2_hit_ratio,
            s.cache_l3_hit_ratio,
            s.compression_ratio,
            self.index.series_count(),
        )
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    #[must_use]
    pub fn object_pools(&self) -> &ObjectPools {
        &self.pools
    }

    /// Re-reads every cold file's footer and row groups, checking the
    /// checksums that `zstd`/column decode already validate, and returns
    /// the total bytes verified. Exists for operator tooling, not the
    /// public data-path API.
    #[doc(hidden)]
    pub fn verify(&self) -> Result<u64> {
        let mut bytes = 0u64;
        let mut visited = HashSet::new();

        for path in self.known_cold_files() {
            if !visited.insert(path.clone()) {
                continue;
            }
            let mut reader = ColdFileReader::open(&path)?;
            for i in 0..reader.num_row_groups() {
                let batch = reader.read_row_group(i)?;
                bytes += batch.rows.len() as u64 * 24;
            }
        }
        Ok(bytes)
    }
}

/// `(metric name, value)` pairs written by `MetricsCollection`.
fn self_monitoring_series(s: &MetricsSnapshot) -> Vec<(&'static str, f64)> {
    vec![
        ("tsdb_write_count", s.write_count as f64),
        ("tsdb_read_count", s.read_count as f64),
        ("tsdb_cache_l1_hit_ratio", s.cache_l1_hit_ratio),
        ("tsdb_compression_ratio", s.compression_ratio),
    ]
}

/// Thin, cloneable handle over [`EngineInner`]: cheap to share across
/// threads, and it's what lets the background processor call back into
/// engine methods.
#[derive(Clone)]
pub struct StorageEngine(Arc<EngineInner>);

impl Deref for StorageEngine {
    type Target = EngineInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl StorageEngine {
    /// Opens (or creates) the engine at `config.data_dir`: replays the
    /// WAL, scans for existing cold files, and starts the background
    /// processor and periodic maintenance worker if `config.background.enable`.
    pub fn init(config: Config) -> Result<Self> {
        let background_enabled = config.background.enable;
        let threads = config.background.threads;
        let (inner, replayed) = EngineInner::new(config)?;
        let inner = Arc::new(inner);

        for series in replayed {
            let block = {
                let guard = inner.mutable_block.read().expect("lock is poisoned");
                guard.begin_write();
                Arc::clone(&*guard)
            };
            for sample in &series.samples {
                block.append(&series.labels, sample.clone());
            }
            block.end_write();
            inner.index.insert(&series.labels);
        }

        if background_enabled {
            let handler_inner = Arc::clone(&inner);
            let processor = BackgroundProcessor::spawn(threads, Arc::new(move |kind| handler_inner.dispatch(kind)));
            *inner.background.lock().expect("lock is poisoned") = Some(processor);

            let maintenance_inner = Arc::clone(&inner);
            let worker = spawn_maintenance_worker(maintenance_inner, MAINTENANCE_INTERVAL_MS);
            *inner.maintenance.lock().expect("lock is poisoned") = Some(worker);
        }

        Ok(Self(inner))
    }

    /// Flushes, stops the background processor and maintenance worker, and
    /// truncates the WAL. Idempotent: a second call is a no-op.
    pub fn close(&self) -> Result<()> {
        self.flush()?;

        if let Some(worker) = self.maintenance.lock().expect("lock is poisoned").take() {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
        }

        if let Some(processor) = self.background.lock().expect("lock is poisoned").take() {
            processor.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
        }

        self.wal.truncate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn no_background(dir: &Path) -> Config {
        Config::new(dir).background(BackgroundConfig {
            enable: false,
            ..BackgroundConfig::default()
        })
    }

    fn series(name: &str, samples: &[(i64, f64)]) -> TimeSeries {
        TimeSeries::with_samples(
            Labels::from_pairs([("__name__", name)]),
            samples.iter().map(|&(t, v)| Sample::new(t, v)).collect(),
        )
    }

    #[test]
    fn write_then_read_sees_the_sample_immediately() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        engine.write(series("cpu", &[(1000, 1.0)])).unwrap();

        let ts = engine.read(&Labels::from_pairs([("__name__", "cpu")]), 0, 2000).unwrap();
        assert_eq!(1, ts.samples.len());
        assert_eq!((1000, 1.0), (ts.samples[0].timestamp, ts.samples[0].value));
    }

    #[test]
    fn restart_recovers_via_wal_replay() {
        let dir = tempdir().unwrap();
        {
            let engine = StorageEngine::init(no_background(dir.path())).unwrap();
            engine.write(series("cpu", &[(1000, 1.0)])).unwrap();
        }

        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        let ts = engine.read(&Labels::from_pairs([("__name__", "cpu")]), 0, 2000).unwrap();
        assert_eq!(1, ts.samples.len());
    }

    #[test]
    fn invalid_time_range_returns_empty_not_error() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        engine.write(series("cpu", &[(1000, 1.0)])).unwrap();

        let ts = engine.read(&Labels::from_pairs([("__name__", "cpu")]), 2000, 1000).unwrap();
        assert!(ts.samples.is_empty());
    }

    #[test]
    fn read_after_flush_and_more_writes_sees_both_cold_and_hot_samples() {
        // A cache hit must never short-circuit the cold-tier scan: after a
        // flush empties the hot tier, the L1 entry `insert_on_write` leaves
        // behind only reflects the most recent `write()` call, not the
        // samples that are now on disk.
        let dir = tempdir().unwrap();
        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        let labels = Labels::from_pairs([("__name__", "cpu")]);

        engine.write(series("cpu", &[(1000, 1.0), (2000, 2.0)])).unwrap();
        engine.flush().unwrap();
        engine.write(series("cpu", &[(3000, 3.0)])).unwrap();

        let ts = engine.read(&labels, 0, 5000).unwrap();
        assert_eq!(
            vec![(1000, 1.0), (2000, 2.0), (3000, 3.0)],
            ts.samples.iter().map(|s| (s.timestamp, s.value)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn flush_moves_sealed_block_into_a_cold_file_and_read_still_sees_it() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        engine.write(series("cpu", &[(1000, 1.0), (2000, 2.0)])).unwrap();
        engine.flush().unwrap();

        assert_eq!(1, engine.known_cold_files().len());
        let ts = engine.read(&Labels::from_pairs([("__name__", "cpu")]), 0, 5000).unwrap();
        assert_eq!(2, ts.samples.len());
    }

    #[test]
    fn compact_merges_small_files_and_preserves_samples() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path())
            .block_size(1)
            .background(BackgroundConfig { enable: false, ..BackgroundConfig::default() });
        let engine = StorageEngine::init(config).unwrap();

        for i in 0..6 {
            engine.write(series("compact_me", &[(1000 + i, i as f64)])).unwrap();
            engine.flush().unwrap();
        }

        assert!(engine.known_cold_files().len() >= 5);
        engine.compact().unwrap();

        let ts = engine.read(&Labels::from_pairs([("__name__", "compact_me")]), 0, 10_000).unwrap();
        assert_eq!(6, ts.samples.len());
    }

    #[test]
    fn delete_series_removes_from_index() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        engine.write(series("gone", &[(1, 1.0)])).unwrap();

        engine
            .delete_series(&[LabelMatcher::Equal { name: "__name__".into(), value: "gone".into() }])
            .unwrap();

        assert!(engine.label_values("__name__").is_empty());
    }

    #[test]
    fn collision_forced_series_returns_empty_not_other_series_data() {
        crate::label::set_series_id_hasher_for_test(|_| 99);
        let dir = tempdir().unwrap();
        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        engine.write(series("a", &[(1000, 1.0)])).unwrap();

        let ts = engine.read(&Labels::from_pairs([("__name__", "b")]), 0, 2000).unwrap();
        assert!(ts.samples.is_empty());
        crate::label::reset_series_id_hasher_for_test();
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        engine.write(series("cpu", &[(1, 1.0)])).unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn stats_json_is_well_formed() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::init(no_background(dir.path())).unwrap();
        engine.write(series("cpu", &[(1, 1.0)])).unwrap();
        let json = engine.stats_json();
        assert!(json.starts_with('{') && json.ends_with('}'));
        assert!(json.contains("\"write_count\":1"));
    }
}
