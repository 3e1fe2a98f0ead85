//! Engine configuration: a builder-style [`Config`] carrying runtime-only
//! handles behind `Arc`, and the on-disk-serializable [`PersistedConfig`]
//! subset written to `<data_dir>/CONFIG` and checked on recovery -- `Config`
//! carries shared runtime handles (pools, background settings) while
//! `PersistedConfig` is just the bytes that need to agree across restarts.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::compression::{CompressionAlgorithm, CompressionConfig};
use crate::error::{Error, Result};
use crate::path::absolute_path;
use crate::pool::{ObjectPools, PoolConfig};
use crate::wal::FsyncPolicy;

const PERSISTED_CONFIG_MAGIC: u32 = 0x5453_4347; // "TSCG"
const PERSISTED_CONFIG_VERSION: u16 = 1;

/// Per-task enable flags for the background processor.
#[derive(Copy, Clone, Debug)]
pub struct BackgroundConfig {
    pub enable: bool,
    pub enable_auto_compaction: bool,
    pub enable_auto_cleanup: bool,
    pub enable_metrics_collection: bool,
    pub threads: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enable: true,
            enable_auto_compaction: true,
            enable_auto_cleanup: true,
            enable_metrics_collection: true,
            threads: 2,
        }
    }
}

/// `{initial_size, max_size}` for each of the three object pools.
#[derive(Copy, Clone, Debug)]
pub struct PoolsConfig {
    pub time_series: PoolConfig,
    pub labels: PoolConfig,
    pub samples: PoolConfig,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            time_series: PoolConfig::default(),
            labels: PoolConfig::default(),
            samples: PoolConfig::default(),
        }
    }
}

/// Engine configuration. Cheap to clone: the object pools, the only
/// runtime-only shared handle this engine needs, live behind an `Arc`.
#[derive(Clone)]
pub struct Config {
    /// Filesystem root for the WAL, sealed-but-unflushed blocks, and cold
    /// files.
    #[doc(hidden)]
    pub data_dir: PathBuf,

    /// Max samples buffered in the current mutable block before rotation.
    pub block_size: usize,

    /// Max wall-clock age (ms) of the current mutable block before
    /// rotation.
    pub block_duration_ms: i64,

    /// Retention cap on sealed-but-unflushed blocks per series; present
    /// for parity with the original source's per-series block cap, not
    /// separately enforced beyond triggering more eager flushes.
    #[allow(unused)]
    pub max_blocks_per_series: usize,

    /// L1 cache capacity in bytes.
    pub cache_size_bytes: u64,

    /// L2 cache capacity in bytes; `None` disables L2.
    pub l2_cache_size_bytes: Option<u64>,

    /// Cold files whose `max_ts` is older than `now - retention_period_ms`
    /// are dropped by the `Retention` background task.
    pub retention_period_ms: i64,

    pub compression: CompressionConfig,
    pub background: BackgroundConfig,

    pub wal_fsync_policy: FsyncPolicy,
    pub wal_segment_max_bytes: u64,

    pub pools: PoolsConfig,

    /// Estimated distinct series per cold file and target false-positive
    /// rate for that file's bloom filter.
    pub bloom_ndv: usize,
    pub bloom_fpp: f32,

    /// Bound on a cold-file row group's uncompressed byte size.
    pub row_group_bytes: u64,

    /// Minimum number of small adjacent cold files `compact()` merges in
    /// one pass.
    pub min_files_to_compact: usize,

    /// Shared object pools, built once from `pools` at construction time.
    #[doc(hidden)]
    pub object_pools: Arc<ObjectPools>,
}

impl Config {
    /// Starts a config rooted at `data_dir`, with every other option at
    /// its default.
    #[must_use]
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: absolute_path(data_dir),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn block_size(mut self, value: usize) -> Self {
        self.block_size = value;
        self
    }

    #[must_use]
    pub fn block_duration_ms(mut self, value: i64) -> Self {
        self.block_duration_ms = value;
        self
    }

    #[must_use]
    pub fn cache_size_bytes(mut self, value: u64) -> Self {
        self.cache_size_bytes = value;
        self
    }

    #[must_use]
    pub fn l2_cache_size_bytes(mut self, value: Option<u64>) -> Self {
        self.l2_cache_size_bytes = value;
        self
    }

    #[must_use]
    pub fn retention_period_ms(mut self, value: i64) -> Self {
        self.retention_period_ms = value;
        self
    }

    #[must_use]
    pub fn enable_compression(mut self, enabled: bool) -> Self {
        self.compression.enabled = enabled;
        self
    }

    #[must_use]
    pub fn compression_adaptive(mut self, adaptive: bool) -> Self {
        self.compression.adaptive = adaptive;
        self
    }

    #[must_use]
    pub fn background(mut self, value: BackgroundConfig) -> Self {
        self.background = value;
        self
    }

    #[must_use]
    pub fn wal_fsync_policy(mut self, value: FsyncPolicy) -> Self {
        self.wal_fsync_policy = value;
        self
    }

    #[must_use]
    pub fn bloom_params(mut self, ndv: usize, fpp: f32) -> Self {
        self.bloom_ndv = ndv;
        self.bloom_fpp = fpp;
        self
    }

    /// The persisted subset of this config, written to `<data_dir>/CONFIG`.
    #[must_use]
    pub fn persisted(&self) -> PersistedConfig {
        PersistedConfig {
            block_size: self.block_size,
            block_duration_ms: self.block_duration_ms,
            compression_enabled: self.compression.enabled,
            timestamp_algorithm: self.compression.timestamp_algorithm,
            value_algorithm: self.compression.value_algorithm,
            bloom_ndv: self.bloom_ndv,
            bloom_fpp: self.bloom_fpp,
            row_group_bytes: self.row_group_bytes,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let pools = PoolsConfig::default();
        Self {
            data_dir: absolute_path(Path::new(".tsdb.data")),
            block_size: /* samples per block */ 8_192,
            block_duration_ms: /* 10 minutes */ 10 * 60 * 1_000,
            max_blocks_per_series: 4,
            cache_size_bytes: /* 64 MiB */ 64 * 1_024 * 1_024,
            l2_cache_size_bytes: Some(/* 256 MiB */ 256 * 1_024 * 1_024),
            retention_period_ms: /* 30 days */ 30 * 24 * 60 * 60 * 1_000,
            compression: CompressionConfig::default(),
            background: BackgroundConfig::default(),
            wal_fsync_policy: FsyncPolicy::default(),
            wal_segment_max_bytes: /* 64 MiB */ 64 * 1_024 * 1_024,
            pools,
            bloom_ndv: crate::coldfile::bloom::DEFAULT_NDV,
            bloom_fpp: crate::coldfile::bloom::DEFAULT_FPP,
            row_group_bytes: crate::coldfile::DEFAULT_ROW_GROUP_BYTES,
            min_files_to_compact: 5,
            object_pools: Arc::new(ObjectPools::new(pools.time_series, pools.labels, pools.samples)),
        }
    }
}

/// The subset of [`Config`] that must match between the config an engine
/// is opened with and the config that last wrote `<data_dir>/CONFIG`, so a
/// restart never silently reinterprets bytes written under a different
/// compression or row-group layout.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PersistedConfig {
    pub block_size: usize,
    pub block_duration_ms: i64,
    pub compression_enabled: bool,
    pub timestamp_algorithm: CompressionAlgorithm,
    pub value_algorithm: CompressionAlgorithm,
    pub bloom_ndv: usize,
    pub bloom_fpp: f32,
    pub row_group_bytes: u64,
}

fn algorithm_tag(algorithm: CompressionAlgorithm) -> u8 {
    match algorithm {
        CompressionAlgorithm::DeltaOfDelta => 0,
        CompressionAlgorithm::Gorilla => 1,
        CompressionAlgorithm::Rle => 2,
        CompressionAlgorithm::Dictionary => 3,
    }
}

fn algorithm_from_tag(tag: u8) -> Result<CompressionAlgorithm> {
    match tag {
        0 => Ok(CompressionAlgorithm::DeltaOfDelta),
        1 => Ok(CompressionAlgorithm::Gorilla),
        2 => Ok(CompressionAlgorithm::Rle),
        3 => Ok(CompressionAlgorithm::Dictionary),
        other => Err(Error::CorruptData(format!("unknown compression algorithm tag {other}"))),
    }
}

impl PersistedConfig {
    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_u32::<BigEndian>(PERSISTED_CONFIG_MAGIC)?;
        w.write_u16::<BigEndian>(PERSISTED_CONFIG_VERSION)?;
        w.write_u64::<BigEndian>(self.block_size as u64)?;
        w.write_i64::<BigEndian>(self.block_duration_ms)?;
        w.write_u8(u8::from(self.compression_enabled))?;
        w.write_u8(algorithm_tag(self.timestamp_algorithm))?;
        w.write_u8(algorithm_tag(self.value_algorithm))?;
        w.write_u64::<BigEndian>(self.bloom_ndv as u64)?;
        w.write_f32::<BigEndian>(self.bloom_fpp)?;
        w.write_u64::<BigEndian>(self.row_group_bytes)?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> Result<Self> {
        let magic = r.read_u32::<BigEndian>().map_err(io_to_corrupt)?;
        if magic != PERSISTED_CONFIG_MAGIC {
            return Err(Error::CorruptData(format!("bad persisted config magic: {magic:#x}")));
        }
        let version = r.read_u16::<BigEndian>().map_err(io_to_corrupt)?;
        if version != PERSISTED_CONFIG_VERSION {
            return Err(Error::CorruptData(format!("unsupported persisted config version: {version}")));
        }

        Ok(Self {
            block_size: r.read_u64::<BigEndian>().map_err(io_to_corrupt)? as usize,
            block_duration_ms: r.read_i64::<BigEndian>().map_err(io_to_corrupt)?,
            compression_enabled: r.read_u8().map_err(io_to_corrupt)? != 0,
            timestamp_algorithm: algorithm_from_tag(r.read_u8().map_err(io_to_corrupt)?)?,
            value_algorithm: algorithm_from_tag(r.read_u8().map_err(io_to_corrupt)?)?,
            bloom_ndv: r.read_u64::<BigEndian>().map_err(io_to_corrupt)? as usize,
            bloom_fpp: r.read_f32::<BigEndian>().map_err(io_to_corrupt)?,
            row_group_bytes: r.read_u64::<BigEndian>().map_err(io_to_corrupt)?,
        })
    }

    /// Writes this config to `<data_dir>/CONFIG`.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        std::fs::write(data_dir.join("CONFIG"), buf)?;
        Ok(())
    }

    /// Loads the config at `<data_dir>/CONFIG`, if present.
    pub fn load(data_dir: &Path) -> Result<Option<Self>> {
        let path = data_dir.join("CONFIG");
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(Self::read_from(&bytes[..])?))
    }
}

fn io_to_corrupt(err: std::io::Error) -> Error {
    Error::CorruptData(format!("truncated persisted config: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persisted_config_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path()).persisted();
        config.save(dir.path()).unwrap();

        let loaded = PersistedConfig::load(dir.path()).unwrap().unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn load_returns_none_when_absent() {
        let dir = tempdir().unwrap();
        assert!(PersistedConfig::load(dir.path()).unwrap().is_none());
    }
}
