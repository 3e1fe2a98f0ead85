//! A storage engine for a time-series database: ingests timestamped,
//! labeled samples and serves label-matched range queries over them.
//!
//! The engine owns the full write path (write-ahead log, mutable block,
//! inverted index, tiered cache) and read path (hot+warm+cold merge with
//! a two-phase bloom-filter/secondary-index prune over immutable columnar
//! cold files), plus the background processor that moves data from one
//! tier to the next. Everything else -- wire receivers, a query language,
//! cluster replication -- lives outside this crate and talks to it only
//! through [`StorageEngine`].
//!
//! # Example
//!
//! ```
//! use tsdb_storage_engine::{Config, Labels, Sample, StorageEngine, TimeSeries};
//! # let dir = tempfile::tempdir()?;
//!
//! let engine = StorageEngine::init(Config::new(dir.path()))?;
//!
//! let labels = Labels::from_pairs([("__name__", "cpu"), ("host", "h1")]);
//! engine.write(TimeSeries::with_samples(labels.clone(), vec![Sample::new(1_000, 1.0)]))?;
//!
//! let series = engine.read(&labels, 0, 2_000)?;
//! assert_eq!(1, series.samples.len());
//!
//! engine.close()?;
//! # Ok::<(), tsdb_storage_engine::Error>(())
//! ```

pub mod background;
pub mod block;
pub mod cache;
pub mod catalog;
pub mod coldfile;
pub mod compression;
pub mod engine;
pub mod error;
pub mod id;
pub mod index;
pub mod label;
pub mod metrics;
pub mod path;
pub mod pool;
pub mod sample;
pub mod time;
pub mod wal;

pub use background::{BackgroundProcessor, TaskKind};
pub use cache::TieredCache;
pub use catalog::{FileCatalog, FileMeta};
pub use coldfile::bloom::BloomFilter;
pub use coldfile::secondary_index::{RowLocation, SecondaryIndex};
pub use coldfile::{ColdFileReader, ColdFileWriter, RecordBatch, Row};
pub use compression::{CompressionAlgorithm, CompressionConfig};
pub use engine::config::{BackgroundConfig, Config, PersistedConfig, PoolsConfig};
pub use engine::StorageEngine;
pub use error::{Error, ErrorKind, Result};
pub use index::InvertedIndex;
pub use label::{LabelMatcher, Labels, SeriesId, METRIC_NAME_LABEL};
pub use metrics::{GlobalMetrics, MetricsSnapshot};
pub use pool::ObjectPools;
pub use sample::{Sample, TimeSeries};
pub use wal::{FsyncPolicy, Wal};
