//! The in-memory block: a per-block map of series to either uncompressed
//! buffers ([`MutableBlock`]) or compressed byte arrays ([`SealedBlock`]).
//!
//! Modeled as a tagged `enum` with two arms rather than a trait object --
//! hot paths (`append`, `read`, `query`) avoid dynamic dispatch, and the
//! two shapes share the same small operation surface.

pub mod header;

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crossbeam_skiplist::SkipMap;

use crate::compression::{self, CompressionAlgorithm, CompressionConfig};
use crate::error::{Error, Result};
use crate::label::{LabelMatcher, Labels, SeriesId};
use crate::sample::{Sample, TimeSeries};
use header::{BlockFlags, BlockHeader};

/// One series' uncompressed buffers within a mutable block.
struct SeriesBuffers {
    labels: Labels,
    timestamps: Vec<i64>,
    values: Vec<f64>,
}

/// One series' compressed columns within a sealed block.
#[derive(Clone)]
struct SealedSeries {
    labels: Labels,
    count: usize,
    ts_algorithm: CompressionAlgorithm,
    val_algorithm: CompressionAlgorithm,
    /// `true` when `ts_bytes`/`val_bytes` are the raw, uncompressed byte
    /// arrays written by `encode_raw_i64`/`encode_raw_f64` (because the
    /// block's `CompressionConfig` had `enabled: false`) rather than bytes
    /// produced by `ts_algorithm`/`val_algorithm`. `ts_algorithm`/
    /// `val_algorithm` are still recorded in that case so a future
    /// `enable_compression=true` run has a codec preference on hand, but
    /// `decode_entry` must check this flag -- not the algorithm -- to
    /// choose the raw decoder.
    raw: bool,
    ts_bytes: Vec<u8>,
    val_bytes: Vec<u8>,
}

/// An in-memory, append-only block. Buffers every sample uncompressed;
/// [`MutableBlock::seal`] compresses everything and yields a
/// [`SealedBlock`], after which this block is no longer written to.
pub struct MutableBlock {
    id: u64,
    start_ts: AtomicI64,
    end_ts: AtomicI64,
    series: SkipMap<SeriesId, Mutex<Vec<SeriesBuffers>>>,
    sample_count: AtomicUsize,
    rotating: AtomicBool,
    active_writers: AtomicUsize,
}

impl MutableBlock {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            start_ts: AtomicI64::new(i64::MAX),
            end_ts: AtomicI64::new(i64::MIN),
            series: SkipMap::new(),
            sample_count: AtomicUsize::new(0),
            rotating: AtomicBool::new(false),
            active_writers: AtomicUsize::new(0),
        }
    }

    /// Marks one in-flight `append` against this block. Callers must pair
    /// this with [`MutableBlock::end_write`] and must call it while still
    /// holding whatever lock guarantees they observed this block as the
    /// engine's current one -- that's what lets [`MutableBlock::wait_quiescent`]
    /// after a pointer swap be certain no further appends are coming.
    pub fn begin_write(&self) {
        self.active_writers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_write(&self) {
        self.active_writers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Spins until every `begin_write`/`end_write` pair in flight when this
    /// was called has completed. Used by rotation, after the engine has
    /// already swapped the current-block pointer away from this block, to
    /// wait out any writer that grabbed this block just before the swap.
    pub fn wait_quiescent(&self) {
        while self.active_writers.load(Ordering::Acquire) != 0 {
            std::thread::yield_now();
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.sample_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn time_range(&self) -> (i64, i64) {
        (self.start_ts.load(Ordering::Relaxed), self.end_ts.load(Ordering::Relaxed))
    }

    fn update_time_range(&self, timestamp: i64) {
        self.start_ts.fetch_min(timestamp, Ordering::Relaxed);
        self.end_ts.fetch_max(timestamp, Ordering::Relaxed);
    }

    /// Buffers `sample` for `labels`, creating the series' bucket on
    /// first write. Collision-safe: a bucket can hold more than one
    /// distinct Labels sharing a SeriesID, each tracked independently.
    pub fn append(&self, labels: &Labels, sample: Sample) {
        let sid = labels.series_id();
        let entry = self.series.get_or_insert(sid, Mutex::new(Vec::new()));
        let mut bucket = entry.value().lock().expect("lock is poisoned");

        match bucket.iter_mut().find(|e| &e.labels == labels) {
            Some(existing) => {
                existing.timestamps.push(sample.timestamp);
                existing.values.push(sample.value);
            }
            None => bucket.push(SeriesBuffers {
                labels: labels.clone(),
                timestamps: vec![sample.timestamp],
                values: vec![sample.value],
            }),
        }

        drop(bucket);
        self.update_time_range(sample.timestamp);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    /// `true` once sample count or wall-clock age crosses a rotation
    /// threshold. Does not itself perform rotation.
    #[must_use]
    pub fn should_rotate(&self, block_size: usize, block_duration_ms: i64, now_ms: i64) -> bool {
        if self.sample_count() >= block_size {
            return true;
        }
        let start = self.start_ts.load(Ordering::Relaxed);
        start != i64::MAX && now_ms.saturating_sub(start) >= block_duration_ms
    }

    /// Attempts to claim the right to rotate this block. Exactly one
    /// concurrent caller observing `should_rotate()` wins; the rest see
    /// `false` and skip rotating themselves.
    #[must_use]
    pub fn try_begin_rotation(&self) -> bool {
        self.rotating.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    #[must_use]
    pub fn read(&self, labels: &Labels) -> TimeSeries {
        let sid = labels.series_id();
        let Some(entry) = self.series.get(&sid) else {
            return TimeSeries::new(labels.clone());
        };
        let bucket = entry.value().lock().expect("lock is poisoned");
        match bucket.iter().find(|e| &e.labels == labels) {
            Some(found) => TimeSeries::with_samples(labels.clone(), zip_samples(&found.timestamps, &found.values)),
            None => TimeSeries::new(labels.clone()),
        }
    }

    #[must_use]
    pub fn query(&self, matchers: &[LabelMatcher], t0: i64, t1: i64) -> Vec<TimeSeries> {
        let mut regex_cache = crate::index::matcher::RegexCache::default();
        let mut out = Vec::new();

        for entry in self.series.iter() {
            let bucket = entry.value().lock().expect("lock is poisoned");
            for series in bucket.iter() {
                if matchers.iter().all(|m| m.matches(&series.labels, &mut regex_cache)) {
                    let mut ts = TimeSeries::with_samples(series.labels.clone(), zip_samples(&series.timestamps, &series.values));
                    ts.clip(t0, t1);
                    out.push(ts);
                }
            }
        }
        out
    }

    /// Compresses every series' buffers and yields the immutable
    /// [`SealedBlock`]. Irreversible: this block should be discarded by
    /// the caller afterward.
    #[must_use]
    pub fn seal(&self, config: &CompressionConfig) -> SealedBlock {
        let mut entries = Vec::new();

        for node in self.series.iter() {
            let bucket = node.value().lock().expect("lock is poisoned");
            for series in bucket.iter() {
                let count = series.timestamps.len();

                if !config.enabled {
                    entries.push(SealedSeries {
                        labels: series.labels.clone(),
                        count,
                        ts_algorithm: CompressionAlgorithm::DeltaOfDelta,
                        val_algorithm: CompressionAlgorithm::Gorilla,
                        raw: true,
                        ts_bytes: encode_raw_i64(&series.timestamps),
                        val_bytes: encode_raw_f64(&series.values),
                    });
                    continue;
                }

                let ts_algorithm = config.timestamp_algorithm;
                let val_algorithm = compression::adaptive_value_algorithm(&series.values, config);

                let ts_bytes = compression::compress_timestamps(&series.timestamps, ts_algorithm)
                    .unwrap_or_else(|_| compression::compress_timestamps(&series.timestamps, CompressionAlgorithm::DeltaOfDelta).expect("delta-of-delta never fails"));
                let val_bytes = compression::compress_values(&series.values, val_algorithm)
                    .unwrap_or_else(|_| compression::compress_values(&series.values, CompressionAlgorithm::Gorilla).expect("gorilla never fails"));

                entries.push(SealedSeries {
                    labels: series.labels.clone(),
                    count,
                    ts_algorithm,
                    val_algorithm,
                    raw: false,
                    ts_bytes,
                    val_bytes,
                });
            }
        }

        let mut header = BlockHeader::new(self.id);
        header.start_ts = self.start_ts.load(Ordering::Relaxed);
        header.end_ts = self.end_ts.load(Ordering::Relaxed);
        header.flags = BlockFlags::SEALED | BlockFlags::COMPRESSED;

        SealedBlock { header, entries }
    }
}

fn zip_samples(timestamps: &[i64], values: &[f64]) -> Vec<Sample> {
    timestamps.iter().zip(values).map(|(&t, &v)| Sample::new(t, v)).collect()
}

fn encode_raw_i64(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for &v in values {
        out.write_i64::<BigEndian>(v).expect("writing to Vec never fails");
    }
    out
}

fn decode_raw_i64(data: &[u8]) -> Result<Vec<i64>> {
    let mut out = Vec::with_capacity(data.len() / 8);
    let mut cursor = data;
    while !cursor.is_empty() {
        out.push(cursor.read_i64::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))?);
    }
    Ok(out)
}

fn encode_raw_f64(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for &v in values {
        out.write_u64::<BigEndian>(v.to_bits()).expect("writing to Vec never fails");
    }
    out
}

fn decode_raw_f64(data: &[u8]) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(data.len() / 8);
    let mut cursor = data;
    while !cursor.is_empty() {
        out.push(f64::from_bits(cursor.read_u64::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))?));
    }
    Ok(out)
}

/// An immutable, compressed block produced by [`MutableBlock::seal`].
pub struct SealedBlock {
    header: BlockHeader,
    entries: Vec<SealedSeries>,
}

impl SealedBlock {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.header.id
    }

    #[must_use]
    pub fn time_range(&self) -> (i64, i64) {
        (self.header.start_ts, self.header.end_ts)
    }

    #[must_use]
    pub fn header(&self) -> BlockHeader {
        self.header
    }

    fn decode_entry(entry: &SealedSeries) -> Result<TimeSeries> {
        let timestamps = if entry.raw {
            decode_raw_i64(&entry.ts_bytes)?
        } else {
            compression::decompress_timestamps(&entry.ts_bytes, entry.ts_algorithm)?
        };
        let values = if entry.raw {
            decode_raw_f64(&entry.val_bytes)?
        } else {
            compression::decompress_values(&entry.val_bytes, entry.val_algorithm)?
        };
        Ok(TimeSeries::with_samples(entry.labels.clone(), zip_samples(&timestamps, &values)))
    }

    #[must_use]
    pub fn read(&self, labels: &Labels) -> TimeSeries {
        match self.entries.iter().find(|e| &e.labels == labels) {
            Some(entry) => Self::decode_entry(entry).unwrap_or_else(|_| TimeSeries::new(labels.clone())),
            None => TimeSeries::new(labels.clone()),
        }
    }

    #[must_use]
    pub fn query(&self, matchers: &[LabelMatcher], t0: i64, t1: i64) -> Vec<TimeSeries> {
        let mut regex_cache = crate::index::matcher::RegexCache::default();
        let mut out = Vec::new();

        for entry in &self.entries {
            if !matchers.iter().all(|m| m.matches(&entry.labels, &mut regex_cache)) {
                continue;
            }
            if let Ok(mut ts) = Self::decode_entry(entry) {
                ts.clip(t0, t1);
                out.push(ts);
            }
        }
        out
    }

    /// Serializes the block: header, then each series' labels and
    /// compressed columns, length-prefixed. `header.crc32` covers
    /// everything written after the header itself.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.write_u32::<BigEndian>(self.entries.len() as u32)?;

        for entry in &self.entries {
            let canonical = entry.labels.canonical();
            body.write_u32::<BigEndian>(canonical.len() as u32)?;
            body.write_all(canonical.as_bytes())?;
            body.write_u64::<BigEndian>(entry.count as u64)?;
            body.write_u8(algorithm_tag(entry.ts_algorithm))?;
            body.write_u8(algorithm_tag(entry.val_algorithm))?;
            body.write_u8(u8::from(entry.raw))?;
            body.write_u32::<BigEndian>(entry.ts_bytes.len() as u32)?;
            body.write_all(&entry.ts_bytes)?;
            body.write_u32::<BigEndian>(entry.val_bytes.len() as u32)?;
            body.write_all(&entry.val_bytes)?;
        }

        let mut header = self.header;
        header.crc32 = crc32fast::hash(&body);

        let mut out = Vec::with_capacity(body.len() + 32);
        header.write_to(&mut out)?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Inverse of [`SealedBlock::serialize`]. Fails with `CorruptData` if
    /// the stored CRC32 doesn't match the body that follows the header.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = data;
        let header = BlockHeader::read_from(&mut cursor)?;

        let body = cursor;
        let computed = crc32fast::hash(body);
        if computed != header.crc32 {
            return Err(Error::CorruptData(format!(
                "block {} CRC mismatch: stored {:#x}, computed {:#x}",
                header.id, header.crc32, computed
            )));
        }

        let mut reader = body;
        let count = reader.read_u32::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))? as usize;
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            let label_len = reader.read_u32::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))? as usize;
            if reader.len() < label_len {
                return Err(Error::CorruptData("truncated label bytes".into()));
            }
            let (label_bytes, rest) = reader.split_at(label_len);
            reader = rest;
            let canonical = std::str::from_utf8(label_bytes).map_err(|e| Error::CorruptData(e.to_string()))?;
            let labels = parse_canonical(canonical);

            let sample_count = reader.read_u64::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))? as usize;
            let ts_algorithm = algorithm_from_tag(reader.read_u8().map_err(|e| Error::CorruptData(e.to_string()))?)?;
            let val_algorithm = algorithm_from_tag(reader.read_u8().map_err(|e| Error::CorruptData(e.to_string()))?)?;
            let raw = reader.read_u8().map_err(|e| Error::CorruptData(e.to_string()))? != 0;

            let ts_len = reader.read_u32::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))? as usize;
            let (ts_bytes, rest) = reader.split_at(ts_len);
            reader = rest;

            let val_len = reader.read_u32::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))? as usize;
            let (val_bytes, rest) = reader.split_at(val_len);
            reader = rest;

            entries.push(SealedSeries {
                labels,
                count: sample_count,
                ts_algorithm,
                val_algorithm,
                raw,
                ts_bytes: ts_bytes.to_vec(),
                val_bytes: val_bytes.to_vec(),
            });
        }

        Ok(Self { header, entries })
    }
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

fn parse_canonical(canonical: &str) -> Labels {
    if canonical.is_empty() {
        return Labels::new();
    }
    Labels::from_pairs(canonical.split(',').filter_map(|pair| pair.split_once('=')))
}

/// Either shape a block can be in. Hot-path operations dispatch on the
/// two arms directly rather than through a trait object.
pub enum Block {
    Mutable(MutableBlock),
    Sealed(SealedBlock),
}

impl Block {
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Mutable(b) => b.id(),
            Self::Sealed(b) => b.id(),
        }
    }

    #[must_use]
    pub fn time_range(&self) -> (i64, i64) {
        match self {
            Self::Mutable(b) => b.time_range(),
            Self::Sealed(b) => b.time_range(),
        }
    }

    #[must_use]
    pub fn read(&self, labels: &Labels) -> TimeSeries {
        match self {
            Self::Mutable(b) => b.read(labels),
            Self::Sealed(b) => b.read(labels),
        }
    }

    #[must_use]
    pub fn query(&self, matchers: &[LabelMatcher], t0: i64, t1: i64) -> Vec<TimeSeries> {
        match self {
            Self::Mutable(b) => b.query(matchers, t0, t1),
            Self::Sealed(b) => b.query(matchers, t0, t1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        Labels::from_pairs(pairs.iter().map(|(k, v)| (*k, *v)))
    }

    #[test]
    fn append_and_read_round_trip() {
        let block = MutableBlock::new(1);
        let l = labels(&[("__name__", "cpu")]);
        block.append(&l, Sample::new(100, 1.0));
        block.append(&l, Sample::new(200, 2.0));

        let ts = block.read(&l);
        assert_eq!(2, ts.samples.len());
        assert_eq!(100, ts.samples[0].timestamp);
        assert_eq!((100, 200), block.time_range());
    }

    #[test]
    fn seal_then_serialize_round_trips() {
        let block = MutableBlock::new(3);
        let l = labels(&[("__name__", "cpu"), ("host", "h1")]);
        for i in 0..50 {
            block.append(&l, Sample::new(1000 + i * 10, i as f64));
        }

        let sealed = block.seal(&CompressionConfig::default());
        let bytes = sealed.serialize().unwrap();
        let restored = SealedBlock::deserialize(&bytes).unwrap();

        let ts = restored.read(&l);
        assert_eq!(50, ts.samples.len());
        assert_eq!(0.0, ts.samples[0].value);
        assert_eq!(49.0, ts.samples[49].value);
    }

    #[test]
    fn disabled_compression_round_trips_raw_columns() {
        let block = MutableBlock::new(7);
        let l = labels(&[("__name__", "raw_metric")]);
        for i in 0..20 {
            block.append(&l, Sample::new(1000 + i, i as f64));
        }

        let config = CompressionConfig {
            enabled: false,
            ..CompressionConfig::default()
        };
        let sealed = block.seal(&config);

        let ts = sealed.read(&l);
        assert_eq!(20, ts.samples.len());
        for (i, sample) in ts.samples.iter().enumerate() {
            assert_eq!(1000 + i as i64, sample.timestamp);
            assert_eq!(i as f64, sample.value);
        }

        let bytes = sealed.serialize().unwrap();
        let restored = SealedBlock::deserialize(&bytes).unwrap();
        let ts = restored.read(&l);
        assert_eq!(20, ts.samples.len());
        assert_eq!(19.0, ts.samples[19].value);
    }

    #[test]
    fn deserialize_rejects_corrupted_crc() {
        let block = MutableBlock::new(4);
        let l = labels(&[("__name__", "x")]);
        block.append(&l, Sample::new(1, 1.0));
        let sealed = block.seal(&CompressionConfig::default());
        let mut bytes = sealed.serialize().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let err = SealedBlock::deserialize(&bytes).unwrap_err();
        assert_eq!(crate::error::ErrorKind::CorruptData, err.kind());
    }

    #[test]
    fn try_begin_rotation_is_single_winner() {
        let block = MutableBlock::new(5);
        assert!(block.try_begin_rotation());
        assert!(!block.try_begin_rotation());
    }
}
