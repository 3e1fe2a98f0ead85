//! The immutable, columnar cold-tier file: one or more
//! row groups, each independently statistics-bearing, written once by
//! [`ColdFileWriter`] and read back by [`ColdFileReader`] with the
//! two-phase (bloom, then secondary-index) pruning implemented by the
//! sibling [`bloom`] and [`secondary_index`] modules.
//!
//! Row groups store five columns side by side, each independently
//! zstd-compressed: timestamps (delta-of-delta), values (Gorilla/XOR),
//! series ids (raw), labels CRC32 (raw), and tags (dictionary-encoded
//! canonical label strings). Storing them as separate compressed segments
//! -- rather than one blob per row group -- is what lets
//! [`ColdFileReader::read_row_group_tags`] pay only for the tags segment
//! during Phase 1 predicate pushdown.

pub mod bloom;
pub mod secondary_index;

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::compression::{self, label::DictionaryColumn, CompressionAlgorithm};
use crate::error::{Error, Result};
use crate::label::{LabelMatcher, Labels, SeriesId};
use crate::sample::{Sample, TimeSeries};

use bloom::BloomFilter;
use secondary_index::{RowLocation, SecondaryIndex};

/// Default bound on a row group's uncompressed byte size before it's
/// flushed and a new one started.
pub const DEFAULT_ROW_GROUP_BYTES: u64 = 64 * 1024 * 1024;

const FILE_MAGIC: u32 = 0x5453_4446; // "TSDF"
const FILE_VERSION: u16 = 1;
const ZSTD_LEVEL: i32 = 3;

/// One row: a sample plus the series identity columns needed to group and
/// prune without decoding full `Labels`.
#[derive(Clone, Debug)]
pub struct Row {
    pub series_id: SeriesId,
    pub labels_crc32: u32,
    pub canonical_labels: String,
    pub timestamp: i64,
    pub value: f64,
}

/// A columnar batch of rows, either accumulated by the writer or returned
/// by a reader.
#[derive(Clone, Debug, Default)]
pub struct RecordBatch {
    pub rows: Vec<Row>,
}

impl RecordBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Groups rows by canonical labels into [`TimeSeries`], clipped to
    /// `[t0, t1]`. Rows for the same canonical labels may be non-adjacent
    /// (e.g. spread across row groups); callers merge across calls.
    #[must_use]
    pub fn into_time_series(self, t0: i64, t1: i64) -> Vec<TimeSeries> {
        use std::collections::HashMap;

        let mut by_labels: HashMap<String, TimeSeries> = HashMap::new();
        for row in self.rows {
            if row.timestamp < t0 || row.timestamp > t1 {
                continue;
            }
            let entry = by_labels.entry(row.canonical_labels.clone()).or_insert_with(|| {
                TimeSeries::new(parse_canonical(&row.canonical_labels))
            });
            entry.samples.push(Sample::new(row.timestamp, row.value));
        }
        by_labels.into_values().collect()
    }
}

fn parse_canonical(canonical: &str) -> Labels {
    if canonical.is_empty() {
        return Labels::new();
    }
    Labels::from_pairs(canonical.split(',').filter_map(|pair| pair.split_once('=')))
}

/// Per-row-group statistics, the unit [`crate::catalog`] caches and the
/// query pruner's Phase 0 time check operates over.
#[derive(Copy, Clone, Debug)]
pub struct RowGroupStats {
    pub row_group_id: u32,
    pub min_ts: i64,
    pub max_ts: i64,
    pub num_rows: u64,
    pub byte_size: u64,
}

struct RowGroupFooter {
    stats: RowGroupStats,
    offset: u64,
    ts_len: u32,
    val_len: u32,
    sid_len: u32,
    crc_len: u32,
    tags_len: u32,
}

/// Writes one cold file from a stream of [`Row`]s, grouping them into
/// bounded row groups and emitting `.bloom`/`.idx` sidecars at
/// [`ColdFileWriter::finish`].
pub struct ColdFileWriter {
    path: PathBuf,
    file: BufWriter<File>,
    row_group_bytes: u64,
    pending: Vec<Row>,
    pending_bytes: u64,
    footers: Vec<RowGroupFooter>,
    bloom: BloomFilter,
    secondary_index: SecondaryIndex,
    next_row_group_id: u32,
    offset: u64,
}

/// Approximate per-row uncompressed byte cost, used only to decide when a
/// row group is full.
const BYTES_PER_ROW_ESTIMATE: u64 = 8 + 8 + 8 + 4 + 24;

impl ColdFileWriter {
    pub fn create(path: impl Into<PathBuf>, row_group_bytes: u64, bloom_ndv: usize, bloom_fpp: f32) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        writer.write_u32::<BigEndian>(FILE_MAGIC)?;
        writer.write_u16::<BigEndian>(FILE_VERSION)?;
        let offset = 6;

        Ok(Self {
            path,
            file: writer,
            row_group_bytes,
            pending: Vec::new(),
            pending_bytes: 0,
            footers: Vec::new(),
            bloom: BloomFilter::with_fp_rate(bloom_ndv, bloom_fpp),
            secondary_index: SecondaryIndex::new(),
            next_row_group_id: 0,
            offset,
        })
    }

    /// Appends one row, flushing the current row group first if it has
    /// already crossed the configured byte bound.
    pub fn append_row(&mut self, row: Row) -> Result<()> {
        if self.pending_bytes >= self.row_group_bytes && !self.pending.is_empty() {
            self.flush_row_group()?;
        }
        self.pending_bytes += BYTES_PER_ROW_ESTIMATE;
        self.pending.push(row);
        Ok(())
    }

    fn flush_row_group(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut rows = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;
        rows.sort_by(|a, b| a.series_id.cmp(&b.series_id).then(a.timestamp.cmp(&b.timestamp)));

        let row_group_id = self.next_row_group_id;
        self.next_row_group_id += 1;

        let min_ts = rows.iter().map(|r| r.timestamp).min().unwrap_or(0);
        let max_ts = rows.iter().map(|r| r.timestamp).max().unwrap_or(0);

        let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
        let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
        let series_ids: Vec<SeriesId> = rows.iter().map(|r| r.series_id).collect();
        let crcs: Vec<u32> = rows.iter().map(|r| r.labels_crc32).collect();
        let tags: Vec<String> = rows.iter().map(|r| r.canonical_labels.clone()).collect();

        let ts_blob = zstd::encode_all(
            compression::compress_timestamps(&timestamps, CompressionAlgorithm::DeltaOfDelta)?.as_slice(),
            ZSTD_LEVEL,
        )?;
        let val_blob = zstd::encode_all(
            compression::compress_values(&values, CompressionAlgorithm::Gorilla)?.as_slice(),
            ZSTD_LEVEL,
        )?;
        let sid_blob = zstd::encode_all(encode_u64_column(&series_ids).as_slice(), ZSTD_LEVEL)?;
        let crc_blob = zstd::encode_all(encode_u32_column(&crcs).as_slice(), ZSTD_LEVEL)?;
        let tags_blob = zstd::encode_all(DictionaryColumn::encode(&tags).serialize().as_slice(), ZSTD_LEVEL)?;

        let ts_len = ts_blob.len() as u32;
        let val_len = val_blob.len() as u32;
        let sid_len = sid_blob.len() as u32;
        let crc_len = crc_blob.len() as u32;
        let tags_len = tags_blob.len() as u32;

        self.file.write_all(&ts_blob)?;
        self.file.write_all(&val_blob)?;
        self.file.write_all(&sid_blob)?;
        self.file.write_all(&crc_blob)?;
        self.file.write_all(&tags_blob)?;

        let byte_size = u64::from(ts_len) + u64::from(val_len) + u64::from(sid_len) + u64::from(crc_len) + u64::from(tags_len);

        // Per-series row locations for the secondary index, with this row
        // group's own [min_ts, max_ts] -- not the series' range across the
        // whole file.
        let mut row_offset = 0u64;
        let mut i = 0;
        while i < rows.len() {
            let sid = rows[i].series_id;
            let start = i;
            let mut local_min = rows[i].timestamp;
            let mut local_max = rows[i].timestamp;
            while i < rows.len() && rows[i].series_id == sid {
                local_min = local_min.min(rows[i].timestamp);
                local_max = local_max.max(rows[i].timestamp);
                i += 1;
            }
            self.bloom.insert(sid);
            self.secondary_index.insert(
                sid,
                RowLocation {
                    row_group_id,
                    row_offset: row_offset + start as u64,
                    min_ts: local_min,
                    max_ts: local_max,
                },
            );
        }
        row_offset += rows.len() as u64;
        let _ = row_offset;

        self.footers.push(RowGroupFooter {
            stats: RowGroupStats {
                row_group_id,
                min_ts,
                max_ts,
                num_rows: rows.len() as u64,
                byte_size,
            },
            offset: self.offset,
            ts_len,
            val_len,
            sid_len,
            crc_len,
            tags_len,
        });

        self.offset += byte_size;
        Ok(())
    }

    /// Flushes any pending row group, writes the footer, and persists the
    /// `.bloom`/`.idx` sidecars next to the file. Returns the row-group
    /// statistics, for immediate catalog insertion without a re-open.
    pub fn finish(mut self) -> Result<Vec<RowGroupStats>> {
        self.flush_row_group()?;

        let footer_offset = self.offset;
        self.file.write_u32::<BigEndian>(self.footers.len() as u32)?;
        for footer in &self.footers {
            self.file.write_u32::<BigEndian>(footer.stats.row_group_id)?;
            self.file.write_i64::<BigEndian>(footer.stats.min_ts)?;
            self.file.write_i64::<BigEndian>(footer.stats.max_ts)?;
            self.file.write_u64::<BigEndian>(footer.stats.num_rows)?;
            self.file.write_u64::<BigEndian>(footer.offset)?;
            self.file.write_u32::<BigEndian>(footer.ts_len)?;
            self.file.write_u32::<BigEndian>(footer.val_len)?;
            self.file.write_u32::<BigEndian>(footer.sid_len)?;
            self.file.write_u32::<BigEndian>(footer.crc_len)?;
            self.file.write_u32::<BigEndian>(footer.tags_len)?;
        }
        self.file.write_u64::<BigEndian>(footer_offset)?;
        self.file.flush()?;

        let stats: Vec<RowGroupStats> = self.footers.iter().map(|f| f.stats).collect();

        let bloom_path = bloom_sidecar_path(&self.path);
        let mut bloom_file = BufWriter::new(File::create(&bloom_path)?);
        self.bloom.write_to(&mut bloom_file)?;
        bloom_file.flush()?;

        let idx_path = index_sidecar_path(&self.path);
        self.secondary_index.save_to_file(&idx_path)?;

        Ok(stats)
    }
}

fn encode_u64_column(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for &v in values {
        out.write_u64::<BigEndian>(v).expect("writing to Vec never fails");
    }
    out
}

fn decode_u64_column(data: &[u8]) -> Result<Vec<u64>> {
    let mut out = Vec::with_capacity(data.len() / 8);
    let mut cursor = data;
    while !cursor.is_empty() {
        out.push(cursor.read_u64::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))?);
    }
    Ok(out)
}

fn encode_u32_column(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for &v in values {
        out.write_u32::<BigEndian>(v).expect("writing to Vec never fails");
    }
    out
}

fn decode_u32_column(data: &[u8]) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(data.len() / 4);
    let mut cursor = data;
    while !cursor.is_empty() {
        out.push(cursor.read_u32::<BigEndian>().map_err(|e| Error::CorruptData(e.to_string()))?);
    }
    Ok(out)
}

/// Sidecar path carrying the cold file's bloom filter (Phase 0 prune).
#[must_use]
pub fn bloom_sidecar_path(cold_file: &Path) -> PathBuf {
    let mut s = cold_file.as_os_str().to_owned();
    s.push(".bloom");
    PathBuf::from(s)
}

/// Sidecar path carrying the cold file's secondary index (Phase 1 prune).
#[must_use]
pub fn index_sidecar_path(cold_file: &Path) -> PathBuf {
    let mut s = cold_file.as_os_str().to_owned();
    s.push(".idx");
    PathBuf::from(s)
}

/// Reads a cold file written by [`ColdFileWriter`], exposing per-row-group
/// statistics and the two projections the query pruner needs: tags-only
/// (Phase 1) and the full row group (the data read).
pub struct ColdFileReader {
    path: PathBuf,
    file: File,
    footers: Vec<RowGroupFooter>,
}

impl ColdFileReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;

        let mut magic_and_version = [0u8; 6];
        file.read_exact(&mut magic_and_version)?;
        let magic = u32::from_be_bytes(magic_and_version[0..4].try_into().expect("4 bytes"));
        if magic != FILE_MAGIC {
            return Err(Error::CorruptData(format!("bad cold file magic: {magic:#x}")));
        }

        file.seek(SeekFrom::End(-8))?;
        let footer_offset = file.read_u64::<BigEndian>()?;

        file.seek(SeekFrom::Start(footer_offset))?;
        let count = file.read_u32::<BigEndian>()?;
        let mut footers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let row_group_id = file.read_u32::<BigEndian>()?;
            let min_ts = file.read_i64::<BigEndian>()?;
            let max_ts = file.read_i64::<BigEndian>()?;
            let num_rows = file.read_u64::<BigEndian>()?;
            let offset = file.read_u64::<BigEndian>()?;
            let ts_len = file.read_u32::<BigEndian>()?;
            let val_len = file.read_u32::<BigEndian>()?;
            let sid_len = file.read_u32::<BigEndian>()?;
            let crc_len = file.read_u32::<BigEndian>()?;
            let tags_len = file.read_u32::<BigEndian>()?;
            let byte_size = u64::from(ts_len) + u64::from(val_len) + u64::from(sid_len) + u64::from(crc_len) + u64::from(tags_len);
            footers.push(RowGroupFooter {
                stats: RowGroupStats {
                    row_group_id,
                    min_ts,
                    max_ts,
                    num_rows,
                    byte_size,
                },
                offset,
                ts_len,
                val_len,
                sid_len,
                crc_len,
                tags_len,
            });
        }

        Ok(Self { path, file, footers })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn num_row_groups(&self) -> usize {
        self.footers.len()
    }

    #[must_use]
    pub fn row_group_stats(&self, i: usize) -> Option<RowGroupStats> {
        self.footers.get(i).map(|f| f.stats)
    }

    #[must_use]
    pub fn min_max_ts(&self) -> Option<(i64, i64)> {
        if self.footers.is_empty() {
            return None;
        }
        let min = self.footers.iter().map(|f| f.stats.min_ts).min()?;
        let max = self.footers.iter().map(|f| f.stats.max_ts).max()?;
        Some((min, max))
    }

    fn read_segment(&mut self, start: u64, len: u32) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(start))?;
        let mut compressed = vec![0u8; len as usize];
        self.file.read_exact(&mut compressed)?;
        zstd::decode_all(compressed.as_slice()).map_err(|e| Error::CorruptData(format!("zstd: {e}")))
    }

    /// Reads only the tags (+ series id) columns of row group `i`, for
    /// predicate pushdown without paying for timestamp/value I/O.
    pub fn read_row_group_tags(&mut self, i: usize) -> Result<Vec<(SeriesId, String)>> {
        let footer = self
            .footers
            .get(i)
            .ok_or_else(|| Error::NotFound(format!("row group {i}")))?;
        let sid_offset = footer.offset + u64::from(footer.ts_len) + u64::from(footer.val_len);
        let tags_offset = sid_offset + u64::from(footer.sid_len) + u64::from(footer.crc_len);
        let (sid_len, tags_len) = (footer.sid_len, footer.tags_len);

        let sid_blob = self.read_segment(sid_offset, sid_len)?;
        let series_ids = decode_u64_column(&sid_blob)?;

        let tags_blob = self.read_segment(tags_offset, tags_len)?;
        let tags = DictionaryColumn::deserialize(&tags_blob)
            .ok_or_else(|| Error::CorruptData("truncated tags column".into()))?
            .decode();

        Ok(series_ids.into_iter().zip(tags).collect())
    }

    /// Reads row group `i` in full.
    pub fn read_row_group(&mut self, i: usize) -> Result<RecordBatch> {
        let footer = self
            .footers
            .get(i)
            .ok_or_else(|| Error::NotFound(format!("row group {i}")))?;
        let ts_offset = footer.offset;
        let val_offset = ts_offset + u64::from(footer.ts_len);
        let sid_offset = val_offset + u64::from(footer.val_len);
        let crc_offset = sid_offset + u64::from(footer.sid_len);
        let tags_offset = crc_offset + u64::from(footer.crc_len);
        let (ts_len, val_len, sid_len, crc_len, tags_len) =
            (footer.ts_len, footer.val_len, footer.sid_len, footer.crc_len, footer.tags_len);

        let ts_blob = self.read_segment(ts_offset, ts_len)?;
        let timestamps = compression::decompress_timestamps(&ts_blob, CompressionAlgorithm::DeltaOfDelta)?;

        let val_blob = self.read_segment(val_offset, val_len)?;
        let values = compression::decompress_values(&val_blob, CompressionAlgorithm::Gorilla)?;

        let sid_blob = self.read_segment(sid_offset, sid_len)?;
        let series_ids = decode_u64_column(&sid_blob)?;

        let crc_blob = self.read_segment(crc_offset, crc_len)?;
        let crcs = decode_u32_column(&crc_blob)?;

        let tags_blob = self.read_segment(tags_offset, tags_len)?;
        let tags = DictionaryColumn::deserialize(&tags_blob)
            .ok_or_else(|| Error::CorruptData("truncated tags column".into()))?
            .decode();

        let rows = timestamps
            .into_iter()
            .zip(values)
            .zip(series_ids)
            .zip(crcs)
            .zip(tags)
            .map(|((((timestamp, value), series_id), labels_crc32), canonical_labels)| Row {
                series_id,
                labels_crc32,
                canonical_labels,
                timestamp,
                value,
            })
            .collect();

        Ok(RecordBatch { rows })
    }
}

/// Counts row groups pruned/read for one (matchers, t0, t1) query against
/// one cold file, folded into [`crate::metrics::ColdQueryMetrics`] by the
/// caller.
#[derive(Copy, Clone, Debug, Default)]
pub struct PruneStats {
    pub total: u32,
    pub pruned_time: u32,
    pub pruned_tags: u32,
    pub read: u32,
    pub bytes_skipped: u64,
    pub bytes_read: u64,
}

/// Runs the two-phase row-group prune over `reader` for one query,
/// returning the matched series clipped to `[t0, t1]` plus prune stats for
/// metrics. Phase 0 (bloom, per-SeriesID) happens before this is called,
/// against the file as a whole; this function is Phase 1 (time, then tag
/// pruning) applied per row group.
pub fn query_cold_file(
    reader: &mut ColdFileReader,
    matchers: &[LabelMatcher],
    t0: i64,
    t1: i64,
) -> Result<(Vec<TimeSeries>, PruneStats)> {
    let mut stats = PruneStats::default();
    let mut regex_cache = crate::index::matcher::RegexCache::default();
    let mut out: Vec<TimeSeries> = Vec::new();

    for i in 0..reader.num_row_groups() {
        stats.total += 1;
        let rg = reader.row_group_stats(i).expect("index in bounds");

        if rg.max_ts < t0 || rg.min_ts > t1 {
            stats.pruned_time += 1;
            stats.bytes_skipped += rg.byte_size;
            continue;
        }

        let tags = reader.read_row_group_tags(i)?;
        let distinct_labels: std::collections::HashSet<&str> = tags.iter().map(|(_, t)| t.as_str()).collect();
        let any_match = distinct_labels.iter().any(|t| {
            let labels = parse_canonical(t);
            matchers.iter().all(|m| m.matches(&labels, &mut regex_cache))
        });
        if !any_match {
            stats.pruned_tags += 1;
            stats.bytes_skipped += rg.byte_size;
            continue;
        }

        stats.read += 1;
        stats.bytes_read += rg.byte_size;
        let batch = reader.read_row_group(i)?;
        let filtered: Vec<Row> = batch
            .rows
            .into_iter()
            .filter(|row| {
                let labels = parse_canonical(&row.canonical_labels);
                matchers.iter().all(|m| m.matches(&labels, &mut regex_cache))
            })
            .collect();
        out.extend(RecordBatch { rows: filtered }.into_time_series(t0, t1));
    }

    Ok((merge_series_by_labels(out), stats))
}

fn merge_series_by_labels(series: Vec<TimeSeries>) -> Vec<TimeSeries> {
    use std::collections::HashMap;
    let mut by_key: HashMap<String, TimeSeries> = HashMap::new();
    for ts in series {
        let key = ts.labels.canonical();
        by_key.entry(key).or_insert_with(|| TimeSeries::new(ts.labels.clone())).samples.extend(ts.samples);
    }
    let mut out: Vec<TimeSeries> = by_key.into_values().collect();
    for ts in &mut out {
        ts.sort_and_dedup();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(sid: SeriesId, labels: &str, ts: i64, val: f64) -> Row {
        Row {
            series_id: sid,
            labels_crc32: crate::label::labels_crc32(labels),
            canonical_labels: labels.to_string(),
            timestamp: ts,
            value: val,
        }
    }

    #[test]
    fn writes_and_reads_back_a_single_row_group() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.parquet");

        let mut writer = ColdFileWriter::create(&path, DEFAULT_ROW_GROUP_BYTES, 1_000, 0.01).unwrap();
        for i in 0..100 {
            writer.append_row(row(1, "__name__=cpu", 1000 + i, i as f64)).unwrap();
        }
        let stats = writer.finish().unwrap();
        assert_eq!(1, stats.len());
        assert_eq!(100, stats[0].num_rows);

        let mut reader = ColdFileReader::open(&path).unwrap();
        assert_eq!(1, reader.num_row_groups());
        let batch = reader.read_row_group(0).unwrap();
        assert_eq!(100, batch.rows.len());
        assert_eq!(1000, batch.rows[0].timestamp);
    }

    #[test]
    fn row_group_bounds_are_disjoint_across_two_groups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.parquet");

        let mut writer = ColdFileWriter::create(&path, 1, 1_000, 0.01).unwrap();
        writer.append_row(row(1, "__name__=cpu", 1_000_000, 1.0)).unwrap();
        writer.flush_row_group().unwrap();
        writer.append_row(row(1, "__name__=cpu", 5_000_000, 2.0)).unwrap();
        let stats = writer.finish().unwrap();
        assert_eq!(2, stats.len());

        let idx = SecondaryIndex::load_from_file(&index_sidecar_path(&path)).unwrap();
        let hits = idx.lookup_in_time_range(1, 1_000_000, 1_000_100);
        assert_eq!(1, hits.len());
        assert_eq!(0, hits[0].row_group_id);
    }

    #[test]
    fn query_cold_file_prunes_by_time_and_tags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.parquet");

        let mut writer = ColdFileWriter::create(&path, DEFAULT_ROW_GROUP_BYTES, 1_000, 0.01).unwrap();
        for i in 0..20 {
            writer.append_row(row(1, "__name__=cpu,host=h1", 1000 + i, i as f64)).unwrap();
        }
        for i in 0..20 {
            writer.append_row(row(2, "__name__=mem,host=h1", 1000 + i, i as f64)).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = ColdFileReader::open(&path).unwrap();
        let (series, prune_stats) = query_cold_file(
            &mut reader,
            &[LabelMatcher::Equal { name: "__name__".into(), value: "cpu".into() }],
            0,
            2000,
        )
        .unwrap();

        assert_eq!(1, series.len());
        assert_eq!(20, series[0].samples.len());
        assert_eq!(1, prune_stats.read);
        assert_eq!(0, prune_stats.pruned_time);
    }
}
