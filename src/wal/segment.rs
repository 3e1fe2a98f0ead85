//! One `wal_XXXXXXXX` segment file: length-prefixed, CRC32-checksummed
//! records, with a replay routine used both by [`super::Wal::open`] and
//! standalone recovery tooling.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::warn;

use crate::error::Result;
use crate::label::Labels;
use crate::sample::{Sample, TimeSeries};

/// One append-only segment backing file.
pub struct Segment {
    path: PathBuf,
    file: File,
    len_bytes: u64,
}

impl Segment {
    pub fn create(dir: &Path, id: u64) -> Result<Self> {
        let path = dir.join(format!("wal_{id:08}"));
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        let len_bytes = file.metadata()?.len();
        Ok(Self { path, file, len_bytes })
    }

    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        let mut framed = Vec::with_capacity(payload.len() + 8);
        framed.write_u32::<BigEndian>(payload.len() as u32)?;
        framed.write_u32::<BigEndian>(crc32fast::hash(payload))?;
        framed.extend_from_slice(payload);

        self.file.write_all(&framed)?;
        self.len_bytes += framed.len() as u64;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.len_bytes = 0;
        Ok(())
    }

    #[must_use]
    pub fn len_bytes(&self) -> u64 {
        self.len_bytes
    }
}

/// Parses the numeric suffix from a `wal_XXXXXXXX` path.
#[must_use]
pub fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.strip_prefix("wal_")?.parse().ok()
}

/// Replays every valid record in `path` in order, feeding each decoded
/// [`TimeSeries`] to `on_record`. A record whose CRC fails is skipped and
/// logged; a truncated trailing record (fewer bytes than its length
/// prefix claims) ends replay for this segment without error, since it
/// represents a write that was interrupted mid-append.
pub fn replay(path: &Path, on_record: &mut impl FnMut(TimeSeries)) -> Result<()> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    loop {
        let len = match reader.read_u32::<BigEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        let expected_crc = match reader.read_u32::<BigEndian>() {
            Ok(crc) => crc,
            Err(_) => break,
        };

        let mut payload = vec![0u8; len as usize];
        if reader.read_exact(&mut payload).is_err() {
            warn!("wal segment {} has a truncated trailing record, stopping replay", path.display());
            break;
        }

        if crc32fast::hash(&payload) != expected_crc {
            warn!("wal segment {} has a CRC-mismatched record, skipping", path.display());
            continue;
        }

        match decode_time_series(&payload) {
            Some(series) => on_record(series),
            None => warn!("wal segment {} has a malformed record, skipping", path.display()),
        }
    }

    Ok(())
}

/// Serializes a [`TimeSeries`] as: canonical-labels (len-prefixed), then
/// count-prefixed `(timestamp, value)` pairs.
#[must_use]
pub fn encode_time_series(series: &TimeSeries) -> Vec<u8> {
    let mut out = Vec::new();
    let canonical = series.labels.canonical();
    out.write_u32::<BigEndian>(canonical.len() as u32).expect("write to Vec never fails");
    out.extend_from_slice(canonical.as_bytes());
    out.write_u32::<BigEndian>(series.samples.len() as u32).expect("write to Vec never fails");
    for sample in &series.samples {
        out.write_i64::<BigEndian>(sample.timestamp).expect("write to Vec never fails");
        out.write_u64::<BigEndian>(sample.value.to_bits()).expect("write to Vec never fails");
    }
    out
}

/// Inverse of [`encode_time_series`].
#[must_use]
pub fn decode_time_series(data: &[u8]) -> Option<TimeSeries> {
    let mut cursor = data;
    let label_len = cursor.read_u32::<BigEndian>().ok()? as usize;
    if cursor.len() < label_len {
        return None;
    }
    let (label_bytes, rest) = cursor.split_at(label_len);
    cursor = rest;
    let canonical = std::str::from_utf8(label_bytes).ok()?;
    let labels = if canonical.is_empty() {
        Labels::new()
    } else {
        Labels::from_pairs(canonical.split(',').filter_map(|pair| pair.split_once('=')))
    };

    let sample_count = cursor.read_u32::<BigEndian>().ok()? as usize;
    let mut samples = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        let timestamp = cursor.read_i64::<BigEndian>().ok()?;
        let value = f64::from_bits(cursor.read_u64::<BigEndian>().ok()?);
        samples.push(Sample::new(timestamp, value));
    }

    Some(TimeSeries::with_samples(labels, samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_series_round_trips() {
        let mut ts = TimeSeries::new(Labels::from_pairs([("__name__", "cpu"), ("host", "h1")]));
        ts.samples.push(Sample::new(1, 1.0));
        ts.samples.push(Sample::new(2, f64::NAN));

        let encoded = encode_time_series(&ts);
        let decoded = decode_time_series(&encoded).unwrap();

        assert_eq!(ts.labels, decoded.labels);
        assert_eq!(2, decoded.samples.len());
        assert_eq!(1.0, decoded.samples[0].value);
        assert!(decoded.samples[1].value.is_nan());
    }

    #[test]
    fn parse_segment_id_reads_numeric_suffix() {
        let path = Path::new("/tmp/wal/wal_00000042");
        assert_eq!(Some(42), parse_segment_id(path));
    }
}
