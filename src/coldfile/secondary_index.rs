//! `SeriesId -> Vec<RowLocation>` index persisted as a `.idx` sidecar
//! next to each cold file, so a lookup can jump straight to the row
//! groups holding a series instead of scanning the whole file.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::label::SeriesId;

const INDEX_MAGIC: u32 = 0x5453_4458; // "TSDX"
const INDEX_VERSION: u32 = 1;

/// Where a series' samples live within one row group of a cold file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RowLocation {
    pub row_group_id: u32,
    pub row_offset: u64,
    pub min_ts: i64,
    pub max_ts: i64,
}

impl RowLocation {
    #[must_use]
    pub fn overlaps(&self, t0: i64, t1: i64) -> bool {
        self.min_ts <= t1 && self.max_ts >= t0
    }
}

#[derive(Default, Clone, Copy)]
pub struct IndexStats {
    pub num_series: usize,
    pub num_locations: usize,
}

/// `series_id -> Vec<RowLocation>` for one cold file.
#[derive(Default)]
pub struct SecondaryIndex {
    entries: HashMap<SeriesId, Vec<RowLocation>>,
}

impl SecondaryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sid: SeriesId, location: RowLocation) {
        self.entries.entry(sid).or_default().push(location);
    }

    /// All row locations for `sid`, in insertion order. Empty if the
    /// series isn't present in this file.
    #[must_use]
    pub fn lookup(&self, sid: SeriesId) -> &[RowLocation] {
        self.entries.get(&sid).map_or(&[], Vec::as_slice)
    }

    /// Row locations for `sid` whose own `[min_ts, max_ts]` overlaps
    /// `[t0, t1]`. Each location's range comes from that row group's
    /// own statistics, not the series' range across the whole file, so
    /// a series spanning row groups only pulls in the ones that matter.
    #[must_use]
    pub fn lookup_in_time_range(&self, sid: SeriesId, t0: i64, t1: i64) -> Vec<RowLocation> {
        self.lookup(sid).iter().filter(|loc| loc.overlaps(t0, t1)).copied().collect()
    }

    #[must_use]
    pub fn contains(&self, sid: SeriesId) -> bool {
        self.entries.contains_key(&sid)
    }

    #[must_use]
    pub fn series_ids(&self) -> Vec<SeriesId> {
        self.entries.keys().copied().collect()
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            num_series: self.entries.len(),
            num_locations: self.entries.values().map(Vec::len).sum(),
        }
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_u32::<BigEndian>(INDEX_MAGIC)?;
        w.write_u32::<BigEndian>(INDEX_VERSION)?;
        w.write_u64::<BigEndian>(self.entries.len() as u64)?;
        for (&sid, locations) in &self.entries {
            w.write_u64::<BigEndian>(sid)?;
            w.write_u32::<BigEndian>(locations.len() as u32)?;
            for loc in locations {
                w.write_u32::<BigEndian>(loc.row_group_id)?;
                w.write_u64::<BigEndian>(loc.row_offset)?;
                w.write_i64::<BigEndian>(loc.min_ts)?;
                w.write_i64::<BigEndian>(loc.max_ts)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> Result<Self> {
        let magic = r.read_u32::<BigEndian>().map_err(io_to_corrupt)?;
        if magic != INDEX_MAGIC {
            return Err(Error::CorruptData(format!("bad secondary index magic: {magic:#x}")));
        }
        let version = r.read_u32::<BigEndian>().map_err(io_to_corrupt)?;
        if version != INDEX_VERSION {
            return Err(Error::CorruptData(format!("unsupported secondary index version: {version}")));
        }
        let series_count = r.read_u64::<BigEndian>().map_err(io_to_corrupt)?;

        let mut entries = HashMap::with_capacity(series_count as usize);
        for _ in 0..series_count {
            let sid = r.read_u64::<BigEndian>().map_err(io_to_corrupt)?;
            let location_count = r.read_u32::<BigEndian>().map_err(io_to_corrupt)?;
            let mut locations = Vec::with_capacity(location_count as usize);
            for _ in 0..location_count {
                locations.push(RowLocation {
                    row_group_id: r.read_u32::<BigEndian>().map_err(io_to_corrupt)?,
                    row_offset: r.read_u64::<BigEndian>().map_err(io_to_corrupt)?,
                    min_ts: r.read_i64::<BigEndian>().map_err(io_to_corrupt)?,
                    max_ts: r.read_i64::<BigEndian>().map_err(io_to_corrupt)?,
                });
            }
            entries.insert(sid, locations);
        }

        Ok(Self { entries })
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        std::fs::write(path, buf)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::read_from(&bytes[..])
    }
}

fn io_to_corrupt(err: io::Error) -> Error {
    Error::CorruptData(format!("truncated secondary index: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_in_time_range_uses_row_group_own_bounds() {
        let mut index = SecondaryIndex::new();
        index.insert(1, RowLocation { row_group_id: 0, row_offset: 0, min_ts: 0, max_ts: 100 });
        index.insert(1, RowLocation { row_group_id: 1, row_offset: 0, min_ts: 200, max_ts: 300 });

        let hits = index.lookup_in_time_range(1, 150, 250);
        assert_eq!(1, hits.len());
        assert_eq!(1, hits[0].row_group_id);
    }

    #[test]
    fn serialization_round_trips_multi_location_entries() {
        let mut index = SecondaryIndex::new();
        index.insert(7, RowLocation { row_group_id: 0, row_offset: 10, min_ts: 0, max_ts: 50 });
        index.insert(7, RowLocation { row_group_id: 2, row_offset: 20, min_ts: 100, max_ts: 150 });
        index.insert(8, RowLocation { row_group_id: 0, row_offset: 5, min_ts: 0, max_ts: 50 });

        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        let restored = SecondaryIndex::read_from(&buf[..]).unwrap();

        assert_eq!(2, restored.lookup(7).len());
        assert_eq!(1, restored.lookup(8).len());
        assert_eq!(2, restored.stats().num_series);
        assert_eq!(3, restored.stats().num_locations);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 20];
        let err = SecondaryIndex::read_from(&buf[..]).unwrap_err();
        assert_eq!(crate::error::ErrorKind::CorruptData, err.kind());
    }
}
