//! The in-memory, lazily-built index over cold files on disk: `path -> FileMeta`
//! built by opening a file once and reading its
//! row-group footer, then cached until a writer (compaction) evicts it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::coldfile::{ColdFileReader, RowGroupStats};
use crate::error::Result;

/// Cached, file-level statistics derived from a cold file's footer.
#[derive(Clone, Debug)]
pub struct FileMeta {
    pub min_ts: i64,
    pub max_ts: i64,
    pub row_groups: Vec<RowGroupStats>,
    pub file_size: u64,
}

impl FileMeta {
    fn from_reader(reader: &ColdFileReader, file_size: u64) -> Self {
        let row_groups: Vec<RowGroupStats> = (0..reader.num_row_groups())
            .filter_map(|i| reader.row_group_stats(i))
            .collect();
        let min_ts = row_groups.iter().map(|rg| rg.min_ts).min().unwrap_or(0);
        let max_ts = row_groups.iter().map(|rg| rg.max_ts).max().unwrap_or(0);
        Self { min_ts, max_ts, row_groups, file_size }
    }
}

/// Lazy, path-keyed cache of [`FileMeta`]. A miss opens the file and reads
/// its footer once; a hit is served from memory. Writers call
/// [`FileCatalog::evict`] after replacing a file (compaction, deletion).
#[derive(Default)]
pub struct FileCatalog {
    entries: RwLock<HashMap<PathBuf, FileMeta>>,
}

impl FileCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached [`FileMeta`] for `path`, building it by opening
    /// the file if this is the first access.
    pub fn get_file_meta(&self, path: &Path) -> Result<FileMeta> {
        if let Some(meta) = self.entries.read().expect("lock is poisoned").get(path) {
            return Ok(meta.clone());
        }

        let reader = ColdFileReader::open(path)?;
        let file_size = std::fs::metadata(path)?.len();
        let meta = FileMeta::from_reader(&reader, file_size);

        self.entries.write().expect("lock is poisoned").insert(path.to_path_buf(), meta.clone());
        Ok(meta)
    }

    /// Drops the cached entry for `path`, forcing the next
    /// [`get_file_meta`](Self::get_file_meta) to rebuild it. Callers that
    /// replace a file on disk (compaction output, deletion) must also
    /// invalidate the bloom-filter and secondary-index caches for the same
    /// path; the catalog only tracks its own entry.
    pub fn evict(&self, path: &Path) {
        self.entries.write().expect("lock is poisoned").remove(path);
    }

    /// Registers `meta` directly, skipping the read-through open. Used by
    /// the writer path right after [`crate::coldfile::ColdFileWriter::finish`]
    /// returns its row-group stats, so the newly written file doesn't pay
    /// for a redundant footer read.
    pub fn insert(&self, path: PathBuf, meta: FileMeta) {
        self.entries.write().expect("lock is poisoned").insert(path, meta);
    }

    #[must_use]
    pub fn known_paths(&self) -> Vec<PathBuf> {
        self.entries.read().expect("lock is poisoned").keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock is poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coldfile::ColdFileWriter;
    use tempfile::tempdir;

    fn write_cold_file(path: &Path) {
        let mut writer = ColdFileWriter::create(path, crate::coldfile::DEFAULT_ROW_GROUP_BYTES, 100, 0.01).unwrap();
        for i in 0..10 {
            writer
                .append_row(crate::coldfile::Row {
                    series_id: 1,
                    labels_crc32: 0,
                    canonical_labels: "__name__=cpu".into(),
                    timestamp: 1000 + i,
                    value: i as f64,
                })
                .unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn get_file_meta_builds_then_caches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.parquet");
        write_cold_file(&path);

        let catalog = FileCatalog::new();
        assert!(catalog.is_empty());

        let meta = catalog.get_file_meta(&path).unwrap();
        assert_eq!(1000, meta.min_ts);
        assert_eq!(1009, meta.max_ts);
        assert_eq!(1, meta.row_groups.len());
        assert_eq!(1, catalog.len());

        let meta2 = catalog.get_file_meta(&path).unwrap();
        assert_eq!(meta.min_ts, meta2.min_ts);
    }

    #[test]
    fn evict_forces_rebuild() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.parquet");
        write_cold_file(&path);

        let catalog = FileCatalog::new();
        catalog.get_file_meta(&path).unwrap();
        assert_eq!(1, catalog.len());

        catalog.evict(&path);
        assert!(catalog.is_empty());

        catalog.get_file_meta(&path).unwrap();
        assert_eq!(1, catalog.len());
    }
}
