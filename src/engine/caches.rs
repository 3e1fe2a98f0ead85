//! Path-keyed, read-through caches for the two cold-file sidecars: the
//! bloom filter (Phase 0 pruning) and the secondary index (Phase 1
//! row-group lookup). Mirrors [`crate::catalog::FileCatalog`]'s
//! lazy-build-then-cache shape, kept as two small caches rather than
//! folded into the catalog since a query only needs one of the two
//! sidecars at a time (tag-only projection skips the secondary index
//! entirely) and invalidation happens independently per writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::coldfile::bloom::BloomFilter;
use crate::coldfile::secondary_index::SecondaryIndex;
use crate::coldfile::{bloom_sidecar_path, index_sidecar_path};
use crate::error::Result;

/// Read-through cache of `.bloom` sidecars, keyed by the cold file's own
/// path (not the sidecar path, so callers never need to know the sidecar
/// naming convention).
#[derive(Default)]
pub struct BloomFilterCache {
    entries: RwLock<HashMap<PathBuf, Arc<BloomFilter>>>,
}

impl BloomFilterCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bloom filter for `cold_file`, loading its `.bloom`
    /// sidecar from disk on first access.
    pub fn get_or_load(&self, cold_file: &Path) -> Result<Arc<BloomFilter>> {
        if let Some(filter) = self.entries.read().expect("lock is poisoned").get(cold_file) {
            return Ok(Arc::clone(filter));
        }

        let bytes = std::fs::read(bloom_sidecar_path(cold_file))?;
        let filter = Arc::new(BloomFilter::read_from(&bytes[..])?);

        self.entries
            .write()
            .expect("lock is poisoned")
            .insert(cold_file.to_path_buf(), Arc::clone(&filter));
        Ok(filter)
    }

    pub fn invalidate(&self, cold_file: &Path) {
        self.entries.write().expect("lock is poisoned").remove(cold_file);
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

/// Read-through cache of `.idx` sidecars, keyed by the cold file's path.
#[derive(Default)]
pub struct SecondaryIndexCache {
    entries: RwLock<HashMap<PathBuf, Arc<SecondaryIndex>>>,
}

impl SecondaryIndexCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, cold_file: &Path) -> Result<Arc<SecondaryIndex>> {
        if let Some(index) = self.entries.read().expect("lock is poisoned").get(cold_file) {
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(SecondaryIndex::load_from_file(&index_sidecar_path(cold_file))?);

        self.entries
            .write()
            .expect("lock is poisoned")
            .insert(cold_file.to_path_buf(), Arc::clone(&index));
        Ok(index)
    }

    pub fn invalidate(&self, cold_file: &Path) {
        self.entries.write().expect("lock is poisoned").remove(cold_file);
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

/// Evicts `cold_file` from the catalog and both sidecar caches in one
/// call, since the three always need to be invalidated together whenever
/// a cold file is replaced or removed (compaction output, retention).
pub fn evict_all(catalog: &crate::catalog::FileCatalog, blooms: &BloomFilterCache, indexes: &SecondaryIndexCache, cold_file: &Path) {
    catalog.evict(cold_file);
    blooms.invalidate(cold_file);
    indexes.invalidate(cold_file);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coldfile::{ColdFileWriter, Row, DEFAULT_ROW_GROUP_BYTES};
    use tempfile::tempdir;

    fn write_cold_file(path: &Path) {
        let mut writer = ColdFileWriter::create(path, DEFAULT_ROW_GROUP_BYTES, 100, 0.01).unwrap();
        for i in 0..10 {
            writer
                .append_row(Row {
                    series_id: 7,
                    labels_crc32: 0,
                    canonical_labels: "__name__=mem".into(),
                    timestamp: i,
                    value: i as f64,
                })
                .unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn bloom_cache_loads_then_caches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.parquet");
        write_cold_file(&path);

        let cache = BloomFilterCache::new();
        assert!(cache.is_empty());
        let filter = cache.get_or_load(&path).unwrap();
        assert!(filter.might_contain(7));
        assert_eq!(1, cache.len());

        cache.invalidate(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn secondary_index_cache_loads_then_caches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.parquet");
        write_cold_file(&path);

        let cache = SecondaryIndexCache::new();
        let index = cache.get_or_load(&path).unwrap();
        assert!(index.contains(7));
        assert_eq!(1, cache.len());
    }

    #[test]
    fn evict_all_clears_every_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.parquet");
        write_cold_file(&path);

        let catalog = crate::catalog::FileCatalog::new();
        let blooms = BloomFilterCache::new();
        let indexes = SecondaryIndexCache::new();

        catalog.get_file_meta(&path).unwrap();
        blooms.get_or_load(&path).unwrap();
        indexes.get_or_load(&path).unwrap();

        evict_all(&catalog, &blooms, &indexes, &path);

        assert!(catalog.is_empty());
        assert!(blooms.is_empty());
        assert!(indexes.is_empty());
    }
}
