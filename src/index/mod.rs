//! Inverted / sharded index mapping `(label_name, label_value)` to the
//! set of series carrying it, plus the reverse `SeriesId -> Labels` map
//! used for collision verification and delete.

pub mod matcher;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use rustc_hash::{FxHashSet, FxHasher};

use crate::label::{LabelMatcher, Labels, SeriesId};
use matcher::RegexCache;

/// Number of shards the postings/names maps are split across. Sharding
/// by `label_name` lets writers to different label names proceed without
/// contending on the same lock.
const SHARD_COUNT: usize = 16;

fn shard_of(label_name: &str) -> usize {
    let mut hasher = FxHasher::default();
    label_name.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

#[derive(Default)]
struct Shard {
    /// `(label_name, label_value) -> series`.
    postings: HashMap<(String, String), FxHashSet<SeriesId>>,
    /// `label_name -> distinct values seen`.
    names: HashMap<String, FxHashSet<String>>,
}

/// The reverse `SeriesId -> Labels` map, kept as a bucket of distinct
/// Labels per ID rather than a single value: a forced (or, in principle,
/// naturally occurring) hash collision must not let one series's Labels
/// silently replace another's, so every lookup re-verifies by equality
/// against the requested Labels rather than trusting the ID alone.
#[derive(Default)]
struct ReverseMap {
    buckets: HashMap<SeriesId, Vec<Labels>>,
}

/// The inverted index over every series the engine has ever seen.
pub struct InvertedIndex {
    shards: Vec<RwLock<Shard>>,
    reverse: RwLock<ReverseMap>,
}

impl Default for InvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InvertedIndex {
    #[must_use]
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(RwLock::new(Shard::default()));
        }
        Self {
            shards,
            reverse: RwLock::new(ReverseMap::default()),
        }
    }

    /// Inserts `labels`, returning its SeriesID.
    ///
    /// Idempotent for identical Labels. If the ID's bucket already holds
    /// a *different* Labels (a genuine or forced hash collision), the new
    /// Labels is appended to the bucket rather than replacing anything --
    /// both series keep answering independently under the shared ID.
    pub fn insert(&self, labels: &Labels) -> SeriesId {
        let sid = labels.series_id();

        {
            let guard = self.reverse.read().expect("lock is poisoned");
            if let Some(bucket) = guard.buckets.get(&sid) {
                if bucket.contains(labels) {
                    return sid;
                }
            }
        }

        {
            let mut guard = self.reverse.write().expect("lock is poisoned");
            let bucket = guard.buckets.entry(sid).or_default();
            if !bucket.contains(labels) {
                bucket.push(labels.clone());
            }
        }

        for (name, value) in labels.iter() {
            let shard = &self.shards[shard_of(name)];
            let mut guard = shard.write().expect("lock is poisoned");
            guard
                .postings
                .entry((name.to_string(), value.to_string()))
                .or_default()
                .insert(sid);
            guard.names.entry(name.to_string()).or_default().insert(value.to_string());
        }

        sid
    }

    /// Returns every distinct Labels sharing `sid`, for collision-aware
    /// callers that already hold a candidate ID.
    #[must_use]
    pub fn labels_bucket(&self, sid: SeriesId) -> Vec<Labels> {
        let guard = self.reverse.read().expect("lock is poisoned");
        guard.buckets.get(&sid).cloned().unwrap_or_default()
    }

    fn postings_for(&self, name: &str, value: &str) -> FxHashSet<SeriesId> {
        let shard = &self.shards[shard_of(name)];
        let guard = shard.read().expect("lock is poisoned");
        guard
            .postings
            .get(&(name.to_string(), value.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Resolves `matchers` to the distinct Labels satisfying every
    /// matcher. Each candidate SeriesID's whole bucket is checked (not
    /// just its first entry), so a forced collision never lets one
    /// series's query results leak into another's.
    #[must_use]
    pub fn query(&self, matchers: &[LabelMatcher]) -> Vec<Labels> {
        let mut regex_cache = RegexCache::default();

        let equal_matchers: Vec<&LabelMatcher> = matchers
            .iter()
            .filter(|m| matches!(m, LabelMatcher::Equal { .. }))
            .collect();

        let candidate_ids: FxHashSet<SeriesId> = if equal_matchers.is_empty() {
            let guard = self.reverse.read().expect("lock is poisoned");
            guard.buckets.keys().copied().collect()
        } else {
            let mut postings: Vec<FxHashSet<SeriesId>> = equal_matchers
                .iter()
                .map(|m| match m {
                    LabelMatcher::Equal { name, value } => self.postings_for(name, value),
                    _ => unreachable!(),
                })
                .collect();

            postings.sort_by_key(FxHashSet::len);

            let mut acc: Option<FxHashSet<SeriesId>> = None;
            for set in postings {
                acc = Some(match acc {
                    None => set,
                    Some(existing) => existing.intersection(&set).copied().collect(),
                });
                if acc.as_ref().is_some_and(FxHashSet::is_empty) {
                    break;
                }
            }
            acc.unwrap_or_default()
        };

        let mut out = Vec::new();
        for sid in candidate_ids {
            for labels in self.labels_bucket(sid) {
                if matchers.iter().all(|m| m.matches(&labels, &mut regex_cache)) {
                    out.push(labels);
                }
            }
        }
        out
    }

    /// Removes every series matching `matchers` from both maps, returning
    /// their Labels.
    pub fn delete_series(&self, matchers: &[LabelMatcher]) -> Vec<Labels> {
        let victims = self.query(matchers);

        for labels in &victims {
            let sid = labels.series_id();

            for (name, value) in labels.iter() {
                let shard = &self.shards[shard_of(name)];
                let mut guard = shard.write().expect("lock is poisoned");
                if let Some(set) = guard.postings.get_mut(&(name.to_string(), value.to_string())) {
                    set.remove(&sid);
                }
            }

            let mut guard = self.reverse.write().expect("lock is poisoned");
            if let Some(bucket) = guard.buckets.get_mut(&sid) {
                bucket.retain(|l| l != labels);
                if bucket.is_empty() {
                    guard.buckets.remove(&sid);
                }
            }
        }

        victims
    }

    /// All distinct label names ever inserted.
    #[must_use]
    pub fn label_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for shard in &self.shards {
            let guard = shard.read().expect("lock is poisoned");
            names.extend(guard.names.keys().cloned());
        }
        names.sort();
        names.dedup();
        names
    }

    /// All distinct values seen for `name`.
    #[must_use]
    pub fn label_values(&self, name: &str) -> Vec<String> {
        let shard = &self.shards[shard_of(name)];
        let guard = shard.read().expect("lock is poisoned");
        let mut values: Vec<String> = guard.names.get(name).map(|s| s.iter().cloned().collect()).unwrap_or_default();
        values.sort();
        values
    }

    /// Number of distinct series currently indexed (bucket entries, not
    /// distinct IDs -- two colliding series both count).
    #[must_use]
    pub fn series_count(&self) -> usize {
        let guard = self.reverse.read().expect("lock is poisoned");
        guard.buckets.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        Labels::from_pairs(pairs.iter().map(|(k, v)| (*k, *v)))
    }

    #[test]
    fn insert_is_idempotent_for_identical_labels() {
        let index = InvertedIndex::new();
        let l = labels(&[("__name__", "cpu"), ("host", "h1")]);
        let a = index.insert(&l);
        let b = index.insert(&l);
        assert_eq!(a, b);
        assert_eq!(1, index.series_count());
    }

    #[test]
    fn not_equal_excludes_present_and_includes_absent() {
        let index = InvertedIndex::new();
        let a = labels(&[("metric", "up"), ("env", "prod")]);
        let b = labels(&[("metric", "up"), ("env", "dev")]);
        let c = labels(&[("metric", "up")]);
        index.insert(&a);
        index.insert(&b);
        index.insert(&c);

        let mut results = index.query(&[
            LabelMatcher::Equal {
                name: "metric".into(),
                value: "up".into(),
            },
            LabelMatcher::NotEqual {
                name: "env".into(),
                value: "prod".into(),
            },
        ]);
        results.sort_by_key(Labels::canonical);

        assert_eq!(2, results.len());
        assert!(results.contains(&b));
        assert!(results.contains(&c));
    }

    #[test]
    fn not_equal_empty_requires_present_and_nonempty() {
        let index = InvertedIndex::new();
        let a = labels(&[("metric", "up"), ("env", "prod")]);
        let b = labels(&[("metric", "up"), ("env", "dev")]);
        let c = labels(&[("metric", "up")]);
        index.insert(&a);
        index.insert(&b);
        index.insert(&c);

        let results = index.query(&[
            LabelMatcher::Equal {
                name: "metric".into(),
                value: "up".into(),
            },
            LabelMatcher::NotEqual {
                name: "env".into(),
                value: String::new(),
            },
        ]);

        assert_eq!(2, results.len());
        assert!(results.contains(&a));
        assert!(results.contains(&b));
    }

    #[test]
    fn delete_series_removes_from_postings_and_reverse_map() {
        let index = InvertedIndex::new();
        let l = labels(&[("metric", "gone")]);
        index.insert(&l);

        let removed = index.delete_series(&[LabelMatcher::Equal {
            name: "metric".into(),
            value: "gone".into(),
        }]);

        assert_eq!(vec![l.clone()], removed);
        assert!(index.query(&[LabelMatcher::Equal {
            name: "metric".into(),
            value: "gone".into(),
        }])
        .is_empty());
    }

    #[test]
    fn collision_forced_series_are_distinguished_by_reverify() {
        crate::label::set_series_id_hasher_for_test(|_canonical| 7);
        let index = InvertedIndex::new();
        let a = labels(&[("__name__", "a")]);
        let b = labels(&[("__name__", "b")]);
        index.insert(&a);
        index.insert(&b);

        assert_eq!(a.series_id(), b.series_id());
        assert_eq!(2, index.series_count());

        let results = index.query(&[LabelMatcher::Equal {
            name: "__name__".into(),
            value: "a".into(),
        }]);
        assert_eq!(vec![a], results);
        crate::label::reset_series_id_hasher_for_test();
    }
}
