//! Core label model: [`Labels`], [`LabelMatcher`], and the canonical
//! label-string fingerprinting used to derive a stable [`SeriesId`].
//!
//! A canonical `k=v,k=v` string (keys sorted) is hashed to produce the
//! series ID, and a CRC32 of that same string is stored alongside samples
//! so cold-file row groups can be tag-pruned without decoding full labels.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// A 64-bit stable hash of a series' canonical label string.
///
/// Stable across processes and platforms because it is derived from the
/// canonical string, not from pointer or allocation order.
pub type SeriesId = u64;

/// The label key that denotes the metric name, by convention.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// An ordered mapping from label name to label value.
///
/// Internally a `BTreeMap` so iteration is always lexicographic on key,
/// which is what makes [`Labels::canonical`] deterministic.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Creates an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a label set from an iterator of key-value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.insert(k.into(), v.into());
        }
        Self(map)
    }

    /// Returns `true` if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Gets a label value by key.
    ///
    /// Returns `None` if the key is absent -- an absent key is never
    /// conflated with a present key holding an empty string.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Inserts or overwrites a label.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Iterates over `(key, value)` pairs in lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the metric name (`__name__`), if set.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    /// Builds the canonical string form: `k1=v1,k2=v2,...` with keys sorted.
    ///
    /// This is the sole input to [`Labels::series_id`] and to
    /// `labels_crc32`; any two [`Labels`] with the same entries produce
    /// the same canonical string regardless of insertion order.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    /// Computes this label set's [`SeriesId`].
    ///
    /// Delegates to the process-wide hasher, which defaults to a stable
    /// xxh3-based hash but can be swapped for a collision-forcing function
    /// in tests via [`set_series_id_hasher_for_test`].
    #[must_use]
    pub fn series_id(&self) -> SeriesId {
        series_id(&self.canonical())
    }

    /// Computes the CRC32 of this label set's canonical string.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        labels_crc32(&self.canonical())
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

/// Computes the CRC32 (IEEE) of a canonical label string.
#[must_use]
pub fn labels_crc32(canonical: &str) -> u32 {
    crc32fast::hash(canonical.as_bytes())
}

/// Computes the default, production [`SeriesId`] hash of a canonical
/// label string: 64-bit xxh3.
fn default_series_id_hasher(canonical: &str) -> SeriesId {
    xxhash_rust::xxh3::xxh3_64(canonical.as_bytes())
}

// --- Test seam -------------------------------------------------------
//
// Lets tests force SeriesID collisions so the engine's collision-defense
// path (re-verifying a candidate's full Labels against the query before
// trusting a posting-list hit) can be exercised deterministically.

type SeriesIdHasherFn = fn(&str) -> SeriesId;

static USE_TEST_HASHER: AtomicBool = AtomicBool::new(false);
static TEST_HASHER: RwLock<Option<SeriesIdHasherFn>> = RwLock::new(None);

/// Computes the [`SeriesId`] of a canonical label string, honoring the
/// test-only collision-forcing hasher if one has been installed.
#[must_use]
pub fn series_id(canonical: &str) -> SeriesId {
    if USE_TEST_HASHER.load(Ordering::Acquire) {
        let guard = TEST_HASHER.read().expect("lock is poisoned");
        if let Some(hasher) = *guard {
            return hasher(canonical);
        }
    }
    default_series_id_hasher(canonical)
}

/// Installs a test-only hasher, replacing `series_id`'s implementation for
/// the remainder of the process (or until [`reset_series_id_hasher_for_test`]
/// is called). Intended to force `series_id(a) == series_id(b)` for `a != b`
/// so collision-defense logic can be validated.
pub fn set_series_id_hasher_for_test(hasher: SeriesIdHasherFn) {
    *TEST_HASHER.write().expect("lock is poisoned") = Some(hasher);
    USE_TEST_HASHER.store(true, Ordering::Release);
}

/// Restores the default production hasher.
pub fn reset_series_id_hasher_for_test() {
    USE_TEST_HASHER.store(false, Ordering::Release);
    *TEST_HASHER.write().expect("lock is poisoned") = None;
}

/// A single predicate over one label.
#[derive(Clone, Debug)]
pub enum LabelMatcher {
    /// Label equals a value exactly (absent label is never equal to a
    /// non-empty value, but is treated as `""` for comparison purposes).
    Equal { name: String, value: String },

    /// Label does not equal a value. An absent label is treated as `""`
    /// for comparison, so `NotEqual(k, "")` selects series where `k` is
    /// present and non-empty.
    NotEqual { name: String, value: String },

    /// Label matches a regular expression.
    RegexMatch { name: String, pattern: String },

    /// Label does not match a regular expression.
    RegexNoMatch { name: String, pattern: String },
}

impl LabelMatcher {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Equal { name, .. }
            | Self::NotEqual { name, .. }
            | Self::RegexMatch { name, .. }
            | Self::RegexNoMatch { name, .. } => name,
        }
    }

    /// Evaluates this matcher against one candidate's labels.
    ///
    /// `regex_cache` lets callers reuse one compiled regex across many
    /// candidates within a single query.
    pub fn matches(&self, labels: &Labels, regex_cache: &mut crate::index::matcher::RegexCache) -> bool {
        match self {
            Self::Equal { name, value } => labels.get(name).unwrap_or("") == value,

            Self::NotEqual { name, value } => {
                if value.is_empty() {
                    // NotEqual(k, "") selects series with k present and non-empty.
                    labels.get(name).is_some_and(|v| !v.is_empty())
                } else {
                    labels.get(name).unwrap_or("") != value
                }
            }

            Self::RegexMatch { name, pattern } => {
                let value = labels.get(name).unwrap_or("");
                regex_cache.get(pattern).is_match(value)
            }

            Self::RegexNoMatch { name, pattern } => {
                let value = labels.get(name).unwrap_or("");
                let matches_empty = regex_cache.get(pattern).is_match("");
                if labels.get(name).is_none() && matches_empty {
                    // Regex matches the empty string -> absent-key candidates
                    // are excluded.
                    return false;
                }
                !regex_cache.get(pattern).is_match(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_sorted_by_key() {
        let labels = Labels::from_pairs([("b", "2"), ("a", "1"), ("c", "3")]);
        assert_eq!("a=1,b=2,c=3", labels.canonical());
    }

    #[test]
    fn absent_key_differs_from_empty_value() {
        let mut labels = Labels::new();
        labels.insert("env", "");
        assert_eq!(Some(""), labels.get("env"));
        assert_eq!(None, labels.get("missing"));
    }

    #[test]
    fn series_id_stable_across_reorderings() {
        let a = Labels::from_pairs([("b", "2"), ("a", "1")]);
        let b = Labels::from_pairs([("a", "1"), ("b", "2")]);
        assert_eq!(a.series_id(), b.series_id());
    }

    #[test]
    fn series_id_collision_test_seam() {
        fn force_collision(_canonical: &str) -> SeriesId {
            42
        }

        set_series_id_hasher_for_test(force_collision);
        let a = Labels::from_pairs([(METRIC_NAME_LABEL, "a")]);
        let b = Labels::from_pairs([(METRIC_NAME_LABEL, "b")]);
        assert_eq!(a.series_id(), b.series_id());
        assert_ne!(a.canonical(), b.canonical());
        reset_series_id_hasher_for_test();

        let a2 = Labels::from_pairs([(METRIC_NAME_LABEL, "a")]);
        let b2 = Labels::from_pairs([(METRIC_NAME_LABEL, "b")]);
        assert_ne!(a2.series_id(), b2.series_id());
    }

    #[test]
    fn not_equal_empty_requires_present_nonempty() {
        let mut cache = crate::index::matcher::RegexCache::default();
        let matcher = LabelMatcher::NotEqual {
            name: "env".into(),
            value: String::new(),
        };

        let present = Labels::from_pairs([("env", "prod")]);
        assert!(matcher.matches(&present, &mut cache));

        let absent = Labels::new();
        assert!(!matcher.matches(&absent, &mut cache));

        let empty = Labels::from_pairs([("env", "")]);
        assert!(!matcher.matches(&empty, &mut cache));
    }
}
