//! Per-query regex cache so a single compiled pattern is reused across
//! every candidate label value evaluated during that query, instead of
//! recompiling it per candidate.

use regex::Regex;
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct RegexCache {
    compiled: FxHashMap<String, Regex>,
}

impl RegexCache {
    /// Returns the compiled regex for `pattern`, compiling and caching it
    /// on first use. An invalid pattern compiles to a regex matching
    /// nothing, so evaluation never panics on bad user input.
    pub fn get(&mut self, pattern: &str) -> &Regex {
        self.compiled
            .entry(pattern.to_string())
            .or_insert_with(|| Regex::new(pattern).unwrap_or_else(|_| Regex::new("$^").expect("literal regex is valid")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_compiled_pattern_across_calls() {
        let mut cache = RegexCache::default();
        assert!(cache.get("^prod.*").is_match("prod-east"));
        assert!(cache.get("^prod.*").is_match("prod-west"));
    }

    #[test]
    fn invalid_pattern_matches_nothing_instead_of_panicking() {
        let mut cache = RegexCache::default();
        assert!(!cache.get("(unclosed").is_match("anything"));
    }
}
