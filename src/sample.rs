//! A single measurement ([`Sample`]) and a named, ordered collection of
//! them ([`TimeSeries`]).

use crate::label::Labels;

/// One measurement: a millisecond timestamp, a float value, and an
/// optional set of extra per-point fields (e.g. a histogram's quantile
/// breakdown) carried alongside the primary value.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch. May be negative (pre-1970).
    pub timestamp: i64,

    /// The primary value. `NaN` and infinities are valid and must survive
    /// a compress/decompress round trip bit-for-bit.
    pub value: f64,

    /// Optional extra fields, stored and returned verbatim but not
    /// interpreted by the storage engine itself.
    pub fields: Option<Vec<(String, f64)>>,
}

impl Sample {
    #[must_use]
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            fields: None,
        }
    }

    #[must_use]
    pub fn with_fields(timestamp: i64, value: f64, fields: Vec<(String, f64)>) -> Self {
        Self {
            timestamp,
            value,
            fields: Some(fields),
        }
    }
}

/// A labeled series together with a batch of samples to write, or the
/// samples returned for it from a query.
///
/// Samples are not required to be sorted on input -- the engine sorts by
/// timestamp before appending them to a block -- but are always returned
/// sorted and deduplicated by timestamp (last writer wins) from a query.
#[derive(Clone, Debug, Default)]
pub struct TimeSeries {
    pub labels: Labels,
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    #[must_use]
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_samples(labels: Labels, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }

    /// Sorts samples by timestamp and removes duplicate timestamps,
    /// keeping the last sample for each timestamp.
    ///
    /// "Last" is defined by position in the pre-sort `Vec`: callers that
    /// care about write order should append in that order before calling
    /// this, since a stable sort preserves relative order of equal keys.
    pub fn sort_and_dedup(&mut self) {
        self.samples.sort_by_key(|s| s.timestamp);

        let mut write = 0;
        for read in 0..self.samples.len() {
            if write > 0 && self.samples[write - 1].timestamp == self.samples[read].timestamp {
                self.samples[write - 1] = self.samples[read].clone();
            } else {
                if write != read {
                    self.samples[write] = self.samples[read].clone();
                }
                write += 1;
            }
        }
        self.samples.truncate(write);
    }

    /// Clips samples to `[start, end]` inclusive on both ends.
    pub fn clip(&mut self, start: i64, end: i64) {
        self.samples.retain(|s| s.timestamp >= start && s.timestamp <= end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_and_dedup_keeps_last_writer() {
        let mut ts = TimeSeries::new(Labels::new());
        ts.samples.push(Sample::new(5, 1.0));
        ts.samples.push(Sample::new(1, 2.0));
        ts.samples.push(Sample::new(5, 3.0));

        ts.sort_and_dedup();

        assert_eq!(2, ts.samples.len());
        assert_eq!(1, ts.samples[0].timestamp);
        assert_eq!(5, ts.samples[1].timestamp);
        assert_eq!(3.0, ts.samples[1].value);
    }

    #[test]
    fn clip_is_inclusive_both_ends() {
        let mut ts = TimeSeries::new(Labels::new());
        for t in 0..10 {
            ts.samples.push(Sample::new(t, t as f64));
        }
        ts.clip(2, 5);
        let timestamps: Vec<i64> = ts.samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(vec![2, 3, 4, 5], timestamps);
    }

    #[test]
    fn nan_and_inf_survive_equality_by_bits() {
        let nan = Sample::new(0, f64::NAN);
        assert!(nan.value.is_nan());
        let inf = Sample::new(0, f64::INFINITY);
        assert!(inf.value.is_infinite());
    }
}
