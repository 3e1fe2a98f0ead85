//! A standard, double-hashed bloom filter over `SeriesId`s, one per cold
//! file. A negative `might_contain` lets a query skip the whole file
//! without opening its secondary index.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::label::SeriesId;

/// Estimated distinct series per file, used to size a freshly built
/// filter when the caller doesn't know the exact count up front.
pub const DEFAULT_NDV: usize = 100_000;
/// Target false-positive probability at `DEFAULT_NDV` items.
pub const DEFAULT_FPP: f32 = 0.01;

const MAGIC: [u8; 4] = *b"TSBF";

fn get_bit(byte: u8, idx: usize) -> bool {
    byte & (0b1000_0000 >> idx) > 0
}

fn set_bit(byte: u8, idx: usize, value: bool) -> u8 {
    let mask = 0b1000_0000 >> idx;
    if value {
        byte | mask
    } else {
        byte & !mask
    }
}

#[derive(Debug, Eq, PartialEq)]
struct BitArray(Box<[u8]>);

impl BitArray {
    fn with_capacity(bytes: usize) -> Self {
        Self(vec![0u8; bytes].into_boxed_slice())
    }

    fn from_bytes(bytes: Box<[u8]>) -> Self {
        Self(bytes)
    }

    fn bytes(&self) -> &[u8] {
        &self.0
    }

    fn get(&self, idx: usize) -> bool {
        let byte = self.0[idx / 8];
        get_bit(byte, idx % 8)
    }

    fn enable(&mut self, idx: usize) {
        let byte_idx = idx / 8;
        self.0[byte_idx] = set_bit(self.0[byte_idx], idx % 8, true);
    }
}

/// A block-split bloom filter sized for a target false-positive rate,
/// using double hashing (two xxh3 halves combined) instead of `k`
/// independent hash functions.
#[derive(Debug, Eq, PartialEq)]
pub struct BloomFilter {
    inner: BitArray,
    m: usize,
    k: usize,
}

impl BloomFilter {
    /// Builds a filter sized to hold `n` items at false-positive rate
    /// `fpp`.
    #[must_use]
    pub fn with_fp_rate(n: usize, fpp: f32) -> Self {
        use std::f32::consts::LN_2;

        let n = n.max(1);
        let fpp = fpp.max(0.000_001);

        let m = Self::calculate_m(n, fpp);
        let bpk = (m / n).max(1);
        let k = (((bpk as f32) * LN_2) as usize).max(1);

        Self {
            inner: BitArray::with_capacity(m / 8),
            m,
            k,
        }
    }

    /// Convenience constructor using the engine-wide defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::with_fp_rate(DEFAULT_NDV, DEFAULT_FPP)
    }

    fn calculate_m(n: usize, fpp: f32) -> usize {
        use std::f32::consts::LN_2;

        let n = n as f32;
        let ln2_squared = LN_2.powi(2);
        let m = -(n * fpp.ln() / ln2_squared);
        ((m / 8.0).ceil() * 8.0).max(8.0) as usize
    }

    fn hash(sid: SeriesId) -> (u64, u64) {
        let h0 = xxhash_rust::xxh3::xxh3_128(&sid.to_be_bytes());
        ((h0 >> 64) as u64, h0 as u64)
    }

    /// Adds `sid` to the filter.
    pub fn insert(&mut self, sid: SeriesId) {
        let (mut h1, mut h2) = Self::hash(sid);
        for i in 0..(self.k as u64) {
            let idx = (h1 % self.m as u64) as usize;
            self.inner.enable(idx);
            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_add(i);
        }
    }

    /// Returns `false` only if `sid` is definitely absent; `true` means
    /// "maybe present" and the caller must still verify.
    #[must_use]
    pub fn might_contain(&self, sid: SeriesId) -> bool {
        let (mut h1, mut h2) = Self::hash(sid);
        for i in 0..(self.k as u64) {
            let idx = (h1 % self.m as u64) as usize;
            if !self.inner.get(idx) {
                return false;
            }
            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_add(i);
        }
        true
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.inner.bytes().len()
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u64::<BigEndian>(self.m as u64)?;
        w.write_u64::<BigEndian>(self.k as u64)?;
        w.write_all(self.inner.bytes())?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(io_to_corrupt)?;
        if magic != MAGIC {
            return Err(Error::CorruptData("bad bloom filter magic".into()));
        }
        let m = r.read_u64::<BigEndian>().map_err(io_to_corrupt)? as usize;
        let k = r.read_u64::<BigEndian>().map_err(io_to_corrupt)? as usize;
        let mut bytes = vec![0u8; m / 8];
        r.read_exact(&mut bytes).map_err(io_to_corrupt)?;
        Ok(Self {
            inner: BitArray::from_bytes(bytes.into_boxed_slice()),
            m,
            k,
        })
    }
}

fn io_to_corrupt(err: io::Error) -> Error {
    Error::CorruptData(format!("truncated bloom filter: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_ids_are_always_found() {
        let mut filter = BloomFilter::with_fp_rate(100, 0.01);
        for sid in 0..100u64 {
            filter.insert(sid);
        }
        for sid in 0..100u64 {
            assert!(filter.might_contain(sid));
        }
    }

    #[test]
    fn false_positive_rate_is_reasonable_at_scale() {
        let mut filter = BloomFilter::with_fp_rate(1_000, 0.01);
        for sid in 0..1_000u64 {
            filter.insert(sid);
        }
        let false_positives = (1_000u64..11_000).filter(|&sid| filter.might_contain(sid)).count();
        assert!(false_positives < 500, "false positive rate too high: {false_positives}/10000");
    }

    #[test]
    fn serialization_round_trips() {
        let mut filter = BloomFilter::with_fp_rate(50, 0.01);
        for sid in 0..50u64 {
            filter.insert(sid * 7);
        }
        let mut buf = Vec::new();
        filter.write_to(&mut buf).unwrap();
        let restored = BloomFilter::read_from(&buf[..]).unwrap();
        assert_eq!(filter, restored);
        assert!(restored.might_contain(0));
        assert!(restored.might_contain(49 * 7));
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 20];
        let err = BloomFilter::read_from(&buf[..]).unwrap_err();
        assert_eq!(crate::error::ErrorKind::CorruptData, err.kind());
    }
}
