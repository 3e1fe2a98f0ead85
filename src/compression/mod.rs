//! Compression codecs for sealed block columns: timestamp delta-of-delta
//! / Gorilla, value XOR / Gorilla / RLE, and label dictionary encoding.

mod bitio;
pub mod label;
pub mod timestamp;
pub mod value;

use crate::error::{Error, Result};

/// How many leading samples `adaptive_compression` inspects before
/// picking a value codec.
const ADAPTIVE_SAMPLE_SIZE: usize = 64;

/// The timestamp/value/label codec selected for one column.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompressionAlgorithm {
    DeltaOfDelta,
    Gorilla,
    Rle,
    Dictionary,
}

/// A column tag, used to validate that an algorithm applies to the right
/// column kind (e.g. `Rle`/`DeltaOfDelta`/`Gorilla` don't apply to labels).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnKind {
    Timestamp,
    Value,
    Label,
}

impl CompressionAlgorithm {
    fn applies_to(self, kind: ColumnKind) -> bool {
        match self {
            Self::DeltaOfDelta => kind == ColumnKind::Timestamp,
            Self::Gorilla => matches!(kind, ColumnKind::Timestamp | ColumnKind::Value),
            Self::Rle => kind == ColumnKind::Value,
            Self::Dictionary => kind == ColumnKind::Label,
        }
    }
}

/// Per-column-kind compression configuration.
#[derive(Clone, Debug)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub timestamp_algorithm: CompressionAlgorithm,
    pub value_algorithm: CompressionAlgorithm,
    pub adaptive: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timestamp_algorithm: CompressionAlgorithm::DeltaOfDelta,
            value_algorithm: CompressionAlgorithm::Gorilla,
            adaptive: false,
        }
    }
}

/// Compresses a timestamp column with `algorithm`, which must be a
/// timestamp-applicable algorithm.
pub fn compress_timestamps(timestamps: &[i64], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    if !algorithm.applies_to(ColumnKind::Timestamp) {
        return Err(Error::InvalidArgument(format!(
            "{algorithm:?} does not apply to timestamp columns"
        )));
    }
    Ok(match algorithm {
        CompressionAlgorithm::Gorilla => timestamp::encode_gorilla(timestamps),
        _ => timestamp::encode_delta_of_delta(timestamps),
    })
}

/// Decompresses a timestamp column previously produced by
/// [`compress_timestamps`] with `algorithm`.
pub fn decompress_timestamps(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<i64>> {
    let decoded = match algorithm {
        CompressionAlgorithm::Gorilla => timestamp::decode_gorilla(data),
        _ => timestamp::decode_delta_of_delta(data),
    };
    decoded.ok_or_else(|| Error::CorruptData("truncated timestamp column".into()))
}

/// Compresses a value column with `algorithm`. When `algorithm` is
/// [`CompressionAlgorithm::Gorilla`] it is treated as the XOR codec (the
/// same codec the original Gorilla paper applies to float values).
pub fn compress_values(values: &[f64], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    if !algorithm.applies_to(ColumnKind::Value) {
        return Err(Error::InvalidArgument(format!(
            "{algorithm:?} does not apply to value columns"
        )));
    }
    Ok(match algorithm {
        CompressionAlgorithm::Rle => value::encode_rle(values),
        _ => value::encode_xor(values),
    })
}

/// Decompresses a value column previously produced by [`compress_values`].
pub fn decompress_values(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<f64>> {
    let decoded = match algorithm {
        CompressionAlgorithm::Rle => value::decode_rle(data),
        _ => value::decode_xor(data),
    };
    decoded.ok_or_else(|| Error::CorruptData("truncated value column".into()))
}

/// Picks the value codec to use for `values` given `config`.
///
/// When `config.adaptive` is set, samples the first
/// [`ADAPTIVE_SAMPLE_SIZE`] values and switches to RLE if they're all
/// bit-identical; otherwise the configured algorithm is used verbatim.
#[must_use]
pub fn adaptive_value_algorithm(values: &[f64], config: &CompressionConfig) -> CompressionAlgorithm {
    if !config.adaptive {
        return config.value_algorithm;
    }
    if value::is_near_constant(values, ADAPTIVE_SAMPLE_SIZE) {
        CompressionAlgorithm::Rle
    } else {
        config.value_algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_selects_rle_for_constant_series() {
        let config = CompressionConfig {
            adaptive: true,
            ..CompressionConfig::default()
        };
        let constant = vec![42.0; 200];
        assert_eq!(CompressionAlgorithm::Rle, adaptive_value_algorithm(&constant, &config));

        let varying: Vec<f64> = (0..200).map(f64::from).collect();
        assert_eq!(
            CompressionAlgorithm::Gorilla,
            adaptive_value_algorithm(&varying, &config)
        );
    }

    #[test]
    fn rejects_mismatched_column_kind() {
        let err = compress_timestamps(&[1, 2, 3], CompressionAlgorithm::Rle).unwrap_err();
        assert_eq!(crate::error::ErrorKind::InvalidArgument, err.kind());
    }
}
