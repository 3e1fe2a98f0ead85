//! Timestamp codecs: delta-of-delta (default) and a Gorilla-style
//! bit-packed variant, both operating on a monotone (or near-monotone)
//! `i64` millisecond stream.

use super::bitio::{BitReader, BitWriter};

/// Zigzag-encodes a signed delta into an unsigned value so small negative
/// and positive deltas both produce small varints.
fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
}

/// Delta-of-delta encodes `timestamps`: the first value is stored as a
/// raw varint, the first delta as a zigzag varint, and every subsequent
/// value as the zigzag-varint of `delta[i] - delta[i-1]`.
#[must_use]
pub fn encode_delta_of_delta(timestamps: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(timestamps.len() * 2);
    write_varint(&mut out, timestamps.len() as u64);

    if timestamps.is_empty() {
        return out;
    }

    write_varint(&mut out, zigzag_encode(timestamps[0]));
    if timestamps.len() == 1 {
        return out;
    }

    let mut prev_delta = timestamps[1] - timestamps[0];
    write_varint(&mut out, zigzag_encode(prev_delta));
    let mut prev = timestamps[1];

    for &ts in &timestamps[2..] {
        let delta = ts - prev;
        let dod = delta - prev_delta;
        write_varint(&mut out, zigzag_encode(dod));
        prev_delta = delta;
        prev = ts;
    }

    out
}

/// Inverse of [`encode_delta_of_delta`].
#[must_use]
pub fn decode_delta_of_delta(data: &[u8]) -> Option<Vec<i64>> {
    let mut pos = 0;
    let count = read_varint(data, &mut pos)? as usize;
    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Some(out);
    }

    let first = zigzag_decode(read_varint(data, &mut pos)?);
    out.push(first);
    if count == 1 {
        return Some(out);
    }

    let first_delta = zigzag_decode(read_varint(data, &mut pos)?);
    let mut prev = first + first_delta;
    out.push(prev);
    let mut prev_delta = first_delta;

    for _ in 2..count {
        let dod = zigzag_decode(read_varint(data, &mut pos)?);
        let delta = prev_delta + dod;
        prev += delta;
        out.push(prev);
        prev_delta = delta;
    }

    Some(out)
}

/// Gorilla-style bit-packed delta-of-delta: the first timestamp and first
/// delta are stored raw (64 and 64 bits respectively, for simplicity and
/// to tolerate arbitrarily large first deltas); each subsequent
/// delta-of-delta is stored with a leading unary prefix selecting one of
/// four bit-width buckets, matching the classic Gorilla timestamp scheme.
#[must_use]
pub fn encode_gorilla(timestamps: &[i64]) -> Vec<u8> {
    let mut header = Vec::new();
    write_varint(&mut header, timestamps.len() as u64);

    if timestamps.len() < 2 {
        if let Some(&t) = timestamps.first() {
            write_varint(&mut header, zigzag_encode(t));
        }
        return header;
    }

    write_varint(&mut header, zigzag_encode(timestamps[0]));
    let first_delta = timestamps[1] - timestamps[0];
    write_varint(&mut header, zigzag_encode(first_delta));

    let mut writer = BitWriter::new();
    let mut prev_delta = first_delta;
    let mut prev = timestamps[1];

    for &ts in &timestamps[2..] {
        let delta = ts - prev;
        let dod = delta - prev_delta;
        write_dod_bucket(&mut writer, dod);
        prev_delta = delta;
        prev = ts;
    }

    let body = writer.finish();
    header.extend_from_slice(&body);
    header
}

fn write_dod_bucket(writer: &mut BitWriter, dod: i64) {
    if dod == 0 {
        writer.write_bit(false);
    } else if (-63..=64).contains(&dod) {
        writer.write_bits(0b10, 2);
        writer.write_bits((dod - (-63)) as u64, 7);
    } else if (-255..=256).contains(&dod) {
        writer.write_bits(0b110, 3);
        writer.write_bits((dod - (-255)) as u64, 9);
    } else if (-2047..=2048).contains(&dod) {
        writer.write_bits(0b1110, 4);
        writer.write_bits((dod - (-2047)) as u64, 12);
    } else {
        writer.write_bits(0b1111, 4);
        writer.write_bits(zigzag_encode(dod), 64);
    }
}

fn read_dod_bucket(reader: &mut BitReader<'_>) -> Option<i64> {
    if !reader.read_bit()? {
        return Some(0);
    }
    if !reader.read_bit()? {
        let raw = reader.read_bits(7)? as i64;
        return Some(raw + (-63));
    }
    if !reader.read_bit()? {
        let raw = reader.read_bits(9)? as i64;
        return Some(raw + (-255));
    }
    if !reader.read_bit()? {
        let raw = reader.read_bits(12)? as i64;
        return Some(raw + (-2047));
    }
    Some(zigzag_decode(reader.read_bits(64)?))
}

/// Inverse of [`encode_gorilla`].
#[must_use]
pub fn decode_gorilla(data: &[u8]) -> Option<Vec<i64>> {
    let mut pos = 0;
    let count = read_varint(data, &mut pos)? as usize;
    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Some(out);
    }

    let first = zigzag_decode(read_varint(data, &mut pos)?);
    out.push(first);
    if count == 1 {
        return Some(out);
    }

    let first_delta = zigzag_decode(read_varint(data, &mut pos)?);
    let mut prev = first + first_delta;
    out.push(prev);
    let mut prev_delta = first_delta;

    let mut reader = BitReader::new(&data[pos..]);
    for _ in 2..count {
        let dod = read_dod_bucket(&mut reader)?;
        let delta = prev_delta + dod;
        prev += delta;
        out.push(prev);
        prev_delta = delta;
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_of_delta_round_trips_monotone_stream() {
        let timestamps: Vec<i64> = (0..200).map(|i| 1_000 + i * 15).collect();
        let encoded = encode_delta_of_delta(&timestamps);
        let decoded = decode_delta_of_delta(&encoded).unwrap();
        assert_eq!(timestamps, decoded);
    }

    #[test]
    fn delta_of_delta_round_trips_irregular_stream() {
        let timestamps = vec![-500, -100, 0, 1, 1_000_000, 1_000_001, 999_999];
        let encoded = encode_delta_of_delta(&timestamps);
        let decoded = decode_delta_of_delta(&encoded).unwrap();
        assert_eq!(timestamps, decoded);
    }

    #[test]
    fn gorilla_round_trips_monotone_stream_with_jitter() {
        let mut timestamps = Vec::new();
        let mut t = 0i64;
        for i in 0..500 {
            t += 1000 + (i % 7) - 3;
            timestamps.push(t);
        }
        let encoded = encode_gorilla(&timestamps);
        let decoded = decode_gorilla(&encoded).unwrap();
        assert_eq!(timestamps, decoded);
    }

    #[test]
    fn handles_zero_and_single_element_streams() {
        assert_eq!(Some(Vec::new()), decode_delta_of_delta(&encode_delta_of_delta(&[])));
        assert_eq!(Some(vec![42]), decode_delta_of_delta(&encode_delta_of_delta(&[42])));
        assert_eq!(Some(Vec::new()), decode_gorilla(&encode_gorilla(&[])));
        assert_eq!(Some(vec![42]), decode_gorilla(&encode_gorilla(&[42])));
    }
}
