//! Dictionary encoding for repeated label values within a cold-file row
//! group: distinct strings are stored once, and each row references one
//! by a varint index.

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

/// A dictionary-encoded column of strings: a deduplicated dictionary plus
/// one index per original row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DictionaryColumn {
    pub dictionary: Vec<String>,
    pub indices: Vec<u32>,
}

impl DictionaryColumn {
    /// Builds a dictionary column from a sequence of values, preserving
    /// first-seen order in the dictionary.
    #[must_use]
    pub fn encode(values: &[String]) -> Self {
        let mut dictionary = Vec::new();
        let mut seen = std::collections::HashMap::new();
        let mut indices = Vec::with_capacity(values.len());

        for value in values {
            let idx = *seen.entry(value.clone()).or_insert_with(|| {
                dictionary.push(value.clone());
                (dictionary.len() - 1) as u32
            });
            indices.push(idx);
        }

        Self { dictionary, indices }
    }

    /// Reconstructs the original value sequence.
    #[must_use]
    pub fn decode(&self) -> Vec<String> {
        self.indices
            .iter()
            .map(|&idx| self.dictionary[idx as usize].clone())
            .collect()
    }

    /// Serializes as: dict len, each dict entry (len-prefixed), then one
    /// varint index per row.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.dictionary.len() as u64);
        for entry in &self.dictionary {
            write_varint(&mut out, entry.len() as u64);
            out.extend_from_slice(entry.as_bytes());
        }
        write_varint(&mut out, self.indices.len() as u64);
        for &idx in &self.indices {
            write_varint(&mut out, u64::from(idx));
        }
        out
    }

    /// Inverse of [`DictionaryColumn::serialize`].
    #[must_use]
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        let mut pos = 0;
        let dict_len = read_varint(data, &mut pos)? as usize;
        let mut dictionary = Vec::with_capacity(dict_len);
        for _ in 0..dict_len {
            let str_len = read_varint(data, &mut pos)? as usize;
            let bytes = data.get(pos..pos + str_len)?;
            pos += str_len;
            dictionary.push(String::from_utf8(bytes.to_vec()).ok()?);
        }

        let row_count = read_varint(data, &mut pos)? as usize;
        let mut indices = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            indices.push(read_varint(data, &mut pos)? as u32);
        }

        Some(Self { dictionary, indices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_round_trips_repeated_values() {
        let values: Vec<String> = ["prod", "dev", "prod", "prod", "staging", "dev"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let col = DictionaryColumn::encode(&values);
        assert_eq!(3, col.dictionary.len());
        assert_eq!(values, col.decode());

        let bytes = col.serialize();
        let restored = DictionaryColumn::deserialize(&bytes).unwrap();
        assert_eq!(col, restored);
    }
}
