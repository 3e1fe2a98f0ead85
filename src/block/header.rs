//! The fixed-size header every serialized block (mutable snapshot or
//! sealed) carries: magic, format version, block id, flags, a CRC32 of
//! the payload that follows, and the block's observed time range.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{Error, Result};

pub const BLOCK_MAGIC: u32 = 0x5453_424C; // "TSBL"
pub const BLOCK_VERSION: u16 = 1;

/// Bit flags packed into the header's single flags byte.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockFlags(u8);

impl BlockFlags {
    pub const SEALED: Self = Self(0b0000_0001);
    pub const COMPRESSED: Self = Self(0b0000_0010);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & (Self::SEALED.0 | Self::COMPRESSED.0))
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for BlockFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BlockHeader {
    pub magic: u32,
    pub version: u16,
    pub id: u64,
    pub flags: BlockFlags,
    pub crc32: u32,
    pub start_ts: i64,
    pub end_ts: i64,
}

impl BlockHeader {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            version: BLOCK_VERSION,
            id,
            flags: BlockFlags::empty(),
            crc32: 0,
            start_ts: i64::MAX,
            end_ts: i64::MIN,
        }
    }

    pub fn update_time_range(&mut self, timestamp: i64) {
        self.start_ts = self.start_ts.min(timestamp);
        self.end_ts = self.end_ts.max(timestamp);
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_u32::<BigEndian>(self.magic)?;
        w.write_u16::<BigEndian>(self.version)?;
        w.write_u64::<BigEndian>(self.id)?;
        w.write_u8(self.flags.bits())?;
        w.write_u32::<BigEndian>(self.crc32)?;
        w.write_i64::<BigEndian>(self.start_ts)?;
        w.write_i64::<BigEndian>(self.end_ts)?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> Result<Self> {
        let magic = r.read_u32::<BigEndian>().map_err(io_to_corrupt)?;
        if magic != BLOCK_MAGIC {
            return Err(Error::CorruptData(format!("bad block magic: {magic:#x}")));
        }
        let version = r.read_u16::<BigEndian>().map_err(io_to_corrupt)?;
        let id = r.read_u64::<BigEndian>().map_err(io_to_corrupt)?;
        let flags = BlockFlags::from_bits_truncate(r.read_u8().map_err(io_to_corrupt)?);
        let crc32 = r.read_u32::<BigEndian>().map_err(io_to_corrupt)?;
        let start_ts = r.read_i64::<BigEndian>().map_err(io_to_corrupt)?;
        let end_ts = r.read_i64::<BigEndian>().map_err(io_to_corrupt)?;

        Ok(Self {
            magic,
            version,
            id,
            flags,
            crc32,
            start_ts,
            end_ts,
        })
    }
}

fn io_to_corrupt(err: io::Error) -> Error {
    Error::CorruptData(format!("truncated block header: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut header = BlockHeader::new(7);
        header.update_time_range(100);
        header.update_time_range(50);
        header.flags = BlockFlags::SEALED | BlockFlags::COMPRESSED;
        header.crc32 = 0xDEAD_BEEF;

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let restored = BlockHeader::read_from(&buf[..]).unwrap();

        assert_eq!(header.id, restored.id);
        assert_eq!(50, restored.start_ts);
        assert_eq!(100, restored.end_ts);
        assert!(restored.flags.contains(BlockFlags::SEALED));
        assert_eq!(0xDEAD_BEEF, restored.crc32);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 27];
        let err = BlockHeader::read_from(&buf[..]).unwrap_err();
        assert_eq!(crate::error::ErrorKind::CorruptData, err.kind());
    }
}
