//! Digest and stored-record types plus their fixed-size on-disk encoding.
//!
//! Record (LE, 80 bytes):
//!   hash[64]        = digest payload, NUL padded
//!   block_size[4]
//!   pad[4]          = 0
//!   inserted_at[8]  = unix seconds

use crate::consts::{BUCKETS, HASH_LEN, RECORD_SIZE, REC_OFF_BLOCK, REC_OFF_TIME};
use crate::errors::{FuzzyError, Result};
use byteorder::{ByteOrder, LittleEndian as LE};
use std::fmt;

/// A fuzzy hash payload tagged with the block size it was computed at.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest {
    pub block_size: u32,
    pub hash: [u8; HASH_LEN],
}

impl Digest {
    pub fn new(block_size: u32, hash: [u8; HASH_LEN]) -> Self {
        Self { block_size, hash }
    }

    /// Build from a pattern shorter than the payload; the tail is NUL padded.
    pub fn from_pattern(block_size: u32, pattern: &[u8]) -> Result<Self> {
        if pattern.len() > HASH_LEN {
            return Err(FuzzyError::InvalidInput(format!(
                "hash is {} bytes, at most {HASH_LEN} allowed",
                pattern.len()
            )));
        }
        let mut hash = [0u8; HASH_LEN];
        hash[..pattern.len()].copy_from_slice(pattern);
        Ok(Self { block_size, hash })
    }

    /// Payload up to the first NUL. This is what the filter and the oracle see.
    pub fn pattern(&self) -> &[u8] {
        let end = self.hash.iter().position(|&b| b == 0).unwrap_or(HASH_LEN);
        &self.hash[..end]
    }

    #[inline]
    pub fn bucket(&self) -> usize {
        self.block_size as usize % BUCKETS
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digest")
            .field("block_size", &self.block_size)
            .field("pattern", &String::from_utf8_lossy(self.pattern()))
            .finish()
    }
}

/// A digest as held by a bucket. Never mutated once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredRecord {
    pub digest: Digest,
    pub inserted_at: u64,
}

impl StoredRecord {
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..HASH_LEN].copy_from_slice(&self.digest.hash);
        LE::write_u32(&mut out[REC_OFF_BLOCK..REC_OFF_BLOCK + 4], self.digest.block_size);
        LE::write_u64(&mut out[REC_OFF_TIME..], self.inserted_at);
        out
    }

    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&buf[..HASH_LEN]);
        Self {
            digest: Digest::new(LE::read_u32(&buf[REC_OFF_BLOCK..]), hash),
            inserted_at: LE::read_u64(&buf[REC_OFF_TIME..]),
        }
    }

    /// Seconds since insertion; a stamp in the future counts as zero.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.inserted_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_stops_at_nul() {
        let d = Digest::from_pattern(3, b"abcdef").unwrap();
        assert_eq!(d.pattern(), b"abcdef");
        let full = Digest::new(3, [b'x'; HASH_LEN]);
        assert_eq!(full.pattern().len(), HASH_LEN);
        assert!(Digest::from_pattern(3, &[b'a'; HASH_LEN + 1]).is_err());
    }

    #[test]
    fn bucket_wraps() {
        assert_eq!(Digest::from_pattern(5, b"a").unwrap().bucket(), 5);
        assert_eq!(Digest::from_pattern(5 + BUCKETS as u32, b"a").unwrap().bucket(), 5);
    }

    #[test]
    fn record_layout() {
        let rec = StoredRecord {
            digest: Digest::from_pattern(0x0102_0304, b"hash").unwrap(),
            inserted_at: 0x1122_3344_5566_7788,
        };
        let raw = rec.encode();
        assert_eq!(&raw[..4], b"hash");
        assert_eq!(&raw[64..68], &[4, 3, 2, 1]);
        assert_eq!(&raw[68..72], &[0, 0, 0, 0]);
        assert_eq!(raw[72], 0x88);
        assert_eq!(StoredRecord::decode(&raw), rec);
    }

    #[test]
    fn future_stamp_has_zero_age() {
        let rec = StoredRecord { digest: Digest::from_pattern(1, b"a").unwrap(), inserted_at: 100 };
        assert_eq!(rec.age(50), 0);
        assert_eq!(rec.age(160), 60);
    }
}
