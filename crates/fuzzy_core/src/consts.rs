// crates/fuzzy_core/src/consts.rs

use core::mem::size_of;

/// Digest payload length (bytes) on the wire and on disk.
pub const HASH_LEN: usize = 64;

/// Number of independent buckets; a digest lives in `block_size % BUCKETS`.
pub const BUCKETS: usize = 1024;

/// Scores must be strictly greater than this to count as a match.
pub const MATCH_LIMIT: u32 = 99;

/// Mutations accumulated before a non-forced sync is due.
pub const MOD_LIMIT: u32 = 10_000;

pub const DEFAULT_EXPIRE_SECS: u64 = 172_800; // 2 days
pub const DEFAULT_SYNC_SECS: u64 = 60;
pub const DEFAULT_IDLE_SECS: u64 = 60;
pub const DEFAULT_SOFT_SHUTDOWN_SECS: u64 = 10;

pub const DEFAULT_FILTER_CAPACITY: usize = 20_000_000;
pub const DEFAULT_FILTER_FP_RATE: f64 = 0.01;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:11335";

/// Command layout: opcode[1] pad[3] block_size[4] hash[64]
pub const CMD_SIZE: usize = 72;
pub const CMD_OFF_BLOCK: usize = 4;
pub const CMD_OFF_HASH: usize = 8;

/// Record layout: hash[64] block_size[4] pad[4] inserted_at[8]
pub const RECORD_SIZE: usize = 80;
pub const REC_OFF_BLOCK: usize = HASH_LEN;
pub const REC_OFF_TIME: usize = HASH_LEN + 8;

pub const REPLY_OK: &[u8] = b"OK\r\n";
pub const REPLY_ERR: &[u8] = b"ERR\r\n";

const _: () = { assert!(CMD_OFF_HASH + HASH_LEN == CMD_SIZE); };
const _: () = { assert!(REC_OFF_TIME + size_of::<u64>() == RECORD_SIZE); };
