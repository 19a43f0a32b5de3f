//! Shared fixtures for the benchmarks.
use fuzzy_core::consts::HASH_LEN;
use fuzzy_core::Digest;
use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Random printable digests spread over `block_sizes` distinct block sizes.
pub fn random_digests(n: usize, block_sizes: u32) -> Vec<Digest> {
    let mut rng = rand::rng();
    (0..n)
        .map(|_| {
            let len = rng.random_range(32..=64);
            let mut hash = [0u8; HASH_LEN];
            for b in hash.iter_mut().take(len) {
                *b = ALPHABET[rng.random_range(0..ALPHABET.len())];
            }
            let bs = 3u32 << rng.random_range(0..block_sizes.max(1));
            Digest::new(bs, hash)
        })
        .collect()
}
