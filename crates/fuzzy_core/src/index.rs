//! Bucketed approximate-match index guarded by a counting Bloom filter.
//!
//! Every record lives in bucket `block_size % BUCKETS`, newest first. The
//! filter is keyed by digest pattern: a negative answer is trusted without a
//! scan, a positive answer is always confirmed by scanning the bucket.

use crate::consts::{BUCKETS, DEFAULT_FILTER_CAPACITY, DEFAULT_FILTER_FP_RATE, MATCH_LIMIT};
use crate::digest::{Digest, StoredRecord};
use crate::filter::CountingBloom;
use crate::similarity::{LevenshteinSimilarity, Similarity};
use crate::utils::now_secs;
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreStats {
    pub records: usize,
    pub buckets_used: usize,
    pub pending_mods: u32,
    pub filter_fill: f64,
}

pub struct FuzzyStore<S = LevenshteinSimilarity> {
    buckets: Vec<VecDeque<StoredRecord>>,
    filter: CountingBloom,
    mods: u32,
    oracle: S,
}

impl Default for FuzzyStore<LevenshteinSimilarity> {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_CAPACITY, DEFAULT_FILTER_FP_RATE)
    }
}

impl FuzzyStore<LevenshteinSimilarity> {
    pub fn new(filter_capacity: usize, fp_rate: f64) -> Self {
        Self::with_oracle(filter_capacity, fp_rate, LevenshteinSimilarity)
    }
}

impl<S: Similarity> FuzzyStore<S> {
    pub fn with_oracle(filter_capacity: usize, fp_rate: f64, oracle: S) -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| VecDeque::new()).collect(),
            filter: CountingBloom::with_capacity(filter_capacity, fp_rate),
            mods: 0,
            oracle,
        }
    }

    /// Is there a stored record scoring above the limit in the probe's bucket?
    pub fn check(&self, probe: &Digest) -> bool {
        if !self.filter.contains(probe.pattern()) {
            return false;
        }
        let mut last = 0;
        for rec in &self.buckets[probe.bucket()] {
            last = self.oracle.score(&rec.digest, probe);
            if last > MATCH_LIMIT {
                info!(probability = last, "fuzzy hash was found");
                return true;
            }
        }
        debug!(probability = last, "fuzzy hash was not found");
        false
    }

    pub fn write(&mut self, digest: &Digest) -> bool {
        self.write_at(digest, now_secs())
    }

    /// Insert unless the filter already reports the pattern.
    pub fn write_at(&mut self, digest: &Digest, now: u64) -> bool {
        if self.filter.contains(digest.pattern()) {
            debug!(block_size = digest.block_size, "write rejected, pattern already known");
            return false;
        }
        self.buckets[digest.bucket()].push_front(StoredRecord { digest: *digest, inserted_at: now });
        self.filter.add(digest.pattern());
        self.mods = self.mods.saturating_add(1);
        info!(block_size = digest.block_size, "fuzzy hash was successfully added");
        true
    }

    /// Remove every record in the probe's bucket that scores above the limit.
    pub fn delete(&mut self, probe: &Digest) -> bool {
        if !self.filter.contains(probe.pattern()) {
            return false;
        }
        let Self { buckets, filter, mods, oracle } = self;
        let bucket = &mut buckets[probe.bucket()];
        let before = bucket.len();
        bucket.retain(|rec| {
            if oracle.score(&rec.digest, probe) > MATCH_LIMIT {
                filter.remove(rec.digest.pattern());
                false
            } else {
                true
            }
        });
        let removed = before - bucket.len();
        if removed > 0 {
            *mods = mods.saturating_add(removed as u32);
            info!(removed, block_size = probe.block_size, "fuzzy hash was successfully deleted");
        }
        removed > 0
    }

    /// Append a record read back from disk, keeping file order within a bucket.
    pub fn insert_loaded(&mut self, rec: StoredRecord) {
        self.filter.add(rec.digest.pattern());
        self.buckets[rec.digest.bucket()].push_back(rec);
    }

    /// Drop records at least `expire` seconds old, handing every survivor to
    /// `keep` in bucket order. Returns the number dropped.
    pub fn sweep<F>(&mut self, now: u64, expire: u64, mut keep: F) -> usize
    where
        F: FnMut(&StoredRecord),
    {
        let Self { buckets, filter, .. } = self;
        let mut expired = 0usize;
        for bucket in buckets.iter_mut() {
            bucket.retain(|rec| {
                if rec.age(now) >= expire {
                    filter.remove(rec.digest.pattern());
                    expired += 1;
                    false
                } else {
                    keep(rec);
                    true
                }
            });
        }
        expired
    }

    pub fn pending_mods(&self) -> u32 {
        self.mods
    }

    pub fn reset_mods(&mut self) {
        self.mods = 0;
    }

    pub fn bucket(&self, idx: usize) -> &VecDeque<StoredRecord> {
        &self.buckets[idx % BUCKETS]
    }

    pub fn records(&self) -> impl Iterator<Item = &StoredRecord> {
        self.buckets.iter().flat_map(|b| b.iter())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    pub fn filter(&self) -> &CountingBloom {
        &self.filter
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            records: self.len(),
            buckets_used: self.buckets.iter().filter(|b| !b.is_empty()).count(),
            pending_mods: self.mods,
            filter_fill: self.filter.fill_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(bs: u32, s: &str) -> Digest {
        Digest::from_pattern(bs, s.as_bytes()).unwrap()
    }

    fn small() -> FuzzyStore {
        FuzzyStore::new(10_000, 0.001)
    }

    #[test]
    fn empty_store_finds_nothing() {
        let st = small();
        assert!(!st.check(&d(3, "anything")));
        assert!(st.is_empty());
    }

    #[test]
    fn write_then_check() {
        let mut st = small();
        assert!(st.write_at(&d(3, "abcdefgh"), 10));
        assert!(st.check(&d(3, "abcdefgh")));
        assert_eq!(st.pending_mods(), 1);
    }

    #[test]
    fn second_write_is_rejected() {
        let mut st = small();
        assert!(st.write_at(&d(3, "abcdefgh"), 10));
        assert!(!st.write_at(&d(3, "abcdefgh"), 11));
        assert_eq!(st.len(), 1);
        assert_eq!(st.pending_mods(), 1);
    }

    #[test]
    fn newest_record_first() {
        let mut st = small();
        st.write_at(&d(7, "first"), 1);
        st.write_at(&d(7, "second"), 2);
        let b = st.bucket(7);
        assert_eq!(b[0].digest.pattern(), b"second");
        assert_eq!(b[1].digest.pattern(), b"first");
    }

    #[test]
    fn delete_removes_from_bucket_and_filter() {
        let mut st = small();
        st.write_at(&d(3, "abcdefgh"), 10);
        assert!(st.delete(&d(3, "abcdefgh")));
        assert!(!st.check(&d(3, "abcdefgh")));
        assert!(!st.filter().contains(b"abcdefgh"));
        assert_eq!(st.pending_mods(), 2);
        assert!(!st.delete(&d(3, "abcdefgh")));
    }

    #[test]
    fn delete_takes_every_match() {
        let always = |_: &Digest, _: &Digest| 100u32;
        let mut st = FuzzyStore::with_oracle(10_000, 0.001, always);
        st.write_at(&d(9, "one"), 1);
        st.write_at(&d(9, "two"), 1);
        st.write_at(&d(9, "three"), 1);
        st.write_at(&d(10, "other-bucket"), 1);
        assert!(st.delete(&d(9, "two")));
        assert!(st.bucket(9).is_empty());
        assert_eq!(st.len(), 1);
        assert_eq!(st.pending_mods(), 7);
        assert!(!st.filter().contains(b"one"));
        assert!(!st.filter().contains(b"three"));
    }

    #[test]
    fn threshold_is_strict() {
        let at99 = |_: &Digest, _: &Digest| 99u32;
        let mut st = FuzzyStore::with_oracle(10_000, 0.001, at99);
        st.write_at(&d(4, "boundary"), 1);
        assert!(!st.check(&d(4, "boundary")));
        assert!(!st.delete(&d(4, "boundary")));
        assert_eq!(st.len(), 1);

        let at100 = |_: &Digest, _: &Digest| 100u32;
        let mut st = FuzzyStore::with_oracle(10_000, 0.001, at100);
        st.write_at(&d(4, "boundary"), 1);
        assert!(st.check(&d(4, "boundary")));
    }

    #[test]
    fn buckets_are_isolated() {
        // oracle that ignores block size entirely
        let always = |_: &Digest, _: &Digest| 100u32;
        let mut st = FuzzyStore::with_oracle(10_000, 0.001, always);
        st.write_at(&d(5, "shared"), 1);
        assert!(!st.check(&d(6, "shared")));
        assert!(!st.delete(&d(6, "shared")));
        assert!(st.check(&d(5, "shared")));
    }

    #[test]
    fn negative_filter_skips_scan() {
        let counting = std::sync::atomic::AtomicUsize::new(0);
        let oracle = |_: &Digest, _: &Digest| {
            counting.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            100u32
        };
        let mut st = FuzzyStore::with_oracle(10_000, 0.0001, &oracle);
        st.write_at(&d(5, "present"), 1);
        assert!(!st.check(&d(5, "absent-pattern")));
        assert_eq!(counting.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn sweep_expires_at_boundary() {
        let mut st = small();
        st.write_at(&d(1, "old"), 100);
        st.write_at(&d(2, "young"), 150);
        let mut kept = Vec::new();
        let expired = st.sweep(200, 100, |r| kept.push(r.digest));
        assert_eq!(expired, 1);
        assert_eq!(kept, vec![d(2, "young")]);
        assert!(!st.filter().contains(b"old"));
        assert!(!st.check(&d(1, "old")));
        assert!(st.check(&d(2, "young")));
    }

    #[test]
    fn stats_track_contents() {
        let mut st = small();
        st.write_at(&d(1, "a1"), 1);
        st.write_at(&d(2, "b2"), 1);
        st.write_at(&d(2, "b3"), 1);
        let s = st.stats();
        assert_eq!(s.records, 3);
        assert_eq!(s.buckets_used, 2);
        assert_eq!(s.pending_mods, 3);
        st.reset_mods();
        assert_eq!(st.stats().pending_mods, 0);
    }
}
