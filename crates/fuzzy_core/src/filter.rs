//! Counting Bloom filter used as a pre-check in front of the bucket scan.
//!
//! Counters are 4 bits, two per byte. A counter that reaches 15 sticks there:
//! it is never decremented again, so removals can only ever leave a false
//! positive behind, never a false negative.

const COUNTER_MAX: u8 = 0x0F;

#[derive(Clone, Debug)]
pub struct CountingBloom {
    pub m: u64,
    pub k: u32,
    counters: Vec<u8>,
}

impl CountingBloom {
    pub fn new(m: u64, k: u32) -> Self {
        let m = m.max(1);
        let bytes = m.div_ceil(2) as usize;
        Self { m, k: k.max(1), counters: vec![0u8; bytes] }
    }

    /// Size for `expected` elements at false-positive rate `fp_rate`.
    ///
    /// m = -n ln(p) / (ln 2)^2, k = (m / n) ln 2
    pub fn with_capacity(expected: usize, fp_rate: f64) -> Self {
        let p = fp_rate.clamp(1e-9, 0.5);
        let n = expected.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * p.ln() / (ln2 * ln2)).ceil().max(64.0) as u64;
        let k = ((m as f64 / n) * ln2).ceil().clamp(1.0, 16.0) as u32;
        Self::new(m, k)
    }

    #[inline]
    fn slots(&self, key: &[u8]) -> impl Iterator<Item = u64> {
        let dig = *blake3::hash(key).as_bytes();
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        a.copy_from_slice(&dig[0..8]);
        b.copy_from_slice(&dig[8..16]);
        let h1 = u64::from_le_bytes(a);
        let h2 = u64::from_le_bytes(b) | 1;
        let m = self.m;
        (0..self.k as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }

    #[inline]
    fn get(&self, slot: u64) -> u8 {
        let byte = self.counters[(slot / 2) as usize];
        if slot & 1 == 0 { byte & 0x0F } else { byte >> 4 }
    }

    #[inline]
    fn set(&mut self, slot: u64, v: u8) {
        let idx = (slot / 2) as usize;
        let byte = self.counters[idx];
        self.counters[idx] = if slot & 1 == 0 {
            (byte & 0xF0) | (v & 0x0F)
        } else {
            (byte & 0x0F) | (v << 4)
        };
    }

    pub fn add(&mut self, key: &[u8]) {
        for s in self.slots(key) {
            let c = self.get(s);
            if c < COUNTER_MAX {
                self.set(s, c + 1);
            }
        }
    }

    /// Undo one `add`. Keys that are definitely absent are left alone.
    pub fn remove(&mut self, key: &[u8]) {
        if !self.contains(key) {
            return;
        }
        for s in self.slots(key) {
            let c = self.get(s);
            if c > 0 && c < COUNTER_MAX {
                self.set(s, c - 1);
            }
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.slots(key).all(|s| self.get(s) != 0)
    }

    /// Fraction of counters that are non-zero.
    pub fn fill_ratio(&self) -> f64 {
        let used: u64 = self
            .counters
            .iter()
            .map(|b| u64::from(b & 0x0F != 0) + u64::from(b >> 4 != 0))
            .sum();
        used as f64 / self.m as f64
    }
}
