use crate::digest::Digest;

/// Pairwise comparison returning 0..=100.
pub trait Similarity: Send + Sync {
    fn score(&self, stored: &Digest, probe: &Digest) -> u32;
}

/// Edit-distance score over the digest patterns.
///
/// Digests of different block size score 0; otherwise
/// `100 - 200 * lev(a, b) / (len(a) + len(b))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevenshteinSimilarity;

impl Similarity for LevenshteinSimilarity {
    fn score(&self, stored: &Digest, probe: &Digest) -> u32 {
        if stored.block_size != probe.block_size {
            return 0;
        }
        let (a, b) = (stored.pattern(), probe.pattern());
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return 100,
            (true, false) | (false, true) => return 0,
            _ => {}
        }
        let dist = levenshtein(a, b);
        let total = a.len() + b.len();
        100u32.saturating_sub(((200 * dist) / total) as u32)
    }
}

impl<F> Similarity for F
where
    F: Fn(&Digest, &Digest) -> u32 + Send + Sync,
{
    fn score(&self, stored: &Digest, probe: &Digest) -> u32 {
        self(stored, probe)
    }
}

fn levenshtein(a: &[u8], b: &[u8]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(ca != cb);
            cur[j + 1] = sub.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
