use crate::errors::{KvError, Result};

fn lowbit(i: usize) -> usize {
    i & i.wrapping_neg()
}

/// A Fenwick tree (binary indexed tree) of key counts, one counter per shard.
///
/// Shard `d` lives at the 1-based position `d + 1`; position `i` holds the sum of
/// the `lowbit(i)` shards ending there.
#[derive(Debug, Clone)]
pub struct CumulativeIndex {
    tree: Vec<u64>,
    num_shards_bits: u32,
}

impl CumulativeIndex {
    pub fn new(num_shards_bits: u32) -> Result<Self> {
        let len = (1usize << num_shards_bits) + 1;
        let mut tree = Vec::new();
        tree.try_reserve_exact(len)
            .map_err(KvError::out_of_memory("the cumulative key index"))?;
        tree.resize(len, 0);
        Ok(CumulativeIndex { tree, num_shards_bits })
    }

    pub fn num_shards(&self) -> usize {
        self.tree.len() - 1
    }

    /// add `delta` to the count of `shard`.
    ///
    /// # Panics
    ///
    /// When a negative `delta` would bring a counter below zero.
    pub fn update(&mut self, shard: usize, delta: i64) {
        let n = self.num_shards();
        assert!(shard < n, "shard {} out of range of {} shards", shard, n);
        let mut idx = shard + 1;
        while idx <= n {
            let slot = &mut self.tree[idx];
            if delta < 0 {
                let decrease = delta.unsigned_abs();
                assert!(*slot >= decrease, "key count of shard {} would drop below zero", shard);
                *slot -= decrease;
            } else {
                *slot += delta as u64;
            }
            idx += lowbit(idx);
        }
    }

    /// keys in shards `0..=shard`.
    pub fn prefix_query(&self, shard: usize) -> u64 {
        let mut idx = shard + 1;
        let mut sum = 0;
        while idx > 0 {
            sum += self.tree[idx];
            idx -= lowbit(idx);
        }
        sum
    }

    pub fn total(&self) -> u64 {
        self.prefix_query(self.num_shards() - 1)
    }

    /// The shard holding the `target`-th key (1-based) in shard order.
    ///
    /// Descends from the highest power of two, keeping the largest prefix whose sum
    /// stays below `target`; the shard right after that prefix holds the key.
    pub fn find_shard_by_key_index(&self, target: u64) -> usize {
        let n = self.num_shards();
        assert!(target <= self.total(), "key index {} beyond the {} keys indexed", target, self.total());
        let mut target = target;
        let mut result = 0;
        let mut bit_mask = 1usize << self.num_shards_bits;
        while bit_mask != 0 {
            let current = result + bit_mask;
            if current <= n && target > self.tree[current] {
                target -= self.tree[current];
                result = current;
            }
            bit_mask >>= 1;
        }
        // `result` is the 1-based end of that prefix, which is the 0-based index of the next shard.
        result
    }

    pub fn clear(&mut self) {
        for slot in self.tree.iter_mut() {
            *slot = 0;
        }
    }
}
