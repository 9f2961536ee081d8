use crate::dict::{DictIterator, Entry};

use super::kvstore::KvStore;

/// Iterates every key of a kvstore, shard by shard, in shard order.
///
/// Each shard is walked with a safe dict iterator, so the current key may be
/// deleted through `store()`. Leaving a shard, or dropping the iterator, releases
/// that shard if it became empty.
pub struct KvStoreIterator<'a, K, V, S> {
    kvs: &'a mut KvStore<K, V, S>,
    shard: Option<usize>,
    next_shard: Option<usize>,
    di: DictIterator,
}

impl<'a, K, V, S> KvStoreIterator<'a, K, V, S> {
    pub(crate) fn new(kvs: &'a mut KvStore<K, V, S>) -> Self {
        let next_shard = Some(kvs.first_non_empty_shard());
        KvStoreIterator {
            kvs,
            shard: None,
            next_shard,
            di: DictIterator::safe(),
        }
    }

    /// Finish the current shard and move to the next non-empty one.
    /// Returns `None` when no shard is left.
    pub fn next_shard(&mut self) -> Option<usize> {
        let next = self.next_shard?;
        self.leave_shard();
        self.di = DictIterator::safe();
        self.shard = Some(next);
        self.next_shard = self.kvs.next_non_empty_shard(next);
        self.kvs.shard(next).map(|_| next)
    }

    fn leave_shard(&mut self) {
        if let Some(shard) = self.shard {
            if let Some(d) = self.kvs.shard_mut(shard) {
                self.di.reset(d);
                self.kvs.free_shard_if_empty(shard);
            }
        }
    }

    pub fn next(&mut self) -> Option<&mut Entry<K, V>> {
        loop {
            if let Some(shard) = self.shard {
                if let Some(d) = self.kvs.shard_mut(shard) {
                    if let Some(position) = self.di.next_position(d) {
                        return self.kvs.shard_mut(shard).map(|d| d.entry_at_mut(position));
                    }
                }
            }
            self.next_shard()?;
        }
    }

    /// the shard the last returned key lives in, `None` before the first `next` or `next_shard`.
    pub fn current_shard(&self) -> Option<usize> {
        self.shard
    }

    /// the kvstore being iterated, e.g. to delete the key just returned.
    pub fn store(&mut self) -> &mut KvStore<K, V, S> {
        &mut *self.kvs
    }
}

impl<'a, K, V, S> Drop for KvStoreIterator<'a, K, V, S> {
    fn drop(&mut self) {
        self.leave_shard();
    }
}

/// Iterates the keys of one shard.
///
/// The safe flavour allows deleting the key just returned through `store()`;
/// the plain one allows no modification and panics on drop if the shard changed.
pub struct ShardIterator<'a, K, V, S> {
    kvs: &'a mut KvStore<K, V, S>,
    shard: usize,
    di: DictIterator,
}

impl<'a, K, V, S> ShardIterator<'a, K, V, S> {
    pub(crate) fn new(kvs: &'a mut KvStore<K, V, S>, shard: usize, safe: bool) -> Self {
        ShardIterator {
            kvs,
            shard,
            di: if safe { DictIterator::safe() } else { DictIterator::new() },
        }
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    /// `None` once the shard is exhausted, or when it does not exist.
    pub fn next(&mut self) -> Option<&mut Entry<K, V>> {
        let d = self.kvs.shard_mut(self.shard)?;
        let position = self.di.next_position(d)?;
        Some(d.entry_at_mut(position))
    }

    pub fn store(&mut self) -> &mut KvStore<K, V, S> {
        &mut *self.kvs
    }
}

impl<'a, K, V, S> Drop for ShardIterator<'a, K, V, S> {
    fn drop(&mut self) {
        if let Some(d) = self.kvs.shard_mut(self.shard) {
            self.di.reset(d);
            self.kvs.free_shard_if_empty(self.shard);
        }
    }
}
