use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::mem;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use log::{debug, trace};
use rand::Rng;
use serde::Serialize;

use crate::dict::hashtable::Chain;
use crate::dict::{Defrag, Dict, DictListener, DictStats, DictType, Entry, ScanAction, UnlinkHandle};
use crate::errors::{KvError, Result};

use super::cumulative::CumulativeIndex;
use super::cursor::{CursorCodec, ScanCursor};
use super::iter::{KvStoreIterator, ShardIterator};
use super::metadata::KeySizesHistogram;
use super::rehash::{RehashList, RehashScheduler};
use super::MAX_SHARD_BITS;

bitflags! {
    /// Behaviour fixed when a kvstore is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KvStoreFlags: u32 {
        /// create shards on their first insert instead of upfront.
        const ALLOCATE_SHARDS_ON_DEMAND = 1 << 0;
        /// release a shard as soon as it becomes empty.
        const FREE_EMPTY_SHARDS = 1 << 1;
        /// keep key-size histograms, per shard and for the whole store.
        const ALLOC_META_KEYS_HIST = 1 << 2;
    }
}

/// A snapshot of the counters of a kvstore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KvStoreInfo {
    pub shards: usize,
    pub allocated_shards: usize,
    pub non_empty_shards: usize,
    pub keys: u64,
    pub buckets: u64,
    pub rehashing_shards: usize,
    pub overhead_hashtable_lut: usize,
    pub overhead_hashtable_rehashing: usize,
    pub memory: usize,
}

#[derive(Debug)]
struct KeyCounts {
    /// absent with a single shard, whose own size is the total.
    index: Option<CumulativeIndex>,
    key_count: u64,
    non_empty_shards: usize,
}

impl KeyCounts {
    /// account `delta` keys to `shard`, whose size is now `shard_size`.
    fn update(&mut self, shard: usize, delta: i64, shard_size: usize) {
        if delta >= 0 {
            self.key_count += delta as u64;
        } else {
            self.key_count -= delta.unsigned_abs();
        }
        if shard_size == 1 && delta > 0 {
            self.non_empty_shards += 1;
        } else if shard_size == 0 {
            self.non_empty_shards -= 1;
        }
        if let Some(index) = self.index.as_mut() {
            index.update(shard, delta);
        }
    }

    fn clear(&mut self) {
        self.key_count = 0;
        self.non_empty_shards = 0;
        if let Some(index) = self.index.as_mut() {
            index.clear();
        }
    }
}

type Shards<K, V, S> = Vec<Option<Box<Dict<K, V, S>>>>;

fn create_shard_if_needed<'a, K, V, S>(
    shards: &'a mut Shards<K, V, S>,
    allocated_shards: &mut usize,
    dict_type: &DictType<S>,
    shard: usize,
) -> &'a mut Dict<K, V, S> {
    shards[shard].get_or_insert_with(|| {
        *allocated_shards += 1;
        trace!("allocating shard {}", shard);
        let mut dict = Dict::new(dict_type.clone());
        dict.metadata_mut().base_mut().shard = shard;
        Box::new(dict)
    })
}

fn combined(acc: Option<DictStats>, stats: DictStats) -> DictStats {
    match acc {
        Some(mut acc) => {
            acc.combine(&stats);
            acc
        }
        None => stats,
    }
}

/// An array of dicts addressed by a caller-chosen shard index.
///
/// Besides the shards it keeps a cumulative index of their key counts, which gives
/// O(log n) "next non-empty shard" and size-weighted random shard selection, and it
/// tracks which shards are rehashing so that the work can be spread over time with
/// `incrementally_rehash`.
///
/// All mutation has to go through the kvstore: changing a shard behind its back
/// desynchronizes the key counts.
pub struct KvStore<K, V, S = RandomState> {
    flags: KvStoreFlags,
    dict_type: DictType<S>,
    shards: Shards<K, V, S>,
    num_shards_bits: u32,
    codec: CursorCodec,
    counts: KeyCounts,
    allocated_shards: usize,
    resize_cursor: usize,
    key_sizes: Option<KeySizesHistogram>,
    scheduler: Rc<RehashScheduler>,
}

impl<K, V> KvStore<K, V, RandomState> {
    pub fn new(num_shards_bits: u32, flags: KvStoreFlags) -> Result<Self> {
        Self::create(DictType::new(), num_shards_bits, flags)
    }
}

impl<K, V, S> KvStore<K, V, S> {
    /// Create a kvstore of `2^num_shards_bits` shards built from `dict_type`.
    ///
    /// The kvstore installs its own listener on the template, so it refuses a
    /// template that already has one.
    ///
    /// # Panics
    ///
    /// When `num_shards_bits` exceeds 16.
    pub fn create(dict_type: DictType<S>, num_shards_bits: u32, flags: KvStoreFlags) -> Result<Self> {
        assert!(num_shards_bits <= MAX_SHARD_BITS, "at most {} shard bits, got {}", MAX_SHARD_BITS, num_shards_bits);
        if dict_type.has_listener() {
            return Err(KvError::HooksAlreadyInstalled);
        }
        let num_shards = 1usize << num_shards_bits;
        let scheduler = Rc::new(RehashScheduler::new(flags.contains(KvStoreFlags::ALLOC_META_KEYS_HIST)));
        let weak: Weak<RehashScheduler> = Rc::downgrade(&scheduler);
        let listener: Weak<dyn DictListener> = weak;

        let mut shards = Vec::new();
        shards.try_reserve_exact(num_shards)
            .map_err(KvError::out_of_memory(format!("{} shard slots", num_shards)))?;
        shards.resize_with(num_shards, || None);
        let index = if num_shards > 1 {
            Some(CumulativeIndex::new(num_shards_bits)?)
        } else {
            None
        };

        let mut kvs = KvStore {
            flags,
            dict_type: dict_type.with_listener(listener),
            shards,
            num_shards_bits,
            codec: CursorCodec::new(num_shards_bits),
            counts: KeyCounts { index, key_count: 0, non_empty_shards: 0 },
            allocated_shards: 0,
            resize_cursor: 0,
            key_sizes: if flags.contains(KvStoreFlags::ALLOC_META_KEYS_HIST) {
                Some(KeySizesHistogram::new())
            } else {
                None
            },
            scheduler,
        };
        if !flags.contains(KvStoreFlags::ALLOCATE_SHARDS_ON_DEMAND) {
            for shard in 0..num_shards {
                kvs.create_shard_if_needed(shard);
            }
        }
        debug!("created a kvstore of {} shards, flags {:?}", num_shards, flags);
        Ok(kvs)
    }

    pub fn flags(&self) -> KvStoreFlags {
        self.flags
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn num_shards_bits(&self) -> u32 {
        self.num_shards_bits
    }

    pub fn num_non_empty_shards(&self) -> usize {
        self.counts.non_empty_shards
    }

    pub fn num_allocated_shards(&self) -> usize {
        self.allocated_shards
    }

    /// number of keys across all shards.
    pub fn size(&self) -> u64 {
        if self.num_shards() != 1 {
            self.counts.key_count
        } else {
            self.shard_size(0) as u64
        }
    }

    /// buckets across all tables of all shards.
    pub fn bucket_count(&self) -> u64 {
        if self.num_shards() != 1 {
            self.scheduler.bucket_count()
        } else {
            self.shards[0].as_deref().map_or(0, |d| d.buckets() as u64)
        }
    }

    /// number of shards waiting for rehash work.
    pub fn rehashing_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// the shards waiting for rehash work, oldest first.
    pub fn rehashing_shards(&self) -> Vec<usize> {
        self.scheduler.pending_shards()
    }

    /// bytes spent on the bucket arrays of every table.
    pub fn overhead_hashtable_lut(&self) -> usize {
        self.scheduler.overhead_lut_buckets() as usize * mem::size_of::<Chain<K, V>>()
    }

    /// bytes spent on bucket arrays that are being rehashed away from.
    pub fn overhead_hashtable_rehashing(&self) -> usize {
        self.scheduler.overhead_rehashing_buckets() as usize * mem::size_of::<Chain<K, V>>()
    }

    /// an estimate of the memory the kvstore uses, excluding what keys and values own.
    pub fn mem_usage(&self) -> usize {
        let mut mem = mem::size_of::<Self>();
        mem += self.size() as usize * mem::size_of::<Entry<K, V>>();
        mem += self.bucket_count() as usize * mem::size_of::<Chain<K, V>>();
        // the per-shard metadata lives inside the dict.
        mem += self.allocated_shards * mem::size_of::<Dict<K, V, S>>();
        mem += self.rehashing_count() * RehashList::node_size();
        if let Some(index) = self.counts.index.as_ref() {
            mem += (index.num_shards() + 1) * mem::size_of::<u64>();
        }
        mem
    }

    pub fn shard(&self, shard: usize) -> Option<&Dict<K, V, S>> {
        self.shards[shard].as_deref()
    }

    /// unaccounted access, for the iterators.
    pub(crate) fn shard_mut(&mut self, shard: usize) -> Option<&mut Dict<K, V, S>> {
        self.shards[shard].as_deref_mut()
    }

    pub fn shard_size(&self, shard: usize) -> usize {
        self.shards[shard].as_deref().map_or(0, Dict::size)
    }

    fn create_shard_if_needed(&mut self, shard: usize) -> &mut Dict<K, V, S> {
        create_shard_if_needed(&mut self.shards, &mut self.allocated_shards, &self.dict_type, shard)
    }

    /// Release `shard` if it is empty and the kvstore frees empty shards.
    /// A shard with paused rehashing is kept: an iterator or an unlink is still using it.
    pub(crate) fn free_shard_if_empty(&mut self, shard: usize) {
        if !self.flags.contains(KvStoreFlags::FREE_EMPTY_SHARDS) {
            return;
        }
        let releasable = self.shards[shard]
            .as_deref()
            .map_or(false, |d| d.size() == 0 && !d.is_rehashing_paused());
        if !releasable {
            return;
        }
        self.shards[shard] = None;
        self.allocated_shards -= 1;
        trace!("released empty shard {}", shard);
    }

    fn record_keys(&mut self, shard: usize, delta: i64) {
        let shard_size = self.shard_size(shard);
        self.counts.update(shard, delta, shard_size);
    }

    /// The shard holding the `target`-th key (1-based) in shard order.
    /// 0 with a single shard or when the kvstore is empty.
    pub fn find_shard_by_key_index(&self, target: u64) -> usize {
        match self.counts.index.as_ref() {
            Some(index) if self.counts.key_count > 0 => index.find_shard_by_key_index(target),
            _ => 0,
        }
    }

    /// 0 when the kvstore is empty.
    pub fn first_non_empty_shard(&self) -> usize {
        self.find_shard_by_key_index(1)
    }

    pub fn next_non_empty_shard(&self, shard: usize) -> Option<usize> {
        let index = match self.counts.index.as_ref() {
            Some(index) => index,
            None => {
                assert_eq!(shard, 0, "a single-shard kvstore has no shard {}", shard);
                return None;
            }
        };
        let next_key = index.prefix_query(shard) + 1;
        if next_key <= self.size() {
            Some(self.find_shard_by_key_index(next_key))
        } else {
            None
        }
    }

    /// a random shard, each chosen with probability proportional to its size.
    pub fn fair_random_shard_index(&self) -> usize {
        let total = self.size();
        let target = if total > 0 {
            rand::thread_rng().gen_range(0..total) + 1
        } else {
            0
        };
        self.find_shard_by_key_index(target)
    }

    /// One step of a scan over the whole kvstore, or over `only_shard`.
    ///
    /// Start with cursor 0 and feed every returned cursor back until 0 comes back.
    /// Keys present for the whole scan are visited at least once.
    /// Shards rejected by `skip` count as exhausted; entries `f` answers
    /// `ScanAction::Delete` for are removed and accounted for.
    ///
    /// # Panics
    ///
    /// When `only_shard` is out of range.
    pub fn scan<F>(
        &mut self,
        cursor: u64,
        only_shard: Option<usize>,
        mut f: F,
        skip: Option<&dyn Fn(&Dict<K, V, S>) -> bool>,
    ) -> u64
        where F: FnMut(&K, &mut V) -> ScanAction {
        let ScanCursor { mut shard, mut inner } = self.codec.decode(cursor);
        if let Some(only) = only_shard {
            assert!(only < self.num_shards(), "scan of shard {} out of {}", only, self.num_shards());
            if shard < only {
                shard = only;
                inner = 0;
            } else if shard > only {
                return 0;
            }
        }

        let skipped = match self.shards[shard].as_deref() {
            Some(d) => skip.map_or(false, |skip| skip(d)),
            None => true,
        };
        let mut next_inner = 0;
        if !skipped {
            if let Some(d) = self.shards[shard].as_deref_mut() {
                let before = d.size();
                next_inner = d.scan(inner, &mut f);
                let removed = before - d.size();
                if removed > 0 {
                    self.record_keys(shard, -(removed as i64));
                }
            }
            self.free_shard_if_empty(shard);
        }

        if next_inner == 0 {
            if only_shard.is_some() {
                return 0;
            }
            match self.next_non_empty_shard(shard) {
                Some(next) => shard = next,
                None => return 0,
            }
        }
        self.codec.encode(ScanCursor { shard, inner: next_inner })
    }

    /// Expand every existing shard not rejected by `skip` to hold `new_size` keys.
    /// With `try_only`, stops at the first allocation failure.
    pub fn expand(&mut self, new_size: usize, try_only: bool, skip: Option<&dyn Fn(usize) -> bool>) -> Result<()> {
        for shard in 0..self.num_shards() {
            if skip.map_or(false, |skip| skip(shard)) {
                continue;
            }
            if let Some(d) = self.shards[shard].as_deref_mut() {
                if try_only {
                    d.try_expand(new_size)?;
                } else {
                    d.expand(new_size);
                }
            }
        }
        Ok(())
    }

    /// Give up to `limit` shards a chance to shrink, or else to grow, continuing
    /// where the previous call stopped.
    pub fn try_resize_shards(&mut self, limit: usize) {
        let limit = limit.min(self.num_shards());
        for _ in 0..limit {
            let shard = self.resize_cursor;
            if let Some(d) = self.shards[shard].as_deref_mut() {
                if !d.shrink_if_needed() {
                    d.expand_if_needed();
                }
            }
            self.resize_cursor = (shard + 1) % self.num_shards();
        }
    }

    /// Remove every key. Shards are released when the kvstore frees empty shards.
    /// `callback` is handed to every `Dict::empty`.
    pub fn empty<F: FnMut()>(&mut self, mut callback: F) {
        for shard in 0..self.num_shards() {
            if let Some(d) = self.shards[shard].as_deref_mut() {
                if let Some(hist) = d.metadata_mut().key_sizes_mut() {
                    hist.clear();
                }
                d.empty(&mut callback);
            }
            self.free_shard_if_empty(shard);
        }
        self.scheduler.reset();
        self.counts.clear();
        if let Some(hist) = self.key_sizes.as_mut() {
            hist.clear();
        }
        debug!("emptied a kvstore of {} shards", self.num_shards());
    }

    /// Statistics of all main tables combined, then of all rehashing targets combined.
    pub fn write_stats<W: fmt::Write>(&self, out: &mut W, full: bool) -> fmt::Result {
        let mut main = None;
        let mut rehashing = None;
        let mut next = Some(self.first_non_empty_shard());
        while let Some(shard) = next {
            let d = match self.shards[shard].as_deref() {
                Some(d) => d,
                None => break,
            };
            main = Some(combined(main, d.table_stats(0, full)));
            if d.is_rehashing() {
                rehashing = Some(combined(rehashing, d.table_stats(1, full)));
            }
            next = self.next_non_empty_shard(shard);
        }
        main.unwrap_or_else(|| DictStats::new(0, 0, 0, full))
            .write_message(out, full)?;
        if let Some(stats) = rehashing {
            stats.write_message(out, full)?;
        }
        Ok(())
    }

    pub fn stats_message(&self, full: bool) -> String {
        let mut message = String::new();
        self.write_stats(&mut message, full).ok();
        message
    }

    pub fn info(&self) -> KvStoreInfo {
        KvStoreInfo {
            shards: self.num_shards(),
            allocated_shards: self.num_allocated_shards(),
            non_empty_shards: self.num_non_empty_shards(),
            keys: self.size(),
            buckets: self.bucket_count(),
            rehashing_shards: self.rehashing_count(),
            overhead_hashtable_lut: self.overhead_hashtable_lut(),
            overhead_hashtable_rehashing: self.overhead_hashtable_rehashing(),
            memory: self.mem_usage(),
        }
    }

    /// iterate every key, shard by shard.
    pub fn iter(&mut self) -> KvStoreIterator<'_, K, V, S> {
        KvStoreIterator::new(self)
    }

    /// iterate the keys of one shard; the shard must not be modified meanwhile.
    pub fn shard_iter(&mut self, shard: usize) -> ShardIterator<'_, K, V, S> {
        ShardIterator::new(self, shard, false)
    }

    /// iterate the keys of one shard, allowing the current key to be deleted.
    pub fn shard_safe_iter(&mut self, shard: usize) -> ShardIterator<'_, K, V, S> {
        ShardIterator::new(self, shard, true)
    }

    /// the store-wide key-size histogram, with `ALLOC_META_KEYS_HIST`.
    pub fn key_sizes(&self) -> Option<&KeySizesHistogram> {
        self.key_sizes.as_ref()
    }

    pub fn key_sizes_mut(&mut self) -> Option<&mut KeySizesHistogram> {
        self.key_sizes.as_mut()
    }

    pub fn shard_key_sizes(&self, shard: usize) -> Option<&KeySizesHistogram> {
        self.shards[shard].as_deref()?.metadata().key_sizes()
    }

    pub fn shard_key_sizes_mut(&mut self, shard: usize) -> Option<&mut KeySizesHistogram> {
        self.shards[shard].as_deref_mut()?.metadata_mut().key_sizes_mut()
    }

    /// move a key from the size bin of `old_len` to that of `new_len`,
    /// both in `shard` and store-wide.
    pub fn record_key_size_change(&mut self, shard: usize, old_len: u64, new_len: u64) {
        if let Some(hist) = self.shard_key_sizes_mut(shard) {
            hist.record_change(old_len, new_len);
        }
        if let Some(hist) = self.key_sizes.as_mut() {
            hist.record_change(old_len, new_len);
        }
    }

    /// false when the shard does not exist or no expansion was done.
    pub fn shard_expand(&mut self, shard: usize, size: usize) -> bool {
        self.shards[shard].as_deref_mut().map_or(false, |d| d.expand(size))
    }

    /// 0 when the shard does not exist.
    pub fn shard_scan_defrag<D, F>(&mut self, shard: usize, cursor: u64, defrag: &mut D, f: F) -> u64
        where D: Defrag<K, V>,
              F: FnMut(&K, &V) {
        match self.shards[shard].as_deref_mut() {
            Some(d) => d.scan_defrag(cursor, defrag, f),
            None => 0,
        }
    }
}

impl<K, V, S> KvStore<K, V, S>
    where K: Hash + Eq,
          S: BuildHasher {
    /// the hash the shards use for `key`. Its low bits pick the bucket inside a shard.
    pub fn hash<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.dict_type.hash(key)
    }

    /// The shard `key` belongs in, taken from the high bits of its hash
    /// so the low bits stay spread over the buckets of that shard.
    pub fn shard_for<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        if self.num_shards_bits == 0 {
            return 0;
        }
        (self.hash(key) >> (64 - self.num_shards_bits)) as usize
    }

    /// Rehash pending shards, oldest first, for about `threshold_us` microseconds.
    /// Returns the microseconds spent, 0 when no shard was rehashing.
    pub fn incrementally_rehash(&mut self, threshold_us: u64) -> u64 {
        let scheduler = Rc::clone(&self.scheduler);
        let shards = &mut self.shards;
        let elapsed_us = scheduler.incrementally_rehash(threshold_us, |shard, budget_us| {
            if let Some(d) = shards[shard].as_deref_mut() {
                d.rehash_microseconds(budget_us);
            }
        });
        if elapsed_us > 0 {
            debug!(target: "kvstore::rehash", "rehashed for {}us, {} shards still pending",
                   elapsed_us, scheduler.pending_count());
        }
        elapsed_us
    }

    /// Insert into `shard`, creating it if needed.
    /// An existing key is left alone and the pair handed back.
    pub fn shard_add_raw(&mut self, shard: usize, key: K, value: V) -> std::result::Result<&mut Entry<K, V>, (K, V)> {
        let d = create_shard_if_needed(&mut self.shards, &mut self.allocated_shards, &self.dict_type, shard);
        let size_before = d.size();
        let entry = d.add_raw(key, value)?;
        self.counts.update(shard, 1, size_before + 1);
        Ok(entry)
    }

    pub fn shard_find<Q>(&mut self, shard: usize, key: &Q) -> Option<&Entry<K, V>>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        self.shards[shard].as_deref_mut()?.find(key)
    }

    pub fn shard_find_mut<Q>(&mut self, shard: usize, key: &Q) -> Option<&mut Entry<K, V>>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        self.shards[shard].as_deref_mut()?.find_mut(key)
    }

    pub fn shard_fetch_value<Q>(&mut self, shard: usize, key: &Q) -> Option<&V>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        self.shards[shard].as_deref_mut()?.fetch_value(key)
    }

    pub fn shard_delete<Q>(&mut self, shard: usize, key: &Q) -> Option<(K, V)>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        let removed = self.shards[shard].as_deref_mut()?.delete(key)?;
        self.record_keys(shard, -1);
        self.free_shard_if_empty(shard);
        Some(removed)
    }

    /// Locate `key` for a later `shard_two_phase_unlink_free`.
    /// The shard must not be modified until then.
    pub fn shard_two_phase_unlink_find<Q>(&mut self, shard: usize, key: &Q) -> Option<UnlinkHandle>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        self.shards[shard].as_deref_mut()?.two_phase_unlink_find(key)
    }

    pub fn shard_unlinked_entry(&self, shard: usize, handle: &UnlinkHandle) -> Option<&Entry<K, V>> {
        self.shards[shard].as_deref().map(|d| d.unlinked_entry(handle))
    }

    pub fn shard_two_phase_unlink_free(&mut self, shard: usize, handle: UnlinkHandle) -> Option<(K, V)> {
        let removed = self.shards[shard].as_deref_mut()?.two_phase_unlink_free(handle);
        self.record_keys(shard, -1);
        self.free_shard_if_empty(shard);
        Some(removed)
    }

    pub fn shard_random_key(&mut self, shard: usize) -> Option<&Entry<K, V>> {
        self.shards[shard].as_deref_mut()?.random_key()
    }

    pub fn shard_fair_random_key(&mut self, shard: usize) -> Option<&Entry<K, V>> {
        self.shards[shard].as_deref_mut()?.fair_random_key()
    }

    pub fn shard_some_keys(&mut self, shard: usize, count: usize) -> Vec<&Entry<K, V>> {
        match self.shards[shard].as_deref_mut() {
            Some(d) => d.some_keys(count),
            None => Vec::new(),
        }
    }
}
