use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::mem;
use std::time::Instant;

use log::warn;
use rand::Rng;

use crate::common::InstantExt;
use crate::errors::{KvError, Result};
use crate::store::metadata::DictMetadata;

use super::listener::{DictType, ResizePolicy};
use super::stats::DictStats;

const HT_INITIAL_EXP: u32 = 2;
/// The smallest table a dict allocates.
pub const HT_INITIAL_SIZE: usize = 1 << HT_INITIAL_EXP;
/// `Avoid` still resizes once a table is this many times too small.
const FORCE_RESIZE_RATIO: usize = 4;
/// Shrink once less than 1/8 of the buckets would be used.
const HASHTABLE_MIN_FILL: usize = 8;
const GETFAIR_NUM_ENTRIES: usize = 15;
const EMPTY_CALLBACK_INTERVAL: usize = 65535;
const REHASH_BATCH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    key: K,
    value: V,
}

impl<K, V> Entry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    /// replace the value, returning the old one.
    pub fn set_value(&mut self, value: V) -> V {
        mem::replace(&mut self.value, value)
    }

    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

pub(crate) type Chain<K, V> = Vec<Entry<K, V>>;

/// What a scan callback wants done with the entry it was shown.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ScanAction {
    Keep,
    Delete,
}

/// Hooks run by `Dict::scan_defrag` on every visited entry.
///
/// Implementations may move the key or the value to fresh storage,
/// but must not change the key's hash or equality.
pub trait Defrag<K, V> {
    fn defrag_key(&mut self, _key: &mut K) {}
    fn defrag_value(&mut self, _value: &mut V) {}
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub(crate) struct Position {
    pub(crate) table: usize,
    pub(crate) bucket: usize,
    pub(crate) slot: usize,
}

/// An entry located by `Dict::two_phase_unlink_find`.
///
/// Rehashing stays paused until the handle is given back to `two_phase_unlink_free`,
/// and the dict must not be modified in between.
#[must_use = "rehashing stays paused until the handle is freed"]
#[derive(Debug)]
pub struct UnlinkHandle {
    position: Position,
}

struct Table<K, V> {
    buckets: Vec<Chain<K, V>>,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn unallocated() -> Self {
        Table { buckets: Vec::new(), used: 0 }
    }

    fn allocate(size: usize) -> Option<Self> {
        let bytes = size.checked_mul(mem::size_of::<Chain<K, V>>());
        if bytes.map_or(true, |bytes| bytes > isize::MAX as usize) {
            return None;
        }
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);
        Some(Table { buckets, used: 0 })
    }

    fn try_allocate(size: usize) -> Result<Self> {
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(size)
            .map_err(KvError::out_of_memory(format!("a hash table of {} buckets", size)))?;
        buckets.resize_with(size, Vec::new);
        Ok(Table { buckets, used: 0 })
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }

    fn mask(&self) -> u64 {
        (self.buckets.len() as u64).wrapping_sub(1)
    }
}

fn next_exp(size: usize) -> u32 {
    if size <= HT_INITIAL_SIZE {
        return HT_INITIAL_EXP;
    }
    (usize::BITS - (size - 1).leading_zeros()).min(usize::BITS - 1)
}

/// the table size a request for `size` slots turns into, if it can be represented.
fn table_size_for(size: usize) -> Option<usize> {
    let table_size = 1usize << next_exp(size);
    if table_size < size {
        None
    } else {
        Some(table_size)
    }
}

/// A hash table with incremental rehashing.
///
/// While growing or shrinking, the dict keeps two tables and moves buckets from the
/// old one to the new one a few at a time: one bucket per lookup or insert, or in
/// batches through `rehash` and `rehash_microseconds`.
/// Every transition is reported to the listener of its `DictType`.
pub struct Dict<K, V, S = RandomState> {
    ht: [Table<K, V>; 2],
    rehash_idx: Option<usize>,
    pause_rehash: u32,
    dict_type: DictType<S>,
    metadata: DictMetadata,
}

impl<K, V, S> Dict<K, V, S> {
    pub fn new(dict_type: DictType<S>) -> Self {
        let metadata = dict_type
            .listener()
            .map(|listener| listener.metadata())
            .unwrap_or_default();
        Dict {
            ht: [Table::unallocated(), Table::unallocated()],
            rehash_idx: None,
            pause_rehash: 0,
            dict_type,
            metadata,
        }
    }

    /// number of entries.
    pub fn size(&self) -> usize {
        self.ht[0].used + self.ht[1].used
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// buckets allocated across both tables.
    pub fn buckets(&self) -> usize {
        self.ht[0].size() + self.ht[1].size()
    }

    pub fn table_size(&self, table: usize) -> usize {
        self.ht[table].size()
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    pub fn is_rehashing_paused(&self) -> bool {
        self.pause_rehash > 0
    }

    pub fn pause_rehashing(&mut self) {
        self.pause_rehash += 1;
    }

    pub fn resume_rehashing(&mut self) {
        debug_assert!(self.pause_rehash > 0, "resuming a dict that is not paused");
        self.pause_rehash = self.pause_rehash.saturating_sub(1);
    }

    /// `(from, to)` bucket counts, while rehashing.
    pub fn rehashing_info(&self) -> Option<(usize, usize)> {
        self.rehash_idx.map(|_| (self.ht[0].size(), self.ht[1].size()))
    }

    pub fn dict_type(&self) -> &DictType<S> {
        &self.dict_type
    }

    pub fn metadata(&self) -> &DictMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut DictMetadata {
        &mut self.metadata
    }

    /// grow to hold at least `size` entries.
    /// Returns false when nothing was done: the dict is rehashing, `size` is too small,
    /// or the table could not be represented.
    pub fn expand(&mut self, size: usize) -> bool {
        if self.is_rehashing() || self.ht[0].used > size || self.ht[0].size() >= size {
            return false;
        }
        self.resize(size)
    }

    /// like `expand`, but reports a failed allocation instead of giving up silently.
    pub fn try_expand(&mut self, size: usize) -> Result<bool> {
        if self.is_rehashing() || self.ht[0].used > size || self.ht[0].size() >= size {
            return Ok(false);
        }
        let table_size = match table_size_for(size) {
            Some(table_size) if table_size != self.ht[0].size() => table_size,
            _ => return Ok(false),
        };
        let table = Table::try_allocate(table_size).map_err(|err| {
            warn!("cannot expand dict to {} buckets: {}", table_size, err);
            err
        })?;
        self.start_resize(table);
        Ok(true)
    }

    pub fn shrink(&mut self, size: usize) -> bool {
        if self.is_rehashing() || self.ht[0].used > size || self.ht[0].size() <= size {
            return false;
        }
        self.resize(size)
    }

    /// Returns true if the dict is already rehashing or an expansion was attempted.
    pub fn expand_if_needed(&mut self) -> bool {
        if self.is_rehashing() {
            return true;
        }
        if self.ht[0].size() == 0 {
            self.expand(HT_INITIAL_SIZE);
            return true;
        }
        let (used, size) = (self.ht[0].used, self.ht[0].size());
        let policy = self.dict_type.resize_policy();
        if (policy == ResizePolicy::Enable && used >= size)
            || (policy != ResizePolicy::Forbid && used >= FORCE_RESIZE_RATIO * size) {
            self.expand(used + 1);
            return true;
        }
        false
    }

    /// Returns true if the dict is already rehashing or a shrink was attempted.
    pub fn shrink_if_needed(&mut self) -> bool {
        if self.is_rehashing() {
            return true;
        }
        let (used, size) = (self.ht[0].used, self.ht[0].size());
        if size <= HT_INITIAL_SIZE {
            return false;
        }
        let policy = self.dict_type.resize_policy();
        if (policy == ResizePolicy::Enable && used * HASHTABLE_MIN_FILL <= size)
            || (policy != ResizePolicy::Forbid && used * HASHTABLE_MIN_FILL * FORCE_RESIZE_RATIO <= size) {
            self.shrink(used);
            return true;
        }
        false
    }

    fn resize(&mut self, size: usize) -> bool {
        let table = table_size_for(size)
            .filter(|&table_size| table_size != self.ht[0].size())
            .and_then(Table::allocate);
        match table {
            Some(table) => {
                self.start_resize(table);
                true
            }
            None => false,
        }
    }

    fn start_resize(&mut self, table: Table<K, V>) {
        debug_assert!(!self.is_rehashing());
        if self.ht[0].size() == 0 || self.ht[0].used == 0 {
            self.install_table(table);
            return;
        }
        let (from, to) = (self.ht[0].size(), table.size());
        self.ht[1] = table;
        self.rehash_idx = Some(0);
        self.notify_started(from, to);
    }

    /// replace the (empty) main table without going through a rehash.
    fn install_table(&mut self, table: Table<K, V>) {
        let (from, to) = (self.ht[0].size(), table.size());
        if from != 0 || to != 0 {
            self.notify_started(from, to);
            self.notify_completed(from, to);
        }
        self.ht[0] = table;
    }

    fn notify_started(&mut self, from: usize, to: usize) {
        if let Some(listener) = self.dict_type.listener() {
            listener.rehashing_started(&mut self.metadata, from as u64, to as u64);
        }
    }

    fn notify_completed(&mut self, from: usize, to: usize) {
        if let Some(listener) = self.dict_type.listener() {
            listener.rehashing_completed(&mut self.metadata, from as u64, to as u64);
        }
    }

    fn check_rehashing_completed(&mut self) -> bool {
        if self.ht[0].used != 0 {
            return false;
        }
        let (from, to) = (self.ht[0].size(), self.ht[1].size());
        self.notify_completed(from, to);
        self.ht[0] = mem::replace(&mut self.ht[1], Table::unallocated());
        self.rehash_idx = None;
        true
    }

    /// drop both tables, reporting the release of their buckets to the listener.
    fn retire_tables(&mut self) {
        if self.rehash_idx.take().is_some() {
            let (from, to) = (self.ht[0].size(), self.ht[1].size());
            self.notify_completed(from, to);
            self.ht[0] = mem::replace(&mut self.ht[1], Table::unallocated());
        }
        self.install_table(Table::unallocated());
    }

    /// remove every entry and free both tables.
    /// `callback` runs every 65536 buckets, so that callers can serve other work meanwhile.
    pub fn empty<F: FnMut()>(&mut self, mut callback: F) {
        let mut visited = 0usize;
        for table in self.ht.iter_mut() {
            for chain in table.buckets.iter_mut() {
                if visited & EMPTY_CALLBACK_INTERVAL == 0 {
                    callback();
                }
                visited += 1;
                chain.clear();
            }
            table.used = 0;
        }
        self.retire_tables();
        self.pause_rehash = 0;
    }

    /// scan one step, see `scan_buckets`.
    ///
    /// Entries the callback answers `ScanAction::Delete` for are removed on the spot.
    pub fn scan<F>(&mut self, cursor: u64, mut f: F) -> u64
        where F: FnMut(&K, &mut V) -> ScanAction {
        self.scan_buckets(cursor, |chain| {
            let before = chain.len();
            chain.retain_mut(|entry| f(&entry.key, &mut entry.value) == ScanAction::Keep);
            before - chain.len()
        })
    }

    /// like `scan`, but compacts every visited bucket and runs the defrag hooks on its entries
    /// before showing them to `f`.
    pub fn scan_defrag<D, F>(&mut self, cursor: u64, defrag: &mut D, mut f: F) -> u64
        where D: Defrag<K, V>,
              F: FnMut(&K, &V) {
        self.scan_buckets(cursor, |chain| {
            chain.shrink_to_fit();
            for entry in chain.iter_mut() {
                defrag.defrag_key(&mut entry.key);
                defrag.defrag_value(&mut entry.value);
                f(&entry.key, &entry.value);
            }
            0
        })
    }

    /// The reverse-binary cursor walk.
    ///
    /// The cursor is incremented from its high bits down, so buckets that split or merge
    /// across a resize are never skipped: every entry present for the whole scan is seen
    /// at least once, and some may be seen more than once.
    /// `visit` gets each bucket and returns how many entries it removed.
    fn scan_buckets<F>(&mut self, cursor: u64, mut visit: F) -> u64
        where F: FnMut(&mut Chain<K, V>) -> usize {
        if self.size() == 0 {
            return 0;
        }
        self.pause_rehashing();
        let mut v = cursor;
        if !self.is_rehashing() {
            let m0 = self.ht[0].mask();
            self.visit_bucket(0, (v & m0) as usize, &mut visit);
            v = next_cursor(v, m0);
        } else {
            let (small, large) = if self.ht[0].size() <= self.ht[1].size() { (0, 1) } else { (1, 0) };
            let m0 = self.ht[small].mask();
            let m1 = self.ht[large].mask();
            self.visit_bucket(small, (v & m0) as usize, &mut visit);
            // all buckets of the larger table that expand the smaller one's bucket.
            loop {
                self.visit_bucket(large, (v & m1) as usize, &mut visit);
                v = next_cursor(v, m1);
                if v & (m0 ^ m1) == 0 {
                    break;
                }
            }
        }
        self.resume_rehashing();
        v
    }

    fn visit_bucket<F>(&mut self, table: usize, bucket: usize, visit: &mut F)
        where F: FnMut(&mut Chain<K, V>) -> usize {
        let t = &mut self.ht[table];
        let removed = visit(&mut t.buckets[bucket]);
        t.used -= removed;
    }

    pub fn table_stats(&self, table: usize, full: bool) -> DictStats {
        let t = &self.ht[table];
        let mut stats = DictStats::new(table, t.size() as u64, t.used as u64, full);
        if full {
            for chain in t.buckets.iter() {
                stats.record_chain(chain.len());
            }
        }
        stats
    }

    pub(crate) fn chain_len(&self, table: usize, bucket: usize) -> usize {
        self.ht[table].buckets.get(bucket).map_or(0, Vec::len)
    }

    pub(crate) fn entry_at(&self, position: Position) -> &Entry<K, V> {
        &self.ht[position.table].buckets[position.bucket][position.slot]
    }

    pub(crate) fn entry_at_mut(&mut self, position: Position) -> &mut Entry<K, V> {
        &mut self.ht[position.table].buckets[position.bucket][position.slot]
    }

    fn remove_at(&mut self, position: Position) -> Entry<K, V> {
        let t = &mut self.ht[position.table];
        t.used -= 1;
        t.buckets[position.bucket].remove(position.slot)
    }

    /// A value that changes whenever the tables are reallocated or resized
    /// or their counts change.
    pub(crate) fn fingerprint(&self) -> u64 {
        let integers = [
            self.ht[0].buckets.as_ptr() as u64,
            self.ht[0].size() as u64,
            self.ht[0].used as u64,
            self.ht[1].buckets.as_ptr() as u64,
            self.ht[1].size() as u64,
            self.ht[1].used as u64,
        ];
        let mut hash = 0u64;
        for integer in integers.iter() {
            hash = hash.wrapping_add(*integer);
            hash = (!hash).wrapping_add(hash << 21);
            hash ^= hash >> 24;
            hash = hash.wrapping_add(hash << 3).wrapping_add(hash << 8);
            hash ^= hash >> 14;
            hash = hash.wrapping_add(hash << 2).wrapping_add(hash << 4);
            hash ^= hash >> 28;
            hash = hash.wrapping_add(hash << 31);
        }
        hash
    }
}

fn next_cursor(v: u64, mask: u64) -> u64 {
    // set the unmasked bits so the increment carries into the masked high bits.
    let v = v | !mask;
    v.reverse_bits().wrapping_add(1).reverse_bits()
}

impl<K, V, S> Dict<K, V, S>
    where K: Hash + Eq,
          S: BuildHasher {
    fn hash_key<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.dict_type.hash(key)
    }

    /// move up to `n` buckets from the old table to the new one.
    /// Returns true while there is still work to do.
    pub fn rehash(&mut self, n: usize) -> bool {
        let mut idx = match self.rehash_idx {
            Some(idx) => idx,
            None => return false,
        };
        let (s0, s1) = (self.ht[0].size(), self.ht[1].size());
        match self.dict_type.resize_policy() {
            ResizePolicy::Forbid => return false,
            ResizePolicy::Avoid => {
                if (s1 > s0 && s1 < FORCE_RESIZE_RATIO * s0)
                    || (s1 < s0 && s0 < HASHTABLE_MIN_FILL * FORCE_RESIZE_RATIO * s1) {
                    return false;
                }
            }
            ResizePolicy::Enable => {}
        }
        let mut empty_visits = n.saturating_mul(10);
        let mut n = n;
        while n > 0 && self.ht[0].used != 0 {
            n -= 1;
            // buckets below `idx` are already empty, and some bucket after it is not.
            while self.ht[0].buckets[idx].is_empty() {
                idx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    self.rehash_idx = Some(idx);
                    return true;
                }
            }
            self.rehash_bucket(idx);
            idx += 1;
        }
        self.rehash_idx = Some(idx);
        !self.check_rehashing_completed()
    }

    fn rehash_bucket(&mut self, idx: usize) {
        let chain = mem::take(&mut self.ht[0].buckets[idx]);
        let moved = chain.len();
        let mask = self.ht[1].mask();
        let shrinking = self.ht[1].size() < self.ht[0].size();
        for entry in chain {
            // when shrinking, every key of this bucket lands in the same smaller bucket.
            let bucket = (if shrinking {
                idx as u64 & mask
            } else {
                self.hash_key(&entry.key) & mask
            }) as usize;
            self.ht[1].buckets[bucket].push(entry);
        }
        self.ht[0].used -= moved;
        self.ht[1].used += moved;
    }

    fn rehash_step(&mut self) {
        if self.pause_rehash == 0 {
            self.rehash(1);
        }
    }

    /// rehash in batches of 100 buckets for about `us` microseconds.
    /// Returns the number of buckets requested, 0 if rehashing is paused.
    pub fn rehash_microseconds(&mut self, us: u64) -> usize {
        if self.pause_rehash > 0 {
            return 0;
        }
        let timer = Instant::now();
        let mut rehashes = 0;
        while self.rehash(REHASH_BATCH) {
            rehashes += REHASH_BATCH;
            if timer.elapsed_us() >= us {
                break;
            }
        }
        rehashes
    }

    fn position_of<Q>(&self, key: &Q) -> Option<Position>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        if self.size() == 0 {
            return None;
        }
        let hash = self.hash_key(key);
        for table in 0..2 {
            let t = &self.ht[table];
            if t.size() == 0 {
                continue;
            }
            let bucket = (hash & t.mask()) as usize;
            let rehashed = table == 0 && self.rehash_idx.map_or(false, |idx| bucket < idx);
            if !rehashed {
                if let Some(slot) = t.buckets[bucket].iter().position(|e| e.key.borrow() == key) {
                    return Some(Position { table, bucket, slot });
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    pub fn find<Q>(&mut self, key: &Q) -> Option<&Entry<K, V>>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        self.find_mut(key).map(|entry| &*entry)
    }

    pub fn find_mut<Q>(&mut self, key: &Q) -> Option<&mut Entry<K, V>>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        if self.size() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let position = self.position_of(key)?;
        Some(self.entry_at_mut(position))
    }

    pub fn fetch_value<Q>(&mut self, key: &Q) -> Option<&V>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        self.find(key).map(Entry::value)
    }

    /// insert a new entry.
    /// When the key is already present nothing changes and the pair is handed back;
    /// the existing entry can be reached through `find_mut`.
    pub fn add_raw(&mut self, key: K, value: V) -> std::result::Result<&mut Entry<K, V>, (K, V)> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.expand_if_needed();
        if self.position_of(&key).is_some() {
            return Err((key, value));
        }
        // while rehashing, new entries only go to the new table.
        let table = if self.is_rehashing() { 1 } else { 0 };
        let hash = self.hash_key(&key);
        let t = &mut self.ht[table];
        let bucket = (hash & t.mask()) as usize;
        t.used += 1;
        let chain = &mut t.buckets[bucket];
        chain.push(Entry { key, value });
        let slot = chain.len() - 1;
        Ok(&mut chain[slot])
    }

    /// remove the entry of `key`, handing back its parts.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<(K, V)>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        if self.size() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let position = self.position_of(key)?;
        let entry = self.remove_at(position);
        self.shrink_if_needed();
        Some(entry.into_parts())
    }

    /// the first half of a delete that lets the caller look at the entry before it goes.
    pub fn two_phase_unlink_find<Q>(&mut self, key: &Q) -> Option<UnlinkHandle>
        where K: Borrow<Q>,
              Q: Hash + Eq + ?Sized {
        if self.size() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let position = self.position_of(key)?;
        self.pause_rehashing();
        Some(UnlinkHandle { position })
    }

    pub fn unlinked_entry(&self, handle: &UnlinkHandle) -> &Entry<K, V> {
        self.entry_at(handle.position)
    }

    pub fn two_phase_unlink_free(&mut self, handle: UnlinkHandle) -> (K, V) {
        let entry = self.remove_at(handle.position);
        self.shrink_if_needed();
        self.resume_rehashing();
        entry.into_parts()
    }

    /// a random entry: a uniformly chosen non-empty bucket, then an entry of its chain.
    /// Entries in long chains are less likely to be picked, see `fair_random_key`.
    pub fn random_key(&mut self) -> Option<&Entry<K, V>> {
        let position = self.random_position()?;
        Some(self.entry_at(position))
    }

    fn random_position(&mut self) -> Option<Position> {
        if self.size() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let mut rng = rand::thread_rng();
        let (table, bucket) = match self.rehash_idx {
            Some(rehash_idx) => {
                let s0 = self.ht[0].size();
                let span = s0 + self.ht[1].size() - rehash_idx;
                loop {
                    // the old table holds nothing below `rehash_idx`.
                    let h = rehash_idx + rng.gen_range(0..span);
                    let (table, bucket) = if h >= s0 { (1, h - s0) } else { (0, h) };
                    if !self.ht[table].buckets[bucket].is_empty() {
                        break (table, bucket);
                    }
                }
            }
            None => {
                let s0 = self.ht[0].size();
                loop {
                    let bucket = rng.gen_range(0..s0);
                    if !self.ht[0].buckets[bucket].is_empty() {
                        break (0, bucket);
                    }
                }
            }
        };
        let slot = rng.gen_range(0..self.ht[table].buckets[bucket].len());
        Some(Position { table, bucket, slot })
    }

    /// Up to `count` entries from a random spot of the dict.
    ///
    /// They are neither guaranteed distinct nor uniformly distributed, and fewer than
    /// `count` may come back even when the dict holds more.
    pub fn some_keys(&mut self, count: usize) -> Vec<&Entry<K, V>> {
        let positions = self.some_positions(count);
        let this = &*self;
        positions.into_iter().map(|position| this.entry_at(position)).collect()
    }

    fn some_positions(&mut self, count: usize) -> Vec<Position> {
        let count = count.min(self.size());
        let mut stored = Vec::with_capacity(count);
        if count == 0 {
            return stored;
        }
        let mut max_steps = count * 10;
        for _ in 0..count {
            if !self.is_rehashing() {
                break;
            }
            self.rehash_step();
        }
        let tables = if self.is_rehashing() { 2 } else { 1 };
        let mut max_mask = self.ht[0].mask();
        if tables > 1 && max_mask < self.ht[1].mask() {
            max_mask = self.ht[1].mask();
        }
        let mut rng = rand::thread_rng();
        let mut i = rng.gen::<u64>() & max_mask;
        let mut empty_len = 0;
        while stored.len() < count && max_steps > 0 {
            max_steps -= 1;
            for table in 0..tables {
                if let Some(rehash_idx) = self.rehash_idx.filter(|_| tables == 2 && table == 0) {
                    let rehash_idx = rehash_idx as u64;
                    if i < rehash_idx {
                        // nothing left here in the old table; skip ahead unless the new one is too small.
                        if i >= self.ht[1].size() as u64 {
                            i = rehash_idx;
                        } else {
                            continue;
                        }
                    }
                }
                if i >= self.ht[table].size() as u64 {
                    continue;
                }
                let bucket = i as usize;
                let chain_len = self.ht[table].buckets[bucket].len();
                if chain_len == 0 {
                    empty_len += 1;
                    if empty_len >= 5 && empty_len > count {
                        i = rng.gen::<u64>() & max_mask;
                        empty_len = 0;
                    }
                } else {
                    empty_len = 0;
                    for slot in 0..chain_len {
                        stored.push(Position { table, bucket, slot });
                        if stored.len() == count {
                            return stored;
                        }
                    }
                }
            }
            i = (i + 1) & max_mask;
        }
        stored
    }

    /// a random entry with a distribution closer to uniform than `random_key`.
    pub fn fair_random_key(&mut self) -> Option<&Entry<K, V>> {
        let sampled = self.some_positions(GETFAIR_NUM_ENTRIES);
        let position = if sampled.is_empty() {
            self.random_position()?
        } else {
            sampled[rand::thread_rng().gen_range(0..sampled.len())]
        };
        Some(self.entry_at(position))
    }
}

impl<K, V, S> Drop for Dict<K, V, S> {
    fn drop(&mut self) {
        self.retire_tables();
    }
}
