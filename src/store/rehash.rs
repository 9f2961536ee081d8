use std::cell::{Cell, RefCell};
use std::iter;
use std::mem;
use std::time::Instant;

use log::trace;

use crate::common::InstantExt;
use crate::dict::DictListener;

use super::metadata::DictMetadata;

/// A handle to a node of a `RehashList`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node {
    shard: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A doubly linked list of shard indices, kept in a slab so that a node can be
/// unlinked in O(1) through the `NodeId` returned when it was pushed.
#[derive(Debug, Default)]
pub struct RehashList {
    nodes: Vec<Option<Node>>,
    vacant: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl RehashList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// bytes one node costs.
    pub fn node_size() -> usize {
        mem::size_of::<Option<Node>>()
    }

    pub fn front(&self) -> Option<usize> {
        self.head
            .and_then(|head| self.nodes[head].as_ref())
            .map(|node| node.shard)
    }

    pub fn push_back(&mut self, shard: usize) -> NodeId {
        let node = Node { shard, prev: self.tail, next: None };
        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        match self.tail {
            Some(tail) => self.link(tail, |node| node.next = Some(slot)),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.len += 1;
        NodeId(slot)
    }

    /// unlink a node, returning its shard; `None` if the node is no longer in the list.
    pub fn remove(&mut self, id: NodeId) -> Option<usize> {
        let node = self.nodes.get_mut(id.0)?.take()?;
        match node.prev {
            Some(prev) => self.link(prev, |prev| prev.next = node.next),
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.link(next, |next| next.prev = node.prev),
            None => self.tail = node.prev,
        }
        self.vacant.push(id.0);
        self.len -= 1;
        Some(node.shard)
    }

    fn link<F: FnOnce(&mut Node)>(&mut self, slot: usize, f: F) {
        if let Some(node) = self.nodes[slot].as_mut() {
            f(node);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item=usize> + '_ {
        iter::successors(self.head, move |&slot| self.nodes[slot].as_ref().and_then(|node| node.next))
            .filter_map(move |slot| self.nodes[slot].as_ref().map(|node| node.shard))
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Tracks the shards of one kvstore that are rehashing, together with the
/// bucket counts of every shard.
///
/// It is the `DictListener` of the kvstore's dict template: dicts report each
/// table they start or stop using, and the scheduler keeps the list and the
/// counters in step.
#[derive(Debug)]
pub struct RehashScheduler {
    pending: RefCell<RehashList>,
    bucket_count: Cell<u64>,
    overhead_lut: Cell<u64>,
    overhead_rehashing: Cell<u64>,
    key_sizes: bool,
}

impl RehashScheduler {
    /// `key_sizes` selects the metadata new dicts start with.
    pub fn new(key_sizes: bool) -> Self {
        RehashScheduler {
            pending: RefCell::new(RehashList::new()),
            bucket_count: Cell::new(0),
            overhead_lut: Cell::new(0),
            overhead_rehashing: Cell::new(0),
            key_sizes,
        }
    }

    pub fn first_pending(&self) -> Option<usize> {
        self.pending.borrow().front()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn pending_shards(&self) -> Vec<usize> {
        self.pending.borrow().iter().collect()
    }

    /// buckets of every table of every shard.
    pub fn bucket_count(&self) -> u64 {
        self.bucket_count.get()
    }

    pub fn overhead_lut_buckets(&self) -> u64 {
        self.overhead_lut.get()
    }

    /// buckets of the tables being rehashed away from.
    pub fn overhead_rehashing_buckets(&self) -> u64 {
        self.overhead_rehashing.get()
    }

    pub fn reset(&self) {
        self.pending.borrow_mut().clear();
        self.bucket_count.set(0);
        self.overhead_lut.set(0);
        self.overhead_rehashing.set(0);
    }

    /// Keep handing the first pending shard to `rehash_shard`, together with the
    /// microseconds left, until nothing is pending or `threshold_us` is spent.
    /// A shard leaves the list once its rehash completes.
    ///
    /// Returns the microseconds spent, 0 when nothing was pending.
    pub fn incrementally_rehash<F>(&self, threshold_us: u64, mut rehash_shard: F) -> u64
        where F: FnMut(usize, u64) {
        if self.pending_count() == 0 {
            return 0;
        }
        let timer = Instant::now();
        let mut elapsed_us = 0;
        while let Some(shard) = self.first_pending() {
            rehash_shard(shard, threshold_us - elapsed_us);
            elapsed_us = timer.elapsed_us();
            if elapsed_us >= threshold_us {
                break;
            }
        }
        elapsed_us
    }
}

impl DictListener for RehashScheduler {
    fn metadata(&self) -> DictMetadata {
        if self.key_sizes {
            DictMetadata::with_key_sizes()
        } else {
            DictMetadata::default()
        }
    }

    fn rehashing_started(&self, meta: &mut DictMetadata, from: u64, to: u64) {
        let base = meta.base_mut();
        base.rehashing_node = Some(self.pending.borrow_mut().push_back(base.shard));
        self.bucket_count.set(self.bucket_count.get() + to);
        self.overhead_lut.set(self.overhead_lut.get() + to);
        self.overhead_rehashing.set(self.overhead_rehashing.get() + from);
        trace!(target: "kvstore::rehash", "shard {} rehashing from {} to {} buckets", base.shard, from, to);
    }

    fn rehashing_completed(&self, meta: &mut DictMetadata, from: u64, to: u64) {
        let base = meta.base_mut();
        if let Some(node) = base.rehashing_node.take() {
            self.pending.borrow_mut().remove(node);
        }
        self.bucket_count.set(self.bucket_count.get().saturating_sub(from));
        self.overhead_lut.set(self.overhead_lut.get().saturating_sub(from));
        self.overhead_rehashing.set(self.overhead_rehashing.get().saturating_sub(from));
        trace!(target: "kvstore::rehash", "shard {} settled at {} buckets", base.shard, to);
    }
}
