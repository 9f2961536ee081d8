use super::hashtable::{Dict, Entry, Position};

/// A cursor over the entries of one dict.
///
/// It does not borrow the dict between calls: every `next` takes the dict again,
/// and `reset` must be called with the same dict once iteration is over.
///
/// A safe iterator pauses rehashing from its first `next` until `reset`, and the
/// entry it returned last may be deleted meanwhile. A plain iterator allows no
/// modification at all and asserts on `reset` that the tables were left alone.
#[derive(Debug, Clone)]
pub struct DictIterator {
    safe: bool,
    started: bool,
    table: usize,
    bucket: usize,
    /// entries of the current chain not returned yet; chains are walked from the back.
    remaining: usize,
    fingerprint: u64,
}

impl DictIterator {
    pub fn new() -> Self {
        Self::with_safety(false)
    }

    pub fn safe() -> Self {
        Self::with_safety(true)
    }

    fn with_safety(safe: bool) -> Self {
        DictIterator {
            safe,
            started: false,
            table: 0,
            bucket: 0,
            remaining: 0,
            fingerprint: 0,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn next<'a, K, V, S>(&mut self, d: &'a mut Dict<K, V, S>) -> Option<&'a mut Entry<K, V>> {
        let position = self.next_position(d)?;
        Some(d.entry_at_mut(position))
    }

    pub(crate) fn next_position<K, V, S>(&mut self, d: &mut Dict<K, V, S>) -> Option<Position> {
        if !self.started {
            self.started = true;
            if self.safe {
                d.pause_rehashing();
            } else {
                self.fingerprint = d.fingerprint();
            }
            self.remaining = d.chain_len(0, 0);
        }
        loop {
            // the chain may have lost entries since the last call.
            self.remaining = self.remaining.min(d.chain_len(self.table, self.bucket));
            if self.remaining > 0 {
                self.remaining -= 1;
                return Some(Position {
                    table: self.table,
                    bucket: self.bucket,
                    slot: self.remaining,
                });
            }
            self.bucket += 1;
            if self.bucket >= d.table_size(self.table) {
                if self.table == 0 && d.is_rehashing() {
                    self.table = 1;
                    self.bucket = 0;
                } else {
                    self.bucket = d.table_size(self.table);
                    return None;
                }
            }
            self.remaining = d.chain_len(self.table, self.bucket);
        }
    }

    /// finish an iteration and make the iterator reusable.
    pub fn reset<K, V, S>(&mut self, d: &mut Dict<K, V, S>) {
        if self.started {
            if self.safe {
                d.resume_rehashing();
            } else if !std::thread::panicking() {
                assert_eq!(self.fingerprint, d.fingerprint(), "dict modified during a plain iteration");
            }
        }
        *self = Self::with_safety(self.safe);
    }
}

impl Default for DictIterator {
    fn default() -> Self {
        Self::new()
    }
}
