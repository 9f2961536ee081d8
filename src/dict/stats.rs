use std::fmt;

use serde::Serialize;

/// Chains this long or longer share the last histogram slot.
pub const CHAIN_LEN_SLOTS: usize = 50;

/// Statistics of one table, or of the same table of several dicts combined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DictStats {
    /// 0 for the main table, 1 for the rehashing target.
    pub table: usize,
    pub table_size: u64,
    pub used: u64,
    /// the fields below are only filled by a full scan of the buckets.
    pub non_empty_buckets: u64,
    pub max_chain_len: u64,
    pub total_chain_len: u64,
    pub chain_len_histogram: Vec<u64>,
}

impl DictStats {
    pub(crate) fn new(table: usize, table_size: u64, used: u64, full: bool) -> Self {
        DictStats {
            table,
            table_size,
            used,
            non_empty_buckets: 0,
            max_chain_len: 0,
            total_chain_len: 0,
            chain_len_histogram: if full { vec![0; CHAIN_LEN_SLOTS] } else { Vec::new() },
        }
    }

    pub(crate) fn record_chain(&mut self, len: usize) {
        let slot = len.min(CHAIN_LEN_SLOTS - 1);
        if let Some(count) = self.chain_len_histogram.get_mut(slot) {
            *count += 1;
        }
        if len == 0 {
            return;
        }
        let len = len as u64;
        self.non_empty_buckets += 1;
        self.max_chain_len = self.max_chain_len.max(len);
        self.total_chain_len += len;
    }

    /// fold `other` into `self`.
    pub fn combine(&mut self, other: &DictStats) {
        self.table_size += other.table_size;
        self.used += other.used;
        self.non_empty_buckets += other.non_empty_buckets;
        self.max_chain_len = self.max_chain_len.max(other.max_chain_len);
        self.total_chain_len += other.total_chain_len;
        if self.chain_len_histogram.len() < other.chain_len_histogram.len() {
            self.chain_len_histogram.resize(other.chain_len_histogram.len(), 0);
        }
        for (into, from) in self.chain_len_histogram.iter_mut().zip(other.chain_len_histogram.iter()) {
            *into += *from;
        }
    }

    fn title(&self) -> &'static str {
        if self.table == 0 { "main hash table" } else { "rehashing target" }
    }

    /// the human readable report.
    pub fn write_message<W: fmt::Write>(&self, out: &mut W, full: bool) -> fmt::Result {
        writeln!(out, "Hash table {} stats ({}):", self.table, self.title())?;
        if self.used == 0 {
            return writeln!(out, "No stats available for empty dictionaries");
        }
        writeln!(out, " table size: {}", self.table_size)?;
        writeln!(out, " number of elements: {}", self.used)?;
        if !full {
            return Ok(());
        }
        let buckets = self.non_empty_buckets.max(1) as f64;
        writeln!(out, " different slots: {}", self.non_empty_buckets)?;
        writeln!(out, " max chain length: {}", self.max_chain_len)?;
        writeln!(out, " avg chain length (counted): {:.2}", self.total_chain_len as f64 / buckets)?;
        writeln!(out, " avg chain length (computed): {:.2}", self.used as f64 / buckets)?;
        writeln!(out, " Chain length distribution:")?;
        for (len, count) in self.chain_len_histogram.iter().enumerate().take(CHAIN_LEN_SLOTS - 1) {
            if *count == 0 {
                continue;
            }
            writeln!(out, "   {}: {} ({:.2}%)", len, count, *count as f64 / self.table_size as f64 * 100.0)?;
        }
        Ok(())
    }
}
