
use super::rehash::NodeId;

/// Number of power-of-two bins kept by a `KeySizesHistogram`.
pub const KEY_SIZES_BINS: usize = 48;

/// Counts keys by the power-of-two bin their length falls into.
/// Bin `i` holds lengths in `[2^i, 2^(i+1))`; zero-length keys are not counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySizesHistogram {
    bins: [u64; KEY_SIZES_BINS],
}

impl Default for KeySizesHistogram {
    fn default() -> Self {
        KeySizesHistogram { bins: [0; KEY_SIZES_BINS] }
    }
}

impl KeySizesHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bin_of(len: u64) -> usize {
        debug_assert!(len > 0);
        ((63 - len.leading_zeros()) as usize).min(KEY_SIZES_BINS - 1)
    }

    /// move one key from the bin of `old_len` to the bin of `new_len`.
    /// Use `0` as `old_len` for a new key and as `new_len` for a deleted one.
    pub fn record_change(&mut self, old_len: u64, new_len: u64) {
        if old_len != 0 {
            let bin = &mut self.bins[Self::bin_of(old_len)];
            assert!(*bin > 0, "key sizes histogram underflow at length {}", old_len);
            *bin -= 1;
        }
        if new_len != 0 {
            self.bins[Self::bin_of(new_len)] += 1;
        }
    }

    pub fn bin(&self, i: usize) -> u64 {
        self.bins[i]
    }

    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }

    pub fn clear(&mut self) {
        self.bins = [0; KEY_SIZES_BINS];
    }
}

/// The part of the metadata every shard carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaBase {
    pub shard: usize,
    /// where the shard sits in the rehashing list, while it is rehashing.
    pub rehashing_node: Option<NodeId>,
}

/// Per-shard metadata, owned by the dict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictMetadata {
    Base(MetaBase),
    KeySizes {
        base: MetaBase,
        hist: KeySizesHistogram,
    },
}

impl Default for DictMetadata {
    fn default() -> Self {
        DictMetadata::Base(MetaBase::default())
    }
}

impl DictMetadata {
    pub fn with_key_sizes() -> Self {
        DictMetadata::KeySizes {
            base: MetaBase::default(),
            hist: KeySizesHistogram::new(),
        }
    }

    pub fn base(&self) -> &MetaBase {
        match self {
            DictMetadata::Base(base) => base,
            DictMetadata::KeySizes { base, .. } => base,
        }
    }

    pub fn base_mut(&mut self) -> &mut MetaBase {
        match self {
            DictMetadata::Base(base) => base,
            DictMetadata::KeySizes { base, .. } => base,
        }
    }

    pub fn key_sizes(&self) -> Option<&KeySizesHistogram> {
        match self {
            DictMetadata::Base(_) => None,
            DictMetadata::KeySizes { hist, .. } => Some(hist),
        }
    }

    pub fn key_sizes_mut(&mut self) -> Option<&mut KeySizesHistogram> {
        match self {
            DictMetadata::Base(_) => None,
            DictMetadata::KeySizes { hist, .. } => Some(hist),
        }
    }
}
