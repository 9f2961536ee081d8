use super::MAX_SHARD_BITS;

/// A scan position: which shard, and where inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanCursor {
    pub shard: usize,
    /// the shard-local cursor, opaque to the kvstore.
    pub inner: u64,
}

/// Packs a `ScanCursor` into a `u64`: the shard index in the low bits,
/// the shard-local cursor above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorCodec {
    bits: u32,
}

impl CursorCodec {
    pub fn new(num_shards_bits: u32) -> Self {
        assert!(num_shards_bits <= MAX_SHARD_BITS, "{} shard bits leave too little room for the cursor", num_shards_bits);
        CursorCodec { bits: num_shards_bits }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// the largest shard-local cursor that survives a round trip.
    pub fn max_inner(&self) -> u64 {
        u64::MAX >> self.bits
    }

    pub fn encode(&self, cursor: ScanCursor) -> u64 {
        debug_assert!((cursor.shard as u64) >> self.bits == 0);
        (cursor.inner << self.bits) | cursor.shard as u64
    }

    pub fn decode(&self, raw: u64) -> ScanCursor {
        let mask = (1u64 << self.bits) - 1;
        ScanCursor {
            shard: (raw & mask) as usize,
            inner: raw >> self.bits,
        }
    }
}
