/// The Fenwick tree of per-shard key counts.
pub mod cumulative;
/// Packing a shard index and a shard-local cursor into one scan cursor.
pub mod cursor;
/// Cross-shard and single-shard iterators.
pub mod iter;
/// The kvstore itself.
pub mod kvstore;
/// Per-shard metadata.
pub mod metadata;
/// Bookkeeping of shards that are rehashing.
pub mod rehash;

/// At least 48 bits of a scan cursor stay for the shard-local part.
pub const MAX_SHARD_BITS: u32 = 16;
