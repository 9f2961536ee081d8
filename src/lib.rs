pub use dict::{Dict, DictType, Entry, ResizePolicy, ScanAction};
pub use errors::{KvError, Result};
pub use store::cursor::{CursorCodec, ScanCursor};
pub use store::kvstore::{KvStore, KvStoreFlags, KvStoreInfo};

/// Small extension traits.
mod common;
/// About the logger configuration.
pub mod config;
/// About the single hash table each shard is made of.
pub mod dict;
/// the error type.
pub mod errors;
/// The options and workload of the `kvstore-sim` binary.
pub mod sim_common;
/// About the sharded kvstore.
pub mod store;
