/// The single hash table with incremental two-table rehashing.
pub mod hashtable;
/// Plain and safe iteration over one dict.
pub mod iter;
/// The shared dict template and the lifecycle hooks it carries.
pub mod listener;
/// Bucket and chain statistics.
pub mod stats;

pub use hashtable::{Defrag, Dict, Entry, ScanAction, UnlinkHandle};
pub use iter::DictIterator;
pub use listener::{DictListener, DictType, ResizePolicy};
pub use stats::DictStats;
