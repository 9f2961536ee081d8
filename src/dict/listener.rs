use std::cell::Cell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::store::metadata::DictMetadata;

/// Whether dicts may resize themselves automatically.
///
/// `Avoid` still resizes when a table is badly over- or under-filled,
/// `Forbid` never does.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ResizePolicy {
    Enable,
    Avoid,
    Forbid,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        ResizePolicy::Enable
    }
}

/// Receives the lifecycle events of every dict created from a template.
///
/// `from` and `to` are the bucket counts of the retiring and the new table.
/// A table installed without rehashing (the old one was empty) is reported
/// as a `rehashing_started` immediately followed by `rehashing_completed`.
pub trait DictListener {
    /// the metadata value a freshly created dict starts with.
    fn metadata(&self) -> DictMetadata;
    fn rehashing_started(&self, meta: &mut DictMetadata, from: u64, to: u64);
    fn rehashing_completed(&self, meta: &mut DictMetadata, from: u64, to: u64);
}

/// The template every dict is created from.
///
/// Cloning it is cheap; clones share the hasher and the resize policy, so changing
/// the policy through any clone affects all dicts made from the same template.
pub struct DictType<S = RandomState> {
    hash_builder: Rc<S>,
    resize_policy: Rc<Cell<ResizePolicy>>,
    listener: Option<Weak<dyn DictListener>>,
}

impl DictType<RandomState> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<S> Clone for DictType<S> {
    fn clone(&self) -> Self {
        DictType {
            hash_builder: Rc::clone(&self.hash_builder),
            resize_policy: Rc::clone(&self.resize_policy),
            listener: self.listener.clone(),
        }
    }
}

impl Default for DictType<RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> DictType<S> {
    pub fn with_hasher(hash_builder: S) -> Self {
        DictType {
            hash_builder: Rc::new(hash_builder),
            resize_policy: Rc::new(Cell::new(ResizePolicy::default())),
            listener: None,
        }
    }

    /// install the lifecycle hooks.
    /// The template only keeps a weak reference: the listener's owner decides its lifetime.
    pub fn with_listener(mut self, listener: Weak<dyn DictListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub(crate) fn listener(&self) -> Option<Rc<dyn DictListener>> {
        self.listener.as_ref().and_then(Weak::upgrade)
    }

    pub fn resize_policy(&self) -> ResizePolicy {
        self.resize_policy.get()
    }

    pub fn set_resize_policy(&self, policy: ResizePolicy) {
        self.resize_policy.set(policy)
    }

    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }
}

impl<S: BuildHasher> DictType<S> {
    pub fn hash<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }
}
