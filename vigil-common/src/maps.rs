//! Storage abstraction the hook logic is written against.
//!
//! In eBPF the traits are implemented by the kernel maps, in userland by
//! bounded in-memory LRU maps so that the very same logic can be driven
//! from unit tests.

use crate::errors::MapError;
use crate::{bpf_target_code, not_bpf_target_code};

bpf_target_code! {
    mod bpf;
    pub use bpf::*;
}

not_bpf_target_code! {
    mod user;
    pub use user::*;
}

/// Key/value store with eviction semantics: an insertion never fails
/// because the map is full, the least recently used entry goes away.
pub trait Map<K, V> {
    fn get(&mut self, k: &K) -> Option<&V>;

    fn get_mut(&mut self, k: &K) -> Option<&mut V>;

    fn insert(&mut self, k: &K, v: &V) -> Result<(), MapError>;

    /// Removing a missing key is an error, callers willing to
    /// ignore it have to do it explicitly.
    fn remove(&mut self, k: &K) -> Result<(), MapError>;

    #[inline(always)]
    fn contains_key(&mut self, k: &K) -> bool {
        self.get(k).is_some()
    }
}

impl<K, V, M: Map<K, V>> Map<K, V> for &mut M {
    #[inline(always)]
    fn get(&mut self, k: &K) -> Option<&V> {
        (**self).get(k)
    }

    #[inline(always)]
    fn get_mut(&mut self, k: &K) -> Option<&mut V> {
        (**self).get_mut(k)
    }

    #[inline(always)]
    fn insert(&mut self, k: &K, v: &V) -> Result<(), MapError> {
        (**self).insert(k, v)
    }

    #[inline(always)]
    fn remove(&mut self, k: &K) -> Result<(), MapError> {
        (**self).remove(k)
    }
}

/// Fixed set of slots owned by the running CPU for the duration of a
/// hook invocation. Used for values too large to live on the stack.
pub trait Scratch<V> {
    fn slot(&mut self, index: u32) -> Option<&mut V>;
}

impl<V, S: Scratch<V>> Scratch<V> for &mut S {
    #[inline(always)]
    fn slot(&mut self, index: u32) -> Option<&mut V> {
        (**self).slot(index)
    }
}
