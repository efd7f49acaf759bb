use aya_ebpf::maps::{LruHashMap, PerCpuArray};

use super::{Map, Scratch};
use crate::errors::MapError;

impl<K, V> Map<K, V> for LruHashMap<K, V> {
    #[inline(always)]
    fn get(&mut self, k: &K) -> Option<&V> {
        unsafe { LruHashMap::get(self, k) }
    }

    #[inline(always)]
    fn get_mut(&mut self, k: &K) -> Option<&mut V> {
        unsafe { self.get_ptr_mut(k).map(|p| &mut *p) }
    }

    #[inline(always)]
    fn insert(&mut self, k: &K, v: &V) -> Result<(), MapError> {
        LruHashMap::insert(self, k, v, 0).map_err(|_| MapError::InsertFailure)
    }

    #[inline(always)]
    fn remove(&mut self, k: &K) -> Result<(), MapError> {
        LruHashMap::remove(self, k).map_err(|_| MapError::RemoveFailure)
    }
}

impl<V> Scratch<V> for PerCpuArray<V> {
    #[inline(always)]
    fn slot(&mut self, index: u32) -> Option<&mut V> {
        unsafe { self.get_ptr_mut(index).map(|p| &mut *p) }
    }
}
