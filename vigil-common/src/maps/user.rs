use core::hash::Hash;

use lru_st::collections::LruHashMap;

use super::{Map, Scratch};
use crate::errors::MapError;

/// Bounded in-memory counterpart of a kernel LRU hash map
pub struct LruMap<K, V> {
    map: LruHashMap<K, V>,
}

impl<K, V> LruMap<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn with_max_entries(cap: usize) -> Self {
        Self {
            map: LruHashMap::with_max_entries(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Map<K, V> for LruMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn get(&mut self, k: &K) -> Option<&V> {
        self.map.get(k)
    }

    fn get_mut(&mut self, k: &K) -> Option<&mut V> {
        self.map.get_mut(k)
    }

    fn insert(&mut self, k: &K, v: &V) -> Result<(), MapError> {
        self.map.insert(k.clone(), v.clone());
        Ok(())
    }

    fn remove(&mut self, k: &K) -> Result<(), MapError> {
        self.map.remove(k).map(|_| ()).ok_or(MapError::RemoveFailure)
    }
}

/// Heap backed scratch slots, values are zero initialized like
/// the ones of a per-CPU array
pub struct ScratchSlots<V> {
    slots: Vec<Box<V>>,
}

impl<V: Default> ScratchSlots<V> {
    pub fn with_slots(n: usize) -> Self {
        Self {
            slots: (0..n).map(|_| Box::<V>::default()).collect(),
        }
    }
}

impl<V> Scratch<V> for ScratchSlots<V> {
    fn slot(&mut self, index: u32) -> Option<&mut V> {
        self.slots.get_mut(index as usize).map(|b| b.as_mut())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lru_eviction() {
        let mut m = LruMap::<u32, u32>::with_max_entries(2);
        m.insert(&1, &10).unwrap();
        m.insert(&2, &20).unwrap();
        // touching 1 makes 2 the least recently used
        assert_eq!(m.get(&1), Some(&10));
        m.insert(&3, &30).unwrap();

        assert!(m.contains_key(&1));
        assert!(!m.contains_key(&2));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_remove_missing() {
        let mut m = LruMap::<u32, u32>::with_max_entries(2);
        assert_eq!(m.remove(&42), Err(MapError::RemoveFailure));
        m.insert(&42, &0).unwrap();
        assert!(m.remove(&42).is_ok());
        assert!(m.is_empty());
    }
}
