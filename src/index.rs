use crate::sync::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// A key → value map behind one readers-writer lock.
///
/// Lookups share the lock; inserts and removals take it exclusively.
/// Keys are unique and unordered.
///
/// 由单个读写锁保护的键值映射。查询共享锁，插入与删除独占锁。
pub struct KeyIndex<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K: Hash + Eq, V: Copy> KeyIndex<K, V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Store `value` under `key` unless the key is already present.
    ///
    /// Returns `false` and stores nothing if `key` was present.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut map = self.map.write();
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, value);
        true
    }

    pub fn lookup<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().get(key).copied()
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.write().remove(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq, V: Copy> Default for KeyIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for KeyIndex<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyIndex")
            .field("len", &self.map.read().len())
            .finish()
    }
}
