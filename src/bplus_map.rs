use std::{
    alloc::{handle_alloc_error, Layout},
    fmt,
};

use crate::bplus_base::{node::Node, tree::BPlusTree, DEFAULT_ORDER};

/// Ordered map backed by a [`BPlusTree`] on the system allocator.
pub struct BPlusMap<K, V, const N: usize = DEFAULT_ORDER> {
    tree: BPlusTree<K, V, N>,
}

impl<K: Ord + Clone, V, const N: usize> BPlusMap<K, V, N> {
    pub fn new() -> Self {
        Self {
            tree: BPlusTree::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.tree.contains(key)
    }

    /// Associates `value` with `key`, replacing any previous value.
    pub fn put(&mut self, key: K, value: V) {
        if self.tree.try_emplace(key, move || value).is_err() {
            handle_alloc_error(Layout::new::<Node<K, V, N>>());
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.tree.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.tree.get_mut(key)
    }

    /// Returns whether `key` was present.
    pub fn remove(&mut self, key: &K) -> bool {
        self.tree.erase(key)
    }

    pub fn first_key(&self) -> Option<&K> {
        self.tree.min_key().ok()
    }

    pub fn last_key(&self) -> Option<&K> {
        self.tree.max_key().ok()
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<&K> {
        self.tree.keys_ascending()
    }

    pub fn clear(&mut self) {
        self.tree.erase_all();
    }

    pub fn tree(&self) -> &BPlusTree<K, V, N> {
        &self.tree
    }
}

impl<K: Ord + Clone, V, const N: usize> Default for BPlusMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone, const N: usize> Clone for BPlusMap<K, V, N> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
        }
    }
}

impl<K: Ord + Clone, V, const N: usize> Extend<(K, V)> for BPlusMap<K, V, N> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.put(key, value);
        }
    }
}

impl<K: Ord + Clone, V, const N: usize> FromIterator<(K, V)> for BPlusMap<K, V, N> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K: fmt::Debug, V, const N: usize> fmt::Debug for BPlusMap<K, V, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BPlusMap")
            .field("len", &self.tree.size())
            .field("tree", &self.tree)
            .finish()
    }
}

pub type DefaultBPlusMap<K, V> = BPlusMap<K, V, DEFAULT_ORDER>;
