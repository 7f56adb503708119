//! Insertion-ordered keyed map.
//!
//! Backing container for the per-table route index and the multipath set.
//! Like `HashMap` but iteration follows insertion order, and no operation
//! ever creates an entry implicitly.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    order: Vec<K>,
    inner: HashMap<K, V>,
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            inner: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Inserts a value. A replaced key keeps its original position.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let prev = self.inner.insert(key.clone(), value);
        if prev.is_none() {
            self.order.push(key);
        }
        prev
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let prev = self.inner.remove(key);
        if prev.is_some() {
            self.order.retain(|k| k != key);
        }
        prev
    }

    /// Key at the given insertion position.
    pub fn nth_key(&self, index: usize) -> Option<&K> {
        self.order.get(index)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(move |k| self.inner.get(k).map(|v| (k, v)))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<K, V> Default for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PartialEq for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order && self.inner == other.inner
    }
}
