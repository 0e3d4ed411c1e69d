//! Insertion-ordered collections with a normalized name index.
//!
//! Matching by name is O(1) and case-insensitive; iteration order is the
//! order in which items were inserted, so generated output stays stable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::identifier::normalize;

/// Anything that has a name within its parent collection.
pub trait Named {
    fn name(&self) -> &str;
}

/// An owned list of named items with a case-insensitive index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    from = "Vec<T>",
    into = "Vec<T>",
    bound(
        serialize = "T: Serialize + Clone",
        deserialize = "T: Deserialize<'de> + Named"
    )
)]
pub struct NamedList<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for NamedList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Named> NamedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item, replacing any existing item with the same name.
    ///
    /// A replaced item keeps its position.
    pub fn insert(&mut self, item: T) -> Option<T> {
        let key = normalize(item.name());
        match self.index.get(&key) {
            Some(&pos) => Some(std::mem::replace(&mut self.items[pos], item)),
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(item);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(&normalize(name)).map(|&pos| &self.items[pos])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        match self.index.get(&normalize(name)) {
            Some(&pos) => Some(&mut self.items[pos]),
            None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&normalize(name))
    }

    /// Remove an item by name, preserving the order of the rest.
    pub fn remove(&mut self, name: &str) -> Option<T> {
        let pos = self.index.remove(&normalize(name))?;
        let item = self.items.remove(pos);
        self.reindex();
        Some(item)
    }

    /// Keep only items matching the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let before = self.items.len();
        self.items.retain(|item| keep(item));
        if self.items.len() != before {
            self.reindex();
        }
    }

    /// Rename an item in place. The caller updates the item's own name via `rename`.
    ///
    /// Returns false if `from` is missing or `to` is already taken by another item.
    pub fn rename(&mut self, from: &str, to: &str, rename: impl FnOnce(&mut T, &str)) -> bool {
        let from_key = normalize(from);
        let to_key = normalize(to);
        let Some(&pos) = self.index.get(&from_key) else {
            return false;
        };
        if from_key != to_key && self.index.contains_key(&to_key) {
            return false;
        }
        rename(&mut self.items[pos], to);
        self.index.remove(&from_key);
        self.index.insert(to_key, pos);
        true
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|i| i.name().to_string()).collect()
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(pos, item)| (normalize(item.name()), pos))
            .collect();
    }
}

impl<T> NamedList<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: Clone> NamedList<T> {
    /// A copy of the items.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }
}

impl<T: Named> From<Vec<T>> for NamedList<T> {
    fn from(items: Vec<T>) -> Self {
        let mut list = NamedList::new();
        for item in items {
            list.insert(item);
        }
        list
    }
}

impl<T> From<NamedList<T>> for Vec<T> {
    fn from(list: NamedList<T>) -> Self {
        list.items
    }
}

impl<T: Named> FromIterator<T> for NamedList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = NamedList::new();
        for item in iter {
            list.insert(item);
        }
        list
    }
}

impl<'a, T> IntoIterator for &'a NamedList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: PartialEq> PartialEq for NamedList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}
