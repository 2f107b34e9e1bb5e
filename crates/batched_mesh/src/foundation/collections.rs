//! Specialized collection types

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Slot list with lowest-index-first reuse of freed slots
///
/// Indices stay stable for the lifetime of an item. A freed slot is handed
/// out again before the list grows, smallest index first, so ids stay
/// compact under add/delete churn.
#[derive(Debug, Clone)]
pub struct FreeList<T> {
    items: Vec<Option<T>>,
    free_indices: BinaryHeap<Reverse<usize>>,
}

impl<T> FreeList<T> {
    /// Create a new free list
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            free_indices: BinaryHeap::new(),
        }
    }

    /// Index the next `insert` will return
    pub fn next_index(&self) -> usize {
        self.free_indices
            .peek()
            .map_or(self.items.len(), |Reverse(index)| *index)
    }

    /// Insert an item and return its index
    pub fn insert(&mut self, item: T) -> usize {
        if let Some(Reverse(index)) = self.free_indices.pop() {
            self.items[index] = Some(item);
            index
        } else {
            let index = self.items.len();
            self.items.push(Some(item));
            index
        }
    }

    /// Remove an item by index
    pub fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.get_mut(index)?.take()?;
        self.free_indices.push(Reverse(index));
        Some(item)
    }

    /// Get an item by index
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)?.as_ref()
    }

    /// Get a mutable reference to an item by index
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)?.as_mut()
    }

    /// Check whether a slot currently holds an item
    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.items.len() - self.free_indices.len()
    }

    /// True if no slot holds an item
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots ever handed out (live or free)
    pub fn slot_count(&self) -> usize {
        self.items.len()
    }

    /// Highest index currently holding an item
    pub fn highest_live_index(&self) -> Option<usize> {
        self.items.iter().rposition(Option::is_some)
    }

    /// Drop every slot at or beyond `len`
    ///
    /// Returns false and leaves the list untouched if a live item would be cut.
    pub fn truncate(&mut self, len: usize) -> bool {
        if self.highest_live_index().is_some_and(|highest| highest >= len) {
            return false;
        }
        self.items.truncate(len);
        self.free_indices.retain(|Reverse(index)| *index < len);
        true
    }

    /// Iterate live items with their indices
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_ref().map(|item| (index, item)))
    }
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_free_slot_reused_first() {
        let mut list = FreeList::new();
        for value in 0..5 {
            list.insert(value);
        }
        list.remove(3);
        list.remove(1);

        assert_eq!(list.next_index(), 1);
        assert_eq!(list.insert(10), 1);
        assert_eq!(list.insert(11), 3);
        assert_eq!(list.insert(12), 5);
        assert_eq!(list.len(), 6);
    }

    #[test]
    fn test_double_remove_is_rejected() {
        let mut list = FreeList::new();
        let index = list.insert("a");
        assert_eq!(list.remove(index), Some("a"));
        assert_eq!(list.remove(index), None);
        assert_eq!(list.insert("b"), index);
    }

    #[test]
    fn test_truncate_refuses_to_cut_live_items() {
        let mut list = FreeList::new();
        for value in 0..4 {
            list.insert(value);
        }
        assert!(!list.truncate(2));
        assert_eq!(list.len(), 4);

        list.remove(3);
        list.remove(2);
        assert!(list.truncate(2));
        assert_eq!(list.slot_count(), 2);
        assert_eq!(list.insert(7), 2);
    }
}
