//! Bounded, append-only ring logs.
//!
//! Used for performance metrics, error logs, activity sessions and the
//! offline queue. Appending past capacity drops the oldest items first.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedLog<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an item, dropping the oldest ones beyond capacity.
    ///
    /// Returns how many items were dropped.
    pub fn push(&mut self, item: T) -> usize {
        self.items.push_back(item);
        self.enforce(self.capacity)
    }

    /// Keep only the `max` most recent items. Returns how many were removed.
    ///
    /// Does not change the capacity used by later appends.
    pub fn trim_to(&mut self, max: usize) -> usize {
        self.enforce(max)
    }

    /// Change capacity, trimming if it shrank.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity;
        self.enforce(capacity)
    }

    fn enforce(&mut self, max: usize) -> usize {
        let excess = self.items.len().saturating_sub(max);
        self.items.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Keep only items matching `keep`, preserving order.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }
}

impl<T: Clone> BoundedLog<T> {
    /// Oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity_and_keeps_newest(
            capacity in 1usize..64,
            items in proptest::collection::vec(any::<u32>(), 0..256),
        ) {
            let mut log = BoundedLog::new(capacity);
            for item in &items {
                log.push(*item);
            }
            let expected_len = items.len().min(capacity);
            prop_assert_eq!(log.len(), expected_len);
            let expected: Vec<u32> = items[items.len() - expected_len..].to_vec();
            prop_assert_eq!(log.to_vec(), expected);
        }
    }
}
