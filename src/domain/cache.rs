//! Ordered cache lookups and the staged read view used during replay.

use crate::domain::quote::Series;
use chrono::NaiveDateTime;

/// Position of the record with exactly `timestamp`, if any.
pub fn index_of<T: Series>(cache: &[T], timestamp: NaiveDateTime) -> Option<usize> {
    cache
        .binary_search_by(|item| item.timestamp().cmp(&timestamp))
        .ok()
}

/// First position whose timestamp is on or after `timestamp`;
/// `cache.len()` when every record is earlier.
pub fn index_gte<T: Series>(cache: &[T], timestamp: NaiveDateTime) -> usize {
    cache.partition_point(|item| item.timestamp() < timestamp)
}

/// One logical result history made of a committed prefix and a staged
/// suffix that has not been swapped into the cache yet.
#[derive(Debug)]
pub struct CacheView<'a, T> {
    committed: &'a [T],
    staged: &'a [T],
}

impl<T> Clone for CacheView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CacheView<'_, T> {}

impl<'a, T> CacheView<'a, T> {
    pub fn new(committed: &'a [T], staged: &'a [T]) -> Self {
        Self { committed, staged }
    }

    pub fn len(&self) -> usize {
        self.committed.len() + self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&'a T> {
        if index < self.committed.len() {
            self.committed.get(index)
        } else {
            self.staged.get(index - self.committed.len())
        }
    }

    pub fn last(&self) -> Option<&'a T> {
        self.staged.last().or_else(|| self.committed.last())
    }
}
