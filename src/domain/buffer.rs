//! Chainless incremental lists.
//!
//! A [`BufferList`] feeds each added record through a [`BufferIndicator`]
//! engine that keeps rolling aggregates, so an add costs O(1) for most
//! formulas. The visible list may be bounded; dropping old outputs never
//! touches the engine, which keeps reflecting the whole history.

use std::collections::VecDeque;

use log::debug;

use crate::domain::error::HubError;
use crate::domain::quote::Series;

/// Incremental engine behind a [`BufferList`].
pub trait BufferIndicator {
    type Input: Series + Clone;
    type Output: Series + Clone;

    /// Consumes the next record in timestamp order.
    fn next(&mut self, input: &Self::Input) -> Self::Output;

    /// Back to the freshly constructed state.
    fn reset(&mut self);
}

#[derive(Debug, Clone)]
pub struct BufferList<B: BufferIndicator> {
    engine: B,
    items: VecDeque<B::Output>,
    max_list_size: Option<usize>,
    processed: usize,
}

impl<B: BufferIndicator> BufferList<B> {
    pub fn new(engine: B) -> Self {
        Self {
            engine,
            items: VecDeque::new(),
            max_list_size: None,
            processed: 0,
        }
    }

    /// A list that keeps at most `max_list_size` visible outputs.
    pub fn with_max_list_size(engine: B, max_list_size: usize) -> Result<Self, HubError> {
        let mut list = Self::new(engine);
        list.set_max_list_size(Some(max_list_size))?;
        Ok(list)
    }

    pub fn set_max_list_size(&mut self, max_list_size: Option<usize>) -> Result<(), HubError> {
        if max_list_size == Some(0) {
            return Err(HubError::invalid_parameter(
                "BufferList",
                "max_list_size",
                "must be at least 1",
            ));
        }
        self.max_list_size = max_list_size;
        self.prune();
        Ok(())
    }

    pub fn max_list_size(&self) -> Option<usize> {
        self.max_list_size
    }

    pub fn add(&mut self, input: &B::Input) {
        let output = self.engine.next(input);
        self.items.push_back(output);
        self.processed += 1;
        self.prune();
    }

    /// Adds many records, oldest first.
    pub fn add_batch(&mut self, inputs: impl IntoIterator<Item = B::Input>) {
        let mut sorted: Vec<B::Input> = inputs.into_iter().collect();
        sorted.sort_by_key(|r| r.timestamp());
        for input in &sorted {
            self.add(input);
        }
    }

    /// Drops every output and resets the engine.
    pub fn clear(&mut self) {
        self.items.clear();
        self.engine.reset();
        self.processed = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&B::Output> {
        self.items.get(index)
    }

    pub fn last(&self) -> Option<&B::Output> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &B::Output> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<B::Output> {
        self.items.iter().cloned().collect()
    }

    /// Total records consumed since construction or the last `clear`,
    /// including those whose outputs were pruned.
    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn engine(&self) -> &B {
        &self.engine
    }

    fn prune(&mut self) {
        let Some(max) = self.max_list_size else {
            return;
        };
        if self.items.len() > max {
            let count = self.items.len() - max;
            self.items.drain(..count);
            debug!("buffer list pruned {count} outputs");
        }
    }
}

/// Fixed-capacity FIFO of values with a running sum.
///
/// `NaN` values are counted rather than summed, so the sum recovers once
/// they leave the window.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
    sum: f64,
    nan_count: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            sum: 0.0,
            nan_count: 0,
        }
    }

    /// Adds a value, returning the one it evicted once full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.values.len() == self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        match evicted {
            Some(old) if old.is_nan() => self.nan_count -= 1,
            Some(old) => self.sum -= old,
            None => {}
        }
        if value.is_nan() {
            self.nan_count += 1;
        } else {
            self.sum += value;
        }
        self.values.push_back(value);
        evicted
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `NaN` while the window holds a `NaN`.
    pub fn sum(&self) -> f64 {
        if self.nan_count > 0 { f64::NAN } else { self.sum }
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            f64::NAN
        } else {
            self.sum() / self.values.len() as f64
        }
    }

    pub fn max(&self) -> f64 {
        if self.nan_count > 0 {
            return f64::NAN;
        }
        self.values.iter().copied().fold(f64::NAN, f64::max)
    }

    pub fn min(&self) -> f64 {
        if self.nan_count > 0 {
            return f64::NAN;
        }
        self.values.iter().copied().fold(f64::NAN, f64::min)
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + Clone + '_ {
        self.values.iter().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
        self.nan_count = 0;
    }
}
