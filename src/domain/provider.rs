//! Source provider and the shared, observable cache every stream exposes.
//!
//! A [`StreamCache`] is owned by exactly one publisher (a [`QuoteProvider`]
//! or a hub). Subscribers hold it through a `Weak` reference and only read
//! from it; the publisher keeps `Weak` registrations of its subscribers and
//! notifies them synchronously after every change.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use log::debug;

use crate::domain::cache::{index_gte, index_of};
use crate::domain::error::HubError;
use crate::domain::mutation::Mutation;
use crate::domain::quote::{Quote, Series};

/// Consecutive identical resends tolerated before a provider faults.
pub const MAX_REPEATS: u8 = 100;

/// Receives mutation events from a [`StreamCache`].
pub trait Observer {
    fn on_mutation(&self, mutation: Mutation) -> Result<(), HubError>;
}

/// Handle identifying one registration with a publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    observer: Weak<dyn Observer>,
}

/// Ordered cache plus subscriber registrations.
pub struct StreamCache<T> {
    cache: RefCell<Vec<T>>,
    observers: RefCell<Vec<Registration>>,
    next_id: Cell<u64>,
    max_cache_size: Option<usize>,
}

impl<T> StreamCache<T> {
    pub(crate) fn new(max_cache_size: Option<usize>) -> Self {
        Self {
            cache: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            max_cache_size,
        }
    }

    /// Read-only view of the cached records.
    ///
    /// Holding the returned guard while mutating the publisher panics.
    pub fn cache(&self) -> Ref<'_, [T]> {
        Ref::map(self.cache.borrow(), |v| v.as_slice())
    }

    pub(crate) fn cache_mut(&self) -> RefMut<'_, Vec<T>> {
        self.cache.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_cache_size(&self) -> Option<usize> {
        self.max_cache_size
    }

    /// Registers an observer; the publisher never keeps it alive.
    pub fn subscribe(&self, observer: Weak<dyn Observer>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.observers
            .borrow_mut()
            .push(Registration { id, observer });
        id
    }

    /// Removes a registration. Returns false when it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|r| r.id != id);
        observers.len() != before
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.observers.borrow().iter().any(|r| r.id == id)
    }

    pub(crate) fn unsubscribe_all(&self) {
        self.observers.borrow_mut().clear();
    }

    /// Number of live subscribers.
    pub fn observer_count(&self) -> usize {
        self.observers
            .borrow()
            .iter()
            .filter(|r| r.observer.strong_count() > 0)
            .count()
    }

    /// Delivers `mutation` to every live subscriber, in registration order.
    /// Every subscriber is notified even if one fails; the first error is
    /// returned.
    pub(crate) fn notify(&self, mutation: Mutation) -> Result<(), HubError> {
        let live: Vec<Rc<dyn Observer>> = {
            let mut observers = self.observers.borrow_mut();
            observers.retain(|r| r.observer.strong_count() > 0);
            observers.iter().filter_map(|r| r.observer.upgrade()).collect()
        };

        let mut first_error = None;
        for observer in live {
            if let Err(e) = observer.on_mutation(mutation) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Anything a hub can subscribe to.
pub trait StreamProvider<T> {
    fn stream_cache(&self) -> &Rc<StreamCache<T>>;
}

/// Root of every chain: the canonical, timestamp-ordered input sequence.
pub struct QuoteProvider<T = Quote> {
    stream: Rc<StreamCache<T>>,
    repeats: u8,
}

impl<T: Series + PartialEq> Default for QuoteProvider<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Series + PartialEq> QuoteProvider<T> {
    pub fn new() -> Self {
        Self {
            stream: Rc::new(StreamCache::new(None)),
            repeats: 0,
        }
    }

    /// A provider that evicts its oldest records once it holds more than
    /// `max_cache_size`.
    ///
    /// Eviction runs after appends only. A late insert into a full provider
    /// leaves it one record over the bound until the next append prunes it
    /// back, so subscribers never lose positions ahead of the insert.
    pub fn with_max_cache_size(max_cache_size: usize) -> Result<Self, HubError> {
        if max_cache_size == 0 {
            return Err(HubError::invalid_parameter(
                "QuoteProvider",
                "max_cache_size",
                "must be at least 1",
            ));
        }
        Ok(Self {
            stream: Rc::new(StreamCache::new(Some(max_cache_size))),
            repeats: 0,
        })
    }

    /// The current records, oldest first.
    ///
    /// The guard borrows the provider, so it has to be dropped before the
    /// next mutation. Result guards from subscribed hubs are separate
    /// runtime borrows; see [`Hub::results`].
    ///
    /// [`Hub::results`]: crate::domain::hub::Hub::results
    pub fn quotes(&self) -> Ref<'_, [T]> {
        self.stream.cache()
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    pub fn max_cache_size(&self) -> Option<usize> {
        self.stream.max_cache_size()
    }

    pub fn subscriber_count(&self) -> usize {
        self.stream.observer_count()
    }

    /// Routes a record by timestamp: newer than the tail appends, an
    /// existing timestamp updates, an older one inserts. An identical
    /// resend changes nothing and returns `None`.
    pub fn add(&mut self, record: T) -> Result<Option<Mutation>, HubError> {
        let timestamp = record.timestamp();
        let (tail, existing) = {
            let cache = self.stream.cache();
            (cache.last().map(|r| r.timestamp()), index_of(&*cache, timestamp))
        };

        match (tail, existing) {
            (None, _) => self.append(record).map(Some),
            (Some(t), _) if timestamp > t => self.append(record).map(Some),
            (_, Some(_)) => self.upsert(record),
            (_, None) => self.insert(record).map(Some),
        }
    }

    /// Adds many records, oldest first.
    pub fn add_batch(&mut self, records: impl IntoIterator<Item = T>) -> Result<(), HubError> {
        let mut sorted: Vec<T> = records.into_iter().collect();
        sorted.sort_by_key(|r| r.timestamp());
        for record in sorted {
            self.add(record)?;
        }
        Ok(())
    }

    /// Adds a record after the current tail.
    pub fn append(&mut self, record: T) -> Result<Mutation, HubError> {
        let timestamp = record.timestamp();
        let index = {
            let mut cache = self.stream.cache_mut();
            if let Some(last) = cache.last() {
                if timestamp <= last.timestamp() {
                    return Err(HubError::OutOfOrder {
                        timestamp,
                        tail: last.timestamp(),
                    });
                }
            }
            cache.push(record);
            cache.len() - 1
        };
        self.repeats = 0;

        let mutation = Mutation::Append { index };
        self.stream.notify(mutation)?;
        self.prune()?;
        Ok(mutation)
    }

    /// Replaces the record with the same timestamp. Resending an unchanged
    /// record is a no-op and returns `None`.
    pub fn upsert(&mut self, record: T) -> Result<Option<Mutation>, HubError> {
        let timestamp = record.timestamp();
        let index = {
            let cache = self.stream.cache();
            let index =
                index_of(&*cache, timestamp).ok_or(HubError::TimestampNotFound { timestamp })?;
            if cache[index] == record {
                None
            } else {
                Some(index)
            }
        };

        let Some(index) = index else {
            self.repeats = self.repeats.saturating_add(1);
            if self.repeats > MAX_REPEATS {
                return Err(HubError::Overflow {
                    timestamp,
                    limit: MAX_REPEATS,
                });
            }
            return Ok(None);
        };

        self.stream.cache_mut()[index] = record;
        self.repeats = 0;
        debug!("provider update at {index} ({timestamp})");

        let mutation = Mutation::Update { index };
        self.stream.notify(mutation)?;
        Ok(Some(mutation))
    }

    /// Places a late-arriving record at its timestamp position.
    pub fn insert(&mut self, record: T) -> Result<Mutation, HubError> {
        let timestamp = record.timestamp();
        let index = {
            let cache = self.stream.cache();
            if index_of(&*cache, timestamp).is_some() {
                return Err(HubError::DuplicateTimestamp { timestamp });
            }
            index_gte(&*cache, timestamp)
        };

        if index == self.len() {
            return self.append(record);
        }

        self.stream.cache_mut().insert(index, record);
        self.repeats = 0;
        debug!("provider insert at {index} ({timestamp})");

        let mutation = Mutation::Insert { index };
        self.stream.notify(mutation)?;
        Ok(mutation)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Mutation, HubError> {
        {
            let mut cache = self.stream.cache_mut();
            if index >= cache.len() {
                return Err(HubError::IndexOutOfRange {
                    index,
                    len: cache.len(),
                });
            }
            cache.remove(index);
        }
        self.repeats = 0;
        debug!("provider remove at {index}");

        let mutation = Mutation::Remove { index };
        self.stream.notify(mutation)?;
        Ok(mutation)
    }

    /// Removes the record with exactly `timestamp`.
    pub fn remove(&mut self, timestamp: chrono::NaiveDateTime) -> Result<Mutation, HubError> {
        let index = index_of(&*self.stream.cache(), timestamp)
            .ok_or(HubError::TimestampNotFound { timestamp })?;
        self.remove_at(index)
    }

    /// Drops every subscription; later mutations reach nobody.
    pub fn end_transmission(&mut self) {
        self.stream.unsubscribe_all();
    }

    fn prune(&mut self) -> Result<(), HubError> {
        let Some(max) = self.stream.max_cache_size() else {
            return Ok(());
        };
        let count = {
            let mut cache = self.stream.cache_mut();
            if cache.len() <= max {
                return Ok(());
            }
            let count = cache.len() - max;
            cache.drain(..count);
            count
        };
        debug!("provider pruned {count} records");
        self.stream.notify(Mutation::Prune { count })
    }
}

impl<T> StreamProvider<T> for QuoteProvider<T> {
    fn stream_cache(&self) -> &Rc<StreamCache<T>> {
        &self.stream
    }
}
