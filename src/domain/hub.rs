//! Incremental computation units ("hubs").
//!
//! A [`Hub`] subscribes to one provider (a [`QuoteProvider`] or another
//! hub), keeps a result cache aligned by position with the provider's
//! cache, and keeps it equal to what the formula's batch computation would
//! produce over the current provider sequence:
//!
//! - an append at the tail runs the formula once;
//! - an update, insert, remove or rebuild at `i` rolls the formula state
//!   back to just after `i - 1`, recomputes `i..` into a staged suffix and
//!   swaps it in, then forwards the event to its own subscribers (a formula
//!   with lookahead starts `lookahead` positions earlier and forwards a
//!   rebuild from there);
//! - a head prune drops the same number of results without recomputing.
//!
//! [`QuoteProvider`]: crate::domain::provider::QuoteProvider

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use log::{debug, info, warn};

use crate::domain::cache::{CacheView, index_of};
use crate::domain::error::HubError;
use crate::domain::mutation::Mutation;
use crate::domain::provider::{Observer, StreamCache, StreamProvider, SubscriptionId};
use crate::domain::quote::Series;

/// What a formula may read while computing one position: the full
/// provider sequence and the results computed so far.
pub struct Context<'a, I, O> {
    inputs: &'a [I],
    results: CacheView<'a, O>,
}

impl<'a, I: Series, O> Context<'a, I, O> {
    pub fn new(inputs: &'a [I], results: CacheView<'a, O>) -> Self {
        Self { inputs, results }
    }

    pub fn inputs(&self) -> &'a [I] {
        self.inputs
    }

    pub fn results(&self) -> CacheView<'a, O> {
        self.results
    }

    /// The result one position before `index`.
    pub fn prev_result(&self, index: usize) -> Option<&'a O> {
        index.checked_sub(1).and_then(|p| self.results.get(p))
    }

    /// Provider position of `item`, trusting `hint` when it matches.
    pub fn resolve(&self, item: &I, hint: Option<usize>) -> Result<usize, HubError> {
        let timestamp = item.timestamp();
        if let Some(i) = hint {
            if self.inputs.get(i).is_some_and(|r| r.timestamp() == timestamp) {
                return Ok(i);
            }
        }
        index_of(self.inputs, timestamp).ok_or(HubError::TimestampNotFound { timestamp })
    }
}

/// A pluggable formula driven by a [`Hub`].
pub trait Indicator: Clone + fmt::Display + 'static {
    type Input: Series + 'static;
    type Output: Series + Clone + PartialEq + 'static;

    /// Computes the one result owned by `item`'s position, reading only
    /// running state and a bounded lookback of `ctx`. Returns the result
    /// and the resolved position.
    fn to_indicator(
        &mut self,
        ctx: &Context<'_, Self::Input, Self::Output>,
        item: &Self::Input,
        index_hint: Option<usize>,
    ) -> Result<(Self::Output, usize), HubError>;

    /// Restores running state to what it was right after position
    /// `index - 1` was computed (the initial state when `index == 0`).
    /// `ctx` holds valid results for `..index`.
    fn rollback_state(&mut self, ctx: &Context<'_, Self::Input, Self::Output>, index: usize);

    /// Batch reference: the whole output series for `inputs`.
    fn compute_series(&self, inputs: &[Self::Input]) -> Vec<Self::Output>;

    /// Earlier positions a computation reads.
    fn lookback(&self) -> usize;

    /// Later positions a computation reads; non-zero for non-causal
    /// formulas, whose trailing results need [`Hub::finalize`].
    fn lookahead(&self) -> usize {
        0
    }
}

struct HubInner<F: Indicator> {
    provider: Weak<StreamCache<F::Input>>,
    stream: Rc<StreamCache<F::Output>>,
    formula: RefCell<F>,
    subscription: Cell<Option<SubscriptionId>>,
    pending_from: Cell<Option<usize>>,
    faulted: Cell<bool>,
}

impl<F: Indicator> HubInner<F> {
    fn upstream(&self) -> Result<Rc<StreamCache<F::Input>>, HubError> {
        self.provider.upgrade().ok_or(HubError::ProviderDropped)
    }

    fn on_append(&self, index: usize) -> Result<(), HubError> {
        let upstream = self.upstream()?;
        let own_len = self.stream.len();
        let inputs = upstream.cache();

        if index != own_len || index >= inputs.len() {
            warn!(
                "{}: append at {index} does not match cache length {own_len}, replaying",
                self.formula.borrow()
            );
            drop(inputs);
            let start = self.replay_from(self.reach_back(index.min(own_len)))?;
            return self.stream.notify(Mutation::Rebuild { index: start });
        }

        let computed = {
            let committed = self.stream.cache();
            let ctx = Context::new(&*inputs, CacheView::new(&*committed, &[]));
            self.formula
                .borrow_mut()
                .to_indicator(&ctx, &inputs[index], Some(index))
        };
        let provider_len = inputs.len();
        drop(inputs);

        let (result, _) = computed.inspect_err(|e| {
            warn!("{}: append at {index} failed: {e}", self.formula.borrow());
            self.faulted.set(true);
        })?;

        self.stream.cache_mut().push(result);
        self.note_computed(index, provider_len);
        self.stream.notify(Mutation::Append { index })
    }

    /// Recomputes `start..` against the current provider sequence and
    /// swaps the new suffix in. Returns the position replay started at.
    fn replay_from(&self, start: usize) -> Result<usize, HubError> {
        let upstream = self.upstream()?;
        let inputs = upstream.cache();
        let committed = self.stream.cache();
        let start = start.min(committed.len()).min(inputs.len());

        let mut formula = self.formula.borrow().clone();
        let staged = if start == 0 {
            let series = formula.compute_series(&inputs);
            let ctx = Context::new(&*inputs, CacheView::new(&[], series.as_slice()));
            formula.rollback_state(&ctx, series.len());
            series
        } else {
            let prefix = &committed[..start];
            formula.rollback_state(&Context::new(&*inputs, CacheView::new(prefix, &[])), start);

            let mut staged = Vec::with_capacity(inputs.len() - start);
            for i in start..inputs.len() {
                let (result, _) = {
                    let ctx = Context::new(&*inputs, CacheView::new(prefix, &staged));
                    formula.to_indicator(&ctx, &inputs[i], Some(i))
                }
                .inspect_err(|e| {
                    warn!("{formula}: replay at {i} failed: {e}");
                    self.faulted.set(true);
                })?;
                staged.push(result);
            }
            staged
        };

        let provider_len = inputs.len();
        debug!(
            "{formula}: replayed {} results from {start}",
            staged.len()
        );
        drop(committed);
        drop(inputs);

        {
            let mut cache = self.stream.cache_mut();
            cache.truncate(start);
            cache.extend(staged);
        }
        *self.formula.borrow_mut() = formula;
        self.faulted.set(false);

        if self.pending_from.get().is_some_and(|p| p >= start) {
            self.pending_from.set(None);
        }
        self.note_computed(start, provider_len);
        Ok(start)
    }

    fn on_prune(&self, count: usize) -> Result<(), HubError> {
        {
            let mut cache = self.stream.cache_mut();
            let count = count.min(cache.len());
            cache.drain(..count);
        }
        self.pending_from
            .set(self.pending_from.get().map(|p| p.saturating_sub(count)));
        self.stream.notify(Mutation::Prune { count })
    }

    /// First position whose result can depend on the record at `index`.
    /// A formula reading `lookahead` later positions sees a change at
    /// `index` from as far back as `index - lookahead`.
    fn reach_back(&self, index: usize) -> usize {
        index.saturating_sub(self.formula.borrow().lookahead())
    }

    /// Tracks positions `start..provider_len` that were computed before
    /// enough trailing context existed.
    fn note_computed(&self, start: usize, provider_len: usize) {
        let lookahead = self.formula.borrow().lookahead();
        if lookahead == 0 {
            return;
        }
        let first_open = provider_len.saturating_sub(lookahead).max(start);
        if first_open < provider_len {
            let pending = self
                .pending_from
                .get()
                .map_or(first_open, |p| p.min(first_open));
            self.pending_from.set(Some(pending));
        }
    }
}

impl<F: Indicator> Observer for HubInner<F> {
    fn on_mutation(&self, mutation: Mutation) -> Result<(), HubError> {
        debug!("{}: received {mutation:?}", self.formula.borrow());
        match mutation {
            Mutation::Append { index } => self.on_append(index),
            Mutation::Prune { count } => self.on_prune(count),
            Mutation::Update { index }
            | Mutation::Insert { index }
            | Mutation::Remove { index }
            | Mutation::Rebuild { index } => {
                let start = self.replay_from(self.reach_back(index))?;
                let forwarded = if start == index {
                    mutation
                } else {
                    Mutation::Rebuild { index: start }
                };
                self.stream.notify(forwarded)
            }
        }
    }
}

/// A computation unit bound to one provider and one formula.
///
/// A hub is itself a [`StreamProvider`] of its results, so hubs chain.
/// Dropping a hub unsubscribes it.
pub struct Hub<F: Indicator> {
    inner: Rc<HubInner<F>>,
}

impl<F: Indicator> Hub<F> {
    /// Binds `formula` to `provider`, backfills over the records already
    /// present and subscribes to further changes.
    pub fn new<P>(provider: &P, formula: F) -> Result<Self, HubError>
    where
        P: StreamProvider<F::Input> + ?Sized,
    {
        let upstream = provider.stream_cache();
        let max_cache_size = upstream.max_cache_size();
        if let Some(max) = max_cache_size {
            if max <= formula.lookback() {
                return Err(HubError::invalid_parameter(
                    &formula.to_string(),
                    "max_cache_size",
                    format!("{max} cannot hold a lookback of {}", formula.lookback()),
                ));
            }
        }

        let inner = Rc::new(HubInner {
            provider: Rc::downgrade(upstream),
            stream: Rc::new(StreamCache::new(max_cache_size)),
            formula: RefCell::new(formula),
            subscription: Cell::new(None),
            pending_from: Cell::new(None),
            faulted: Cell::new(false),
        });
        inner.replay_from(0)?;

        let hub = Self { inner };
        hub.subscribe(upstream);
        info!("{}: subscribed with {} results", hub.name(), hub.len());
        Ok(hub)
    }

    fn subscribe(&self, upstream: &StreamCache<F::Input>) {
        let observer: Weak<dyn Observer> = Rc::downgrade(&self.inner) as Weak<dyn Observer>;
        self.inner.subscription.set(Some(upstream.subscribe(observer)));
    }

    pub fn name(&self) -> String {
        self.inner.formula.borrow().to_string()
    }

    /// The formula and its current running state.
    pub fn formula(&self) -> Ref<'_, F> {
        self.inner.formula.borrow()
    }

    /// Read-only results, aligned by position with the provider.
    ///
    /// The returned guard borrows the result cache. Holding it while the
    /// upstream provider is mutated panics, so copy out what you need
    /// (`hub.results().to_vec()`) before feeding more records.
    pub fn results(&self) -> Ref<'_, [F::Output]> {
        self.inner.stream.cache()
    }

    pub fn len(&self) -> usize {
        self.inner.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_faulted(&self) -> bool {
        self.inner.faulted.get()
    }

    /// First position computed without full trailing context; always
    /// `None` for causal formulas.
    pub fn pending_from(&self) -> Option<usize> {
        self.inner.pending_from.get()
    }

    /// Recomputes every result from `from_index` on and notifies
    /// subscribers.
    pub fn rebuild(&self, from_index: usize) -> Result<(), HubError> {
        let start = self.inner.replay_from(from_index)?;
        self.inner.stream.notify(Mutation::Rebuild { index: start })
    }

    /// Rebuilds the trailing results a non-causal formula computed before
    /// their right-hand context arrived.
    pub fn finalize(&self) -> Result<(), HubError> {
        match self.pending_from() {
            Some(from) => self.rebuild(from),
            None => Ok(()),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        match (self.inner.subscription.get(), self.inner.provider.upgrade()) {
            (Some(id), Some(upstream)) => upstream.is_subscribed(id),
            _ => false,
        }
    }

    /// Detaches from the provider; later provider mutations are ignored.
    pub fn unsubscribe(&self) {
        if let Some(id) = self.inner.subscription.take() {
            if let Some(upstream) = self.inner.provider.upgrade() {
                upstream.unsubscribe(id);
            }
        }
    }

    /// Unsubscribes, rebuilds everything from the provider and subscribes
    /// again.
    pub fn reinitialize(&self) -> Result<(), HubError> {
        self.unsubscribe();
        let upstream = self.inner.upstream()?;
        self.rebuild(0)?;
        self.subscribe(&upstream);
        Ok(())
    }
}

impl<F: Indicator> StreamProvider<F::Output> for Hub<F> {
    fn stream_cache(&self) -> &Rc<StreamCache<F::Output>> {
        &self.inner.stream
    }
}

impl<F: Indicator> Drop for Hub<F> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<F: Indicator> fmt::Debug for Hub<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.name())
            .field("len", &self.len())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
