//! Aggregation of quotes into fixed-period bars.
//!
//! A [`QuoteAggregator`] subscribes to a quote provider and publishes one
//! bar per period, so hubs can run on hourly bars while minute quotes
//! stream in. Each quote lands in the bar whose timestamp is the quote's
//! timestamp truncated to the period (counted from the Unix epoch). A bar
//! keeps the first open, the highest high, the lowest low, the latest close
//! and the summed volume of its quotes.
//!
//! Output positions do not line up with provider positions, so the
//! aggregator is its own chain unit rather than a [`Hub`] formula. A quote
//! that lands in the open bar updates it in place; anything earlier
//! rebuilds the bars from the one holding the previous quote.
//!
//! [`Hub`]: crate::domain::hub::Hub

use std::cell::{Cell, Ref};
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{Duration, DurationRound, NaiveDateTime};
use log::{debug, info};

use crate::domain::cache::index_gte;
use crate::domain::error::HubError;
use crate::domain::mutation::Mutation;
use crate::domain::provider::{Observer, StreamCache, StreamProvider, SubscriptionId};
use crate::domain::quote::Quote;

/// Batch reference: the bars `quotes` aggregate into.
pub fn aggregate_quotes(
    quotes: &[Quote],
    period: Duration,
    fill_gaps: bool,
) -> Result<Vec<Quote>, HubError> {
    let spec = BarSpec::new(period, fill_gaps)?;
    let mut bars = Vec::new();
    for quote in quotes {
        spec.fold(&mut bars, None, quote)?;
    }
    Ok(bars)
}

#[derive(Debug, Clone, Copy)]
struct BarSpec {
    period: Duration,
    fill_gaps: bool,
}

impl BarSpec {
    fn new(period: Duration, fill_gaps: bool) -> Result<Self, HubError> {
        if period <= Duration::zero() {
            return Err(HubError::invalid_parameter(
                "QUOTE-AGG",
                "period",
                format!("must be positive, got {period}"),
            ));
        }
        Ok(Self { period, fill_gaps })
    }

    fn bucket(&self, timestamp: NaiveDateTime) -> Result<NaiveDateTime, HubError> {
        timestamp
            .duration_trunc(self.period)
            .map_err(|e| HubError::invalid_parameter("QUOTE-AGG", "period", e.to_string()))
    }

    fn merge(bar: &mut Quote, quote: &Quote) {
        bar.high = bar.high.max(quote.high);
        bar.low = bar.low.min(quote.low);
        bar.close = quote.close;
        bar.volume += quote.volume;
    }

    /// Adds `quote` to the tail of `bars`. `prev` is the bar just before
    /// `bars[0]` when `bars` is a suffix being rebuilt.
    fn fold(
        &self,
        bars: &mut Vec<Quote>,
        prev: Option<&Quote>,
        quote: &Quote,
    ) -> Result<(), HubError> {
        let bucket = self.bucket(quote.timestamp)?;
        if let Some(last) = bars.last_mut() {
            if last.timestamp == bucket {
                Self::merge(last, quote);
                return Ok(());
            }
        }

        if self.fill_gaps {
            if let Some(last) = bars.last().or(prev).cloned() {
                let mut next = last.timestamp + self.period;
                while next < bucket {
                    bars.push(Quote {
                        timestamp: next,
                        open: last.close,
                        high: last.close,
                        low: last.close,
                        close: last.close,
                        volume: 0.0,
                    });
                    next += self.period;
                }
            }
        }
        bars.push(Quote {
            timestamp: bucket,
            ..quote.clone()
        });
        Ok(())
    }
}

struct AggregatorInner {
    provider: Weak<StreamCache<Quote>>,
    stream: Rc<StreamCache<Quote>>,
    spec: BarSpec,
    subscription: Cell<Option<SubscriptionId>>,
}

impl AggregatorInner {
    fn upstream(&self) -> Result<Rc<StreamCache<Quote>>, HubError> {
        self.provider.upgrade().ok_or(HubError::ProviderDropped)
    }

    fn on_append(&self, index: usize) -> Result<(), HubError> {
        let upstream = self.upstream()?;
        let quote = {
            let inputs = upstream.cache();
            inputs.get(index).cloned().ok_or(HubError::IndexOutOfRange {
                index,
                len: inputs.len(),
            })?
        };
        let bucket = self.spec.bucket(quote.timestamp)?;
        let tail = self.stream.cache().last().map(|b| b.timestamp);

        match tail {
            Some(t) if t > bucket => {
                let start = self.replay_from(index)?;
                self.stream.notify(Mutation::Rebuild { index: start })
            }
            Some(t) if t == bucket => {
                let index = {
                    let mut bars = self.stream.cache_mut();
                    let last = bars.len() - 1;
                    BarSpec::merge(&mut bars[last], &quote);
                    last
                };
                self.stream.notify(Mutation::Update { index })
            }
            _ => {
                let fresh = {
                    let bars = self.stream.cache();
                    let mut fresh = Vec::new();
                    self.spec.fold(&mut fresh, bars.last(), &quote)?;
                    fresh
                };
                for bar in fresh {
                    let index = {
                        let mut bars = self.stream.cache_mut();
                        bars.push(bar);
                        bars.len() - 1
                    };
                    self.stream.notify(Mutation::Append { index })?;
                }
                Ok(())
            }
        }
    }

    /// Rebuilds every bar a change at provider position `index` can reach:
    /// from the bar holding the quote at `index - 1`. Returns the first
    /// rebuilt bar position.
    fn replay_from(&self, index: usize) -> Result<usize, HubError> {
        let upstream = self.upstream()?;
        let inputs = upstream.cache();
        let index = index.min(inputs.len());
        let from = match index.checked_sub(1) {
            Some(p) => Some(self.spec.bucket(inputs[p].timestamp)?),
            None => None,
        };

        let committed = self.stream.cache();
        let start = from.map_or(0, |b| index_gte(&*committed, b));
        let first_input = from.map_or(0, |b| index_gte(&*inputs, b));
        let prev = start.checked_sub(1).and_then(|p| committed.get(p));

        let mut staged = Vec::new();
        for quote in &inputs[first_input..] {
            self.spec.fold(&mut staged, prev, quote)?;
        }
        debug!(
            "QUOTE-AGG: rebuilt {} bars from {start} (provider {first_input})",
            staged.len()
        );
        drop(committed);
        drop(inputs);

        let mut bars = self.stream.cache_mut();
        bars.truncate(start);
        bars.extend(staged);
        Ok(start)
    }

    /// Drops the bars that lie wholly before the provider's new head.
    fn on_prune(&self) -> Result<(), HubError> {
        let upstream = self.upstream()?;
        let head = match upstream.cache().first() {
            Some(q) => self.spec.bucket(q.timestamp)?,
            None => return Ok(()),
        };
        let count = {
            let mut bars = self.stream.cache_mut();
            let count = index_gte(&*bars, head);
            bars.drain(..count);
            count
        };
        if count == 0 {
            return Ok(());
        }
        self.stream.notify(Mutation::Prune { count })
    }
}

impl Observer for AggregatorInner {
    fn on_mutation(&self, mutation: Mutation) -> Result<(), HubError> {
        match mutation {
            Mutation::Append { index } => self.on_append(index),
            Mutation::Prune { .. } => self.on_prune(),
            Mutation::Update { index }
            | Mutation::Insert { index }
            | Mutation::Remove { index }
            | Mutation::Rebuild { index } => {
                let start = self.replay_from(index)?;
                self.stream.notify(Mutation::Rebuild { index: start })
            }
        }
    }
}

/// Publishes fixed-period bars built from a quote provider.
///
/// Hubs subscribe to it like to any other provider. Dropping it
/// unsubscribes.
pub struct QuoteAggregator {
    inner: Rc<AggregatorInner>,
}

impl QuoteAggregator {
    /// Aggregates the quotes already present and subscribes to further
    /// changes. With `fill_gaps`, an empty period between two bars becomes
    /// a flat bar at the previous close with zero volume.
    pub fn new<P>(provider: &P, period: Duration, fill_gaps: bool) -> Result<Self, HubError>
    where
        P: StreamProvider<Quote> + ?Sized,
    {
        let upstream = provider.stream_cache();
        let inner = Rc::new(AggregatorInner {
            provider: Rc::downgrade(upstream),
            stream: Rc::new(StreamCache::new(None)),
            spec: BarSpec::new(period, fill_gaps)?,
            subscription: Cell::new(None),
        });
        inner.replay_from(0)?;

        let observer: Weak<dyn Observer> = Rc::downgrade(&inner) as Weak<dyn Observer>;
        inner.subscription.set(Some(upstream.subscribe(observer)));
        let aggregator = Self { inner };
        info!(
            "{}: subscribed with {} bars",
            aggregator.name(),
            aggregator.len()
        );
        Ok(aggregator)
    }

    pub fn name(&self) -> String {
        self.to_string()
    }

    pub fn period(&self) -> Duration {
        self.inner.spec.period
    }

    pub fn fill_gaps(&self) -> bool {
        self.inner.spec.fill_gaps
    }

    /// The bars so far. Like [`Hub::results`], the guard has to be dropped
    /// before the provider is fed again.
    ///
    /// [`Hub::results`]: crate::domain::hub::Hub::results
    pub fn bars(&self) -> Ref<'_, [Quote]> {
        self.inner.stream.cache()
    }

    pub fn len(&self) -> usize {
        self.inner.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-aggregates everything the provider holds and notifies
    /// subscribers.
    pub fn rebuild(&self) -> Result<(), HubError> {
        let start = self.inner.replay_from(0)?;
        self.inner.stream.notify(Mutation::Rebuild { index: start })
    }

    pub fn is_subscribed(&self) -> bool {
        match (self.inner.subscription.get(), self.inner.provider.upgrade()) {
            (Some(id), Some(upstream)) => upstream.is_subscribed(id),
            _ => false,
        }
    }

    pub fn unsubscribe(&self) {
        if let Some(id) = self.inner.subscription.take() {
            if let Some(upstream) = self.inner.provider.upgrade() {
                upstream.unsubscribe(id);
            }
        }
    }
}

impl StreamProvider<Quote> for QuoteAggregator {
    fn stream_cache(&self) -> &Rc<StreamCache<Quote>> {
        &self.inner.stream
    }
}

impl Drop for QuoteAggregator {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Display for QuoteAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QUOTE-AGG({}m", self.period().num_minutes())?;
        if self.fill_gaps() {
            write!(f, ",FILL")?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for QuoteAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuoteAggregator")
            .field("name", &self.name())
            .field("len", &self.len())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
