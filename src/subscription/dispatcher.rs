// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event fan-out to subscriptions.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::SubscriptionConf;
use crate::error::SubscriptionError;
use crate::event::Event;
use crate::pool::{Pool, PoolSlot};
use crate::stats::HubStats;

/// State shared between a [`Subscription`] handle and the dispatcher.
struct SubShared {
    id: u64,
    conf: SubscriptionConf,
    subscribed: AtomicBool,
    queue: Mutex<VecDeque<Event>>,
    wakeup: Notify,
    slot: Mutex<Option<PoolSlot>>,
}

impl SubShared {
    /// Queues `event` unless the subscription was closed meanwhile.
    fn push(&self, event: &Event) -> bool {
        let mut queue = self.queue.lock();
        // Checked under the queue lock so that unsubscribe's drain sees
        // every event pushed before the flag flipped.
        if !self.subscribed.load(Ordering::Acquire) {
            return false;
        }
        queue.push_back(event.clone());
        true
    }
}

/// Fans events out to the subscriptions whose filters accept them.
///
/// The subscription list has its own lock, held only to add, remove or
/// snapshot entries. Filters and hooks always run with no dispatcher lock
/// held, so they may subscribe, unsubscribe or wait themselves.
pub struct Dispatcher {
    subs: Mutex<Vec<Arc<SubShared>>>,
    pool: Pool,
    stats: Arc<HubStats>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher accepting at most `capacity` live subscriptions.
    #[must_use]
    pub fn new(capacity: usize, stats: Arc<HubStats>) -> Self {
        Self {
            subs: Mutex::new(Vec::with_capacity(capacity)),
            pool: Pool::new("subscription", capacity),
            stats,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the subscription pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    /// Returns true if there is no live subscription.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidConfig`] if `conf` does not
    /// validate and [`SubscriptionError::PoolExhausted`] when the
    /// subscription pool is full.
    pub fn subscribe(
        self: &Arc<Self>,
        conf: SubscriptionConf,
    ) -> Result<Subscription, SubscriptionError> {
        conf.validate()?;

        let slot = self.pool.try_acquire().map_err(|_| {
            self.stats.record_subscription_refused();
            SubscriptionError::PoolExhausted
        })?;

        let shared = Arc::new(SubShared {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            conf,
            subscribed: AtomicBool::new(true),
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            slot: Mutex::new(Some(slot)),
        });
        self.subs.lock().push(Arc::clone(&shared));

        tracing::debug!(subscription = shared.id, "subscribed");
        Ok(Subscription {
            shared,
            dispatcher: Arc::clone(self),
        })
    }

    /// Queues `event` to every matching subscription.
    ///
    /// Returns the number of subscriptions the event was queued to.
    pub fn notify(&self, event: &Event) -> usize {
        let snapshot: Vec<Arc<SubShared>> = self.subs.lock().clone();

        let mut matched = 0;
        for sub in snapshot {
            if !sub.subscribed.load(Ordering::Acquire) || !sub.conf.matches(event) {
                continue;
            }
            if !sub.push(event) {
                continue;
            }
            matched += 1;
            sub.wakeup.notify_waiters();
            if let Some(hook) = sub.conf.on_queued() {
                hook(event);
            }
        }
        matched
    }

    fn unsubscribe(&self, shared: &SubShared) {
        if !shared.subscribed.swap(false, Ordering::AcqRel) {
            return;
        }

        self.subs.lock().retain(|s| s.id != shared.id);

        let drained: Vec<Event> = shared.queue.lock().drain(..).collect();
        if !drained.is_empty() {
            tracing::warn!(
                subscription = shared.id,
                count = drained.len(),
                "unsubscribed with events still queued, releasing them"
            );
        }
        drop(drained);

        drop(shared.slot.lock().take());
        shared.wakeup.notify_waiters();
        tracing::debug!(subscription = shared.id, "unsubscribed");
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscriptions", &self.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// A live subscription: a FIFO queue of matching events.
///
/// Dropping the handle unsubscribes. Events still queued at that point are
/// released.
pub struct Subscription {
    shared: Arc<SubShared>,
    dispatcher: Arc<Dispatcher>,
}

impl Subscription {
    /// Returns an id unique within the dispatcher.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Returns false once unsubscribed.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.shared.subscribed.load(Ordering::Acquire)
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Pops the oldest queued event without waiting.
    #[must_use]
    pub fn try_next(&self) -> Option<Event> {
        self.shared.queue.lock().pop_front()
    }

    /// Waits for the next event.
    ///
    /// With `None` waits until an event arrives or the subscription is
    /// closed. Returns `None` on timeout or once unsubscribed.
    pub async fn wait(&self, timeout: Option<Duration>) -> Option<Event> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.next()).await.ok().flatten(),
            None => self.next().await,
        }
    }

    async fn next(&self) -> Option<Event> {
        loop {
            let notified = self.shared.wakeup.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            if let Some(event) = self.try_next() {
                return Some(event);
            }
            if !self.is_subscribed() {
                return None;
            }
            notified.await;
        }
    }

    /// Closes the subscription.
    ///
    /// Queued events are released, the pool slot is returned and blocked
    /// waiters return `None`. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        self.dispatcher.unsubscribe(&self.shared);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("subscribed", &self.is_subscribed())
            .field("pending", &self.pending())
            .field("conf", &self.shared.conf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::event::{EventAlloc, EventKind};

    fn dispatcher(capacity: usize) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(capacity, Arc::new(HubStats::new())))
    }

    fn event(alloc: &EventAlloc, kind: EventKind, timestamp: u32) -> Event {
        alloc.alloc(kind).unwrap().timestamp(timestamp).freeze()
    }

    #[test]
    fn matching_by_kind() {
        let disp = dispatcher(4);
        let alloc = EventAlloc::new(4, 0);
        let data = disp
            .subscribe(SubscriptionConf::new().with_event_kind(EventKind::Data))
            .unwrap();
        let all = disp.subscribe(SubscriptionConf::new()).unwrap();

        assert_eq!(disp.notify(&event(&alloc, EventKind::Command, 1)), 1);
        assert_eq!(disp.notify(&event(&alloc, EventKind::Data, 2)), 2);
        assert_eq!(data.pending(), 1);
        assert_eq!(all.pending(), 2);
        assert_eq!(all.try_next().unwrap().kind(), EventKind::Command);
    }

    #[test]
    fn pool_exhaustion_is_counted() {
        let stats = Arc::new(HubStats::new());
        let disp = Arc::new(Dispatcher::new(1, Arc::clone(&stats)));
        let first = disp.subscribe(SubscriptionConf::new()).unwrap();
        assert!(matches!(
            disp.subscribe(SubscriptionConf::new()),
            Err(SubscriptionError::PoolExhausted)
        ));
        assert_eq!(stats.counters().sub_no_mem, 1);

        drop(first);
        assert!(disp.subscribe(SubscriptionConf::new()).is_ok());
    }

    #[test]
    fn unsubscribe_is_idempotent_and_drains() {
        let disp = dispatcher(2);
        let alloc = EventAlloc::new(4, 0);
        let sub = disp.subscribe(SubscriptionConf::new()).unwrap();
        disp.notify(&event(&alloc, EventKind::Data, 1));
        disp.notify(&event(&alloc, EventKind::Data, 2));
        assert_eq!(alloc.pool().in_use(), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_subscribed());
        assert_eq!(sub.pending(), 0);
        assert_eq!(alloc.pool().in_use(), 0);
        assert_eq!(disp.pool().in_use(), 0);
        assert!(disp.is_empty());

        assert_eq!(disp.notify(&event(&alloc, EventKind::Data, 3)), 0);
    }

    #[test]
    fn hook_may_reenter_the_dispatcher() {
        let disp = dispatcher(4);
        let alloc = EventAlloc::new(4, 0);
        let calls = Arc::new(AtomicUsize::new(0));

        let reentrant = {
            let disp = Arc::clone(&disp);
            let calls = Arc::clone(&calls);
            SubscriptionConf::new().with_on_queued(move |_| {
                // Would deadlock if the list lock were held here.
                calls.fetch_add(disp.len(), Ordering::Relaxed);
            })
        };
        let _sub = disp.subscribe(reentrant).unwrap();

        assert_eq!(disp.notify(&event(&alloc, EventKind::Data, 1)), 1);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn filter_runs_after_cheap_criteria() {
        let disp = dispatcher(2);
        let alloc = EventAlloc::new(4, 0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let _sub = disp
            .subscribe(
                SubscriptionConf::new()
                    .with_event_kind(EventKind::Data)
                    .with_filter(move |e: &Event| {
                        counted.fetch_add(1, Ordering::Relaxed);
                        e.timestamp() % 2 == 0
                    }),
            )
            .unwrap();

        disp.notify(&event(&alloc, EventKind::Command, 2));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(disp.notify(&event(&alloc, EventKind::Data, 3)), 0);
        assert_eq!(disp.notify(&event(&alloc, EventKind::Data, 4)), 1);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let disp = dispatcher(1);
        let sub = disp.subscribe(SubscriptionConf::new()).unwrap();
        let start = tokio::time::Instant::now();
        assert!(sub.wait(Some(Duration::from_millis(100))).await.is_none());
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn wait_returns_queued_event() {
        let disp = dispatcher(1);
        let alloc = EventAlloc::new(1, 0);
        let sub = disp.subscribe(SubscriptionConf::new()).unwrap();
        disp.notify(&event(&alloc, EventKind::Data, 42));
        let got = sub.wait(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(got.timestamp(), 42);
    }

    #[tokio::test]
    async fn unsubscribe_wakes_waiter() {
        let disp = dispatcher(1);
        let sub = Arc::new(disp.subscribe(SubscriptionConf::new()).unwrap());

        let waiter = {
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { sub.wait(None).await })
        };
        tokio::task::yield_now().await;
        sub.unsubscribe();

        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn producer_wakes_waiter() {
        let disp = dispatcher(1);
        let alloc = EventAlloc::new(1, 0);
        let sub = Arc::new(disp.subscribe(SubscriptionConf::new()).unwrap());

        let waiter = {
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { sub.wait(None).await.map(|e| e.timestamp()) })
        };
        tokio::task::yield_now().await;
        disp.notify(&event(&alloc, EventKind::Data, 7));

        assert_eq!(waiter.await.unwrap(), Some(7));
    }
}
