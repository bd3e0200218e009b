//! Subscription Manager
//!
//! Tracks `{subscriptionCount, enabled}` plus the `disable_auto_refetching`
//! flag, and emits lifecycle events the coordinator and scheduler react to.
//! No teacher module owns this directly — the teacher registers one observer
//! per `use_query` call (`query/mod.rs`) — so this is generalized from that
//! registration idea into an explicit count with an RAII release guard
//! (spec §4.1/§9), rather than relying on a reactive framework's own mount
//! lifecycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const THROTTLE_WINDOW: Duration = Duration::from_millis(500);

/// Emitted by `subscribe`/`set_enabled`/handle-drop; the coordinator and
/// scheduler key their reactions off these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The first subscriber just attached (count went `0 -> 1`).
    FirstSubscribe,
    /// A subsequent subscriber attached; `should_throttle` is true when the
    /// previous subscribe happened under 500ms ago.
    Subscribe { should_throttle: bool },
    /// The last subscriber just detached (count went `1 -> 0`).
    LastUnsubscribe,
}

struct Inner {
    count: usize,
    enabled: bool,
    last_subscribe_at: Option<Instant>,
}

/// A subscriber-count + enabled-flag tracker. Construct with a listener that
/// receives every `LifecycleEvent`; typically the listener forwards into the
/// fetch coordinator (start the first fetch, cancel timers and abort active
/// fetches once nobody is listening).
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Mutex<Inner>>,
    listener: Arc<dyn Fn(LifecycleEvent) + Send + Sync>,
    pub disable_auto_refetching: bool,
}

impl SubscriptionManager {
    pub fn new(enabled: bool, disable_auto_refetching: bool, listener: impl Fn(LifecycleEvent) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                count: 0,
                enabled,
                last_subscribe_at: None,
            })),
            listener: Arc::new(listener),
            disable_auto_refetching,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().count
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscription_count() > 0
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Attach a subscriber. Returns a handle whose `Drop` releases it.
    pub fn subscribe(&self, now: Instant) -> SubscriptionHandle {
        let event = {
            let mut inner = self.inner.lock();
            inner.count += 1;
            let event = if inner.count == 1 {
                LifecycleEvent::FirstSubscribe
            } else {
                let should_throttle = inner
                    .last_subscribe_at
                    .map(|last| now.duration_since(last) < THROTTLE_WINDOW)
                    .unwrap_or(false);
                LifecycleEvent::Subscribe { should_throttle }
            };
            inner.last_subscribe_at = Some(now);
            event
        };
        (self.listener)(event);
        SubscriptionHandle {
            inner: self.inner.clone(),
            listener: self.listener.clone(),
            released: false,
        }
    }

    /// Set `enabled`. On `false -> true` with subscribers already attached,
    /// emits `FirstSubscribe` so the coordinator kicks off a fetch just as if
    /// a subscriber had just mounted. On `true -> false`, emits nothing — the
    /// coordinator observes `state.enabled` directly instead.
    pub fn set_enabled(&self, value: bool) -> Option<LifecycleEvent> {
        let mut inner = self.inner.lock();
        let was_enabled = inner.enabled;
        inner.enabled = value;
        if !was_enabled && value && inner.count > 0 {
            drop(inner);
            let event = LifecycleEvent::FirstSubscribe;
            (self.listener)(event);
            Some(event)
        } else {
            None
        }
    }
}

/// RAII release guard returned by `subscribe()`. Dropping it decrements the
/// subscriber count and, if that drops the count to zero, emits
/// `LastUnsubscribe` — teardown cannot be forgotten by a caller that simply
/// drops the guard.
pub struct SubscriptionHandle {
    inner: Arc<Mutex<Inner>>,
    listener: Arc<dyn Fn(LifecycleEvent) + Send + Sync>,
    released: bool,
}

impl SubscriptionHandle {
    /// Release early instead of waiting for drop. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let hit_zero = {
            let mut inner = self.inner.lock();
            inner.count = inner.count.saturating_sub(1);
            inner.count == 0
        };
        if hit_zero {
            (self.listener)(LifecycleEvent::LastUnsubscribe);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_manager() -> (SubscriptionManager, Arc<Mutex<Vec<LifecycleEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let manager = SubscriptionManager::new(true, false, move |event| {
            events_clone.lock().push(event);
        });
        (manager, events)
    }

    #[test]
    fn first_subscribe_emits_first_subscribe() {
        let (manager, events) = counting_manager();
        let _h = manager.subscribe(Instant::now());
        assert_eq!(events.lock().as_slice(), &[LifecycleEvent::FirstSubscribe]);
        assert_eq!(manager.subscription_count(), 1);
    }

    #[test]
    fn second_subscribe_reports_throttle_state() {
        let (manager, events) = counting_manager();
        let now = Instant::now();
        let _h1 = manager.subscribe(now);
        let _h2 = manager.subscribe(now + Duration::from_millis(10));
        assert_eq!(
            events.lock()[1],
            LifecycleEvent::Subscribe { should_throttle: true }
        );
    }

    #[test]
    fn second_subscribe_past_window_is_not_throttled() {
        let (manager, events) = counting_manager();
        let now = Instant::now();
        let _h1 = manager.subscribe(now);
        let _h2 = manager.subscribe(now + Duration::from_millis(600));
        assert_eq!(
            events.lock()[1],
            LifecycleEvent::Subscribe { should_throttle: false }
        );
    }

    #[test]
    fn dropping_last_handle_emits_last_unsubscribe() {
        let (manager, events) = counting_manager();
        let now = Instant::now();
        let h1 = manager.subscribe(now);
        let h2 = manager.subscribe(now);
        drop(h1);
        assert_eq!(manager.subscription_count(), 1);
        drop(h2);
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(events.lock().last(), Some(&LifecycleEvent::LastUnsubscribe));
    }

    #[test]
    fn enabling_with_existing_subscribers_emits_first_subscribe_equivalent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let manager = SubscriptionManager::new(false, false, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let _h = manager.subscribe(Instant::now());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "subscribe itself emits");

        let event = manager.set_enabled(true);
        assert_eq!(event, Some(LifecycleEvent::FirstSubscribe));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabling_emits_nothing() {
        let (manager, events) = counting_manager();
        let _h = manager.subscribe(Instant::now());
        let before = events.lock().len();
        let event = manager.set_enabled(false);
        assert!(event.is_none());
        assert_eq!(events.lock().len(), before);
    }

    #[test]
    fn release_is_idempotent() {
        let (manager, events) = counting_manager();
        let mut h = manager.subscribe(Instant::now());
        h.release();
        h.release();
        assert_eq!(
            events.lock().iter().filter(|e| **e == LifecycleEvent::LastUnsubscribe).count(),
            1
        );
    }
}
