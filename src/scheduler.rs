//! Scheduler
//!
//! Owns the single refetch/retry timer slot and the delay computation for
//! both (spec §4.4, §9 "timer identity"). Generalizes the teacher's
//! `retry/mod.rs` backoff-delay math into a shared slot that a refetch and a
//! retry both contend for — scheduling either replaces whatever was pending.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock;

/// Effective stale time for scheduling purposes: finite or unbounded.
#[derive(Clone, Copy, Debug)]
pub enum EffectiveDuration {
    Finite(Duration),
    Infinite,
}

/// Compute the delay until the next automatic refetch (spec §4.4). `None`
/// means "do not schedule" (auto-refetch disabled, or stale time is zero or
/// unbounded).
pub fn compute_refetch_delay(
    disable_auto_refetching: bool,
    stale_time: EffectiveDuration,
    last_fetched_at: Option<Instant>,
    now: Instant,
) -> Option<Duration> {
    if disable_auto_refetching {
        return None;
    }
    let stale_time = match stale_time {
        EffectiveDuration::Infinite => return None,
        EffectiveDuration::Finite(d) if d.is_zero() => return None,
        EffectiveDuration::Finite(d) => d,
    };
    let delay = match last_fetched_at {
        Some(ts) => stale_time.saturating_sub(now.duration_since(ts)),
        None => stale_time,
    };
    Some(delay)
}

/// The shared refetch/retry timer slot. A retry timer and a refetch timer
/// never coexist: scheduling one cancels whatever was pending, matching
/// `activeRefetchTimer` in spec §3/§9.
#[derive(Default)]
pub struct Scheduler {
    timer: Mutex<Option<clock::TimerHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending timer. Called on `onLastUnsubscribe`, `reset()`,
    /// `setEnabled(false)`, and before scheduling a new one (spec §4.4).
    pub fn cancel(&self) {
        self.timer.lock().take();
    }

    pub fn has_pending(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Replace the pending timer with a new one firing `callback` after
    /// `delay`. The previous handle (if any) is dropped, which cancels it.
    pub fn schedule<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static,
    {
        let handle = clock::schedule(delay, callback);
        *self.timer.lock() = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn disabled_auto_refetch_never_schedules() {
        let delay = compute_refetch_delay(true, EffectiveDuration::Finite(Duration::from_secs(1)), None, Instant::now());
        assert!(delay.is_none());
    }

    #[test]
    fn zero_stale_time_never_schedules() {
        let delay = compute_refetch_delay(false, EffectiveDuration::Finite(Duration::ZERO), None, Instant::now());
        assert!(delay.is_none());
    }

    #[test]
    fn infinite_stale_time_never_schedules() {
        let delay = compute_refetch_delay(false, EffectiveDuration::Infinite, None, Instant::now());
        assert!(delay.is_none());
    }

    #[test]
    fn missing_last_fetched_at_schedules_full_stale_time() {
        let delay = compute_refetch_delay(false, EffectiveDuration::Finite(Duration::from_secs(10)), None, Instant::now());
        assert_eq!(delay, Some(Duration::from_secs(10)));
    }

    #[test]
    fn partially_elapsed_stale_time_schedules_remainder() {
        let base = Instant::now();
        let delay = compute_refetch_delay(
            false,
            EffectiveDuration::Finite(Duration::from_secs(10)),
            Some(base),
            base + Duration::from_secs(4),
        );
        assert_eq!(delay, Some(Duration::from_secs(6)));
    }

    #[test]
    fn overdue_stale_time_saturates_to_zero() {
        let base = Instant::now();
        let delay = compute_refetch_delay(
            false,
            EffectiveDuration::Finite(Duration::from_secs(10)),
            Some(base),
            base + Duration::from_secs(40),
        );
        assert_eq!(delay, Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduling_replaces_pending_timer() {
        let scheduler = Scheduler::new();
        let fire_count = Arc::new(AtomicUsize::new(0));

        let c1 = fire_count.clone();
        scheduler.schedule(Duration::from_millis(50), move || {
            Box::pin(async move { c1.fetch_add(1, Ordering::SeqCst); })
        });

        let c2 = fire_count.clone();
        scheduler.schedule(Duration::from_millis(50), move || {
            Box::pin(async move { c2.fetch_add(1, Ordering::SeqCst); })
        });

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(fire_count.load(Ordering::SeqCst), 1, "only the second schedule should fire");
    }

    #[test]
    fn cancel_clears_pending_state() {
        let scheduler = Scheduler::new();
        scheduler.schedule(Duration::from_secs(60), || Box::pin(async {}));
        assert!(scheduler.has_pending());
        scheduler.cancel();
        assert!(!scheduler.has_pending());
    }
}
