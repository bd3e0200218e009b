//! Clock & Timers
//!
//! A monotonic `now()` plus cancelable one-shot timers, abstracted behind a
//! trait so tests can drive virtual time with `tokio::time::pause()` while
//! the rest of the engine stays oblivious to wall-clock vs. paused-clock
//! semantics.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// Source of monotonic time for the engine. The default implementation
/// delegates to `tokio::time::Instant`, which transparently respects
/// `tokio::time::pause()`/`advance()` in tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Real-time clock backed by tokio's timer wheel.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// A single pending timer. Dropping the handle cancels the timer; the
/// coordinator relies on this to implement "always null-check-and-clear
/// before assignment" (spec §9) simply by overwriting the slot.
pub struct TimerHandle {
    cancel: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TimerHandle {
    /// Cancel the timer. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Schedule `callback` to run after `delay` unless the returned handle is
/// cancelled or dropped first. The callback receives no arguments; callers
/// close over whatever state they need (mirrors the teacher's pattern of
/// boxing a closure per scheduled refetch).
pub fn schedule<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                callback().await;
            }
            _ = rx => {
                tracing::trace!(?delay, "timer cancelled before firing");
            }
        }
    });
    TimerHandle { cancel: Some(tx) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let _handle = schedule(Duration::from_millis(50), move || {
            Box::pin(async move {
                fired_clone.store(true, Ordering::SeqCst);
            })
        });

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cancels_timer() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let handle = schedule(Duration::from_millis(50), move || {
            Box::pin(async move {
                fired_clone.store(true, Ordering::SeqCst);
            })
        });
        drop(handle);

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
