//! Abort Handle
//!
//! A one-shot cancellation token shared with the fetcher. Abort is
//! cooperative: the coordinator flips the handle, and a fetcher that
//! observes it (via `AbortHandle::is_aborted` or by racing
//! `AbortHandle::aborted()`) is expected to resolve quickly. The sentinel
//! `Error::Abort` is what the coordinator treats as "no-op completion".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared cancellation token passed to the fetcher alongside its params.
#[derive(Clone)]
pub struct AbortHandle {
    inner: Arc<Inner>,
}

struct Inner {
    aborted: AtomicBool,
    notify: Notify,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Flip the handle and wake anyone racing `aborted()`. Idempotent.
    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once `abort()` has been called. A fetcher (or the
    /// coordinator, via `run_with_abort`) races this against the real work.
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// Race `future` against the abort handle. Returns `Err(Error::Abort)` if the
/// handle fires first, matching the "sentinel `ABORT_ERROR`" semantics of
/// spec §4.3 step 2 without requiring every user fetcher to poll the handle
/// itself.
pub async fn run_with_abort<F, T>(handle: &AbortHandle, future: F) -> crate::error::Result<T>
where
    F: std::future::Future<Output = crate::error::Result<T>>,
{
    tokio::select! {
        biased;
        _ = handle.aborted() => Err(crate::error::Error::Abort),
        result = future => result,
    }
}
