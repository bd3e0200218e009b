//! Subscriber lifecycle: the first subscriber triggers an initial fetch, the
//! last one tears down any pending refetch timer, enabling a disabled query
//! with subscribers already attached kicks off a fetch just as a fresh first
//! subscriber would, and a subscribe past the throttle window gets its own
//! fetch rather than being folded into the previous one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reactive_query::abort::AbortHandle;
use reactive_query::key::ParamMap;
use reactive_query::options::{BoxFuture, QueryOptions};
use reactive_query::params::{Cell, EnabledSource};
use reactive_query::query::QueryStore;

fn counting_fetcher() -> (
    Arc<AtomicU32>,
    impl Fn(ParamMap, AbortHandle) -> BoxFuture<'static, reactive_query::error::Result<i32>> + Send + Sync,
) {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let fetcher = move |_params: ParamMap, _abort: AbortHandle| {
        let calls = calls_clone.clone();
        Box::pin(async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n as i32)
        }) as BoxFuture<'static, reactive_query::error::Result<i32>>
    };
    (calls, fetcher)
}

async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn first_subscribe_triggers_initial_fetch() {
    let (calls, fetcher) = counting_fetcher();
    let opts: QueryOptions<i32> = QueryOptions::new(fetcher);
    let store = Arc::new(QueryStore::new(opts));

    let _sub = store.subscribe(|_state| {});
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.get_status().is_success);
    assert_eq!(store.get_data(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn last_unsubscribe_cancels_pending_refetch_timer() {
    let (calls, fetcher) = counting_fetcher();
    let opts: QueryOptions<i32> = QueryOptions::new(fetcher).with_stale_time(Duration::from_millis(50));
    let store = Arc::new(QueryStore::new(opts));

    let sub = store.subscribe(|_state| {});
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop(sub);
    tokio::time::advance(Duration::from_millis(200)).await;
    settle().await;

    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "no subscribers remain to receive the scheduled refetch"
    );
}

#[tokio::test(start_paused = true)]
async fn enabling_a_disabled_query_with_subscribers_triggers_fetch() {
    let (calls, fetcher) = counting_fetcher();
    let enabled_cell = Cell::new(false);
    let opts: QueryOptions<i32> =
        QueryOptions::new(fetcher).with_enabled(EnabledSource::Reactive(Arc::new(enabled_cell.clone())));
    let store = Arc::new(QueryStore::new(opts));

    let _sub = store.subscribe(|_state| {});
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0, "a disabled query never auto-fetches");

    enabled_cell.set(true);
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.get_status().is_success);
}

#[tokio::test(start_paused = true)]
async fn second_subscribe_past_throttle_window_triggers_another_fetch() {
    let (calls, fetcher) = counting_fetcher();
    let opts: QueryOptions<i32> = QueryOptions::new(fetcher);
    let store = Arc::new(QueryStore::new(opts));

    let sub1 = store.subscribe(|_state| {});
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(600)).await;
    let sub2 = store.subscribe(|_state| {});
    settle().await;

    assert_eq!(
        calls.load(Ordering::SeqCst),
        2,
        "subscribing again past the throttle window gets its own fetch"
    );
    drop(sub1);
    drop(sub2);
}
