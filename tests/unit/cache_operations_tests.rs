//! Cache-facing behavior of a `QueryStore`: fresh data served without a
//! refetch, stale data triggering a real fetch, `disableCache` bypassing the
//! table entirely, and `isDataExpired` tracking each entry's own TTL.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reactive_query::abort::AbortHandle;
use reactive_query::coordinator::FetchOptions;
use reactive_query::key::ParamMap;
use reactive_query::options::{BoxFuture, QueryOptions};
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

#[tokio::test(start_paused = true)]
async fn fresh_data_is_served_without_a_second_fetch() {
    let (calls, fetcher) = counting_fetcher();
    let opts: QueryOptions<i32> = QueryOptions::new(fetcher).with_stale_time(Duration::from_secs(60));
    let store = QueryStore::new(opts);

    assert_eq!(store.fetch(None, FetchOptions::default()).await, Some(1));
    assert_eq!(store.fetch(None, FetchOptions::default()).await, Some(1));

    assert_eq!(calls.load(Ordering::SeqCst), 1, "the second call is served from cache");
}

#[tokio::test(start_paused = true)]
async fn stale_data_triggers_a_real_refetch() {
    let (calls, fetcher) = counting_fetcher();
    let opts: QueryOptions<i32> = QueryOptions::new(fetcher).with_stale_time(Duration::from_millis(50));
    let store = QueryStore::new(opts);

    assert_eq!(store.fetch(None, FetchOptions::default()).await, Some(1));

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(store.fetch(None, FetchOptions::default()).await, Some(2));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn disable_cache_bypasses_the_cache_table_entirely() {
    let (calls, fetcher) = counting_fetcher();
    let opts: QueryOptions<i32> = QueryOptions::new(fetcher)
        .with_stale_time(Duration::from_secs(60))
        .with_disable_cache(true);
    let store = QueryStore::new(opts);

    store.fetch(None, FetchOptions::default()).await;
    assert_eq!(store.get_data(), None, "disableCache never serves getData");

    store.fetch(None, FetchOptions::default()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2, "every call refetches with no cache to serve from");
}

#[tokio::test(start_paused = true)]
async fn is_data_expired_flips_once_cache_time_elapses() {
    use reactive_query::options::CacheTimeSource;

    let (_calls, fetcher) = counting_fetcher();
    let opts: QueryOptions<i32> = QueryOptions::new(fetcher)
        .with_cache_time(CacheTimeSource::Constant(Duration::from_millis(50)));
    let store = QueryStore::new(opts);

    store.fetch(None, FetchOptions::default()).await;
    assert!(!store.is_data_expired(None));

    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(store.is_data_expired(None));
}
