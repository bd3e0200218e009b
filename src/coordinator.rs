//! Fetch Coordinator
//!
//! The state machine coupling fetch, cache, retry, abort, and scheduling
//! (spec §4.3). This is the engine's core; the teacher splits the same
//! responsibilities across `client/mod.rs` (dedup + state mutation),
//! `retry/mod.rs` (backoff), and `dedup/mod.rs` (in-flight promise sharing).
//! Here they are unified behind one coordinator because spec §5 makes the
//! single-flight/abort/retry interplay one invariant-bearing unit rather
//! than three independently composable ones.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;

use crate::abort::{run_with_abort, AbortHandle};
use crate::clock::Clock;
use crate::error::Error;
use crate::key::{query_key, ParamMap};
use crate::options::QueryOptions;
use crate::params::ParameterResolver;
use crate::scheduler::{compute_refetch_delay, EffectiveDuration, Scheduler};
use crate::store::{QueryState, StateStore, Status};
use crate::subscription::{LifecycleEvent, SubscriptionManager};

type SharedFetch<D> = Shared<Pin<Box<dyn Future<Output = Option<D>> + Send>>>;

/// Per-call overrides for `fetch()` (spec §4.3).
#[derive(Clone, Copy, Debug, Default)]
pub struct FetchOptions {
    pub force: bool,
    pub stale_time_override: Option<Duration>,
    pub cache_time_override: Option<Duration>,
    pub skip_store_updates: bool,
}

impl FetchOptions {
    pub fn forced() -> Self {
        Self { force: true, ..Default::default() }
    }

    pub fn probe() -> Self {
        Self { skip_store_updates: true, ..Default::default() }
    }
}

/// `getStatus()` (spec §6): derived from `status` and whether the current
/// key has ever completed a successful fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedStatus {
    pub is_error: bool,
    pub is_fetching: bool,
    pub is_idle: bool,
    pub is_initial_loading: bool,
    pub is_success: bool,
}

struct ActiveFetch<D> {
    key: String,
    shared: SharedFetch<D>,
}

/// Transient, non-observable coordinator state (spec §3's "Ownership"):
/// never persisted, never exposed through `QueryState`.
struct CoordinatorActive<D> {
    abort_handle: Option<AbortHandle>,
    fetch: Option<ActiveFetch<D>>,
    last_fetch_key: Option<String>,
}

impl<D> Default for CoordinatorActive<D> {
    fn default() -> Self {
        Self { abort_handle: None, fetch: None, last_fetch_key: None }
    }
}

/// The engine core. `R` is the fetcher's raw return type, `D` the
/// cached/observed type. When no `transform` is configured, `R` must convert
/// into `D` via `Into` — trivially satisfied when a caller simply sets
/// `R = D`.
pub struct FetchCoordinator<R, D> {
    options: QueryOptions<R, D>,
    store: Arc<dyn StateStore<QueryState<D>>>,
    scheduler: Scheduler,
    subscription: SubscriptionManager,
    resolver: ParameterResolver,
    clock: Arc<dyn Clock>,
    active: Mutex<CoordinatorActive<D>>,
}

impl<R, D> FetchCoordinator<R, D>
where
    R: Into<D> + Send + 'static,
    D: Clone + Send + Sync + 'static,
{
    pub fn new(
        options: QueryOptions<R, D>,
        store: Arc<dyn StateStore<QueryState<D>>>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        options.validate();
        let resolver = ParameterResolver::new(options.params.clone(), options.enabled.clone());
        let initial_enabled = resolver.resolve_enabled();
        let disable_auto_refetching = options.disable_auto_refetching;

        let coordinator = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak_for_sub = weak.clone();
            let subscription = SubscriptionManager::new(initial_enabled, disable_auto_refetching, move |event| {
                if let Some(c) = weak_for_sub.upgrade() {
                    c.handle_lifecycle_event(event);
                }
            });
            Self {
                options,
                store,
                scheduler: Scheduler::new(),
                subscription,
                resolver,
                clock,
                active: Mutex::new(CoordinatorActive::default()),
            }
        });

        let weak_for_params = Arc::downgrade(&coordinator);
        let weak_for_enabled = Arc::downgrade(&coordinator);
        coordinator.resolver.bind(
            move |new_params| {
                if let Some(c) = weak_for_params.upgrade() {
                    c.handle_param_change(new_params);
                }
            },
            move |enabled| {
                if let Some(c) = weak_for_enabled.upgrade() {
                    c.handle_enabled_change(enabled);
                }
            },
        );

        coordinator
    }

    pub fn subscription_manager(&self) -> &SubscriptionManager {
        &self.subscription
    }

    pub fn resolver(&self) -> &ParameterResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn StateStore<QueryState<D>>> {
        &self.store
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    fn is_enabled(&self) -> bool {
        self.store.get_state().enabled
    }

    pub fn enabled(&self) -> bool {
        self.is_enabled()
    }

    pub fn query_key(&self) -> String {
        self.store.get_state().query_key
    }

    /// `getData` (spec §4.5).
    pub fn get_data(&self) -> Option<D> {
        if self.options.disable_cache {
            return None;
        }
        let now = self.clock.now();
        let state = self.store.get_state();
        if self.options.keep_previous_data {
            state.query_cache.get_data_ignoring_expiry(&state.query_key)
        } else {
            state.query_cache.get_fresh_data(&state.query_key, now)
        }
    }

    /// `getStatus()` (spec §6).
    pub fn get_status(&self) -> DerivedStatus {
        let state = self.store.get_state();
        let has_fetched = if self.options.disable_cache {
            state.last_fetched_at.is_some()
        } else {
            state
                .query_cache
                .get(&state.query_key)
                .and_then(|e| e.last_fetched_at)
                .is_some()
        };
        DerivedStatus {
            is_error: state.status == Status::Error,
            is_fetching: state.status == Status::Loading,
            is_idle: state.status == Status::Idle,
            is_initial_loading: state.status == Status::Loading && !has_fetched,
            is_success: state.status == Status::Success,
        }
    }

    /// `isStale(override?)` (spec §4.5).
    pub fn is_stale(&self, override_stale_time: Option<Duration>) -> bool {
        let stale_time = override_stale_time.unwrap_or(self.options.stale_time);
        let now = self.clock.now();
        let state = self.store.get_state();
        if self.options.disable_cache {
            match state.last_fetched_at {
                Some(ts) => now.duration_since(ts) >= stale_time,
                None => true,
            }
        } else {
            match state.query_cache.get(&state.query_key) {
                Some(entry) => entry.is_stale(now, stale_time),
                None => true,
            }
        }
    }

    /// `isDataExpired(override?)` (spec §4.5).
    pub fn is_data_expired(&self, override_cache_time: Option<Duration>) -> bool {
        let now = self.clock.now();
        let state = self.store.get_state();
        match state.query_cache.get(&state.query_key) {
            Some(entry) => {
                let cache_time = override_cache_time.unwrap_or(entry.cache_time);
                entry.last_fetched_at.map(|ts| now.duration_since(ts) > cache_time).unwrap_or(true)
            }
            None => true,
        }
    }

    /// `fetch(params?, options?)` (spec §4.3). Never rejects; errors are
    /// funneled into `state.error`.
    #[tracing::instrument(skip(self, params), fields(debug_mode = self.options.debug_mode))]
    pub async fn fetch(self: &Arc<Self>, params: Option<ParamMap>, opts: FetchOptions) -> Option<D> {
        let now = self.clock.now();

        if !opts.force && !self.is_enabled() {
            return None;
        }

        let effective_params = params.unwrap_or_else(|| self.resolver.resolve());
        let current_key = query_key(&effective_params);

        if !opts.force {
            let maybe_shared = {
                let active = self.active.lock();
                active
                    .fetch
                    .as_ref()
                    .filter(|f| f.key == current_key)
                    .map(|f| f.shared.clone())
            };
            if let Some(shared) = maybe_shared {
                tracing::debug!(query_key = %current_key, "in-flight dedup hit");
                return shared.await;
            }
        }

        if self.options.abort_interrupted_fetches && !opts.skip_store_updates {
            self.abort_active_fetch();
        }

        if !opts.force {
            if let Some(result) = self.try_serve_fresh(&current_key, &effective_params, &opts, now) {
                return result;
            }
        }

        if !opts.skip_store_updates {
            let key_for_state = current_key.clone();
            self.store.set_state(Box::new(move |s| {
                s.status = Status::Loading;
                s.error = None;
                s.query_key = key_for_state;
            }));
        }

        let coordinator = self.clone();
        let params_for_op = effective_params.clone();
        let key_for_op = current_key.clone();
        let opts_for_op = opts;
        let future: Pin<Box<dyn Future<Output = Option<D>> + Send>> = Box::pin(async move {
            coordinator.run_fetch_operation(params_for_op, key_for_op, opts_for_op).await
        });
        let shared = future.shared();

        if !opts.skip_store_updates {
            self.active.lock().fetch = Some(ActiveFetch { key: current_key, shared: shared.clone() });
        }

        shared.await
    }

    /// Step 5 of the decision tree: serve cached data without fetching when
    /// it's fresh and has no unresolved error. Returns `None` when the
    /// caller should fall through to an actual fetch.
    fn try_serve_fresh(
        self: &Arc<Self>,
        key: &str,
        params: &ParamMap,
        opts: &FetchOptions,
        now: Instant,
    ) -> Option<Option<D>> {
        let stale_time = opts.stale_time_override.unwrap_or(self.options.stale_time);
        let state = self.store.get_state();
        let max_retries = self.options.max_retries;

        let (is_fresh, unresolved_error) = if self.options.disable_cache {
            let fresh = state
                .last_fetched_at
                .map(|ts| now.duration_since(ts) < stale_time)
                .unwrap_or(false);
            (fresh, false)
        } else {
            match state.query_cache.get(key) {
                Some(entry) => {
                    let fresh = entry
                        .last_fetched_at
                        .map(|ts| now.duration_since(ts) < stale_time)
                        .unwrap_or(false);
                    (fresh, entry.has_unresolved_error(max_retries))
                }
                None => (false, false),
            }
        };

        if !is_fresh || unresolved_error {
            return None;
        }

        if !self.options.disable_auto_refetching && !stale_time.is_zero() && !self.scheduler.has_pending() {
            self.schedule_next_fetch(params.clone(), now);
        }

        if self.options.keep_previous_data && state.query_key != key {
            let key_owned = key.to_string();
            self.store.set_state(Box::new(move |s| s.query_key = key_owned));
        }

        let data = if self.options.disable_cache {
            None
        } else if self.options.keep_previous_data {
            state.query_cache.get_data_ignoring_expiry(key)
        } else {
            state.query_cache.get_fresh_data(key, now)
        };

        Some(data)
    }

    async fn run_fetch_operation(self: Arc<Self>, params: ParamMap, key: String, opts: FetchOptions) -> Option<D> {
        let abort_handle = if self.options.abort_interrupted_fetches && !opts.skip_store_updates {
            let handle = AbortHandle::new();
            self.active.lock().abort_handle = Some(handle.clone());
            Some(handle)
        } else {
            None
        };

        let fetch_future = (self.options.fetcher)(params.clone(), abort_handle.clone().unwrap_or_default());
        let raw_result = match &abort_handle {
            Some(handle) => run_with_abort(handle, fetch_future).await,
            None => fetch_future.await,
        };

        let raw = match raw_result {
            Ok(raw) => raw,
            Err(e) if e.is_abort() => {
                tracing::debug!(query_key = %key, "fetch aborted, no-op completion");
                self.clear_active_fetch_if_matching(&key, &opts);
                return None;
            }
            Err(e) => {
                self.handle_fetch_error(e, &params, &key, &opts, self.clock.now());
                self.clear_active_fetch_if_matching(&key, &opts);
                return None;
            }
        };

        let data: D = match &self.options.transform {
            Some(transform) => match transform(raw, &params) {
                Ok(d) => d,
                Err(e) => {
                    self.handle_fetch_error(e, &params, &key, &opts, self.clock.now());
                    self.clear_active_fetch_if_matching(&key, &opts);
                    return None;
                }
            },
            None => raw.into(),
        };

        if opts.skip_store_updates {
            return Some(data);
        }

        self.commit_success(&key, &params, data.clone(), self.clock.now(), opts.cache_time_override);
        self.clear_active_fetch_if_matching(&key, &opts);
        self.schedule_next_fetch(params.clone(), self.clock.now());

        if let Some(on_fetched) = &self.options.on_fetched {
            let data_for_callback = data.clone();
            let params_for_callback = params.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                on_fetched(&data_for_callback, &params_for_callback);
            }));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "onFetched panicked".to_string());
                tracing::error!(query_key = %key, error = %Error::callback(&message), "onFetched callback panicked");
            }
        }

        Some(data)
    }

    fn commit_success(&self, key: &str, params: &ParamMap, data: D, now: Instant, cache_time_override: Option<Duration>) {
        let cache_time_opt = cache_time_override.or_else(|| self.options.cache_time.resolve(params));
        let cache_time = cache_time_opt.unwrap_or(Duration::MAX);
        let disable_cache = self.options.disable_cache;
        let keep_previous_data = self.options.keep_previous_data;
        let key_owned = key.to_string();

        let entry_data = if let Some(set_data) = &self.options.set_data {
            set_data(&data, params, key);
            None
        } else {
            Some(data)
        };

        self.store.set_state(Box::new(move |s| {
            s.status = Status::Success;
            s.error = None;
            s.last_fetched_at = Some(now);
            if !disable_cache {
                s.query_cache.record_success(&key_owned, entry_data, cache_time, now);
                if keep_previous_data {
                    s.query_key = key_owned.clone();
                }
                if cache_time_opt.is_some() {
                    let keep_key = if keep_previous_data { Some(key_owned.clone()) } else { None };
                    s.query_cache.prune(now, &key_owned, keep_key.as_deref());
                }
            }
        }));

        self.active.lock().last_fetch_key = Some(key.to_string());
    }

    fn handle_fetch_error(&self, error: Error, params: &ParamMap, key: &str, opts: &FetchOptions, now: Instant) {
        let previous_retry_count = self
            .store
            .get_state()
            .query_cache
            .get(key)
            .and_then(|e| e.error_info.as_ref())
            .map(|e| e.retry_count)
            .unwrap_or(0);

        if let Some(on_error) = &self.options.on_error {
            on_error(&error, previous_retry_count);
        }
        tracing::warn!(query_key = %key, retry_count = previous_retry_count, %error, "fetch failed");

        let max_retries = self.options.max_retries;
        if previous_retry_count < max_retries && self.subscription.has_subscribers() {
            if let Some(delay) = self.options.retry_delay.resolve(previous_retry_count, &error) {
                tracing::debug!(query_key = %key, ?delay, "scheduling retry");
                self.schedule_retry(params.clone(), delay);
            }
        }

        if opts.skip_store_updates {
            return;
        }

        let disable_cache = self.options.disable_cache;
        let cache_time = opts
            .cache_time_override
            .or_else(|| self.options.cache_time.resolve(params))
            .unwrap_or(Duration::MAX);
        let key_owned = key.to_string();
        let error_for_cache = error.clone();

        self.store.set_state(Box::new(move |s| {
            s.status = Status::Error;
            s.error = Some(error);
            if !disable_cache {
                s.query_cache.record_error(&key_owned, error_for_cache, max_retries, cache_time, now);
            }
        }));
    }

    fn abort_active_fetch(&self) {
        if let Some(handle) = self.active.lock().abort_handle.take() {
            handle.abort();
        }
    }

    fn clear_active_fetch_if_matching(&self, key: &str, opts: &FetchOptions) {
        if opts.skip_store_updates {
            return;
        }
        let mut active = self.active.lock();
        if active.fetch.as_ref().map(|f| f.key.as_str()) == Some(key) {
            active.fetch = None;
        }
        active.abort_handle = None;
    }

    /// §4.4: compute and (re)arm the shared refetch/retry timer slot.
    fn schedule_next_fetch(self: &Arc<Self>, params: ParamMap, now: Instant) {
        let last_fetched_at = if self.options.disable_cache {
            self.store.get_state().last_fetched_at
        } else {
            let key = query_key(&params);
            self.store.get_state().query_cache.get(&key).and_then(|e| e.last_fetched_at)
        };

        let delay = compute_refetch_delay(
            self.options.disable_auto_refetching,
            EffectiveDuration::Finite(self.options.stale_time),
            last_fetched_at,
            now,
        );
        let Some(delay) = delay else { return };

        let coordinator = self.clone();
        self.scheduler.schedule(delay, move || {
            Box::pin(async move {
                if coordinator.is_enabled() && coordinator.subscription.has_subscribers() {
                    coordinator.fetch(Some(params), FetchOptions::forced()).await;
                }
            })
        });
    }

    fn schedule_retry(self: &Arc<Self>, params: ParamMap, delay: Duration) {
        let coordinator = self.clone();
        self.scheduler.schedule(delay, move || {
            Box::pin(async move {
                if coordinator.is_enabled() && coordinator.subscription.has_subscribers() {
                    coordinator.fetch(Some(params), FetchOptions::forced()).await;
                }
            })
        });
    }

    fn handle_param_change(self: &Arc<Self>, new_params: ParamMap) {
        let new_key = query_key(&new_params);
        if !self.options.keep_previous_data {
            let key_for_state = new_key;
            self.store.set_state(Box::new(move |s| s.query_key = key_for_state));
        }
        if self.options.abort_interrupted_fetches {
            self.abort_active_fetch();
        }
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.fetch(Some(new_params), FetchOptions::default()).await;
        });
    }

    fn handle_enabled_change(self: &Arc<Self>, enabled: bool) {
        self.store.set_state(Box::new(move |s| s.enabled = enabled));
        if let Some(event) = self.subscription.set_enabled(enabled) {
            self.handle_lifecycle_event(event);
        }
    }

    fn handle_lifecycle_event(self: &Arc<Self>, event: LifecycleEvent) {
        match event {
            LifecycleEvent::FirstSubscribe => {
                let coordinator = self.clone();
                tokio::spawn(async move {
                    coordinator.fetch(None, FetchOptions::default()).await;
                });
            }
            LifecycleEvent::Subscribe { should_throttle } => {
                if !should_throttle {
                    let coordinator = self.clone();
                    tokio::spawn(async move {
                        coordinator.fetch(None, FetchOptions::default()).await;
                    });
                }
            }
            LifecycleEvent::LastUnsubscribe => {
                self.scheduler.cancel();
                if self.options.abort_interrupted_fetches {
                    self.abort_active_fetch();
                }
            }
        }
    }

    /// `reset()` (spec §6): cancel timers, abort if configured, clear
    /// transient fetch state, restore `QueryState` defaults.
    pub fn reset(self: &Arc<Self>) {
        self.scheduler.cancel();
        if self.options.abort_interrupted_fetches {
            self.abort_active_fetch();
        }
        {
            let mut active = self.active.lock();
            active.fetch = None;
            active.last_fetch_key = None;
        }
        let new_key = query_key(&self.resolver.resolve());
        self.store.set_state(Box::new(move |s| s.reset(new_key)));
    }
}
