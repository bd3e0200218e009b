//! Public Store Facade
//!
//! `QueryStore<R, D>` is the crate's single entry point: construct it from
//! `QueryOptions`, subscribe, and call `fetch`/`get_data`/`get_status`.
//! Generalizes the teacher's top-level `use_query` hook (`query/mod.rs`)
//! into a plain, framework-agnostic struct — a `leptos` feature elsewhere
//! can wrap this in a hook for that specific host.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::coordinator::{DerivedStatus, FetchCoordinator, FetchOptions};
use crate::key::{query_key, ParamMap};
use crate::options::QueryOptions;
use crate::params::ParameterResolver;
use crate::store::{InMemoryStore, QueryState, StateStore};
use crate::subscription::SubscriptionHandle;

/// RAII guard returned by `QueryStore::subscribe`. Releases both the
/// subscriber-count lifecycle hook and the underlying state-store listener
/// on drop.
pub struct QuerySubscription<D> {
    _lifecycle: SubscriptionHandle,
    state_unsub: Option<Box<dyn FnOnce() + Send>>,
    _marker: PhantomData<D>,
}

impl<D> Drop for QuerySubscription<D> {
    fn drop(&mut self) {
        if let Some(unsub) = self.state_unsub.take() {
            unsub();
        }
    }
}

/// The engine's public entry point.
pub struct QueryStore<R, D> {
    coordinator: Arc<FetchCoordinator<R, D>>,
}

impl<R, D> QueryStore<R, D>
where
    R: Into<D> + Send + 'static,
    D: Clone + Send + Sync + 'static,
{
    pub fn new(options: QueryOptions<R, D>) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: QueryOptions<R, D>, clock: Arc<dyn Clock>) -> Self {
        let initial_resolver = ParameterResolver::new(options.params.clone(), options.enabled.clone());
        let initial_key = query_key(&initial_resolver.resolve());
        let initial_enabled = initial_resolver.resolve_enabled();
        let state = QueryState::new(initial_enabled, initial_key);
        let store: Arc<dyn StateStore<QueryState<D>>> = Arc::new(InMemoryStore::new(state));
        let coordinator = FetchCoordinator::new(options, store, clock);
        Self { coordinator }
    }

    /// Construct from a previously rehydrated snapshot (see
    /// `persistence::PersistenceBridge::rehydrate`).
    pub fn from_rehydrated(
        options: QueryOptions<R, D>,
        clock: Arc<dyn Clock>,
        rehydrated: crate::persistence::RehydratedState<D>,
    ) -> Self {
        let mut state = QueryState::new(rehydrated.enabled, rehydrated.query_key);
        state.status = rehydrated.status;
        state.error = rehydrated.error;
        state.last_fetched_at = rehydrated.last_fetched_at;
        state.query_cache = rehydrated.query_cache;
        let store: Arc<dyn StateStore<QueryState<D>>> = Arc::new(InMemoryStore::new(state));
        let coordinator = FetchCoordinator::new(options, store, clock);
        Self { coordinator }
    }

    pub async fn fetch(&self, params: Option<ParamMap>, opts: FetchOptions) -> Option<D> {
        self.coordinator.fetch(params, opts).await
    }

    pub fn get_data(&self) -> Option<D> {
        self.coordinator.get_data()
    }

    pub fn get_status(&self) -> DerivedStatus {
        self.coordinator.get_status()
    }

    pub fn is_stale(&self, override_stale_time: Option<Duration>) -> bool {
        self.coordinator.is_stale(override_stale_time)
    }

    pub fn is_data_expired(&self, override_cache_time: Option<Duration>) -> bool {
        self.coordinator.is_data_expired(override_cache_time)
    }

    pub fn enabled(&self) -> bool {
        self.coordinator.enabled()
    }

    pub fn query_key(&self) -> String {
        self.coordinator.query_key()
    }

    pub fn reset(&self) {
        self.coordinator.reset();
    }

    pub fn state_snapshot(&self) -> QueryState<D> {
        self.coordinator.store().get_state()
    }

    /// Attach a subscriber: bumps the subscription count (driving the
    /// first-subscribe/auto-refetch lifecycle, spec §4.1) and registers a
    /// state-change listener. Dropping the returned guard detaches both.
    pub fn subscribe(&self, listener: impl Fn(&QueryState<D>) + Send + Sync + 'static) -> QuerySubscription<D> {
        let now = self.coordinator.now();
        let lifecycle = self.coordinator.subscription_manager().subscribe(now);
        let state_unsub = self.coordinator.store().subscribe(Box::new(listener));
        QuerySubscription {
            _lifecycle: lifecycle,
            state_unsub: Some(state_unsub),
            _marker: PhantomData,
        }
    }
}
