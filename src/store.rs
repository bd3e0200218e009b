//! State Store
//!
//! The observable `{getState, setState(updater), subscribe(listener)}`
//! surface spec §1/§3 treats as an external collaborator. The crate defines
//! the trait and ships `InMemoryStore`, generalizing the teacher's
//! `QueryClient` (`client/mod.rs`), which bundles state storage with query
//! orchestration; here the two are split so a host (a Leptos/Yew binding
//! crate) can supply its own store while reusing the rest of the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::cache::CacheTable;
use crate::error::Error;

/// Status of the last in-flight/completed operation for the current key
/// (spec §3's `status`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Idle,
    Loading,
    Success,
    Error,
}

/// `S` from spec §3, generic over the cached/observed data type `D`.
pub struct QueryState<D> {
    pub enabled: bool,
    pub query_key: String,
    pub status: Status,
    pub error: Option<Error>,
    /// Populated only when the cache table is disabled (spec §3).
    pub last_fetched_at: Option<Instant>,
    pub query_cache: CacheTable<D>,
}

impl<D: Clone> Clone for QueryState<D> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            query_key: self.query_key.clone(),
            status: self.status,
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            query_cache: self.query_cache.clone(),
        }
    }
}

impl<D> QueryState<D> {
    pub fn new(enabled: bool, query_key: String) -> Self {
        Self {
            enabled,
            query_key,
            status: Status::Idle,
            error: None,
            last_fetched_at: None,
            query_cache: CacheTable::default(),
        }
    }

    /// Restore defaults, recomputing `queryKey` from freshly resolved
    /// parameters (spec §6's `reset()`).
    pub fn reset(&mut self, query_key: String) {
        self.status = Status::Idle;
        self.error = None;
        self.last_fetched_at = None;
        self.query_cache.clear();
        self.query_key = query_key;
    }
}

/// The external key/value state store (spec §1 "out of scope" collaborator).
/// Object-safe by design (`Box<dyn FnOnce>` / `Box<dyn Fn>` rather than
/// generic methods) so a host can type-erase its store behind a trait object
/// if it wants to.
pub trait StateStore<S>: Send + Sync {
    fn get_state(&self) -> S;

    /// Apply `updater` atomically and notify every subscriber with the
    /// resulting snapshot.
    fn set_state(&self, updater: Box<dyn FnOnce(&mut S) + Send>);

    /// Subscribe to every state change. Returns an unsubscribe thunk.
    fn subscribe(&self, listener: Box<dyn Fn(&S) + Send + Sync>) -> Box<dyn FnOnce() + Send>;
}

/// Default in-process `StateStore`, backed by a `parking_lot::Mutex`. No
/// selector narrowing: every subscriber sees every update, matching the
/// teacher's own `QueryClient` notification loop (`client/mod.rs`) rather
/// than a finer-grained diffing store.
pub struct InMemoryStore<S> {
    state: Arc<Mutex<S>>,
    listeners: Arc<Mutex<HashMap<u64, Arc<dyn Fn(&S) + Send + Sync>>>>,
    next_id: AtomicU64,
}

impl<S: Clone + Send + 'static> InMemoryStore<S> {
    pub fn new(initial: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(initial)),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<S: Clone + Send + 'static> StateStore<S> for InMemoryStore<S> {
    fn get_state(&self) -> S {
        self.state.lock().clone()
    }

    fn set_state(&self, updater: Box<dyn FnOnce(&mut S) + Send>) {
        let snapshot = {
            let mut state = self.state.lock();
            updater(&mut state);
            state.clone()
        };
        let listeners: Vec<_> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }

    fn subscribe(&self, listener: Box<dyn Fn(&S) + Send + Sync>) -> Box<dyn FnOnce() + Send> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(id, Arc::from(listener));
        let listeners = self.listeners.clone();
        Box::new(move || {
            listeners.lock().remove(&id);
        })
    }
}
