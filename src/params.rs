//! Parameter Resolver
//!
//! Binds static and reactive parameter sources and propagates changes. The
//! teacher has no standalone module for this (it inlines `key_fn`/`Signal`
//! reads directly in `query/mod.rs`'s `use_query`); this generalizes the
//! compatibility-shim idea in `compat/signals.rs` — wrapping a reactive
//! primitive behind a small trait — away from a Leptos-specific signal type,
//! per spec §4.2/§9: an explicit subscription registry (a `Vec` of unsubscribe
//! thunks) rather than implicit closure capture, so `reset()`/drop tears every
//! subscription down deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::key::{ParamMap, ParamValue};

/// A reactive cell with a `.value()` accessor and a subscribe function.
/// Named `AttachValue` after spec's glossary term. The crate ships `Cell<T>`
/// as the default in-process implementation; a `leptos` feature can adapt
/// `leptos::Signal<T>` to this trait for host integration.
pub trait AttachValue<T>: Send + Sync {
    fn value(&self) -> T;

    /// Subscribe to change notifications. Returns an unsubscribe thunk.
    fn subscribe(&self, listener: Box<dyn Fn(&T) + Send + Sync>) -> Box<dyn FnOnce() + Send>;
}

struct CellInner<T> {
    value: T,
    next_id: u64,
    listeners: HashMap<u64, Arc<dyn Fn(&T) + Send + Sync>>,
}

/// A minimal reactive cell: holds a value, notifies subscribers on `set`.
/// Unlike the resolver's own dedup (spec §4.2 step 3), `Cell` notifies on
/// every `set` regardless of equality — the resolver is what filters
/// deep-equal updates, matching the spec's placement of that rule on the
/// subscriber side rather than the signal itself.
#[derive(Clone)]
pub struct Cell<T> {
    inner: Arc<Mutex<CellInner<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Cell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CellInner {
                value,
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Update the value and notify subscribers. Listeners are snapshotted and
    /// invoked outside the lock, so a listener that calls back into this
    /// cell (e.g. re-reading `.get()`, or even calling `.set()` again) cannot
    /// deadlock against the update that triggered it.
    pub fn set(&self, value: T) {
        let listeners: Vec<Arc<dyn Fn(&T) + Send + Sync>> = {
            let mut inner = self.inner.lock();
            inner.value = value.clone();
            inner.listeners.values().cloned().collect()
        };
        for listener in listeners {
            listener(&value);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> AttachValue<T> for Cell<T> {
    fn value(&self) -> T {
        self.get()
    }

    fn subscribe(&self, listener: Box<dyn Fn(&T) + Send + Sync>) -> Box<dyn FnOnce() + Send> {
        let listener: Arc<dyn Fn(&T) + Send + Sync> = Arc::from(listener);
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.insert(id, listener);
            id
        };
        let weak: Weak<Mutex<CellInner<T>>> = Arc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.remove(&id);
            }
        })
    }
}

/// One configured parameter: a plain value, or a function returning an
/// `AttachValue` (spec §4.2).
#[derive(Clone)]
pub enum ParamSource {
    Static(ParamValue),
    Reactive(Arc<dyn AttachValue<ParamValue>>),
}

/// The `enabled` configuration: a static boolean or a reactive cell (spec
/// §4.2 step 4).
#[derive(Clone)]
pub enum EnabledSource {
    Static(bool),
    Reactive(Arc<dyn AttachValue<bool>>),
}

impl Default for EnabledSource {
    fn default() -> Self {
        EnabledSource::Static(true)
    }
}

struct ResolverState {
    param_sources: Vec<(String, ParamSource)>,
    enabled_source: EnabledSource,
    unsubscribes: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// Binds every configured parameter (and `enabled`) and propagates changes.
/// Cheaply cloneable: clones share the same subscription registry, so
/// `bind()` can capture a clone of `self` inside each reactive listener
/// without lifetime gymnastics.
#[derive(Clone)]
pub struct ParameterResolver {
    state: Arc<ResolverState>,
}

impl ParameterResolver {
    pub fn new(param_sources: Vec<(String, ParamSource)>, enabled_source: EnabledSource) -> Self {
        Self {
            state: Arc::new(ResolverState {
                param_sources,
                enabled_source,
                unsubscribes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Resolve the current parameter map by reading every source once
    /// (static values as-is, reactive cells via `.value()`).
    pub fn resolve(&self) -> ParamMap {
        self.state
            .param_sources
            .iter()
            .map(|(key, source)| {
                let value = match source {
                    ParamSource::Static(v) => v.clone(),
                    ParamSource::Reactive(cell) => cell.value(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    pub fn resolve_enabled(&self) -> bool {
        match &self.state.enabled_source {
            EnabledSource::Static(v) => *v,
            EnabledSource::Reactive(cell) => cell.value(),
        }
    }

    /// Subscribe to every reactive source. `on_param_change` fires with the
    /// freshly re-resolved full parameter map whenever a reactive param's
    /// value changes (deep-equal notifications are ignored, per spec §4.2
    /// step 3); `on_enabled_change` fires with the new `enabled` value.
    /// Idempotent per source: calling `bind` twice would double-subscribe,
    /// so callers (the coordinator) call it exactly once at construction.
    pub fn bind(
        &self,
        on_param_change: impl Fn(ParamMap) + Send + Sync + 'static,
        on_enabled_change: impl Fn(bool) + Send + Sync + 'static,
    ) {
        let on_param_change = Arc::new(on_param_change);
        for (key, source) in &self.state.param_sources {
            if let ParamSource::Reactive(cell) = source {
                let resolver = self.clone();
                let last_value = Mutex::new(cell.value());
                let on_param_change = on_param_change.clone();
                let key = key.clone();
                let unsub = cell.subscribe(Box::new(move |new_value: &ParamValue| {
                    let mut last = last_value.lock();
                    if *last == *new_value {
                        tracing::trace!(param = %key, "ignoring deep-equal parameter notification");
                        return;
                    }
                    *last = new_value.clone();
                    drop(last);
                    on_param_change(resolver.resolve());
                }));
                self.state.unsubscribes.lock().push(unsub);
            }
        }

        if let EnabledSource::Reactive(cell) = &self.state.enabled_source {
            let unsub = cell.subscribe(Box::new(move |new_value: &bool| {
                on_enabled_change(*new_value);
            }));
            self.state.unsubscribes.lock().push(unsub);
        }
    }

    /// Tear down every subscription. Called from `reset()` and on drop of
    /// the owning coordinator, so teardown is never left to implicit closure
    /// capture (spec §9).
    pub fn unbind_all(&self) {
        let thunks: Vec<_> = std::mem::take(&mut *self.state.unsubscribes.lock());
        for thunk in thunks {
            thunk();
        }
    }
}
