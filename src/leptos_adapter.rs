//! Adapts a `leptos::Signal<T>` to the engine's `AttachValue<T>` trait, so a
//! Leptos host can wire a reactive parameter straight from its own signal
//! graph instead of going through `params::Cell`. Mirrors the job the
//! teacher's `compat/signals.rs` does for its own internal signal type, but
//! targeting this crate's trait rather than an internal enum.

use std::sync::Arc;

use leptos::prelude::*;

use crate::params::AttachValue;

/// Wraps a `leptos::Signal<T>`. `subscribe` drives a Leptos `Effect` that
/// re-reads the signal and forwards changes to the listener; the returned
/// unsubscribe thunk disposes that effect.
pub struct LeptosSignal<T>(pub Signal<T>);

impl<T> LeptosSignal<T> {
    pub fn new(signal: Signal<T>) -> Self {
        Self(signal)
    }
}

impl<T> AttachValue<T> for LeptosSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn value(&self) -> T {
        self.0.get_untracked()
    }

    fn subscribe(&self, listener: Box<dyn Fn(&T) + Send + Sync>) -> Box<dyn FnOnce() + Send> {
        let signal = self.0;
        let listener = Arc::new(listener);
        let effect = Effect::new(move |_| {
            let value = signal.get();
            listener(&value);
        });
        Box::new(move || drop(effect))
    }
}
