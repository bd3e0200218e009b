//! A reactive, cache-backed query engine.
//!
//! Wraps an arbitrary async fetch function as a subscribable state store:
//! in-flight requests are deduplicated by query key, successful results are
//! cached with a TTL and pruned on write, stale data triggers an automatic
//! background refetch, failures retry with a configurable backoff, and
//! in-flight work aborts cooperatively when it is superseded or no longer
//! wanted. Reactive parameters drive re-fetching through a small push-based
//! dependency graph rather than manual invalidation calls.
//!
//! The moving pieces:
//!
//! - [`key`] — deterministic query-key derivation from a parameter map.
//! - [`cache`] — the per-key cache table and its pruning rule.
//! - [`subscription`] — subscriber-count tracking and lifecycle events.
//! - [`params`] — the reactive parameter resolver (`AttachValue`, `Cell`).
//! - [`options`] — `QueryOptions`, the configuration surface.
//! - [`store`] — the external `StateStore` trait plus an in-memory default.
//! - [`scheduler`] — the shared refetch/retry timer slot.
//! - [`coordinator`] — the fetch state machine tying the above together.
//! - [`query`] — [`QueryStore`], the public facade.
//! - [`persistence`] — partialize/rehydrate against a `StorageBackend`.
//!
//! Construct a [`QueryStore`] from [`options::QueryOptions`] and drive it
//! through [`QueryStore::fetch`]/[`QueryStore::subscribe`]; everything else
//! in this crate exists to make that one type correct and cheap to share.

pub mod abort;
pub mod cache;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod options;
pub mod params;
pub mod persistence;
pub mod query;
pub mod scheduler;
pub mod store;
pub mod subscription;

#[cfg(feature = "leptos")]
pub mod leptos_adapter;

pub use error::{Error, Result};
pub use query::{QueryStore, QuerySubscription};
