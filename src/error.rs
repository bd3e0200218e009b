//! Crate-wide error types.
//!
//! The fetch coordinator never propagates these outward (see the error path in
//! `coordinator.rs`) — they are folded into `QueryState::error` instead. This
//! type exists so every fallible boundary inside the engine (fetch, transform,
//! persistence) speaks one vocabulary, the way `QueryError` does in the
//! teacher's `retry` module.

use std::fmt;

/// Library-wide result type for fallible internal boundaries.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the query engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Raised by the user-supplied fetcher.
    #[error("fetch failed: {0}")]
    Fetcher(String),

    /// Raised when `transform` panics or returns an error.
    #[error("transform failed: {0}")]
    Transform(String),

    /// Sentinel for a cooperative abort. Never surfaced to `state.error`;
    /// represented here so the coordinator has a concrete value to match on.
    #[error("fetch aborted")]
    Abort,

    /// Raised inside `onFetched`/`onError`/`setData` callbacks. Logged only.
    #[error("callback failed: {0}")]
    Callback(String),

    /// A persisted or cached entry failed to (de)serialize.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The configured `StorageBackend` failed.
    #[error("storage backend failed: {0}")]
    Storage(String),
}

impl Error {
    /// True for the sentinel abort value — the only kind the coordinator
    /// treats as "no-op completion" rather than an error to record.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Abort)
    }

    pub fn fetcher(message: impl fmt::Display) -> Self {
        Error::Fetcher(message.to_string())
    }

    pub fn transform(message: impl fmt::Display) -> Self {
        Error::Transform(message.to_string())
    }

    pub fn callback(message: impl fmt::Display) -> Self {
        Error::Callback(message.to_string())
    }

    pub fn storage(message: impl fmt::Display) -> Self {
        Error::Storage(message.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
