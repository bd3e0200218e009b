//! Query configuration.
//!
//! `QueryOptions` is the closed configuration surface from spec §6,
//! generalizing the teacher's `QueryOptions` builder (`client/mod.rs`) from a
//! single hard-coded data shape into one generic over the fetcher's raw
//! return type `R` and the cached/observed type `D` (identical by default,
//! distinct only when a `transform` is supplied).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::abort::AbortHandle;
use crate::error::{Error, Result};
use crate::key::ParamMap;
use crate::params::{EnabledSource, ParamSource};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Below this, a stale time is almost certainly a mistake (a staleTime this
/// short makes every render refetch); `QueryOptions::validate` warns unless
/// `suppress_stale_time_warning` is set.
pub const STALE_TIME_WARNING_THRESHOLD: Duration = Duration::from_secs(5);

pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// `cacheTime` (spec §6): a constant, a per-parameter function evaluated once
/// at cache-write time, or unbounded.
#[derive(Clone)]
pub enum CacheTimeSource {
    Constant(Duration),
    PerParams(Arc<dyn Fn(&ParamMap) -> Duration + Send + Sync>),
    Infinite,
}

impl CacheTimeSource {
    pub fn resolve(&self, params: &ParamMap) -> Option<Duration> {
        match self {
            CacheTimeSource::Constant(d) => Some(*d),
            CacheTimeSource::PerParams(f) => Some(f(params)),
            CacheTimeSource::Infinite => None,
        }
    }
}

/// `retryDelay` (spec §6): a constant, or a function of the retry count and
/// error that may decline to schedule a retry at all by returning `None`.
#[derive(Clone)]
pub enum RetryDelaySource {
    Constant(Duration),
    Computed(Arc<dyn Fn(u32, &Error) -> Option<Duration> + Send + Sync>),
}

impl RetryDelaySource {
    pub fn resolve(&self, retry_count: u32, error: &Error) -> Option<Duration> {
        match self {
            RetryDelaySource::Constant(d) => Some(*d),
            RetryDelaySource::Computed(f) => f(retry_count, error),
        }
    }
}

/// The closed configuration surface for one query (spec §6). `R` is the
/// fetcher's raw return type; `D` is the type observed through the state
/// store and cache. When no `transform` is supplied, callers are expected to
/// set `R = D` (the fetch operation treats the raw value as already final).
pub struct QueryOptions<R, D = R> {
    pub fetcher: Arc<dyn Fn(ParamMap, AbortHandle) -> BoxFuture<'static, Result<R>> + Send + Sync>,
    pub transform: Option<Arc<dyn Fn(R, &ParamMap) -> Result<D> + Send + Sync>>,
    pub on_fetched: Option<Arc<dyn Fn(&D, &ParamMap) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&Error, u32) + Send + Sync>>,
    pub set_data: Option<Arc<dyn Fn(&D, &ParamMap, &str) + Send + Sync>>,
    pub params: Vec<(String, ParamSource)>,
    pub enabled: EnabledSource,
    pub cache_time: CacheTimeSource,
    pub stale_time: Duration,
    pub max_retries: u32,
    pub retry_delay: RetryDelaySource,
    pub abort_interrupted_fetches: bool,
    pub disable_auto_refetching: bool,
    pub disable_cache: bool,
    pub keep_previous_data: bool,
    pub suppress_stale_time_warning: bool,
    pub debug_mode: bool,
}

impl<R, D> QueryOptions<R, D> {
    pub fn new(
        fetcher: impl Fn(ParamMap, AbortHandle) -> BoxFuture<'static, Result<R>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            transform: None,
            on_fetched: None,
            on_error: None,
            set_data: None,
            params: Vec::new(),
            enabled: EnabledSource::default(),
            cache_time: CacheTimeSource::Constant(DEFAULT_CACHE_TIME),
            stale_time: DEFAULT_STALE_TIME,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: RetryDelaySource::Constant(DEFAULT_RETRY_DELAY),
            abort_interrupted_fetches: true,
            disable_auto_refetching: false,
            disable_cache: false,
            keep_previous_data: false,
            suppress_stale_time_warning: false,
            debug_mode: false,
        }
    }

    pub fn with_transform(
        mut self,
        transform: impl Fn(R, &ParamMap) -> Result<D> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_on_fetched(mut self, f: impl Fn(&D, &ParamMap) + Send + Sync + 'static) -> Self {
        self.on_fetched = Some(Arc::new(f));
        self
    }

    pub fn with_on_error(mut self, f: impl Fn(&Error, u32) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn with_set_data(mut self, f: impl Fn(&D, &ParamMap, &str) + Send + Sync + 'static) -> Self {
        self.set_data = Some(Arc::new(f));
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, source: ParamSource) -> Self {
        self.params.push((key.into(), source));
        self
    }

    pub fn with_enabled(mut self, enabled: EnabledSource) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_cache_time(mut self, cache_time: CacheTimeSource) -> Self {
        self.cache_time = cache_time;
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: RetryDelaySource) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_abort_interrupted_fetches(mut self, value: bool) -> Self {
        self.abort_interrupted_fetches = value;
        self
    }

    pub fn with_disable_auto_refetching(mut self, value: bool) -> Self {
        self.disable_auto_refetching = value;
        self
    }

    pub fn with_disable_cache(mut self, value: bool) -> Self {
        self.disable_cache = value;
        self
    }

    pub fn with_keep_previous_data(mut self, value: bool) -> Self {
        self.keep_previous_data = value;
        self
    }

    pub fn with_suppress_stale_time_warning(mut self, value: bool) -> Self {
        self.suppress_stale_time_warning = value;
        self
    }

    pub fn with_debug_mode(mut self, value: bool) -> Self {
        self.debug_mode = value;
        self
    }

    /// Emit the stale-time warning (spec §6) if applicable. Called once at
    /// coordinator construction rather than on every `with_stale_time` call,
    /// since the final value is what matters.
    pub fn validate(&self) {
        if self.stale_time < STALE_TIME_WARNING_THRESHOLD && !self.suppress_stale_time_warning {
            tracing::warn!(
                stale_time_ms = self.stale_time.as_millis() as u64,
                "staleTime is unusually short; this query will refetch almost continuously",
            );
        }
    }
}

/// Crate-wide defaults for hosts constructing many `QueryStore`s from one
/// baseline (spec §1A). Each field seeds the corresponding `QueryOptions`
/// default unless a store overrides it explicitly.
#[derive(Clone, Debug)]
pub struct QueryEngineConfig {
    pub default_cache_time: Duration,
    pub default_stale_time: Duration,
    pub suppress_stale_time_warning: bool,
}

impl Default for QueryEngineConfig {
    fn default() -> Self {
        Self {
            default_cache_time: DEFAULT_CACHE_TIME,
            default_stale_time: DEFAULT_STALE_TIME,
            suppress_stale_time_warning: false,
        }
    }
}
