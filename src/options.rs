//! Construction-time options and environment settings.
//!
//! [`Options`] is the immutable record a [`Mux`](crate::Mux) is built with.
//! Setters apply in call order; for any one flag or callback the last call
//! wins. [`Settings`] is the deployable subset, read from `TRELLIS_*`
//! environment variables.

use std::fmt;
use std::sync::Arc;

use prometheus::Registry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::metrics::{RecordMetrics, RequestMetrics};
use crate::middleware::rate::{MAX_BURST_SIZE, REFILL_PER_SECOND};

/// Called after a handler panic with the request context, the panic message
/// and the captured stack trace.
pub type PanicNotify = Arc<dyn Fn(&Context, &str, &str) + Send + Sync>;

/// Toggles and callbacks fixed at construction.
#[derive(Clone)]
pub struct Options {
    pub(crate) disable_pprof: bool,
    pub(crate) disable_swagger: bool,
    pub(crate) disable_prometheus: bool,
    pub(crate) enable_cors: bool,
    pub(crate) enable_rate: bool,
    pub(crate) journal_unmatched: bool,
    pub(crate) rate_burst: u32,
    pub(crate) rate_per_second: f64,
    pub(crate) panic_notify: Option<PanicNotify>,
    pub(crate) record_metrics: Option<RecordMetrics>,
    pub(crate) registry: Registry,
    pub(crate) openapi: Option<Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            disable_pprof: false,
            disable_swagger: false,
            disable_prometheus: false,
            enable_cors: false,
            enable_rate: false,
            journal_unmatched: false,
            rate_burst: MAX_BURST_SIZE,
            rate_per_second: REFILL_PER_SECOND,
            panic_notify: None,
            record_metrics: None,
            registry: prometheus::default_registry().clone(),
            openapi: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not mount `/debug/pprof/*`.
    pub fn disable_pprof(mut self) -> Self {
        self.disable_pprof = true;
        self
    }

    /// Do not mount `/swagger/*`.
    pub fn disable_swagger(mut self) -> Self {
        self.disable_swagger = true;
        self
    }

    /// Do not mount `/metrics`.
    pub fn disable_prometheus(mut self) -> Self {
        self.disable_prometheus = true;
        self
    }

    pub fn enable_cors(mut self) -> Self {
        self.enable_cors = true;
        self
    }

    /// Put the token-bucket rate gate in front of every route.
    pub fn enable_rate(mut self) -> Self {
        self.enable_rate = true;
        self
    }

    /// Bucket capacity and refill rate for [`enable_rate`](Self::enable_rate).
    pub fn rate(mut self, burst: u32, per_second: f64) -> Self {
        self.rate_burst = burst;
        self.rate_per_second = per_second;
        self
    }

    /// Journal requests that matched no route (404/405). Off by default.
    pub fn journal_unmatched(mut self, on: bool) -> Self {
        self.journal_unmatched = on;
        self
    }

    pub fn panic_notify(mut self, notify: impl Fn(&Context, &str, &str) + Send + Sync + 'static) -> Self {
        self.panic_notify = Some(Arc::new(notify));
        self
    }

    /// Called once per routed request after the response is written.
    pub fn record_metrics(mut self, record: impl Fn(&RequestMetrics<'_>) + Send + Sync + 'static) -> Self {
        self.record_metrics = Some(Arc::new(record));
        self
    }

    /// Registry served at `/metrics`. Defaults to the process-wide registry.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// OpenAPI document served at `/swagger/doc.json` instead of the
    /// generated one.
    pub fn openapi(mut self, doc: Value) -> Self {
        self.openapi = Some(doc);
        self
    }

    /// Overlay environment settings. Only values the environment actually
    /// set replace what the options already hold.
    pub fn apply(mut self, s: &Settings) -> Self {
        fn set<T: Copy>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        set(&mut self.disable_pprof, s.disable_pprof);
        set(&mut self.disable_swagger, s.disable_swagger);
        set(&mut self.disable_prometheus, s.disable_prometheus);
        set(&mut self.enable_cors, s.enable_cors);
        set(&mut self.enable_rate, s.enable_rate);
        set(&mut self.journal_unmatched, s.journal_unmatched);
        set(&mut self.rate_burst, s.rate_burst);
        set(&mut self.rate_per_second, s.rate_per_second);
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("disable_pprof", &self.disable_pprof)
            .field("disable_swagger", &self.disable_swagger)
            .field("disable_prometheus", &self.disable_prometheus)
            .field("enable_cors", &self.enable_cors)
            .field("enable_rate", &self.enable_rate)
            .field("journal_unmatched", &self.journal_unmatched)
            .field("rate_burst", &self.rate_burst)
            .field("rate_per_second", &self.rate_per_second)
            .field("panic_notify", &self.panic_notify.is_some())
            .field("record_metrics", &self.record_metrics.is_some())
            .finish_non_exhaustive()
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Deployment settings.
///
/// Every toggle is optional: `None` leaves the corresponding [`Options`]
/// value untouched when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the server binds to.
    pub addr: String,
    pub disable_pprof: Option<bool>,
    pub disable_swagger: Option<bool>,
    pub disable_prometheus: Option<bool>,
    pub enable_cors: Option<bool>,
    pub enable_rate: Option<bool>,
    pub rate_burst: Option<u32>,
    pub rate_per_second: Option<f64>,
    pub journal_unmatched: Option<bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".to_string(),
            disable_pprof: None,
            disable_swagger: None,
            disable_prometheus: None,
            enable_cors: None,
            enable_rate: None,
            rate_burst: None,
            rate_per_second: None,
            journal_unmatched: None,
        }
    }
}

impl Settings {
    /// Load from `TRELLIS_*` environment variables. Unset ones stay `None`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            addr: lookup("TRELLIS_ADDR").unwrap_or_else(|| Self::default().addr),
            disable_pprof: parse(&lookup, "TRELLIS_DISABLE_PPROF")?,
            disable_swagger: parse(&lookup, "TRELLIS_DISABLE_SWAGGER")?,
            disable_prometheus: parse(&lookup, "TRELLIS_DISABLE_PROMETHEUS")?,
            enable_cors: parse(&lookup, "TRELLIS_ENABLE_CORS")?,
            enable_rate: parse(&lookup, "TRELLIS_ENABLE_RATE")?,
            rate_burst: parse(&lookup, "TRELLIS_RATE_BURST")?,
            rate_per_second: parse(&lookup, "TRELLIS_RATE_PER_SECOND")?,
            journal_unmatched: parse(&lookup, "TRELLIS_JOURNAL_UNMATCHED")?,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}
