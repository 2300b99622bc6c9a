//! Per-request metrics hook and the Prometheus scrape endpoint.
//!
//! The pipeline calls [`RecordMetrics`] once per routed request, after the
//! envelope is written. [`PrometheusMetrics`] is a ready-made recorder; any
//! other sink can be plugged in as a closure.

use std::sync::Arc;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

use crate::error::Result;
use crate::response::{self, ContentType, Response};

/// What the hook learns about one request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestMetrics<'a> {
    pub method: &'a str,
    /// The request path, or the alias set with
    /// [`alias_for_metrics`](crate::alias_for_metrics).
    pub uri: &'a str,
    /// Not aborted and answered `200`.
    pub success: bool,
    pub http_code: u16,
    /// `0` when no envelope was written.
    pub business_code: i32,
    pub cost_seconds: f64,
}

/// The stored form of the hook passed to [`Options::record_metrics`](crate::Options::record_metrics).
pub type RecordMetrics = Arc<dyn Fn(&RequestMetrics<'_>) + Send + Sync>;

/// Request counter and latency histogram registered on a Prometheus registry.
#[derive(Clone, Debug)]
pub struct PrometheusMetrics {
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl PrometheusMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("trellis_requests_total", "Requests served, by outcome."),
            &["method", "path", "success", "http_code", "business_code"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("trellis_request_duration_seconds", "Request latency in seconds."),
            &["method", "path"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self { requests, duration })
    }

    pub fn observe(&self, m: &RequestMetrics<'_>) {
        self.requests
            .with_label_values(&[
                m.method,
                m.uri,
                if m.success { "true" } else { "false" },
                &m.http_code.to_string(),
                &m.business_code.to_string(),
            ])
            .inc();
        self.duration
            .with_label_values(&[m.method, m.uri])
            .observe(m.cost_seconds);
    }

    /// A hook for [`Options::record_metrics`](crate::Options::record_metrics).
    pub fn recorder(self) -> impl Fn(&RequestMetrics<'_>) + Send + Sync + 'static {
        move |m: &RequestMetrics<'_>| self.observe(m)
    }
}

/// `GET /metrics`: text exposition of `registry`.
pub(crate) fn scrape(registry: &Registry) -> Response {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    match encoder.encode(&registry.gather(), &mut body) {
        Ok(()) => response::bytes(http::StatusCode::OK, ContentType::Prometheus, body),
        Err(e) => {
            error!("metrics encoding failed: {e}");
            response::status(http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
