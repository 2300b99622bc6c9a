//! The mux: route table plus the request pipeline.
//!
//! ```text
//! request ─▶ mounted subsystem? ─yes─▶ pprof / swagger / metrics (no pipeline)
//!              │ no
//!              ▼
//!          outer panic guard
//!              │ body read, route lookup, journal id
//!              ▼
//!          rate gate ──denied──▶ payload = TOO_MANY_REQUESTS, aborted
//!              │ allowed
//!              ▼
//!          inner panic guard ─▶ handler chain
//!              │
//!              ▼  unwind phase
//!          404/405 passthrough │ unifier ─▶ metrics hook ─▶ journal record
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Instant;

use bytes::Bytes;
use http::StatusCode;
use http::header::{ALLOW, HeaderValue};
use http_body_util::BodyExt;
use hyper::body::Body;
use serde_json::Value;
use tower::Layer;
use tower::util::Either;
use tower_http::cors::Cors;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, info, warn};

use crate::context::{Context, Exchange};
use crate::envelope::{SERVER_ERROR, TOO_MANY_REQUESTS};
use crate::error::{Error, Result};
use crate::handler::{disable_journal, run_chain};
use crate::health;
use crate::method::Method;
use crate::metrics::{self, RequestMetrics};
use crate::middleware::rate::RateGate;
use crate::middleware::{cors, journal, recover, unify};
use crate::options::{Options, Settings};
use crate::response::{self, Response};
use crate::router::{Group, Lookup, Routes};
use crate::{debug, swagger};

/// The service [`Mux::into_service`] returns: the mux, optionally behind CORS.
pub type MuxService = Either<Cors<Mux>, Mux>;

/// An HTTP request multiplexer with the trellis pipeline built in.
///
/// Cheap to clone; clones share routes, options and the rate bucket.
#[derive(Clone)]
pub struct Mux {
    inner: Arc<Inner>,
}

struct Inner {
    logger: Dispatch,
    options: Options,
    routes: Routes,
    rate: Option<Arc<RateGate>>,
    openapi: Value,
}

/// Mounted subsystems served outside the pipeline.
enum Mount {
    Pprof,
    Swagger,
    Prometheus,
}

impl Mux {
    pub fn builder() -> MuxBuilder {
        MuxBuilder::default()
    }

    /// Serve one request.
    pub async fn handle<B>(&self, req: http::Request<B>) -> Response
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: fmt::Display,
    {
        let inner = Arc::clone(&self.inner);
        let logger = inner.logger.clone();
        inner.dispatch(req).with_subscriber(logger).await
    }

    /// Wrap in the CORS layer when enabled. This is what the server runs.
    pub fn into_service(self) -> MuxService {
        if self.inner.options.enable_cors {
            Either::A(cors::layer().layer(self))
        } else {
            Either::B(self)
        }
    }
}

impl fmt::Debug for Mux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mux").field("options", &self.inner.options).finish_non_exhaustive()
    }
}

impl<B> tower::Service<http::Request<B>> for Mux
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: fmt::Display,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let mux = self.clone();
        Box::pin(async move { Ok(mux.handle(req).await) })
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

impl Inner {
    async fn dispatch<B>(self: Arc<Self>, req: http::Request<B>) -> Response
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: fmt::Display,
    {
        if let Some(mount) = self.mount_for(req.method(), req.uri().path()) {
            return self.serve_mount(mount, req.uri().path());
        }

        outermost(self.run(req)).await
    }

    async fn run<B>(&self, req: http::Request<B>) -> Response
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: fmt::Display,
    {
        let started = Instant::now();
        let (parts, body) = req.into_parts();
        let (body, body_error) = match body.collect().await {
            Ok(collected) => (collected.to_bytes(), None),
            Err(e) => (Bytes::new(), Some(format!("read body: {e}"))),
        };

        let (handlers, params, unmatched) = match self.routes.lookup(&parts.method, parts.uri.path()) {
            Lookup::Found(handlers, params) => (Some(handlers), params, None),
            Lookup::MethodNotAllowed => (None, Default::default(), Some(StatusCode::METHOD_NOT_ALLOWED)),
            Lookup::NotFound => (None, Default::default(), Some(StatusCode::NOT_FOUND)),
        };

        let exchange = Arc::new(Exchange::new(parts, body, params));
        {
            let mut state = exchange.state();
            state.errors.extend(body_error);
            let journaled = !journal::is_excluded(exchange.uri().path())
                && (unmatched.is_none() || self.options.journal_unmatched);
            if journaled {
                state.journal = Some(journal::correlation_id(exchange.headers()));
            }
        }

        let admitted = match &self.rate {
            Some(gate) if !gate.allow() => {
                let mut state = exchange.state();
                state.payload = Some(TOO_MANY_REQUESTS);
                state.aborted = true;
                false
            }
            _ => true,
        };

        if let (true, Some(handlers)) = (admitted, &handlers) {
            if let Err(fault) = recover::guard(run_chain(handlers, &exchange)).await {
                fault.log();
                {
                    let mut state = exchange.state();
                    state.payload = Some(SERVER_ERROR);
                    state.aborted = true;
                }
                if let Some(notify) = &self.options.panic_notify {
                    recover::notify(notify, &Context::new(Arc::clone(&exchange)), &fault);
                }
            }
        }

        match unmatched {
            Some(status) => self.finish_unmatched(&exchange, status, started),
            None => self.finish(&exchange, started),
        }
    }

    /// Unwind phase for a routed request: envelope, metrics, journal.
    fn finish(&self, exchange: &Exchange, started: Instant) -> Response {
        let (outcome, journal_id, alias) = {
            let mut state = exchange.state();
            (unify::unify(&mut state), state.journal.clone(), state.alias.clone())
        };
        if let Some(reason) = &outcome.reason {
            warn!(reason = %reason, "request aborted");
        }

        let (res, envelope) = unify::write(outcome.envelope, journal_id.as_deref());
        let success = !outcome.aborted && res.status() == StatusCode::OK;

        if let Some(record) = &self.options.record_metrics {
            let metrics = RequestMetrics {
                method: exchange.method().as_str(),
                uri: alias.as_deref().unwrap_or(exchange.uri().path()),
                success,
                http_code: res.status().as_u16(),
                business_code: envelope.as_ref().map_or(0, |e| e.code()),
                cost_seconds: started.elapsed().as_secs_f64(),
            };
            recover::contain("record metrics", || record(&metrics));
        }

        if let Some(id) = journal_id {
            journal::record(id, exchange, &res, envelope, success, started);
        }
        res
    }

    /// Route matching failed: native status, no envelope, no metrics. Only
    /// journaled when `journal_unmatched` is on.
    fn finish_unmatched(&self, exchange: &Exchange, status: StatusCode, started: Instant) -> Response {
        let mut res = response::status(status);
        if status == StatusCode::METHOD_NOT_ALLOWED {
            if let Ok(allow) = HeaderValue::from_str(&self.allowed_methods(exchange.uri().path())) {
                res.headers_mut().insert(ALLOW, allow);
            }
        }

        let journal_id = exchange.state().journal.clone();
        if let Some(id) = journal_id {
            if let Ok(value) = HeaderValue::from_str(&id) {
                res.headers_mut().insert(journal::JOURNAL_HEADER, value);
            }
            journal::record(id, exchange, &res, None, false, started);
        }
        res
    }

    fn allowed_methods(&self, path: &str) -> String {
        Method::ALL
            .into_iter()
            .filter(|m| matches!(self.routes.lookup(&(*m).into(), path), Lookup::Found(..)))
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ── Mounted subsystems ────────────────────────────────────────────────────

    fn mount_for(&self, method: &http::Method, path: &str) -> Option<Mount> {
        if method != http::Method::GET && method != http::Method::HEAD {
            return None;
        }
        let opts = &self.options;
        if !opts.disable_pprof && debug::matches(path) {
            Some(Mount::Pprof)
        } else if !opts.disable_swagger && swagger::matches(path) {
            Some(Mount::Swagger)
        } else if !opts.disable_prometheus && path == "/metrics" {
            Some(Mount::Prometheus)
        } else {
            None
        }
    }

    fn serve_mount(&self, mount: Mount, path: &str) -> Response {
        match mount {
            Mount::Pprof => debug::serve(path),
            Mount::Swagger => swagger::serve(path, &self.openapi),
            Mount::Prometheus => metrics::scrape(&self.options.registry),
        }
    }
}

/// The last panic boundary: whatever escapes `fut` answers `200` with
/// [`SERVER_ERROR`] and no correlation id.
async fn outermost(fut: impl Future<Output = Response>) -> Response {
    match recover::guard(fut).await {
        Ok(res) => res,
        Err(fault) => {
            fault.log();
            unify::write(Some(SERVER_ERROR), None).0
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Builds a [`Mux`]. A logger is mandatory.
///
/// ```rust,no_run
/// use trellis::{Mux, Options, logger};
///
/// # async fn get_user(_: trellis::Context) {}
/// let mux = Mux::builder()
///     .logger(logger::json())
///     .options(Options::new().enable_rate().enable_cors())
///     .group("/api", |g| g.get("/users/{id}", get_user))
///     .build()
///     .expect("valid routes");
/// ```
pub struct MuxBuilder {
    logger: Option<Dispatch>,
    options: Options,
    root: Group,
}

impl Default for MuxBuilder {
    fn default() -> Self {
        Self { logger: None, options: Options::default(), root: Group::new("") }
    }
}

impl MuxBuilder {
    /// Where pipeline and handler events go. Every request runs under it.
    pub fn logger(mut self, logger: impl Into<Dispatch>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Overlay environment [`Settings`] on the current options.
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.options = self.options.apply(settings);
        self
    }

    /// Declare a route group under `prefix`.
    pub fn group(mut self, prefix: &str, build: impl FnOnce(Group) -> Group) -> Self {
        self.root = self.root.group(prefix, build);
        self
    }

    pub fn build(self) -> Result<Mux> {
        let logger = self.logger.ok_or(Error::LoggerRequired)?;
        let options = self.options;
        recover::install_stack_capture();

        let root = self.root.group("/h", |h| {
            h.with(disable_journal)
                .get("/ping", health::ping)
                .get("/info", health::info)
        });
        let routes = Routes::build(root.into_routes())?;

        let openapi = options
            .openapi
            .clone()
            .unwrap_or_else(|| swagger::generate(routes.paths()));
        let rate = options
            .enable_rate
            .then(|| Arc::new(RateGate::new(options.rate_burst, options.rate_per_second)));

        tracing::dispatcher::with_default(&logger, || {
            if !options.disable_pprof { info!("register pprof"); }
            if !options.disable_swagger { info!("register swagger"); }
            if !options.disable_prometheus { info!("register prometheus"); }
            if options.enable_cors { info!("register cors"); }
            if options.enable_rate {
                info!(burst = options.rate_burst, per_second = options.rate_per_second, "register rate");
            }
            if options.panic_notify.is_some() { info!("register panic notify"); }
        });

        Ok(Mux { inner: Arc::new(Inner { logger, options, routes, rate, openapi }) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use http_body_util::BodyExt;

    async fn setup_fails() -> Response {
        panic!("pipeline setup failed")
    }

    #[tokio::test]
    async fn outer_boundary_answers_server_error_without_request_id() {
        recover::install_stack_capture();

        let res = outermost(setup_fails()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains_key(journal::JOURNAL_HEADER));

        let body = res.into_body().collect().await.unwrap().to_bytes();
        let env: Envelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(env.code(), 10101);
        assert_eq!(env.request_id(), "");
    }

    #[tokio::test]
    async fn outer_boundary_passes_normal_responses_through() {
        let res = outermost(async { response::status(StatusCode::NOT_FOUND) }).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
