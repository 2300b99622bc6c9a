//! Per-request context handed to route handlers.
//!
//! Two layers, mirroring how the pipeline runs:
//!
//! - [`Exchange`] is the pipeline-scoped state of one request: the request
//!   snapshot plus everything handlers and middleware write (payload, abort
//!   state, alias, journal id, identity). The pipeline owns it for the
//!   request's dynamic extent.
//! - [`Context`] is the handle a single handler invocation receives. A fresh
//!   one is built per invocation and dropped when that handler returns; the
//!   next handler in the chain gets its own, pointing at the same exchange.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Uri};
use parking_lot::Mutex;

use crate::envelope::Envelope;

/// Mutable request state. Written by handlers and middleware, read by the
/// unwind phase.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) payload: Option<Envelope>,
    pub(crate) abort_error: Option<Envelope>,
    pub(crate) errors: Vec<String>,
    pub(crate) aborted: bool,
    pub(crate) alias: Option<String>,
    pub(crate) journal: Option<String>,
    pub(crate) user_id: Option<i64>,
    pub(crate) user_name: Option<String>,
}

/// The pipeline-scoped request state.
#[doc(hidden)]
#[derive(Debug)]
pub struct Exchange {
    method: http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    state: Mutex<State>,
}

impl Exchange {
    pub(crate) fn new(parts: http::request::Parts, body: Bytes, params: HashMap<String, String>) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params,
            state: Mutex::new(State::default()),
        }
    }

    pub(crate) fn state(&self) -> parking_lot::MutexGuard<'_, State> {
        self.state.lock()
    }

    pub(crate) fn method(&self) -> &http::Method { &self.method }
    pub(crate) fn uri(&self) -> &Uri { &self.uri }
    pub(crate) fn headers(&self) -> &HeaderMap { &self.headers }
    pub(crate) fn body(&self) -> &Bytes { &self.body }
}

/// The request as seen by one handler invocation.
///
/// Handlers signal outcomes by mutating the context ([`set_payload`],
/// [`abort_with_error`]) or by returning an [`IntoOutcome`] value, which the
/// chain applies the same way.
///
/// A `Context` is owned and `Send`, so nothing stops a handler from moving
/// it into a spawned task. Once the unwind phase has written the response
/// it is inert: reads still see the request, but writes reach state that is
/// never read again and cannot change the response, journal or metrics.
///
/// [`set_payload`]: Context::set_payload
/// [`abort_with_error`]: Context::abort_with_error
/// [`IntoOutcome`]: crate::IntoOutcome
pub struct Context {
    exchange: Arc<Exchange>,
}

impl Context {
    pub(crate) fn new(exchange: Arc<Exchange>) -> Self {
        Self { exchange }
    }

    pub fn method(&self) -> &http::Method { &self.exchange.method }
    pub fn uri(&self) -> &Uri { &self.exchange.uri }
    pub fn path(&self) -> &str { self.exchange.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.exchange.headers }

    /// Raw request body.
    pub fn raw_data(&self) -> &Bytes { &self.exchange.body }

    /// Header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.exchange.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `ctx.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.exchange.params.get(key).map(String::as_str)
    }

    /// Set the envelope this request answers with.
    pub fn set_payload(&self, payload: Envelope) {
        self.exchange.state().payload = Some(payload);
    }

    pub fn payload(&self) -> Option<Envelope> {
        self.exchange.state().payload.clone()
    }

    /// Stop the handler chain. Later handlers do not run.
    pub fn abort(&self) {
        self.exchange.state().aborted = true;
    }

    /// Stop the handler chain and answer with `err`.
    pub fn abort_with_error(&self, err: Envelope) {
        let mut state = self.exchange.state();
        state.aborted = true;
        state.abort_error = Some(err);
    }

    pub fn is_aborted(&self) -> bool {
        self.exchange.state().aborted
    }

    /// Record a framework-level error. Errors are merged into the abort
    /// reason logged at request end; they do not abort on their own.
    pub fn error(&self, err: impl fmt::Display) {
        self.exchange.state().errors.push(err.to_string());
    }

    /// Correlation id of this request, `None` when journaling is off.
    pub fn journal_id(&self) -> Option<String> {
        self.exchange.state().journal.clone()
    }

    pub fn alias(&self) -> Option<String> {
        self.exchange.state().alias.clone()
    }

    /// Caller id set by a [`wrap_auth_handler`](crate::wrap_auth_handler) earlier in the chain.
    pub fn user_id(&self) -> Option<i64> {
        self.exchange.state().user_id
    }

    pub fn user_name(&self) -> Option<String> {
        self.exchange.state().user_name.clone()
    }

    pub(crate) fn disable_journal(&self) {
        self.exchange.state().journal = None;
    }

    pub(crate) fn set_alias(&self, alias: String) {
        self.exchange.state().alias = Some(alias);
    }

    pub(crate) fn set_user(&self, id: i64, name: String) {
        let mut state = self.exchange.state();
        state.user_id = Some(id);
        state.user_name = Some(name);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.exchange.method)
            .field("uri", &self.exchange.uri)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_exchange(method: http::Method, uri: &str) -> Arc<Exchange> {
    let (parts, ()) = http::Request::builder()
        .method(method)
        .uri(uri)
        .header("x-test", "1")
        .body(())
        .unwrap()
        .into_parts();
    Arc::new(Exchange::new(parts, Bytes::from_static(b"{}"), HashMap::new()))
}
