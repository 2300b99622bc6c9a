//! Outgoing HTTP response type and the small set of builders the pipeline
//! and the mounted subsystems need.
//!
//! Route handlers never build these directly: they produce an
//! [`Envelope`](crate::Envelope) and the response unifier writes it.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::StatusCode;
use http_body_util::Full;

/// The response type every trellis service produces.
pub type Response = http::Response<Full<Bytes>>;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content types the framework itself emits.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    Prometheus,   // text/plain; version=0.0.4 (exposition format)
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Html       => "text/html; charset=utf-8",
            Self::Json       => "application/json",
            Self::Prometheus => "text/plain; version=0.0.4",
            Self::Text       => "text/plain; charset=utf-8",
        }
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

pub(crate) fn bytes(status: StatusCode, content_type: ContentType, body: impl Into<Bytes>) -> Response {
    let mut res = http::Response::new(Full::new(body.into()));
    *res.status_mut() = status;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    res
}

pub(crate) fn json(body: Vec<u8>) -> Response {
    bytes(StatusCode::OK, ContentType::Json, body)
}

pub(crate) fn text(status: StatusCode, body: impl Into<String>) -> Response {
    bytes(status, ContentType::Text, body.into())
}

/// Response with no body.
pub(crate) fn status(code: StatusCode) -> Response {
    let mut res = http::Response::new(Full::new(Bytes::new()));
    *res.status_mut() = code;
    res
}
