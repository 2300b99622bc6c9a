//! Request journal: one structured record per request, correlated by id.
//!
//! On entry the pipeline adopts the caller's `journal-id` header (so a trace
//! started by an upstream service continues here) or mints a fresh id. On
//! exit it snapshots request and response into a [`Journal`] and emits it as
//! a single `info` event with message `interceptor` and a `journal` field
//! holding the entry as JSON.

use std::collections::BTreeMap;
use std::time::Instant;

use http::header::{HeaderMap, HeaderName};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::context::Exchange;
use crate::envelope::Envelope;
use crate::response::Response;

/// Header carrying the correlation id, inbound and outbound.
pub const JOURNAL_HEADER: HeaderName = HeaderName::from_static("journal-id");

/// Paths that never get a journal entry.
const EXCLUDED_PATHS: [&str; 13] = [
    "/metrics",
    "/debug/pprof/",
    "/debug/pprof/cmdline",
    "/debug/pprof/profile",
    "/debug/pprof/symbol",
    "/debug/pprof/trace",
    "/debug/pprof/allocs",
    "/debug/pprof/block",
    "/debug/pprof/goroutine",
    "/debug/pprof/heap",
    "/debug/pprof/mutex",
    "/debug/pprof/threadcreate",
    "/favicon.ico",
];

pub fn is_excluded(path: &str) -> bool {
    EXCLUDED_PATHS.contains(&path)
}

/// Adopt the inbound correlation id, or mint one.
pub(crate) fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(&JOURNAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

// ── Journal entry ─────────────────────────────────────────────────────────────

/// The logged record of one request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Journal {
    pub id: String,
    pub request: Option<JournalRequest>,
    pub response: Option<JournalResponse>,
    pub success: bool,
    pub cost_seconds: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalRequest {
    pub ttl: String,
    pub method: String,
    pub decoded_url: String,
    pub header: BTreeMap<String, Vec<String>>,
    pub body: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalResponse {
    pub header: BTreeMap<String, Vec<String>>,
    pub status_code: u16,
    pub status: String,
    pub body: Option<Envelope>,
}

/// Finalize and emit the journal for one request.
pub(crate) fn record(
    id: String,
    exchange: &Exchange,
    response: &Response,
    body: Option<Envelope>,
    success: bool,
    started: Instant,
) {
    let status = response.status();
    let journal = Journal {
        id,
        request: Some(JournalRequest {
            ttl: "un-limit".to_owned(),
            method: exchange.method().to_string(),
            decoded_url: decode_url(&request_uri(exchange.uri())),
            header: header_map(exchange.headers()),
            body: String::from_utf8_lossy(exchange.body()).into_owned(),
        }),
        response: Some(JournalResponse {
            header: header_map(response.headers()),
            status_code: status.as_u16(),
            status: status.canonical_reason().unwrap_or_default().to_owned(),
            body,
        }),
        success,
        cost_seconds: started.elapsed().as_secs_f64(),
    };

    match serde_json::to_string(&journal) {
        Ok(journal) => info!(journal = %journal, "interceptor"),
        Err(e) => error!(id = %journal.id, "journal serialization failed: {e}"),
    }
}

/// Path plus query, as the client sent it.
fn request_uri(uri: &http::Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| uri.path().to_owned())
}

/// Query-unescape: `+` is a space and `%XX` is decoded. Falls back to the raw
/// string when the result is not UTF-8.
pub(crate) fn decode_url(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match percent_decode_str(&spaced).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_owned(),
    }
}

/// Headers as `name -> [values]`, in name order.
pub(crate) fn header_map(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_owned())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}
