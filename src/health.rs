//! Built-in probe handlers, mounted under `/h` with journaling disabled.
//!
//! | Path | Data |
//! |---|---|
//! | `GET /h/ping` | `"pong"` |
//! | `GET /h/info` | `{"header": {...}, "ts": "<RFC 3339>"}` |
//!
//! Both answer through the normal envelope, so a load balancer can check
//! `code == 0`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::Context;
use crate::envelope::{Envelope, OK, SERVER_ERROR};
use crate::middleware::journal::header_map;

/// Liveness: if the process can answer at all, it is alive.
pub async fn ping(_ctx: Context) -> Envelope {
    OK.with_data("pong")
}

#[derive(Serialize)]
struct Info {
    header: BTreeMap<String, Vec<String>>,
    ts: DateTime<Utc>,
}

/// Echo the request headers and the server clock.
pub async fn info(ctx: Context) -> Result<Envelope, Envelope> {
    let info = Info { header: header_map(ctx.headers()), ts: Utc::now() };
    OK.with_json(&info).map_err(|_| SERVER_ERROR)
}
