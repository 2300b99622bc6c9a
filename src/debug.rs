//! Profiling endpoints under `/debug/pprof/`.
//!
//! The path layout follows the conventional pprof index so existing
//! dashboards and scripts find the usual names. What a Rust process can
//! report without an external profiler is served; the rest answer
//! `501 Not Implemented` with a note.
//!
//! | Path | Body |
//! |---|---|
//! | `/debug/pprof/` | index of profile names |
//! | `/debug/pprof/cmdline` | process arguments, NUL separated |
//! | `/debug/pprof/goroutine` | tokio runtime snapshot (workers, alive tasks) |
//! | `/debug/pprof/threadcreate` | runtime worker thread count |

use http::StatusCode;

use crate::response::{self, ContentType, Response};

pub(crate) const PREFIX: &str = "/debug/pprof";

const PROFILES: [&str; 10] = [
    "allocs",
    "block",
    "cmdline",
    "goroutine",
    "heap",
    "mutex",
    "profile",
    "symbol",
    "threadcreate",
    "trace",
];

pub(crate) fn matches(path: &str) -> bool {
    path == PREFIX || path.starts_with("/debug/pprof/")
}

pub(crate) fn serve(path: &str) -> Response {
    let name = path.strip_prefix(PREFIX).unwrap_or(path).trim_start_matches('/');
    match name {
        "" => index(),
        "cmdline" => response::text(StatusCode::OK, std::env::args().collect::<Vec<_>>().join("\0")),
        "goroutine" => runtime_snapshot(),
        "threadcreate" => match tokio::runtime::Handle::try_current() {
            Ok(rt) => response::text(StatusCode::OK, format!("threadcreate profile: total {}\n", rt.metrics().num_workers())),
            Err(_) => no_runtime(),
        },
        other if PROFILES.contains(&other) => response::text(
            StatusCode::NOT_IMPLEMENTED,
            format!("profile `{other}` needs an external profiler attached to this process\n"),
        ),
        _ => response::text(StatusCode::NOT_FOUND, "unknown profile\n"),
    }
}

fn index() -> Response {
    let mut html = String::from("<html><head><title>/debug/pprof/</title></head><body>\n<p>Profiles:</p>\n<ul>\n");
    for name in PROFILES {
        html.push_str(&format!("<li><a href=\"{PREFIX}/{name}\">{name}</a></li>\n"));
    }
    html.push_str("</ul>\n</body></html>\n");
    response::bytes(StatusCode::OK, ContentType::Html, html)
}

fn runtime_snapshot() -> Response {
    let Ok(rt) = tokio::runtime::Handle::try_current() else {
        return no_runtime();
    };
    let metrics = rt.metrics();
    response::text(
        StatusCode::OK,
        format!(
            "runtime flavor: {:?}\nworkers: {}\nalive tasks: {}\n",
            rt.runtime_flavor(),
            metrics.num_workers(),
            metrics.num_alive_tasks(),
        ),
    )
}

fn no_runtime() -> Response {
    response::text(StatusCode::SERVICE_UNAVAILABLE, "no tokio runtime\n")
}
