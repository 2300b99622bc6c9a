//! End-to-end pipeline behavior, driven through the public `Mux` API.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use prometheus::Registry;
use serde_json::Value;
use tower::ServiceExt;
use tracing::Dispatch;
use trellis::envelope::{AUTHORIZATION_ERROR, OK};
use trellis::metrics::{PrometheusMetrics, RequestMetrics};
use trellis::middleware::journal::Journal;
use trellis::{
    Chain, Context, Envelope, Error, Mux, Options, Settings, alias_for_metrics, logger,
    wrap_auth_handler,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Collects everything the mux logs.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn dispatch(&self) -> Dispatch {
        let capture = self.clone();
        logger::json_to(move || capture.clone())
    }

    fn events(&self) -> Vec<Value> {
        let buf = self.0.lock();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    fn journals(&self) -> Vec<Journal> {
        self.events()
            .iter()
            .filter(|e| e["fields"]["message"] == "interceptor")
            .filter_map(|e| e["fields"]["journal"].as_str())
            .filter_map(|j| serde_json::from_str(j).ok())
            .collect()
    }
}

fn get(uri: &str) -> Request<Full<Bytes>> {
    Request::get(uri).body(Full::default()).unwrap()
}

async fn send(mux: &Mux, req: Request<Full<Bytes>>) -> (http::response::Parts, Bytes) {
    let (parts, body) = mux.handle(req).await.into_parts();
    (parts, body.collect().await.unwrap().to_bytes())
}

async fn envelope(mux: &Mux, req: Request<Full<Bytes>>) -> Envelope {
    let (parts, body) = send(mux, req).await;
    assert_eq!(parts.status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

async fn hello(ctx: Context) -> Envelope {
    OK.with_data(format!("hello {}", ctx.param("name").unwrap_or_default()))
}

async fn boom(_ctx: Context) -> Envelope {
    panic!("handler blew up")
}

fn mux_with(capture: &Capture, options: Options) -> Mux {
    Mux::builder()
        .logger(capture.dispatch())
        .options(options.registry(Registry::new()))
        .group("/api", |g| {
            g.get("/hello/{name}", hello)
                .get("/boom", boom)
                .get("/users/{id}", Chain::new().then(alias_for_metrics("/api/users/:id")).then(hello))
                .post("/only-post", hello)
        })
        .group("", |g| g.get("/favicon.ico", hello))
        .build()
        .unwrap()
}

// ── Built-in routes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_and_info_answer_without_journal() {
    let capture = Capture::default();
    let mux = mux_with(&capture, Options::new());

    let pong = envelope(&mux, get("/h/ping")).await;
    assert_eq!(pong.code(), 0);
    assert_eq!(pong.data(), "pong");
    assert_eq!(pong.request_id(), "");

    let before = Utc::now();
    let info = envelope(&mux, Request::get("/h/info").header("x-caller", "1").body(Full::default()).unwrap()).await;
    let after = Utc::now();
    assert_eq!(info.code(), 0);
    assert_eq!(info.data()["header"]["x-caller"][0], "1");
    let ts = DateTime::parse_from_rfc3339(info.data()["ts"].as_str().unwrap()).unwrap();
    assert!(before <= ts && ts <= after, "{before} <= {ts} <= {after}");

    assert!(capture.journals().is_empty());
}

#[tokio::test]
async fn build_requires_a_logger() {
    let err = Mux::builder().build().unwrap_err();
    assert!(matches!(err, Error::LoggerRequired));
}

#[tokio::test]
async fn conflicting_routes_fail_the_build() {
    let err = Mux::builder()
        .logger(Capture::default().dispatch())
        .group("/h", |g| g.get("/ping", hello))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRoute { .. }));
}

// ── Journal ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn correlation_id_round_trips() {
    let capture = Capture::default();
    let mux = mux_with(&capture, Options::new());

    let req = Request::get("/api/hello/ada?x=a+b%21")
        .header("journal-id", "abc123")
        .body(Full::default())
        .unwrap();
    let (parts, body) = send(&mux, req).await;
    let env: Envelope = serde_json::from_slice(&body).unwrap();

    assert_eq!(parts.headers["journal-id"], "abc123");
    assert_eq!(env.request_id(), "abc123");
    assert_eq!(env.data(), "hello ada");

    let journals = capture.journals();
    assert_eq!(journals.len(), 1);
    let journal = &journals[0];
    assert_eq!(journal.id, "abc123");
    assert!(journal.success);
    assert!(journal.cost_seconds >= 0.0);
    let request = journal.request.as_ref().unwrap();
    assert_eq!(request.ttl, "un-limit");
    assert_eq!(request.decoded_url, "/api/hello/ada?x=a b!");
    let response = journal.response.as_ref().unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body.as_ref().map(Envelope::code), Some(0));
}

#[tokio::test]
async fn fresh_id_is_generated_when_header_missing() {
    let capture = Capture::default();
    let mux = mux_with(&capture, Options::new());

    let (parts, _) = send(&mux, get("/api/hello/bob")).await;
    let id = parts.headers["journal-id"].to_str().unwrap().to_owned();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(capture.journals()[0].id, id);
}

#[tokio::test]
async fn excluded_paths_are_not_journaled() {
    let capture = Capture::default();
    let mux = mux_with(&capture, Options::new());

    let env = envelope(&mux, get("/favicon.ico")).await;
    assert_eq!(env.request_id(), "");
    assert!(capture.journals().is_empty());
}

// ── Panics ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handler_panic_answers_server_error_and_notifies_once() {
    let capture = Capture::default();
    let seen: Arc<Mutex<Vec<(String, String, String)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let options = Options::new().panic_notify(move |ctx, msg, stack| {
        sink.lock().push((ctx.path().to_owned(), msg.to_owned(), stack.to_owned()));
    });
    let mux = mux_with(&capture, options);

    let env = envelope(&mux, get("/api/boom")).await;
    assert_eq!(env.code(), 10101);
    assert_eq!(env.msg(), "Internal Server Error");
    assert!(!env.request_id().is_empty());

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "/api/boom");
    assert_eq!(seen[0].1, "handler blew up");
    assert!(!seen[0].2.is_empty());

    let journals = capture.journals();
    assert_eq!(journals.len(), 1);
    assert!(!journals[0].success);
    assert!(capture.events().iter().any(|e| e["fields"]["message"] == "got panic"));
}

#[tokio::test]
async fn panicking_notifier_is_contained() {
    let capture = Capture::default();
    let options = Options::new().panic_notify(|_, _, _| panic!("notifier blew up too"));
    let mux = mux_with(&capture, options);

    let env = envelope(&mux, get("/api/boom")).await;
    assert_eq!(env.code(), 10101);
    assert!(capture.events().iter().any(|e| e["fields"]["message"] == "panic notify panicked"));

    // The mux keeps serving.
    assert_eq!(envelope(&mux, get("/api/hello/x")).await.code(), 0);
}

#[tokio::test]
async fn retained_context_cannot_touch_a_finished_request() {
    let capture = Capture::default();
    let kept: Arc<Mutex<Option<Context>>> = Arc::default();
    let slot = Arc::clone(&kept);
    let mux = Mux::builder()
        .logger(capture.dispatch())
        .options(Options::new().registry(Registry::new()))
        .group("", |g| {
            g.get("/keep", move |ctx: Context| {
                let slot = Arc::clone(&slot);
                async move {
                    *slot.lock() = Some(ctx);
                    OK.with_data("kept")
                }
            })
        })
        .build()
        .unwrap();

    let (_, body) = send(&mux, get("/keep")).await;
    let late = kept.lock().take().unwrap();
    late.abort_with_error(AUTHORIZATION_ERROR);
    late.set_payload(OK.with_data("too late"));
    drop(late);

    let env: Envelope = serde_json::from_slice(&body).unwrap();
    assert_eq!(env.data(), "kept");
    assert_eq!(capture.journals().len(), 1);
    assert_eq!(capture.journals()[0].response.as_ref().and_then(|r| r.body.as_ref()).map(Envelope::data).cloned(), Some("kept".into()));

    // The next request gets its own exchange.
    assert_eq!(envelope(&mux, get("/keep")).await.data(), "kept");
}

// ── Chain outcomes ────────────────────────────────────────────────────────────

#[tokio::test]
async fn auth_failure_aborts_with_its_envelope() {
    let capture = Capture::default();
    let mux = Mux::builder()
        .logger(capture.dispatch())
        .options(Options::new().registry(Registry::new()))
        .group("/admin", |g| {
            g.with(wrap_auth_handler(|ctx: Context| async move {
                match ctx.header("authorization") {
                    Some("let-me-in") => Ok((1, "root".to_owned())),
                    _ => Err(AUTHORIZATION_ERROR),
                }
            }))
            .get("/whoami", |ctx: Context| async move {
                OK.with_data(ctx.user_name().unwrap_or_default())
            })
        })
        .build()
        .unwrap();

    let denied = envelope(&mux, get("/admin/whoami")).await;
    assert_eq!(denied.code(), 10103);

    let req = Request::get("/admin/whoami").header("authorization", "let-me-in").body(Full::default()).unwrap();
    let allowed = envelope(&mux, req).await;
    assert_eq!(allowed.code(), 0);
    assert_eq!(allowed.data(), "root");

    assert!(capture.events().iter().any(|e| e["fields"]["message"] == "request aborted"
        && e["fields"]["reason"] == "Authorization Error"));
}

// ── Rate gate ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_gate_rejects_past_the_burst() {
    let capture = Capture::default();
    let mux = mux_with(&capture, Options::new().enable_rate().rate(100, 1.0));

    let mut limited = 0;
    for _ in 0..101 {
        let env = envelope(&mux, get("/api/hello/x")).await;
        if env.code() == 10102 {
            assert_eq!(env.msg(), "Too Many Requests");
            limited += 1;
        }
    }
    assert!(limited >= 1);
}

#[tokio::test]
async fn rate_gate_is_off_by_default() {
    let capture = Capture::default();
    let mux = mux_with(&capture, Options::new().rate(1, 0.001));

    for _ in 0..5 {
        assert_eq!(envelope(&mux, get("/api/hello/x")).await.code(), 0);
    }
}

#[tokio::test]
async fn throttled_request_still_unwinds() {
    let capture = Capture::default();
    let seen: Arc<Mutex<Vec<(bool, i32)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let options = Options::new()
        .enable_rate()
        .rate(1, 0.0)
        .record_metrics(move |m: &RequestMetrics<'_>| sink.lock().push((m.success, m.business_code)));
    let mux = mux_with(&capture, options);

    assert_eq!(envelope(&mux, get("/api/hello/x")).await.code(), 0);

    let req = Request::get("/api/hello/x").header("journal-id", "throttled-1").body(Full::default()).unwrap();
    let (parts, body) = send(&mux, req).await;
    let env: Envelope = serde_json::from_slice(&body).unwrap();
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(parts.headers["journal-id"], "throttled-1");
    assert_eq!(env.code(), 10102);
    assert_eq!(env.request_id(), "throttled-1");

    assert_eq!(*seen.lock(), vec![(true, 0), (false, 10102)]);

    let journals = capture.journals();
    assert_eq!(journals.len(), 2);
    let last = &journals[1];
    assert_eq!(last.id, "throttled-1");
    assert!(!last.success);
    assert_eq!(last.response.as_ref().and_then(|r| r.body.as_ref()).map(Envelope::code), Some(10102));
}

#[tokio::test]
async fn empty_environment_keeps_the_rate_gate_on() {
    let capture = Capture::default();
    let mux = Mux::builder()
        .logger(capture.dispatch())
        .options(Options::new().enable_rate().rate(1, 0.0).registry(Registry::new()))
        .settings(&Settings::from_lookup(|_| None).unwrap())
        .group("", |g| g.get("/hi", hello))
        .build()
        .unwrap();

    let mut codes = Vec::new();
    for _ in 0..3 {
        codes.push(envelope(&mux, get("/hi")).await.code());
    }
    assert_eq!(codes, vec![0, 10102, 10102]);
}

// ── Metrics ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn metrics_hook_sees_alias_and_outcome() {
    let capture = Capture::default();
    let seen: Arc<Mutex<Vec<(String, String, bool, i32)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let options = Options::new().record_metrics(move |m: &RequestMetrics<'_>| {
        sink.lock().push((m.method.to_owned(), m.uri.to_owned(), m.success, m.business_code));
    });
    let mux = mux_with(&capture, options);

    envelope(&mux, get("/api/users/42")).await;
    envelope(&mux, get("/api/hello/x")).await;
    envelope(&mux, get("/api/boom")).await;

    let seen = seen.lock();
    assert_eq!(seen[0], ("GET".to_owned(), "/api/users/:id".to_owned(), true, 0));
    assert_eq!(seen[1].1, "/api/hello/x");
    assert_eq!(seen[2], ("GET".to_owned(), "/api/boom".to_owned(), false, 10101));
}

#[tokio::test]
async fn panicking_metrics_hook_keeps_envelope_and_journal() {
    let capture = Capture::default();
    let options = Options::new().record_metrics(|_: &RequestMetrics<'_>| panic!("metrics sink down"));
    let mux = mux_with(&capture, options);

    let req = Request::get("/api/hello/ada").header("journal-id", "m-1").body(Full::default()).unwrap();
    let env = envelope(&mux, req).await;
    assert_eq!(env.code(), 0);
    assert_eq!(env.data(), "hello ada");
    assert_eq!(env.request_id(), "m-1");

    let journals = capture.journals();
    assert_eq!(journals.len(), 1);
    assert!(journals[0].success);
    assert!(capture.events().iter().any(|e| e["fields"]["message"] == "record metrics panicked"));
}

#[tokio::test]
async fn prometheus_endpoint_exposes_recorded_series() {
    let capture = Capture::default();
    let registry = Registry::new();
    let metrics = PrometheusMetrics::register(&registry).unwrap();
    let mux = Mux::builder()
        .logger(capture.dispatch())
        .options(Options::new().registry(registry).record_metrics(metrics.recorder()))
        .group("", |g| g.get("/hi", hello))
        .build()
        .unwrap();

    envelope(&mux, get("/hi")).await;
    let (parts, body) = send(&mux, get("/metrics")).await;
    let text = String::from_utf8_lossy(&body);

    assert_eq!(parts.status, StatusCode::OK);
    assert!(text.contains("trellis_requests_total"));
    assert!(text.contains(r#"path="/hi""#));
    assert!(capture.journals().len() == 1, "scrape must not be journaled");
}

#[tokio::test]
async fn disabled_mounts_fall_through_to_routing() {
    let capture = Capture::default();
    let options = Options::new().disable_prometheus().disable_pprof().disable_swagger();
    let mux = mux_with(&capture, options);

    for path in ["/metrics", "/debug/pprof/", "/swagger/doc.json"] {
        let (parts, body) = send(&mux, get(path)).await;
        assert_eq!(parts.status, StatusCode::NOT_FOUND, "{path}");
        assert!(body.is_empty());
    }
}

#[tokio::test]
async fn swagger_doc_lists_routes() {
    let capture = Capture::default();
    let mux = mux_with(&capture, Options::new());

    let (parts, body) = send(&mux, get("/swagger/doc.json")).await;
    assert_eq!(parts.status, StatusCode::OK);
    let doc: Value = serde_json::from_slice(&body).unwrap();
    assert!(doc["paths"]["/api/hello/{name}"]["get"].is_object());
    assert!(doc["paths"]["/h/ping"]["get"].is_object());
}

// ── Unmatched requests ────────────────────────────────────────────────────────

#[tokio::test]
async fn unmatched_requests_keep_native_status() {
    let capture = Capture::default();
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let options = Options::new().record_metrics(move |_: &RequestMetrics<'_>| *counter.lock() += 1);
    let mux = mux_with(&capture, options);

    let (parts, body) = send(&mux, get("/nowhere")).await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());

    let (parts, body) = send(&mux, get("/api/only-post")).await;
    assert_eq!(parts.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(parts.headers["allow"], "POST");
    assert!(body.is_empty());

    assert_eq!(*calls.lock(), 0);
    assert!(capture.journals().is_empty());
}

#[tokio::test]
async fn unmatched_requests_are_journaled_when_asked() {
    let capture = Capture::default();
    let mux = mux_with(&capture, Options::new().journal_unmatched(true));

    let (parts, _) = send(&mux, get("/nowhere")).await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);

    let journals = capture.journals();
    assert_eq!(journals.len(), 1);
    assert!(!journals[0].success);
    assert_eq!(journals[0].response.as_ref().map(|r| r.status_code), Some(404));
}

// ── CORS ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cors_mirrors_origin_when_enabled() {
    let capture = Capture::default();
    let svc = mux_with(&capture, Options::new().enable_cors()).into_service();

    let preflight = Request::options("/api/hello/x")
        .header("origin", "https://app.example")
        .header("access-control-request-method", "GET")
        .header("access-control-request-headers", "x-token")
        .body(Full::<Bytes>::default())
        .unwrap();
    let res = svc.clone().oneshot(preflight).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["access-control-allow-origin"], "https://app.example");
    assert_eq!(res.headers()["access-control-allow-credentials"], "true");
    assert_eq!(res.headers()["access-control-allow-headers"], "x-token");

    let simple = Request::get("/api/hello/x")
        .header("origin", "https://app.example")
        .body(Full::<Bytes>::default())
        .unwrap();
    let res = svc.oneshot(simple).await.unwrap();
    assert_eq!(res.headers()["access-control-allow-origin"], "https://app.example");
}

#[tokio::test]
async fn cors_is_absent_by_default() {
    let capture = Capture::default();
    let svc = mux_with(&capture, Options::new()).into_service();

    let req = Request::get("/api/hello/x")
        .header("origin", "https://app.example")
        .body(Full::<Bytes>::default())
        .unwrap();
    let res = svc.oneshot(req).await.unwrap();
    assert!(!res.headers().contains_key("access-control-allow-origin"));
}
