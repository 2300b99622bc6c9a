//! Minimal trellis example: a small user API behind the full pipeline.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/h/ping
//!   curl -H 'journal-id: abc123' http://localhost:3000/api/users/42
//!   curl -H 'authorization: Bearer letmein' -X DELETE http://localhost:3000/api/users/42
//!   curl http://localhost:3000/api/boom
//!   curl http://localhost:3000/metrics

use std::sync::Arc;

use prometheus::Registry;
use trellis::envelope::{AUTHORIZATION_ERROR, OK};
use trellis::metrics::PrometheusMetrics;
use trellis::{Chain, Context, Envelope, Mux, Options, Server, Settings, alias_for_metrics, logger, wrap_auth_handler};

#[tokio::main]
async fn main() -> trellis::Result<()> {
    let settings = Settings::from_env()?;
    let registry = Registry::new();
    let metrics = PrometheusMetrics::register(&registry)?;

    let options = Options::new()
        .registry(registry)
        .record_metrics(metrics.recorder())
        .panic_notify(|ctx, msg, _stack| eprintln!("panic on {}: {msg}", ctx.path()));

    let mux = Mux::builder()
        .logger(logger::json())
        .options(options)
        .settings(&settings)
        .group("/api", |api| {
            api.get("/users/{id}", Chain::new().then(alias_for_metrics("/api/users/:id")).then(get_user))
                .get("/boom", boom)
                .group("/admin", |admin| {
                    admin
                        .with(wrap_auth_handler(authenticate))
                        .delete("/users/{id}", delete_user)
                })
        })
        .build()?;

    Server::bind(settings.addr).serve(mux).await
}

async fn get_user(ctx: Context) -> Envelope {
    let id = ctx.param("id").unwrap_or_default();
    OK.with_data(serde_json::json!({ "id": id, "name": "alice" }))
}

async fn delete_user(ctx: Context) -> Envelope {
    let by = ctx.user_name().unwrap_or_default();
    OK.with_data(serde_json::json!({ "deleted": ctx.param("id"), "by": by }))
}

async fn boom(_ctx: Context) -> Envelope {
    let users: Arc<Vec<&str>> = Arc::new(Vec::new());
    OK.with_data(users[0])
}

async fn authenticate(ctx: Context) -> Result<(i64, String), Envelope> {
    match ctx.header("authorization") {
        Some("Bearer letmein") => Ok((1, "admin".to_owned())),
        _ => Err(AUTHORIZATION_ERROR),
    }
}
