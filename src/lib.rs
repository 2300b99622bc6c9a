//! # trellis
//!
//! An HTTP scaffold for JSON services. Every route gets the same pipeline
//! for free: a request journal with a correlation id, panic recovery, an
//! optional token-bucket rate gate, a unified `{code, msg, data, request_id}`
//! envelope and a metrics hook.
//!
//! ## What a request goes through
//!
//! 1. Mounted subsystems (`/debug/pprof/*`, `/swagger/*`, `/metrics`) answer
//!    first and skip everything below.
//! 2. A correlation id is taken from the `journal-id` header or generated.
//! 3. The rate gate, when enabled, turns excess requests into
//!    [`TOO_MANY_REQUESTS`](envelope::TOO_MANY_REQUESTS).
//! 4. The route's handler chain runs; a panic becomes
//!    [`SERVER_ERROR`](envelope::SERVER_ERROR) and reaches the panic notifier.
//! 5. The payload is written as the envelope, the metrics hook is called and
//!    one journal line is logged.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use trellis::{Context, Envelope, Mux, Options, Server, envelope, logger};
//!
//! #[tokio::main]
//! async fn main() -> trellis::Result<()> {
//!     let mux = Mux::builder()
//!         .logger(logger::json())
//!         .options(Options::new().enable_rate())
//!         .group("/users", |g| g.get("/{id}", get_user))
//!         .build()?;
//!
//!     Server::bind("0.0.0.0:3000").serve(mux).await
//! }
//!
//! async fn get_user(ctx: Context) -> Envelope {
//!     let id = ctx.param("id").unwrap_or_default();
//!     envelope::OK.with_data(serde_json::json!({ "id": id }))
//! }
//! ```

mod context;
mod debug;
mod error;
mod handler;
mod method;
mod mux;
mod options;
mod response;
mod router;
mod server;
mod swagger;

pub mod envelope;
pub mod health;
pub mod logger;
pub mod metrics;
pub mod middleware;

pub use context::Context;
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use handler::{Chain, Handler, Identity, IntoOutcome, alias_for_metrics, disable_journal, wrap_auth_handler};
pub use method::Method;
pub use mux::{Mux, MuxBuilder, MuxService};
pub use options::{Options, PanicNotify, Settings};
pub use response::Response;
pub use router::Group;
pub use server::Server;
