//! Logger construction.
//!
//! A [`Mux`](crate::Mux) is built with a [`Dispatch`]: every request future
//! runs under it, so the journal, panic reports and handler events all land
//! in the same place. The helpers here build the JSON dispatch trellis
//! expects; anything else that converts into a `Dispatch` works too.

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// JSON lines on stdout, filtered by `RUST_LOG` (default `info`).
pub fn json() -> Dispatch {
    json_to(std::io::stdout)
}

/// JSON lines to an arbitrary writer, filtered by `RUST_LOG` (default `info`).
pub fn json_to<W>(writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    Dispatch::new(subscriber)
}

/// The process-wide default dispatch, for callers that already installed a
/// global subscriber.
pub fn global() -> Dispatch {
    tracing::dispatcher::get_default(Dispatch::clone)
}
