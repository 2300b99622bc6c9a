//! Unified error type.

use thiserror::Error;

/// The error type returned by trellis's fallible operations.
///
/// Application-level failures (bad input, rate limiting, panics inside
/// handlers) never surface here: they become [`Envelope`](crate::Envelope)
/// business codes inside a `200` response. This type covers infrastructure
/// and construction failures only.
#[derive(Debug, Error)]
pub enum Error {
    /// Binding or accepting on the listener failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The bind address is not a valid `host:port`.
    #[error("invalid socket address `{addr}`")]
    InvalidAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// [`MuxBuilder::build`](crate::MuxBuilder::build) was called without a logger.
    #[error("logger required")]
    LoggerRequired,

    /// A route path was rejected by the radix tree (conflict or bad syntax).
    #[error("invalid route `{path}`: {source}")]
    InvalidRoute {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    /// A configuration value could not be used.
    #[error("config: {0}")]
    Config(String),

    /// Registering a metric collector failed.
    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Shorthand for `Result<T, trellis::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
