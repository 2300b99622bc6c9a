//! CORS policy applied when [`Options::enable_cors`](crate::Options::enable_cors) is set.
//!
//! Any origin, credentials allowed. Because browsers reject a wildcard
//! origin on credentialed requests, the caller's `Origin` and requested
//! headers are mirrored back instead of `*`.

use http::Method;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

pub(crate) fn layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::HEAD,
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
