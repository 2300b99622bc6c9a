//! The unified JSON response envelope and the built-in business codes.
//!
//! Every routed request that produces a result answers `200 OK` with one of
//! these:
//!
//! ```json
//! {"code": 0, "msg": "OK", "data": "pong", "request_id": "5f0c..."}
//! ```
//!
//! `code` is the business code. It, not the transport status, tells the
//! client whether the call succeeded. `request_id` is the journal id of the
//! request (empty when journaling is off for the route).

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Business code, message, data and correlation id of one response.
///
/// An `Envelope` doubles as the application error type: handlers return
/// `Err(envelope)` (or call [`Context::abort_with_error`]) to fail a request
/// with a business code.
///
/// [`Context::abort_with_error`]: crate::Context::abort_with_error
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{msg} (code {code})")]
pub struct Envelope {
    code: i32,
    msg: Cow<'static, str>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    request_id: String,
}

/// Success.
pub const OK: Envelope = Envelope::from_static(0, "OK");

/// A handler panicked. The panic detail is logged, never sent.
pub const SERVER_ERROR: Envelope = Envelope::from_static(10101, "Internal Server Error");

/// The rate gate rejected the request.
pub const TOO_MANY_REQUESTS: Envelope = Envelope::from_static(10102, "Too Many Requests");

/// An auth handler wrapped with [`wrap_auth_handler`](crate::wrap_auth_handler)
/// refused the caller without supplying its own envelope.
pub const AUTHORIZATION_ERROR: Envelope = Envelope::from_static(10103, "Authorization Error");

impl Envelope {
    pub fn new(code: i32, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code, msg: msg.into(), data: Value::Null, request_id: String::new() }
    }

    const fn from_static(code: i32, msg: &'static str) -> Self {
        Self { code, msg: Cow::Borrowed(msg), data: Value::Null, request_id: String::new() }
    }

    /// Attach a payload. Use [`serde_json::json!`] or any `Into<Value>`.
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }

    /// Attach any serializable payload.
    pub fn with_json<T: Serialize>(mut self, data: &T) -> Result<Self, serde_json::Error> {
        self.data = serde_json::to_value(data)?;
        Ok(self)
    }

    pub(crate) fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn code(&self) -> i32 { self.code }
    pub fn msg(&self) -> &str { &self.msg }
    pub fn data(&self) -> &Value { &self.data }
    pub fn request_id(&self) -> &str { &self.request_id }

    /// `true` for code `0`.
    pub fn is_ok(&self) -> bool { self.code == OK.code }
}
