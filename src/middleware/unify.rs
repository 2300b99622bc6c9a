//! Response unifier: picks the one envelope a request answers with and
//! writes it.

use http::header::HeaderValue;
use tracing::error;

use crate::context::State;
use crate::envelope::Envelope;
use crate::middleware::journal::JOURNAL_HEADER;
use crate::response::{self, Response};

/// What the handler chain left behind.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub(crate) envelope: Option<Envelope>,
    pub(crate) aborted: bool,
    /// Every abort reason joined, framework errors first. `None` when the
    /// request was not aborted or nobody said why.
    pub(crate) reason: Option<String>,
}

/// Drain the request state into an [`Outcome`].
///
/// An aborted request answers with its abort error, falling back to the
/// payload (the rate gate aborts with a payload and no error). A request
/// that ran to completion answers with its payload.
pub(crate) fn unify(state: &mut State) -> Outcome {
    if !state.aborted {
        return Outcome { envelope: state.payload.take(), aborted: false, reason: None };
    }

    let mut reasons = std::mem::take(&mut state.errors);
    if let Some(err) = &state.abort_error {
        reasons.push(err.msg().to_owned());
    }
    let envelope = state.abort_error.take().or_else(|| state.payload.take());

    Outcome {
        envelope,
        aborted: true,
        reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
    }
}

/// Write the envelope as a `200 application/json` body.
///
/// With no envelope the response is an empty `200`. The journal id, when
/// present, goes into both the envelope and the `journal-id` header. Returns
/// the envelope exactly as written.
pub(crate) fn write(envelope: Option<Envelope>, journal_id: Option<&str>) -> (Response, Option<Envelope>) {
    let envelope = envelope.map(|e| e.with_request_id(journal_id.unwrap_or_default()));

    let mut res = match &envelope {
        Some(env) => match serde_json::to_vec(env) {
            Ok(body) => response::json(body),
            Err(e) => {
                error!(code = env.code(), "envelope serialization failed: {e}");
                response::status(http::StatusCode::OK)
            }
        },
        None => response::status(http::StatusCode::OK),
    };

    if let Some(value) = journal_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        res.headers_mut().insert(JOURNAL_HEADER, value);
    }

    (res, envelope)
}
