//! Handler trait, type erasure and handler chains.
//!
//! # How async handlers are stored
//!
//! A route owns a chain of handlers of *different* concrete types, so each is
//! hidden behind a trait object (`dyn ErasedHandler`) and stored uniformly:
//!
//! ```text
//! async fn ping(ctx: Context) -> Envelope { … }   ← user writes this
//!        ↓ group.get("/ping", ping)
//! ping.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(ping))                       ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(exchange)  at request time         ← one vtable dispatch
//!        ↓
//! Box::pin(async { ping(ctx).await.apply(&ctx2) })  ← BoxFuture
//! ```
//!
//! `call` builds the [`Context`] the handler receives. That context is
//! dropped as soon as the handler's future completes, independently of the
//! rest of the chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, Exchange};
use crate::envelope::Envelope;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased handler future.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, exchange: Arc<Exchange>) -> BoxFuture;
}

/// A heap-allocated, type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── IntoOutcome ───────────────────────────────────────────────────────────────

/// What a handler's return value does to the request.
///
/// | Return type | Effect |
/// |---|---|
/// | `()` | nothing; the handler mutated the context itself (or passed) |
/// | `Envelope` | becomes the payload |
/// | `Option<Envelope>` | `Some` becomes the payload |
/// | `Result<Envelope, Envelope>` | `Ok` is the payload, `Err` aborts the chain with it |
/// | `Result<(), Envelope>` | `Err` aborts the chain with it |
/// | `Result<Identity, Envelope>` | `Ok` records the caller, `Err` aborts |
pub trait IntoOutcome {
    fn apply(self, ctx: &Context);
}

impl IntoOutcome for () {
    fn apply(self, _ctx: &Context) {}
}

impl IntoOutcome for Envelope {
    fn apply(self, ctx: &Context) { ctx.set_payload(self) }
}

impl IntoOutcome for Option<Envelope> {
    fn apply(self, ctx: &Context) {
        if let Some(payload) = self {
            ctx.set_payload(payload);
        }
    }
}

impl IntoOutcome for Result<Envelope, Envelope> {
    fn apply(self, ctx: &Context) {
        match self {
            Ok(payload) => ctx.set_payload(payload),
            Err(err) => ctx.abort_with_error(err),
        }
    }
}

impl IntoOutcome for Result<(), Envelope> {
    fn apply(self, ctx: &Context) {
        if let Err(err) = self {
            ctx.abort_with_error(err);
        }
    }
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub user_name: String,
}

impl IntoOutcome for Result<Identity, Envelope> {
    fn apply(self, ctx: &Context) {
        match self {
            Ok(who) => ctx.set_user(who.user_id, who.user_name),
            Err(err) => ctx.abort_with_error(err),
        }
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` (or closure returning a future) with the signature:
///
/// ```text
/// async fn name(ctx: Context) -> impl IntoOutcome
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, exchange: Arc<Exchange>) -> BoxFuture {
        let fut = (self.0)(Context::new(Arc::clone(&exchange)));
        Box::pin(async move { fut.await.apply(&Context::new(exchange)) })
    }
}

// ── Chains ────────────────────────────────────────────────────────────────────

/// An ordered list of handlers registered under one route.
///
/// ```rust,no_run
/// # use trellis::{alias_for_metrics, Chain, Context, Envelope, envelope};
/// # async fn get_user(ctx: Context) -> Envelope { envelope::OK }
/// let chain = Chain::new()
///     .then(alias_for_metrics("/users/{id}"))
///     .then(get_user);
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    handlers: Vec<BoxedHandler>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Returns `self` for chaining.
    pub fn then(mut self, handler: impl Handler) -> Self {
        self.handlers.push(handler.into_boxed_handler());
        self
    }

    pub(crate) fn into_handlers(self) -> Vec<BoxedHandler> {
        self.handlers
    }
}

impl<H: Handler> From<H> for Chain {
    fn from(handler: H) -> Self {
        Chain::new().then(handler)
    }
}

/// Run `handlers` in order against one request, stopping at the first abort.
pub(crate) async fn run_chain(handlers: &[BoxedHandler], exchange: &Arc<Exchange>) {
    for handler in handlers {
        let aborted = exchange.state().aborted;
        if aborted {
            break;
        }
        handler.call(Arc::clone(exchange)).await;
    }
}

// ── Built-in handlers ─────────────────────────────────────────────────────────

/// Marker handler: no journal entry is recorded for requests it runs on.
///
/// Use it as the first handler of a group (health checks, internal probes).
pub async fn disable_journal(ctx: Context) {
    ctx.disable_journal();
}

/// Report `alias` instead of the request path to the metrics hook.
///
/// Routes with path parameters (`/users/{id}`) would otherwise produce one
/// metric series per distinct id.
pub fn alias_for_metrics(alias: impl Into<String>) -> impl Handler {
    let alias: Arc<str> = alias.into().into();
    move |ctx: Context| {
        let alias = Arc::clone(&alias);
        async move { ctx.set_alias(alias.to_string()) }
    }
}

/// Turn an authentication function into a chain handler.
///
/// On `Ok((id, name))` later handlers read the caller through
/// [`Context::user_id`] / [`Context::user_name`]; on `Err` the chain aborts
/// and the request answers with that envelope.
pub fn wrap_auth_handler<F, Fut>(auth: F) -> impl Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(i64, String), Envelope>> + Send + 'static,
{
    move |ctx: Context| {
        let fut = auth(ctx);
        async move {
            fut.await.map(|(user_id, user_name)| Identity { user_id, user_name })
        }
    }
}
