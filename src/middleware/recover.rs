//! Panic containment.
//!
//! A panic inside a handler future unwinds to the nearest
//! [`guard`] boundary on the same thread. `catch_unwind` hands back only the
//! payload, so the stack is recorded earlier by a panic hook (installed once
//! per process, chaining whatever hook was there before) into a thread-local
//! that the boundary then takes.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use futures::FutureExt;
use tracing::error;

use crate::context::Context;
use crate::options::PanicNotify;

thread_local! {
    static LAST_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static STACK_CAPTURE: Once = Once::new();

/// Install the stack-capturing panic hook. Idempotent.
pub(crate) fn install_stack_capture() {
    STACK_CAPTURE.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            LAST_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// A recovered panic.
#[derive(Debug)]
pub(crate) struct Fault {
    pub(crate) message: String,
    pub(crate) stack: String,
}

impl Fault {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_owned()
        };
        let stack = LAST_STACK
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        Self { message, stack }
    }

    pub(crate) fn log(&self) {
        error!(panic = %self.message, stack = %self.stack, "got panic");
    }
}

/// Poll `fut` to completion, converting a panic into a [`Fault`].
pub(crate) async fn guard<F: Future>(fut: F) -> Result<F::Output, Fault> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(Fault::from_payload)
}

/// Run a user callback from the unwind phase. A panic inside it is logged
/// under `what` and swallowed.
pub(crate) fn contain(what: &str, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let nested = Fault::from_payload(payload);
        error!(panic = %nested.message, stack = %nested.stack, "{what} panicked");
    }
}

/// Call the panic notifier. A panicking notifier is logged and swallowed.
pub(crate) fn notify(callback: &PanicNotify, ctx: &Context, fault: &Fault) {
    contain("panic notify", || callback(ctx, &fault.message, &fault.stack));
}
