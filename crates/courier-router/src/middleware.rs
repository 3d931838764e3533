//! Bundled middleware.
//!
//! Middleware is just a handler placed ahead of the matched chain by
//! composition. The router installs none of these by default — in
//! particular, [`recover`] is opt-in: without it a panicking handler is
//! contained by the worker, not by the router.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{error, info};

use courier_core::{BoxedHandler, Context};

/// Middleware that turns a panicking chain into an aborted one.
///
/// The remainder of the chain runs under `catch_unwind`; a panic marks the
/// context aborted and is logged with the update id, so the fault never
/// crosses into sibling dispatches.
pub fn recover() -> BoxedHandler {
    BoxedHandler::new(|ctx: Arc<Context>| async move {
        let chain_ctx = Arc::clone(&ctx);
        let rest = AssertUnwindSafe(chain_ctx.next()).catch_unwind();
        if let Err(panic) = rest.await {
            ctx.abort();
            error!(
                update_id = ctx.update().update_id,
                reason = %panic_message(&panic),
                "handler panicked, chain aborted"
            );
        }
    })
}

/// Middleware that logs each dispatch with its kind, timing and outcome.
pub fn logger() -> BoxedHandler {
    BoxedHandler::new(|ctx: Arc<Context>| async move {
        let started = Instant::now();
        let kind = ctx.update().kind();
        Arc::clone(&ctx).next().await;
        info!(
            update_id = ctx.update().update_id,
            kind = ?kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            aborted = ctx.is_aborted(),
            "update handled"
        );
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
