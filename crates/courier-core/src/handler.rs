//! Handler types for the Courier router.
//!
//! A handler is any `Fn(Arc<Context>) -> Future<Output = ()>`. Handlers are
//! type-erased into [`BoxedHandler`]s so that chains of mixed closures and
//! middleware can live in one table; a [`HandlerChain`] is the immutable,
//! shareable run of handlers the composer produces.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

/// The boxed future a handler invocation yields.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// An ordered, immutable run of handlers.
///
/// Chains are produced by composition (middleware snapshot + registered
/// handlers) and shared between the composed table and in-flight contexts.
pub type HandlerChain = Arc<[BoxedHandler]>;

/// A type-erased, cheaply clonable handler.
#[derive(Clone)]
pub struct BoxedHandler {
    f: Arc<dyn Fn(Arc<Context>) -> BoxFuture + Send + Sync>,
}

impl BoxedHandler {
    /// Wraps an async function or closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            f: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    /// Invokes the handler with the given context.
    pub fn call(&self, ctx: Arc<Context>) -> BoxFuture {
        (self.f)(ctx)
    }
}

impl std::fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedHandler")
    }
}

/// Conversion into a [`BoxedHandler`].
///
/// Implemented for `BoxedHandler` itself and for any async fn/closure taking
/// an `Arc<Context>`.
pub trait Handler {
    /// Erases the handler's concrete type.
    fn into_boxed(self) -> BoxedHandler;
}

impl Handler for BoxedHandler {
    fn into_boxed(self) -> BoxedHandler {
        self
    }
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_boxed(self) -> BoxedHandler {
        BoxedHandler::new(self)
    }
}

/// Conversion into the handler list one registration call contributes.
///
/// A single handler registers a one-element chain; a `Vec<BoxedHandler>`
/// registers the whole run as one chain, executed in order until aborted.
pub trait IntoChain {
    /// Produces the registered handler list.
    fn into_chain(self) -> Vec<BoxedHandler>;
}

impl IntoChain for BoxedHandler {
    fn into_chain(self) -> Vec<BoxedHandler> {
        vec![self]
    }
}

impl<F, Fut> IntoChain for F
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_chain(self) -> Vec<BoxedHandler> {
        vec![BoxedHandler::new(self)]
    }
}

impl IntoChain for Vec<BoxedHandler> {
    fn into_chain(self) -> Vec<BoxedHandler> {
        self
    }
}
