//! Per-dispatch execution context.
//!
//! One [`Context`] is allocated per dispatched update and dropped when the
//! dispatch completes; nothing in it is shared across updates. It owns the
//! currently executing handler chain, the chain cursor, the abort flag, and
//! the path/query parameter tables bound by callback route matching.
//!
//! # Chain control
//!
//! Handlers run in registration order. A middleware may call
//! [`next`](Context::next) to run the remainder of the chain inside its own
//! body (to time it, guard it, or catch its panics); a handler that simply
//! returns lets the chain continue on its own. Calling
//! [`abort`](Context::abort) stops the current chain and ends dispatch for
//! this update entirely — no later category is attempted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::api::BoxedApi;
use crate::error::{ApiError, ApiResult};
use crate::handler::HandlerChain;
use crate::update::{CallbackQuery, Message, Payload, Poll, Update};

/// The per-update mutable execution record passed to handlers.
pub struct Context {
    update: Arc<Update>,
    api: Option<BoxedApi>,
    chain: Mutex<HandlerChain>,
    cursor: AtomicUsize,
    aborted: AtomicBool,
    params: Mutex<HashMap<String, String>>,
    query: Mutex<HashMap<String, String>>,
}

impl Context {
    /// Creates a fresh context for one dispatch of `update`.
    pub fn new(update: Arc<Update>, api: Option<BoxedApi>) -> Self {
        Self {
            update,
            api,
            chain: Mutex::new(Arc::from(Vec::new())),
            cursor: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            params: Mutex::new(HashMap::new()),
            query: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the update being dispatched.
    pub fn update(&self) -> &Update {
        &self.update
    }

    /// Returns the message payload, if this update carries one.
    pub fn message(&self) -> Option<&Message> {
        self.update.message()
    }

    /// Returns the callback query payload, if this update carries one.
    pub fn callback_query(&self) -> Option<&CallbackQuery> {
        match &self.update.payload {
            Payload::CallbackQuery(query) => Some(query),
            _ => None,
        }
    }

    /// Returns the poll carried by this update, standalone or in a message.
    pub fn poll(&self) -> Option<&Poll> {
        match &self.update.payload {
            Payload::Poll(poll) => Some(poll),
            Payload::Message(message) => message.poll.as_ref(),
            _ => None,
        }
    }

    /// Returns the outbound API client, if one is attached.
    pub fn api(&self) -> Option<&BoxedApi> {
        self.api.as_ref()
    }

    /// Sends a text reply to the message this update carries.
    pub async fn reply(&self, text: &str) -> ApiResult<i64> {
        let api = self.api.as_ref().ok_or(ApiError::NotConnected)?;
        let message = self.message().ok_or(ApiError::MissingMessage)?;
        api.send_message(message.chat.id, text, Some(message.message_id))
            .await
    }

    /// Stops the current chain and ends dispatch for this update.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once any handler has aborted this dispatch.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Runs a composed chain to completion (or until aborted).
    ///
    /// Called by the dispatcher once per matched chain; the cursor is reset
    /// so every chain starts from its first handler.
    pub async fn run(self: Arc<Self>, chain: HandlerChain) {
        *self.chain.lock() = chain;
        self.cursor.store(0, Ordering::SeqCst);
        self.next().await;
    }

    /// Executes the remaining handlers of the current chain.
    ///
    /// Safe to call from inside a middleware: the cursor is shared, so when
    /// the inner call returns the outer loop finds the chain exhausted.
    pub async fn next(self: Arc<Self>) {
        loop {
            if self.is_aborted() {
                return;
            }
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let handler = self.chain.lock().get(index).cloned();
            match handler {
                Some(handler) => handler.call(Arc::clone(&self)).await,
                None => return,
            }
        }
    }

    /// Looks up a path parameter bound by callback route matching.
    pub fn param(&self, key: &str) -> Option<String> {
        self.params.lock().get(key).cloned()
    }

    /// Replaces the path-parameter table for the currently matched route.
    pub fn set_params(&self, params: HashMap<String, String>) {
        *self.params.lock() = params;
    }

    /// Looks up a query parameter from the callback subject.
    pub fn query(&self, key: &str) -> Option<String> {
        self.query.lock().get(key).cloned()
    }

    /// Looks up a query parameter, falling back to `default`.
    pub fn query_or(&self, key: &str, default: &str) -> String {
        self.query(key).unwrap_or_else(|| default.to_string())
    }

    /// Parses a query parameter as an integer.
    pub fn query_i64(&self, key: &str) -> Option<i64> {
        self.query(key)?.parse().ok()
    }

    /// Parses a query parameter as a boolean.
    ///
    /// Accepts `true`, `1`, `yes` and `y`, case-insensitively; any other
    /// value is `false`.
    pub fn query_bool(&self, key: &str) -> Option<bool> {
        let value = self.query(key)?.to_lowercase();
        Some(matches!(value.as_str(), "true" | "1" | "yes" | "y"))
    }

    /// Replaces the query-parameter table for this dispatch.
    pub fn set_query(&self, query: HashMap<String, String>) {
        *self.query.lock() = query;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("update_id", &self.update.update_id)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxedHandler;
    use crate::update::{Chat, Message, Payload};

    fn context() -> Arc<Context> {
        let update = Update::new(
            1,
            Payload::Message(Message::new(1, Chat::private(1)).with_text("hi")),
        );
        Arc::new(Context::new(Arc::new(update), None))
    }

    fn chain(handlers: Vec<BoxedHandler>) -> HandlerChain {
        Arc::from(handlers)
    }

    #[tokio::test]
    async fn handlers_run_in_order() {
        let ctx = context();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handlers = Vec::new();
        for name in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            handlers.push(BoxedHandler::new(move |_ctx| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push(name);
                }
            }));
        }

        Arc::clone(&ctx).run(chain(handlers)).await;
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn abort_stops_the_chain() {
        let ctx = context();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let order = Arc::clone(&order);
            BoxedHandler::new(move |ctx: Arc<Context>| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("first");
                    ctx.abort();
                }
            })
        };
        let second = {
            let order = Arc::clone(&order);
            BoxedHandler::new(move |_ctx| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("second");
                }
            })
        };

        Arc::clone(&ctx).run(chain(vec![first, second])).await;
        assert_eq!(*order.lock(), vec!["first"]);
        assert!(ctx.is_aborted());
    }

    #[tokio::test]
    async fn middleware_next_reenters_without_double_running() {
        let ctx = context();
        let order = Arc::new(Mutex::new(Vec::new()));

        let middleware = {
            let order = Arc::clone(&order);
            BoxedHandler::new(move |ctx: Arc<Context>| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("before");
                    ctx.next().await;
                    order.lock().push("after");
                }
            })
        };
        let handler = {
            let order = Arc::clone(&order);
            BoxedHandler::new(move |_ctx| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("handler");
                }
            })
        };

        Arc::clone(&ctx).run(chain(vec![middleware, handler])).await;
        assert_eq!(*order.lock(), vec!["before", "handler", "after"]);
    }

    #[tokio::test]
    async fn query_accessors_parse_and_default() {
        let ctx = context();
        let mut query = HashMap::new();
        query.insert("page".to_string(), "3".to_string());
        query.insert("all".to_string(), "YES".to_string());
        query.insert("raw".to_string(), "maybe".to_string());
        ctx.set_query(query);

        assert_eq!(ctx.query_i64("page"), Some(3));
        assert_eq!(ctx.query_i64("missing"), None);
        assert_eq!(ctx.query_bool("all"), Some(true));
        assert_eq!(ctx.query_bool("raw"), Some(false));
        assert_eq!(ctx.query_or("missing", "fallback"), "fallback");
    }
}
