//! Core types for the Courier update router.
//!
//! This crate holds the pieces every other layer builds on:
//!
//! - [`Update`] and its payload model — one inbound chat-platform event,
//!   classified into exactly one payload kind
//! - [`Context`] — the per-dispatch execution record (handler chain, cursor,
//!   abort flag, path/query parameter tables)
//! - [`BoxedHandler`] — the type-erased handler unit chains are made of
//! - [`BotApi`] — the outbound boundary trait handlers call to send, edit
//!   and answer; everything behind it (HTTP, retries, wire format) lives in
//!   the platform client, not here

pub mod api;
pub mod context;
pub mod error;
pub mod handler;
pub mod update;

pub use api::{BotApi, BoxedApi};
pub use context::Context;
pub use error::{ApiError, ApiResult};
pub use handler::{BoxFuture, BoxedHandler, Handler, HandlerChain, IntoChain};
pub use update::{
    CallbackQuery, Chat, ChatKind, ChatMemberUpdate, Contact, Document, InlineQuery, Location,
    Message, Payload, PhotoSize, Poll, PollAnswer, PollKind, Update, UpdateKind, User,
};
