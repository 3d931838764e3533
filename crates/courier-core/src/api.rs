//! Outbound Bot API boundary.
//!
//! Handlers call into the platform through [`BotApi`]; every call is a
//! synchronous external effect with its own error return. The router never
//! retries these calls — retry policy belongs to the client implementation
//! behind the trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiResult;

/// The send path of the platform client.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Sends a text message, optionally as a reply. Returns the new
    /// message's identifier.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> ApiResult<i64>;

    /// Replaces the text of a previously sent message.
    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> ApiResult<()>;

    /// Acknowledges a callback query, optionally with a notification text.
    async fn answer_callback_query(&self, query_id: &str, text: Option<&str>) -> ApiResult<()>;
}

/// A shared, type-erased API client.
pub type BoxedApi = Arc<dyn BotApi>;
