use async_trait::async_trait;
use crate::domain::entities::Message;
use crate::application::errors::BotError;

/// Bot trait - abstraction for messaging platform adapters
#[async_trait]
pub trait Bot: Send + Sync {
    /// Connect to the platform and fill in `bot_info`
    async fn start(&self) -> Result<(), BotError>;

    /// Wait for the next batch of incoming messages.
    ///
    /// `Ok(None)` means the platform channel is closed and the session should stop.
    async fn receive(&self) -> Result<Option<Vec<Message>>, BotError>;

    /// Send a message to a chat
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, BotError>;

    /// Get bot info
    fn bot_info(&self) -> BotInfo;
}

/// Bot information
#[derive(Debug, Clone)]
pub struct BotInfo {
    pub id: String,
    pub name: String,
    pub username: String,
}
