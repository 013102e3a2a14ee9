//! Telegram adapter

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::domain::entities;
use crate::domain::traits::{Bot, BotInfo};
use crate::application::errors::BotError;
use crate::application::messaging::MessageParser;

/// Telegram API base URL
const API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout for getUpdates, in seconds
const POLL_TIMEOUT: i64 = 30;

/// Telegram update type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, BotError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(BotError::Network(format!(
                "Telegram API error: {}",
                self.description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }
}

/// Telegram bot adapter
pub struct TelegramAdapter {
    token: String,
    client: Client,
    parser: MessageParser,
    info: OnceCell<BotInfo>,
    offset: AtomicI64,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: Client::new(),
            parser: MessageParser::new(prefix),
            info: OnceCell::new(),
            offset: AtomicI64::new(0),
        }
    }

    /// Leading characters of the token, safe to log
    fn token_hint(&self) -> String {
        self.token.chars().take(8).collect()
    }

    /// Get the API URL for a method
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<T, R>(&self, method: &str, request: &T) -> Result<R, BotError>
    where
        T: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self.client
            .post(self.api_url(method))
            .json(request)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(BotError::Auth("Telegram rejected the bot token".to_string()));
        }

        let data: ApiResponse<R> = response
            .json()
            .await
            .map_err(|e| BotError::Parse(e.to_string()))?;

        data.into_result()
    }

    /// Fetch bot info from Telegram API
    pub async fn fetch_bot_info(&self) -> Result<BotInfo, BotError> {
        #[derive(Deserialize)]
        struct Me {
            id: i64,
            first_name: String,
            username: Option<String>,
        }

        let me: Me = self.call("getMe", &serde_json::json!({})).await?;
        Ok(BotInfo {
            id: me.id.to_string(),
            name: me.first_name,
            username: me.username.unwrap_or_default(),
        })
    }

    /// Get updates from Telegram using getUpdates API
    pub async fn get_updates(&self, offset: i64, timeout: i64) -> Result<Vec<Update>, BotError> {
        #[derive(Serialize)]
        struct GetUpdatesRequest {
            offset: i64,
            timeout: i64,
            allowed_updates: Vec<String>,
        }

        let request = GetUpdatesRequest {
            offset,
            timeout,
            allowed_updates: vec!["message".to_string()],
        };
        self.call("getUpdates", &request).await
    }

    /// Get the next update offset
    pub fn get_next_offset(updates: &[Update]) -> Option<i64> {
        updates.iter().map(|u| u.update_id + 1).max()
    }

    /// Turn a Telegram update into a platform independent message
    pub fn convert(&self, update: &Update) -> Option<entities::Message> {
        let message = update.message.as_ref()?;
        let text = message.text.as_deref()?;

        let sender = message.from.as_ref().map(|from| {
            let mut user = entities::User::new(from.id.to_string()).with_bot_flag(from.is_bot);
            if let Some(username) = &from.username {
                user = user.with_username(username);
            }
            if let Some(first_name) = &from.first_name {
                user = user.with_first_name(first_name);
            }
            user
        });

        let converted = self.parser
            .parse(message.chat.id.to_string(), text, sender)
            .with_platform("telegram");
        Some(match serde_json::to_value(update) {
            Ok(raw) => converted.with_raw(raw),
            Err(_) => converted,
        })
    }
}

#[async_trait]
impl Bot for TelegramAdapter {
    async fn start(&self) -> Result<(), BotError> {
        tracing::info!("Starting Telegram bot (token: {}...)", self.token_hint());
        let info = self.fetch_bot_info().await?;
        tracing::info!("Connected as @{}", info.username);
        let _ = self.info.set(info);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Vec<entities::Message>>, BotError> {
        let offset = self.offset.load(Ordering::Acquire);
        let updates = self.get_updates(offset, POLL_TIMEOUT).await?;

        if let Some(next) = Self::get_next_offset(&updates) {
            self.offset.store(next, Ordering::Release);
        }

        // Messages from other bots are never commands for us
        let messages = updates
            .iter()
            .filter_map(|u| self.convert(u))
            .filter(|m| !m.sender.as_ref().is_some_and(|s| s.is_bot))
            .collect();
        Ok(Some(messages))
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, BotError> {
        tracing::debug!("Sending to {}: {}", chat_id, text);

        #[derive(Serialize)]
        struct SendMessageRequest<'a> {
            chat_id: &'a str,
            text: &'a str,
        }

        #[derive(Deserialize)]
        struct MessageResult {
            message_id: i64,
        }

        let sent: MessageResult = self.call("sendMessage", &SendMessageRequest { chat_id, text }).await?;
        Ok(sent.message_id.to_string())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.get().cloned().unwrap_or_else(|| BotInfo {
            id: "unknown".to_string(),
            name: "swapbot".to_string(),
            username: "swapbot".to_string(),
        })
    }
}
