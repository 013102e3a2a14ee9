use super::User;
use chrono::{DateTime, Utc};

/// Message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Command { name: String, args: Vec<String> },
    Empty,
}

impl Content {
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Content::Command { .. })
    }
}

/// Represents an incoming message from any platform adapter
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender: Option<User>,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
    pub platform: String,
    pub raw: Option<serde_json::Value>,
}

impl Message {
    pub fn new(chat_id: impl Into<String>, content: Content) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            sender: None,
            content,
            timestamp: Utc::now(),
            platform: "unknown".to_string(),
            raw: None,
        }
    }

    pub fn from_text(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(chat_id, Content::Text(text.into()))
    }

    pub fn from_command(chat_id: impl Into<String>, name: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(chat_id, Content::Command { name: name.into(), args })
    }

    pub fn with_sender(mut self, user: User) -> Self {
        self.sender = Some(user);
        self
    }

    pub fn with_sender_opt(mut self, user: Option<User>) -> Self {
        if user.is_some() {
            self.sender = user;
        }
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender.as_ref().map(|u| u.id.as_str())
    }
}
