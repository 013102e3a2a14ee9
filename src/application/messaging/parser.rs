//! Message parser - Parses raw text into structured messages

use crate::domain::entities::{Content, Message, User};

/// Parses incoming text into `Message` objects, recognising prefixed commands
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a text message
    pub fn parse(&self, chat_id: impl Into<String>, text: impl Into<String>, sender: Option<User>) -> Message {
        let text = text.into();
        let chat_id = chat_id.into();

        let content = match self.strip_prefix(&text) {
            Some(rest) => Self::parse_command(rest),
            None if text.trim().is_empty() => Content::Empty,
            None => Content::Text(text),
        };

        Message::new(chat_id, content).with_sender_opt(sender)
    }

    fn strip_prefix<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.command_prefix.is_empty() {
            return None;
        }
        text.trim_start()
            .strip_prefix(self.command_prefix.as_str())
            .filter(|rest| !rest.is_empty() && !rest.starts_with(char::is_whitespace))
    }

    /// Split a command line into its name and whitespace separated arguments
    fn parse_command(cmd_text: &str) -> Content {
        let mut parts = cmd_text.split_whitespace();
        let name = parts.next().unwrap_or_default().to_string();
        // Telegram appends @botname in groups
        let name = name.split('@').next().unwrap_or_default().to_string();
        let args = parts.map(str::to_string).collect();

        Content::Command { name, args }
    }
}
