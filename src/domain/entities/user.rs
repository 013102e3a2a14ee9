use std::fmt;

/// The author of an incoming message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub is_bot: bool,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            first_name: None,
            is_bot: false,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_first_name(mut self, first: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self
    }

    pub fn with_bot_flag(mut self, is_bot: bool) -> Self {
        self.is_bot = is_bot;
        self
    }

    /// Username if known, then first name, then the raw id
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.first_name.as_deref())
            .unwrap_or(&self.id)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
