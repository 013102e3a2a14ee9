//! Bot session - ties the platform adapter, the command table and the
//! extension loader together

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::application::errors::{BotError, CommandError};
use crate::application::extensions::loader::panic_message;
use crate::application::extensions::{discovery, BulkOutcome, ExtensionLoader};
use crate::application::messaging::MessageParser;
use crate::application::services::{AdminCommands, CommandService, LoaderSlot};
use crate::domain::entities::{Content, Message, User};
use crate::domain::traits::{Bot, ExtensionHost};

/// Pause before polling again after a failed receive
const RETRY_DELAY: Duration = Duration::from_secs(5);

const BANNER: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub admins: Vec<String>,
    pub extensions_dir: PathBuf,
    pub suffix: String,
    pub operation_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            extensions_dir: PathBuf::from("extensions"),
            suffix: discovery::default_suffix().to_string(),
            operation_timeout: None,
        }
    }
}

/// A running bot: one platform connection, one command table, one loader
pub struct Session {
    bot: Arc<dyn Bot>,
    host: Arc<dyn ExtensionHost>,
    commands: CommandService,
    parser: MessageParser,
    loader: LoaderSlot,
    settings: SessionSettings,
}

impl Session {
    /// Build a session; registers the default and admin commands on `commands`
    pub fn new(bot: Arc<dyn Bot>, host: Arc<dyn ExtensionHost>, commands: CommandService, settings: SessionSettings) -> Self {
        commands.register_defaults();

        let loader: LoaderSlot = Arc::new(OnceCell::new());
        Arc::new(AdminCommands::new(Arc::clone(&host), Arc::clone(&loader), commands.prefix()))
            .register(&commands);

        Self {
            bot,
            host,
            parser: MessageParser::new(commands.prefix()),
            commands,
            loader,
            settings,
        }
    }

    /// The loader, once startup loading has finished
    pub fn loader(&self) -> Option<Arc<ExtensionLoader>> {
        self.loader.get().cloned()
    }

    pub fn commands(&self) -> &CommandService {
        &self.commands
    }

    pub fn is_admin(&self, sender: Option<&User>) -> bool {
        sender.is_some_and(|u| self.settings.admins.iter().any(|a| a == &u.id))
    }

    /// Create the loader and bulk-load every extension found on disk
    pub async fn setup(&self) -> BulkOutcome {
        info!("{}", BANNER);
        info!("🚀 Starting swapbot...");
        info!("{}", BANNER);

        info!("📦 Loading extensions from {}", self.settings.extensions_dir.display());
        let loader = ExtensionLoader::new(Arc::clone(&self.host), &self.settings.extensions_dir)
            .with_suffix(&self.settings.suffix)
            .with_timeout(self.settings.operation_timeout);
        let loader = Arc::new(loader);

        let outcome = loader.load_all().await;
        if self.loader.set(loader).is_err() {
            warn!("Extension loader was already set up, keeping the existing one");
        }

        info!("{}", BANNER);
        info!("✅ Bot is ready!");
        info!("{}", BANNER);
        outcome
    }

    fn on_ready(&self) {
        let info = self.bot.bot_info();
        info!("👤 Bot: {} (ID: {})", info.name, info.id);
        info!("📦 Loaded extensions: {}", self.loader.get().map(|l| l.len()).unwrap_or(0));
        info!("{}", "─".repeat(50));
    }

    /// Connect, load extensions and serve messages until the platform closes
    /// or the process is interrupted
    pub async fn run(&self) -> Result<(), BotError> {
        self.bot.start().await?;
        self.setup().await;
        self.on_ready();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received");
                    break;
                }
                received = self.bot.receive() => match received {
                    Ok(Some(messages)) => {
                        for message in messages {
                            self.process(message).await;
                        }
                    }
                    Ok(None) => {
                        info!("Platform channel closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to receive messages: {}", e);
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                },
            }
        }

        self.close().await;
        Ok(())
    }

    /// Handle one message and deliver every reply through the bot, interim
    /// messages first
    pub async fn process(&self, message: Message) {
        let chat_id = message.chat_id.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let replies = {
            let handling = self.dispatch(&message, Some(tx));
            tokio::pin!(handling);
            loop {
                tokio::select! {
                    Some(text) = rx.recv() => self.deliver(&chat_id, &text).await,
                    replies = &mut handling => break replies,
                }
            }
        };

        while let Ok(text) = rx.try_recv() {
            self.deliver(&chat_id, &text).await;
        }
        for text in replies {
            self.deliver(&chat_id, &text).await;
        }
    }

    /// Parse raw text and return the replies without sending them
    pub async fn handle_text(&self, chat_id: &str, sender: Option<User>, text: &str) -> Vec<String> {
        let message = self.parser.parse(chat_id, text, sender);
        self.dispatch(&message, None).await
    }

    async fn dispatch(&self, message: &Message, progress: Option<mpsc::UnboundedSender<String>>) -> Vec<String> {
        let Content::Command { name, .. } = &message.content else {
            return Vec::new();
        };

        let is_admin = self.is_admin(message.sender.as_ref());
        let handling = self.commands.handle_with_progress(message, is_admin, progress);

        match AssertUnwindSafe(handling).catch_unwind().await {
            Ok(Ok(Some(reply))) => reply.messages,
            Ok(Ok(None)) => Vec::new(),
            Ok(Err(e)) => self.translate_error(name, &e).into_iter().collect(),
            Err(payload) => {
                let failure = CommandError::ExecutionFailed(format!("panicked: {}", panic_message(payload.as_ref())));
                self.translate_error(name, &failure).into_iter().collect()
            }
        }
    }

    /// Turn a command failure into the notice shown to the user.
    ///
    /// Unknown commands are ignored silently.
    pub fn translate_error(&self, command: &str, error: &CommandError) -> Option<String> {
        match error {
            CommandError::NotFound(_) => None,
            CommandError::PermissionDenied => {
                Some("❌ You don't have the required permissions to use this command!".to_string())
            }
            CommandError::MissingArgument(param) => Some(format!("❌ Missing required argument: `{}`", param)),
            CommandError::InvalidArgs(msg) => Some(format!("❌ Invalid argument: {}", msg)),
            e => {
                error!("Error in command {}: {}", command, e);
                Some(UNEXPECTED_ERROR.to_string())
            }
        }
    }

    async fn deliver(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.bot.send_message(chat_id, text).await {
            warn!("Failed to send message to {}: {}", chat_id, e);
        }
    }

    /// Unload every extension and stop
    pub async fn close(&self) {
        info!("Stopping the bot...");
        if let Some(loader) = self.loader.get() {
            for identifier in loader.get_loaded() {
                loader.unload(&identifier).await;
            }
        }
        info!("Bot stopped");
    }
}

const UNEXPECTED_ERROR: &str = "❌ An unexpected error occurred while executing the command.";
