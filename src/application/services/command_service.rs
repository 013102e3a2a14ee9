use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tokio::sync::mpsc::UnboundedSender;

use crate::application::errors::CommandError;
use crate::domain::entities::{Command, CommandRegistry, Content, Invocation, Message, Reply};

/// Command table shared between the dispatcher and the extension host
pub type SharedCommands = Arc<RwLock<CommandRegistry>>;

pub fn shared_commands() -> SharedCommands {
    Arc::new(RwLock::new(CommandRegistry::new()))
}

pub(crate) fn read_commands(commands: &RwLock<CommandRegistry>) -> RwLockReadGuard<'_, CommandRegistry> {
    commands.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_commands(commands: &RwLock<CommandRegistry>) -> RwLockWriteGuard<'_, CommandRegistry> {
    commands.write().unwrap_or_else(PoisonError::into_inner)
}

/// Service for looking up, gating and executing commands
pub struct CommandService {
    registry: SharedCommands,
    prefix: String,
}

impl CommandService {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_registry(prefix, shared_commands())
    }

    pub fn with_registry(prefix: impl Into<String>, registry: SharedCommands) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
        }
    }

    pub fn registry(&self) -> SharedCommands {
        Arc::clone(&self.registry)
    }

    pub fn register(&self, command: Command) {
        write_commands(&self.registry).register(command);
    }

    pub fn register_defaults(&self) {
        let registry: Weak<RwLock<CommandRegistry>> = Arc::downgrade(&self.registry);
        let prefix = self.prefix.clone();

        self.register(Command::new("help")
            .with_description("Show help message")
            .with_usage(format!("{}help [command]", self.prefix))
            .with_handler(move |inv| {
                let Some(registry) = registry.upgrade() else {
                    return Ok("Help is not available".to_string());
                };
                let registry = read_commands(&registry);
                Ok(render_help(&registry, &prefix, inv.args.first().map(String::as_str), inv.caller_is_admin))
            }));

        self.register(Command::new("version")
            .with_description("Show bot version")
            .with_handler(|_| {
                Ok(format!("swapbot v{}", env!("CARGO_PKG_VERSION")))
            }));
    }

    /// Run the command carried by `message`.
    ///
    /// `Ok(None)` for anything that is not a command. The capability check
    /// happens before the handler is touched.
    pub async fn handle(&self, message: &Message, caller_is_admin: bool) -> Result<Option<Reply>, CommandError> {
        self.handle_with_progress(message, caller_is_admin, None).await
    }

    /// Like [`CommandService::handle`], forwarding interim messages to `progress`
    pub async fn handle_with_progress(
        &self,
        message: &Message,
        caller_is_admin: bool,
        progress: Option<UnboundedSender<String>>,
    ) -> Result<Option<Reply>, CommandError> {
        let Content::Command { name, .. } = &message.content else {
            return Ok(None);
        };

        let (command_name, handler) = {
            let registry = read_commands(&self.registry);
            let cmd = registry.find(name)
                .ok_or_else(|| CommandError::NotFound(name.clone()))?;

            if !cmd.capability.allows(caller_is_admin) {
                return Err(CommandError::PermissionDenied);
            }
            (cmd.name.clone(), cmd.handler.clone())
        };

        match handler {
            Some(handler) => {
                let invocation = Invocation::new(message.clone(), caller_is_admin).with_progress(progress);
                handler(invocation).await.map(Some)
            }
            None => Ok(Some(Reply::text(format!("Command {} not implemented", command_name)))),
        }
    }

    pub fn get_help(&self, command: Option<&str>, caller_is_admin: bool) -> String {
        render_help(&read_commands(&self.registry), &self.prefix, command, caller_is_admin)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

fn render_help(registry: &CommandRegistry, prefix: &str, command: Option<&str>, caller_is_admin: bool) -> String {
    if let Some(name) = command {
        if let Some(cmd) = registry.find(name) {
            let mut help = format!("{}{} - {}", prefix, cmd.name, cmd.description.as_deref().unwrap_or("No description"));
            if let Some(usage) = &cmd.usage {
                help.push_str(&format!("\nUsage: {}", usage));
            }
            return help;
        }
        return format!("Command {}{} not found", prefix, name);
    }

    // List the commands this caller may run
    let mut help = "Available commands:\n".to_string();
    for cmd in registry.all().into_iter().filter(|c| c.capability.allows(caller_is_admin)) {
        help.push_str(&format!("  {}{} - {}\n", prefix, cmd.name, cmd.description.as_deref().unwrap_or("")));
    }
    help
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CommandService {
        let service = CommandService::new("!");
        service.register_defaults();
        service.register(Command::new("shutdown")
            .with_description("Stop the bot")
            .admin_only()
            .with_handler(|_| Ok("bye".to_string())));
        service
    }

    #[tokio::test]
    async fn test_non_command_is_ignored() {
        let result = service().handle(&Message::from_text("chat", "hi"), false).await;
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let msg = Message::from_command("chat", "nope", vec![]);
        let result = service().handle(&msg, true).await;
        assert_eq!(result, Err(CommandError::NotFound("nope".to_string())));
    }

    #[tokio::test]
    async fn test_admin_command_is_gated() {
        let service = service();
        let msg = Message::from_command("chat", "shutdown", vec![]);

        assert_eq!(service.handle(&msg, false).await, Err(CommandError::PermissionDenied));
        assert_eq!(service.handle(&msg, true).await, Ok(Some(Reply::text("bye"))));
    }

    #[tokio::test]
    async fn test_help_hides_admin_commands_from_users() {
        let service = service();
        let msg = Message::from_command("chat", "help", vec![]);

        let reply = service.handle(&msg, false).await.unwrap().unwrap();
        assert!(reply.messages[0].contains("!version"));
        assert!(!reply.messages[0].contains("!shutdown"));

        let reply = service.handle(&msg, true).await.unwrap().unwrap();
        assert!(reply.messages[0].contains("!shutdown"));
    }

    #[test]
    fn test_help_for_single_command() {
        let service = service();
        assert!(service.get_help(Some("help"), false).contains("Usage: !help [command]"));
        assert_eq!(service.get_help(Some("nope"), false), "Command !nope not found");
    }
}
