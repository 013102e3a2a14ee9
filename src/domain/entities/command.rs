use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc::UnboundedSender;

use super::Message;
use crate::application::errors::CommandError;

/// Permission a caller needs before a command handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capability {
    #[default]
    Everyone,
    Administrator,
}

impl Capability {
    pub fn allows(&self, caller_is_admin: bool) -> bool {
        match self {
            Capability::Everyone => true,
            Capability::Administrator => caller_is_admin,
        }
    }
}

/// One or more text replies produced by a handler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub messages: Vec<String>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![text.into()],
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    /// Append another message, sent after the previous ones
    pub fn then(mut self, text: impl Into<String>) -> Self {
        self.messages.push(text.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// What a handler receives when its command is invoked
#[derive(Debug, Clone)]
pub struct Invocation {
    pub message: Message,
    pub args: Vec<String>,
    pub caller_is_admin: bool,
    progress: Option<UnboundedSender<String>>,
}

impl Invocation {
    pub fn new(message: Message, caller_is_admin: bool) -> Self {
        let args = match &message.content {
            super::Content::Command { args, .. } => args.clone(),
            _ => Vec::new(),
        };
        Self {
            message,
            args,
            caller_is_admin,
            progress: None,
        }
    }

    /// Channel for messages that should reach the chat before the handler finishes
    pub fn with_progress(mut self, progress: Option<UnboundedSender<String>>) -> Self {
        self.progress = progress;
        self
    }

    /// Send an interim message right away.
    ///
    /// Returns `false` when nobody is listening; the caller should then fold
    /// the text into its final reply.
    pub fn notify(&self, text: impl Into<String>) -> bool {
        match &self.progress {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    /// Positional argument, or `MissingArgument` naming the parameter
    pub fn arg(&self, index: usize, name: &str) -> Result<&str, CommandError> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| CommandError::MissingArgument(name.to_string()))
    }
}

/// Command handler function type
pub type CommandHandler =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<Reply, CommandError>> + Send + Sync>;

/// Represents a bot command
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub usage: Option<String>,
    pub capability: Capability,
    pub handler: Option<CommandHandler>,
    /// Identifier of the extension that contributed the command, `None` for built-ins
    pub owner: Option<String>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("capability", &self.capability)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            aliases: Vec::new(),
            usage: None,
            capability: Capability::Everyone,
            handler: None,
            owner: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    pub fn admin_only(self) -> Self {
        self.with_capability(Capability::Administrator)
    }

    /// Synchronous handler returning a single text reply
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Invocation) -> Result<String, CommandError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(move |inv| {
            futures::future::ready(handler(inv).map(Reply::text)).boxed()
        }));
        self
    }

    pub fn with_async_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, CommandError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |inv| handler(inv).boxed()));
        self
    }

    pub fn matches(&self, input: &str) -> bool {
        self.names().any(|n| n.eq_ignore_ascii_case(input))
    }

    /// Name followed by every alias
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Command registry keyed by lowercase command name
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in command, replacing any previous one with the same name
    pub fn register(&mut self, command: Command) {
        self.commands.insert(command.name.to_lowercase(), command);
    }

    /// Register a batch on behalf of `owner`.
    ///
    /// Either every command is inserted or none is: a name or alias clashing
    /// with an existing command, or with another one in the batch, rejects the
    /// whole batch.
    pub fn register_owned(&mut self, owner: &str, commands: Vec<Command>) -> Result<Vec<String>, CommandError> {
        let mut claimed: Vec<String> = Vec::new();
        for command in &commands {
            for name in command.names() {
                let lower = name.to_lowercase();
                if self.find(&lower).is_some() || claimed.contains(&lower) {
                    return Err(CommandError::Conflict(name.to_string()));
                }
                claimed.push(lower);
            }
        }

        let mut names = Vec::with_capacity(commands.len());
        for mut command in commands {
            command.owner = Some(owner.to_string());
            names.push(command.name.clone());
            self.register(command);
        }
        Ok(names)
    }

    /// Remove and return every command contributed by `owner`
    pub fn remove_owned(&mut self, owner: &str) -> Vec<Command> {
        let keys: Vec<String> = self
            .commands
            .iter()
            .filter(|(_, c)| c.owner.as_deref() == Some(owner))
            .map(|(k, _)| k.clone())
            .collect();

        keys.iter().filter_map(|k| self.commands.remove(k)).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(&name.to_lowercase())
    }

    pub fn find(&self, input: &str) -> Option<&Command> {
        self.get(input)
            .or_else(|| self.commands.values().find(|c| c.matches(input)))
    }

    /// All commands sorted by name
    pub fn all(&self) -> Vec<&Command> {
        let mut all: Vec<&Command> = self.commands.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(name: &str) -> Command {
        Command::new(name).with_handler(|inv| Ok(inv.args.join(" ")))
    }

    #[test]
    fn test_capability_gate() {
        assert!(Capability::Everyone.allows(false));
        assert!(Capability::Administrator.allows(true));
        assert!(!Capability::Administrator.allows(false));
    }

    #[test]
    fn test_find_by_alias_case_insensitive() {
        let mut registry = CommandRegistry::new();
        registry.register(echo("Ping").with_aliases(vec!["p".to_string()]));

        assert!(registry.find("ping").is_some());
        assert!(registry.find("P").is_some());
        assert!(registry.find("pong").is_none());
    }

    #[test]
    fn test_register_owned_rejects_whole_batch_on_clash() {
        let mut registry = CommandRegistry::new();
        registry.register(echo("help"));

        let result = registry.register_owned("ext.a", vec![echo("roll"), echo("help")]);
        assert_eq!(result, Err(CommandError::Conflict("help".to_string())));
        assert!(registry.get("roll").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_owned_rejects_duplicate_within_batch() {
        let mut registry = CommandRegistry::new();
        let result = registry.register_owned(
            "ext.a",
            vec![echo("roll"), echo("dice").with_aliases(vec!["roll".to_string()])],
        );
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_owned_only_touches_owner() {
        let mut registry = CommandRegistry::new();
        registry.register(echo("help"));
        registry.register_owned("ext.a", vec![echo("roll"), echo("flip")]).unwrap();
        registry.register_owned("ext.b", vec![echo("quote")]).unwrap();

        let removed = registry.remove_owned("ext.a");
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|c| c.owner.as_deref() == Some("ext.a")));
        assert!(registry.get("help").is_some());
        assert!(registry.get("quote").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_handler_wraps_reply() {
        let command = echo("say");
        let message = Message::from_command("chat", "say", vec!["hi".into(), "there".into()]);
        let handler = command.handler.clone().unwrap();
        let reply = handler(Invocation::new(message, false)).await.unwrap();
        assert_eq!(reply, Reply::text("hi there"));
    }

    #[test]
    fn test_missing_argument_names_parameter() {
        let inv = Invocation::new(Message::from_command("chat", "load", vec![]), true);
        assert_eq!(
            inv.arg(0, "identifier"),
            Err(CommandError::MissingArgument("identifier".to_string()))
        );
    }
}
