//! Admin command surface - extension management commands for administrators

use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::CommandService;
use crate::application::errors::CommandError;
use crate::application::extensions::{BulkOutcome, ExtensionLoader};
use crate::domain::entities::{Command, Invocation, Reply};
use crate::domain::traits::ExtensionHost;

/// Slot the session fills with the loader once startup loading is done
pub type LoaderSlot = Arc<OnceCell<Arc<ExtensionLoader>>>;

/// At most this many identifiers are listed per section of a bulk report
const LIST_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy)]
enum Action {
    Load,
    Unload,
    Reload,
}

impl Action {
    fn verb(&self) -> &'static str {
        match self {
            Action::Load => "load",
            Action::Unload => "unload",
            Action::Reload => "reload",
        }
    }

    fn past(&self) -> &'static str {
        match self {
            Action::Load => "Loaded",
            Action::Unload => "Unloaded",
            Action::Reload => "Reloaded",
        }
    }
}

/// Administrator commands for loading, unloading and reloading extensions
pub struct AdminCommands {
    host: Arc<dyn ExtensionHost>,
    loader: LoaderSlot,
    prefix: String,
}

impl AdminCommands {
    pub fn new(host: Arc<dyn ExtensionHost>, loader: LoaderSlot, prefix: impl Into<String>) -> Self {
        Self {
            host,
            loader,
            prefix: prefix.into(),
        }
    }

    fn loader(&self) -> Option<&Arc<ExtensionLoader>> {
        self.loader.get()
    }

    /// Add every admin command to `service`; all of them require the
    /// Administrator capability
    pub fn register(self: Arc<Self>, service: &CommandService) {
        let p = &self.prefix;

        let admin = Arc::clone(&self);
        service.register(Command::new("loaded_extensions")
            .with_description("Display the list of loaded extensions")
            .admin_only()
            .with_handler(move |_| Ok(admin.loaded_extensions())));

        for action in [Action::Load, Action::Unload, Action::Reload] {
            let admin = Arc::clone(&self);
            service.register(Command::new(format!("{}_extension", action.verb()))
                .with_description(format!("{} an extension by identifier (e.g. extensions.fun.dice)", capitalize(action.verb())))
                .with_usage(format!("{}{}_extension <identifier>", p, action.verb()))
                .admin_only()
                .with_async_handler(move |inv: Invocation| {
                    let admin = Arc::clone(&admin);
                    async move {
                        let identifier = inv.arg(0, "identifier")?.to_string();
                        let text = admin.single(action, &identifier).await;
                        Ok::<Reply, CommandError>(Reply::text(text))
                    }
                }));
        }

        let admin = Arc::clone(&self);
        service.register(Command::new("reload_all_extensions")
            .with_description("Reload all loaded extensions in parallel (hot reload)")
            .admin_only()
            .with_async_handler(move |inv: Invocation| {
                let admin = Arc::clone(&admin);
                async move { Ok::<Reply, CommandError>(admin.reload_all_extensions(&inv).await) }
            }));

        let admin = Arc::clone(&self);
        service.register(Command::new("help_admin")
            .with_description("Display admin commands help")
            .admin_only()
            .with_handler(move |_| Ok(admin.help_admin())));
    }

    pub fn loaded_extensions(&self) -> String {
        let names = self.host.extension_names();
        let names = if names.is_empty() { "None".to_string() } else { names.join(", ") };

        match self.loader() {
            Some(loader) => {
                let loaded = loader.get_loaded();
                let identifiers = if loaded.is_empty() { "None".to_string() } else { loaded.join("\n") };
                format!("📦 Loaded extensions\nExtension names: {}\nIdentifiers:\n{}", names, identifiers)
            }
            None => format!("📦 Loaded extensions: {}", names),
        }
    }

    async fn single(&self, action: Action, identifier: &str) -> String {
        if let Some(loader) = self.loader() {
            let ok = match action {
                Action::Load => loader.load(identifier).await,
                Action::Unload => loader.unload(identifier).await,
                Action::Reload => loader.reload(identifier).await,
            };
            return if ok {
                format!("✅ {} extension: `{}`", action.past(), identifier)
            } else {
                format!("❌ Failed to {} extension: `{}`", action.verb(), identifier)
            };
        }

        // No loader yet: talk to the host directly
        let result = match action {
            Action::Load => self.host.activate(identifier).await,
            Action::Unload => self.host.deactivate(identifier).await,
            Action::Reload => self.host.swap(identifier).await,
        };
        match result {
            Ok(()) => format!("✅ {} extension: `{}`", action.past(), identifier),
            Err(e) => format!("❌ Failed to {} extension `{}`: {}", action.verb(), identifier, e),
        }
    }

    pub async fn load_extension(&self, identifier: &str) -> String {
        self.single(Action::Load, identifier).await
    }

    pub async fn unload_extension(&self, identifier: &str) -> String {
        self.single(Action::Unload, identifier).await
    }

    pub async fn reload_extension(&self, identifier: &str) -> String {
        self.single(Action::Reload, identifier).await
    }

    pub async fn reload_all_extensions(&self, inv: &Invocation) -> Reply {
        let Some(loader) = self.loader() else {
            return Reply::text("❌ Loader not available");
        };

        let notice = "🔄 Reloading all extensions in parallel...";
        let reply = if inv.notify(notice) { Reply::silent() } else { Reply::text(notice) };

        let outcome = loader.reload_all().await;
        reply.then(render_bulk("Reload All Extensions", "reload", &outcome))
    }

    pub fn help_admin(&self) -> String {
        let p = &self.prefix;
        [
            "Admin commands:".to_string(),
            format!("{}loaded_extensions - Display the list of loaded extensions", p),
            format!("{}unload_extension <identifier> - Unload an extension (e.g. extensions.fun.dice)", p),
            format!("{}load_extension <identifier> - Load an extension (e.g. extensions.fun.dice)", p),
            format!("{}reload_extension <identifier> - Reload an extension (e.g. extensions.fun.dice)", p),
            format!("{}reload_all_extensions - 🔄 Reload all extensions in parallel (hot reload)", p),
        ]
        .join("\n")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn summarize(identifiers: &[String]) -> String {
    let mut text = identifiers
        .iter()
        .take(LIST_LIMIT)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if identifiers.len() > LIST_LIMIT {
        text.push_str("...");
    }
    text
}

/// Text report of a bulk operation
pub fn render_bulk(title: &str, verb: &str, outcome: &BulkOutcome) -> String {
    let mut sections = vec![title.to_string()];

    if !outcome.success.is_empty() {
        sections.push(format!(
            "✅ Successfully {}ed ({})\n{}",
            verb,
            outcome.success.len(),
            summarize(&outcome.success)
        ));
    }
    if !outcome.failed.is_empty() {
        sections.push(format!(
            "❌ Failed to {} ({})\n{}",
            verb,
            outcome.failed.len(),
            summarize(&outcome.failed)
        ));
    }

    sections.push(format!("Total: {} extensions", outcome.total));
    sections.join("\n\n")
}
