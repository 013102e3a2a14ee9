//! Extension host backed by shared libraries

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use libloading::Library;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::abi::{Extension, ExtensionContext, ExtensionSetupFn, ENTRY_POINT};
use crate::application::errors::ExtensionError;
use crate::application::extensions::discovery;
use crate::application::services::command_service::write_commands;
use crate::application::services::SharedCommands;
use crate::domain::entities::{Command, CommandHandler};
use crate::domain::traits::ExtensionHost;

/// An active extension.
///
/// Fields drop in order, so the instance goes before the library that holds
/// its code.
struct LoadedExtension {
    instance: Box<dyn Extension>,
    commands: Vec<String>,
    shadow_path: PathBuf,
    library: Arc<Library>,
}

/// Keeps a library mapped for as long as `inner` is alive
struct Pinned<T> {
    inner: T,
    _library: Arc<Library>,
}

impl<R> Future for Pinned<BoxFuture<'static, R>> {
    type Output = R;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        self.inner.poll_unpin(cx)
    }
}

/// Wrap a command so its handler and every future it returns hold the library
fn pin_command(mut command: Command, library: &Arc<Library>) -> Command {
    if let Some(handler) = command.handler.take() {
        let pinned = Arc::new(Pinned {
            inner: handler,
            _library: Arc::clone(library),
        });
        let handler: CommandHandler = Arc::new(move |inv| {
            Pinned {
                inner: (pinned.inner)(inv),
                _library: Arc::clone(&pinned._library),
            }
            .boxed()
        });
        command.handler = Some(handler);
    }
    command
}

/// Copy, open and set up one library. Runs on a blocking thread.
///
/// Commands come first so they drop before the library if the result is discarded.
fn open(identifier: &str, source: &Path, shadow_dir: &Path) -> Result<(Vec<Command>, LoadedExtension), ExtensionError> {
    if !source.is_file() {
        return Err(ExtensionError::NotFound);
    }

    // A fresh file name makes the loader map the current build even when a
    // previous one at the same path is still open.
    std::fs::create_dir_all(shadow_dir)
        .map_err(|e| ExtensionError::Unexpected(format!("Failed to create {}: {}", shadow_dir.display(), e)))?;
    let file_name = match source.extension().and_then(|s| s.to_str()) {
        Some(suffix) => format!("{}-{}.{}", identifier.trim_start_matches('.'), Uuid::new_v4().simple(), suffix),
        None => format!("{}-{}", identifier.trim_start_matches('.'), Uuid::new_v4().simple()),
    };
    let shadow_path = shadow_dir.join(file_name);
    std::fs::copy(source, &shadow_path)
        .map_err(|e| ExtensionError::Unexpected(format!("Failed to copy {}: {}", source.display(), e)))?;

    let library = match unsafe { Library::new(&shadow_path) } {
        Ok(library) => library,
        Err(e) => {
            remove_shadow(&shadow_path);
            return Err(ExtensionError::Unexpected(format!("Failed to open {}: {}", source.display(), e)));
        }
    };

    let setup: Option<ExtensionSetupFn> = unsafe { library.get::<ExtensionSetupFn>(ENTRY_POINT) }
        .ok()
        .map(|symbol| *symbol);
    let Some(setup) = setup else {
        drop(library);
        remove_shadow(&shadow_path);
        return Err(ExtensionError::NoEntryPoint);
    };

    let raw = unsafe { setup() };
    if raw.is_null() {
        drop(library);
        remove_shadow(&shadow_path);
        return Err(ExtensionError::Unexpected("Extension entry point returned null".to_string()));
    }
    let instance: Box<dyn Extension> = unsafe { *Box::from_raw(raw) };

    let mut ctx = ExtensionContext::new(identifier);
    if let Err(e) = instance.setup(&mut ctx) {
        drop(ctx);
        drop(instance);
        drop(library);
        remove_shadow(&shadow_path);
        return Err(ExtensionError::Unexpected(format!("Extension setup failed: {}", e)));
    }

    debug!("Opened {} as {}", source.display(), shadow_path.display());
    let loaded = LoadedExtension {
        instance,
        commands: Vec::new(),
        shadow_path,
        library: Arc::new(library),
    };
    Ok((ctx.into_commands(), loaded))
}

/// Tear down and close an extension. Runs on a blocking thread.
fn release(loaded: LoadedExtension) {
    let LoadedExtension {
        instance,
        shadow_path,
        library,
        ..
    } = loaded;

    instance.teardown();
    drop(instance);
    // In-flight handlers may still hold the library; it closes with the last one
    drop(library);
    remove_shadow(&shadow_path);
}

fn remove_shadow(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!("Could not remove shadow copy {}: {}", path.display(), e);
    }
}

/// [`ExtensionHost`] that loads extensions from shared libraries and wires
/// their commands into the shared command table
pub struct DylibHost {
    commands: SharedCommands,
    base_dir: PathBuf,
    suffix: String,
    shadow_dir: PathBuf,
    table: Mutex<HashMap<String, LoadedExtension>>,
}

impl DylibHost {
    pub fn new(commands: SharedCommands) -> Self {
        Self {
            commands,
            base_dir: discovery::working_dir(),
            suffix: discovery::default_suffix().to_string(),
            shadow_dir: std::env::temp_dir().join("swapbot-shadow"),
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Directory relative identifiers are resolved against
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Where libraries are copied before they are opened
    pub fn with_shadow_dir(mut self, shadow_dir: impl Into<PathBuf>) -> Self {
        self.shadow_dir = shadow_dir.into();
        self
    }

    pub fn library_path(&self, identifier: &str) -> PathBuf {
        discovery::identifier_to_path(identifier, &self.base_dir, &self.suffix)
    }

    /// Commands registered by an active extension
    pub fn commands_of(&self, identifier: &str) -> Option<Vec<String>> {
        self.table().get(identifier).map(|l| l.commands.clone())
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, LoadedExtension>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self, identifier: &str) -> bool {
        self.table().contains_key(identifier)
    }

    async fn open(&self, identifier: &str) -> Result<(Vec<Command>, LoadedExtension), ExtensionError> {
        let identifier = identifier.to_string();
        let source = self.library_path(&identifier);
        let shadow_dir = self.shadow_dir.clone();

        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let opened = open(&identifier, &source, &shadow_dir);
            // The caller went away, close what it will never install
            if let Err(Ok((commands, loaded))) = tx.send(opened) {
                drop(commands);
                release(loaded);
            }
        });

        rx.await
            .map_err(|_| ExtensionError::Unexpected("Extension setup panicked".to_string()))?
    }

    /// Tear down on a blocking thread without waiting for it.
    ///
    /// Callers have already committed the table change by now.
    fn retire(&self, identifier: &str, loaded: LoadedExtension) {
        let identifier = identifier.to_string();
        let teardown = tokio::task::spawn_blocking(move || release(loaded));
        tokio::spawn(async move {
            if let Err(e) = teardown.await {
                warn!("Teardown of {} panicked: {}", identifier, e);
            }
        });
    }

    /// Register the commands of a freshly opened extension.
    ///
    /// Nothing is registered when any name clashes.
    fn install(&self, identifier: &str, loaded: &mut LoadedExtension, commands: Vec<Command>) -> Result<(), ExtensionError> {
        let commands = commands
            .into_iter()
            .map(|c| pin_command(c, &loaded.library))
            .collect();

        loaded.commands = write_commands(&self.commands)
            .register_owned(identifier, commands)
            .map_err(|e| ExtensionError::Unexpected(format!("Failed to register commands: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ExtensionHost for DylibHost {
    async fn activate(&self, identifier: &str) -> Result<(), ExtensionError> {
        if self.is_active(identifier) {
            return Err(ExtensionError::AlreadyActive);
        }

        let (commands, mut loaded) = self.open(identifier).await?;

        let installed = {
            let mut table = self.table();
            if table.contains_key(identifier) {
                drop(commands);
                Err((ExtensionError::AlreadyActive, loaded))
            } else {
                match self.install(identifier, &mut loaded, commands) {
                    Ok(()) => {
                        info!(
                            "Activated {} ({}) with {} command(s)",
                            identifier,
                            loaded.instance.name(),
                            loaded.commands.len()
                        );
                        let description = loaded.instance.description();
                        if !description.is_empty() {
                            debug!("{}: {}", identifier, description);
                        }
                        table.insert(identifier.to_string(), loaded);
                        Ok(())
                    }
                    Err(e) => Err((e, loaded)),
                }
            }
        };

        if let Err((e, loaded)) = installed {
            self.retire(identifier, loaded);
            return Err(e);
        }
        Ok(())
    }

    async fn deactivate(&self, identifier: &str) -> Result<(), ExtensionError> {
        let loaded = {
            let mut table = self.table();
            let loaded = table.remove(identifier).ok_or(ExtensionError::NotActive)?;
            write_commands(&self.commands).remove_owned(identifier);
            loaded
        };

        self.retire(identifier, loaded);
        info!("Deactivated {}", identifier);
        Ok(())
    }

    async fn swap(&self, identifier: &str) -> Result<(), ExtensionError> {
        if !self.is_active(identifier) {
            return Err(ExtensionError::NotActive);
        }

        let (commands, mut fresh) = self
            .open(identifier)
            .await
            .map_err(|e| ExtensionError::Unexpected(format!("New build unusable: {}", e)))?;

        let outcome = {
            let mut table = self.table();
            match table.remove(identifier) {
                None => {
                    drop(commands);
                    Err((ExtensionError::NotActive, fresh))
                }
                Some(old) => {
                    let previous = write_commands(&self.commands).remove_owned(identifier);
                    match self.install(identifier, &mut fresh, commands) {
                        Ok(()) => {
                            table.insert(identifier.to_string(), fresh);
                            Ok(old)
                        }
                        Err(e) => {
                            // Roll back to the build that was running
                            if let Err(restore) = write_commands(&self.commands).register_owned(identifier, previous) {
                                warn!("Failed to restore commands of {}: {}", identifier, restore);
                            }
                            table.insert(identifier.to_string(), old);
                            Err((e, fresh))
                        }
                    }
                }
            }
        };

        match outcome {
            Ok(old) => {
                self.retire(identifier, old);
                info!("Swapped {}", identifier);
                Ok(())
            }
            Err((e, fresh)) => {
                self.retire(identifier, fresh);
                warn!("Kept the running build of {}: {}", identifier, e);
                Err(e)
            }
        }
    }

    fn extension_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table().values().map(|l| l.instance.name().to_string()).collect();
        names.sort();
        names
    }
}
