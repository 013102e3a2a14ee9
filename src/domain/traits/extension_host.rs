use async_trait::async_trait;
use crate::application::errors::ExtensionError;

/// The session's module system, as seen by the extension loader.
///
/// Implementations own the table of live extensions and must be safe to call
/// concurrently for different identifiers.
#[async_trait]
pub trait ExtensionHost: Send + Sync {
    /// Activate `identifier`.
    ///
    /// Fails with `AlreadyActive`, `NotFound`, `NoEntryPoint` or `Unexpected`.
    async fn activate(&self, identifier: &str) -> Result<(), ExtensionError>;

    /// Deactivate `identifier`. Fails with `NotActive` or `Unexpected`.
    async fn deactivate(&self, identifier: &str) -> Result<(), ExtensionError>;

    /// Replace the live build of `identifier` with a fresh one; the old build
    /// stays active if the new one fails. Fails with `NotActive` or `Unexpected`.
    async fn swap(&self, identifier: &str) -> Result<(), ExtensionError>;

    /// Display names of the extensions currently registered with the host
    fn extension_names(&self) -> Vec<String>;
}
