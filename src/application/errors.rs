//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by the extension host.
///
/// The loader never lets these escape a lifecycle operation; they end up as a
/// log record and a `false` result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    #[error("Extension is already loaded")]
    AlreadyActive,

    #[error("Extension is not loaded")]
    NotActive,

    #[error("Extension could not be found")]
    NotFound,

    #[error("Extension has no setup entry point")]
    NoEntryPoint,

    #[error("{0}")]
    Unexpected(String),
}

/// Command execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Command name already registered: {0}")]
    Conflict(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Permission denied")]
    PermissionDenied,
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
