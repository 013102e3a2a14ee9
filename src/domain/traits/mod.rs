//! Domain traits - Abstractions for infrastructure implementations

pub mod bot;
pub mod extension_host;

pub use bot::{Bot, BotInfo};
pub use extension_host::ExtensionHost;
