//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Extensions: Shared-library extension host
//! - Adapters: Platform integrations (Telegram, console)

pub mod config;
pub mod extensions;
pub mod adapters;
