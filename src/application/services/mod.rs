//! Application services - command dispatch and the admin command surface

pub mod admin;
pub mod command_service;

pub use admin::{AdminCommands, LoaderSlot};
pub use command_service::{shared_commands, CommandService, SharedCommands};
