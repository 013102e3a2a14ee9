//! Domain entities - Core business objects

pub mod user;
pub mod message;
pub mod command;

pub use user::User;
pub use message::{Message, Content};
pub use command::{Capability, Command, CommandHandler, CommandRegistry, Invocation, Reply};
