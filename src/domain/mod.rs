//! Domain layer - Core types with no infrastructure dependencies
//! 
//! This layer contains:
//! - Entities: Core objects (User, Message, Command)
//! - Traits: Abstractions for infrastructure (Bot, ExtensionHost)

pub mod entities;
pub mod traits;
