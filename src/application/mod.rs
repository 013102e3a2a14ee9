//! Application layer - Use cases and orchestration
//! 
//! This layer contains:
//! - Extensions: discovery and lifecycle of hot-swappable extensions
//! - Services: command table and the admin command surface
//! - Messaging: message parsing
//! - Session: the running bot session
//! - Errors: error taxonomy

pub mod errors;
pub mod extensions;
pub mod messaging;
pub mod services;
pub mod session;
