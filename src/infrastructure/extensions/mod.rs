//! Shared-library extensions
//!
//! Extensions are `cdylib` crates exporting an entry point that hands back an
//! [`Extension`]. [`DylibHost`] opens them and plugs their commands into the
//! running bot.

pub mod abi;
pub mod host;

pub use abi::{Extension, ExtensionContext, ExtensionSetupFn, ENTRY_POINT};
pub use host::DylibHost;
