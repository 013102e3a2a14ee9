//! Extension ABI - what a shared library must export to be loadable
//!
//! An extension is a `cdylib` that depends on this crate and exports the
//! [`ENTRY_POINT`] symbol, normally through [`declare_extension!`]. Host and
//! extension must be built by the same compiler against the same version of
//! this crate, since trait objects and `Command` values cross the boundary.

use crate::domain::entities::Command;

/// Symbol every extension library exports
pub const ENTRY_POINT: &[u8] = b"swapbot_extension_setup";

/// Signature of [`ENTRY_POINT`].
///
/// The trait object is boxed twice so the returned pointer is thin.
pub type ExtensionSetupFn = unsafe extern "C" fn() -> *mut Box<dyn Extension>;

/// Trait implemented by every extension
pub trait Extension: Send + Sync {
    /// Human readable name
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Contribute commands. An error aborts activation.
    fn setup(&self, ctx: &mut ExtensionContext) -> Result<(), String>;

    /// Called once before the library is closed
    fn teardown(&self) {}
}

/// Collects what an extension contributes during [`Extension::setup`]
pub struct ExtensionContext {
    identifier: String,
    commands: Vec<Command>,
}

impl ExtensionContext {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            commands: Vec::new(),
        }
    }

    /// Identifier the extension was loaded under
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn add_command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Export the entry point for an extension type.
///
/// ```ignore
/// swapbot::declare_extension!(Greeter, Greeter::default);
/// ```
#[macro_export]
macro_rules! declare_extension {
    ($ty:ty, $ctor:path) => {
        #[no_mangle]
        pub extern "C" fn swapbot_extension_setup(
        ) -> *mut ::std::boxed::Box<dyn $crate::infrastructure::extensions::Extension> {
            let extension: $ty = $ctor();
            let extension: ::std::boxed::Box<dyn $crate::infrastructure::extensions::Extension> =
                ::std::boxed::Box::new(extension);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(extension))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Dice;

    impl Extension for Dice {
        fn name(&self) -> &str {
            "dice"
        }

        fn setup(&self, ctx: &mut ExtensionContext) -> Result<(), String> {
            ctx.add_command(Command::new("roll").with_handler(|_| Ok("4".to_string())));
            Ok(())
        }
    }

    crate::declare_extension!(Dice, Dice::default);

    #[test]
    fn test_entry_point_returns_usable_instance() {
        let raw = swapbot_extension_setup();
        assert!(!raw.is_null());
        let extension: Box<dyn Extension> = unsafe { *Box::from_raw(raw) };
        assert_eq!(extension.name(), "dice");

        let mut ctx = ExtensionContext::new("ext.dice");
        extension.setup(&mut ctx).unwrap();
        assert_eq!(ctx.identifier(), "ext.dice");
        let commands = ctx.into_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "roll");
    }
}
