//! Example extension: build it, drop the library into `extensions/` and
//! run `!load_extension extensions.greeter` (or `!reload_extension` after a
//! rebuild).

use swapbot::application::errors::CommandError;
use swapbot::domain::entities::Command;
use swapbot::infrastructure::extensions::{Extension, ExtensionContext};

#[derive(Default)]
pub struct Greeter;

impl Extension for Greeter {
    fn name(&self) -> &str {
        "greeter"
    }

    fn description(&self) -> &str {
        "Says hello"
    }

    fn setup(&self, ctx: &mut ExtensionContext) -> Result<(), String> {
        ctx.add_command(
            Command::new("hello")
                .with_description("Greet someone")
                .with_usage("hello [name]")
                .with_handler(|inv| {
                    let name = match inv.args.first() {
                        Some(name) => name.clone(),
                        None => inv
                            .message
                            .sender
                            .as_ref()
                            .map(|u| u.display_name().to_string())
                            .unwrap_or_else(|| "there".to_string()),
                    };
                    Ok(format!("👋 Hello, {}!", name))
                }),
        )
        .add_command(
            Command::new("shout")
                .with_description("Repeat the arguments in capitals")
                .with_handler(|inv| {
                    let text = inv.arg(0, "text")?;
                    if inv.args.len() > 20 {
                        return Err(CommandError::InvalidArgs("at most 20 words".to_string()));
                    }
                    Ok(std::iter::once(text)
                        .chain(inv.args[1..].iter().map(String::as_str))
                        .collect::<Vec<_>>()
                        .join(" ")
                        .to_uppercase())
                }),
        );
        Ok(())
    }
}

swapbot::declare_extension!(Greeter, Greeter::default);

#[cfg(test)]
mod tests {
    use super::*;
    use swapbot::domain::entities::{Invocation, Message, Reply};

    #[tokio::test]
    async fn test_commands() {
        let mut ctx = ExtensionContext::new("extensions.greeter");
        Greeter.setup(&mut ctx).unwrap();
        let commands = ctx.into_commands();
        assert_eq!(commands.len(), 2);

        let shout = commands[1].handler.clone().unwrap();
        let message = Message::from_command("chat", "shout", vec!["hot".into(), "swap".into()]);
        let reply = shout(Invocation::new(message, false)).await.unwrap();
        assert_eq!(reply, Reply::text("HOT SWAP"));
    }
}
