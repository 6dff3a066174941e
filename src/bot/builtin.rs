//! Built-in commands.

use super::commands::{CommandContext, CommandDefinition, CommandHandler, CommandRegistry};
use super::engine::Engine;
use crate::error::DefinitionError;
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::{Arc, Weak};

struct Help {
    // weak: the registry owns this handler through its definition
    registry: Weak<CommandRegistry>,
}

#[async_trait]
impl CommandHandler for Help {
    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let mut text = String::from("**Available commands**\n");
        for (name, description) in registry.list().await {
            let _ = write!(text, "\n/{name} - {description}");
        }
        ctx.client.send_formatted(ctx.chat_id(), &text, None).await?;
        Ok(())
    }
}

/// Register the built-in `/help` command.
///
/// # Errors
///
/// Returns `DefinitionError` if registration fails.
pub async fn register(engine: &Engine) -> Result<(), DefinitionError> {
    let help = Help {
        registry: Arc::downgrade(engine.commands()),
    };
    engine
        .define_command(CommandDefinition::new("help", "List available commands").handler(help))
        .await
}
