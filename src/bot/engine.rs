//! Engine: the registries, the message hub and the parameter store wired together.

use super::callbacks::{ButtonFactory, CallbackDefinition, CallbackRegistry, ClickOutcome, MissingParams};
use super::client::BotClient;
use super::commands::{CommandDefinition, CommandRegistry, DispatchOptions, DispatchOutcome};
use super::events::{CallbackClick, IncomingMessage};
use super::hub::MessageHub;
use crate::config::Settings;
use crate::error::{ApiError, DefinitionError};
use crate::store::ParamStore;
use std::sync::Arc;
use teloxide::types::ChatId;
use tokio::task::JoinHandle;
use tracing::debug;

/// Engine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Dispatcher timing.
    pub dispatch: DispatchOptions,
    /// Behaviour on clicks with expired parameters.
    pub missing_params: MissingParams,
}

impl From<&Settings> for EngineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            dispatch: DispatchOptions {
                lock_ttl: settings.dispatch_lock_ttl(),
                reply_timeout: settings.reply_timeout(),
            },
            missing_params: if settings.strict_callback_params {
                MissingParams::Strict
            } else {
                MissingParams::Lenient
            },
        }
    }
}

/// Command and callback engine.
pub struct Engine {
    client: BotClient,
    hub: Arc<MessageHub>,
    store: ParamStore,
    commands: Arc<CommandRegistry>,
    callbacks: CallbackRegistry,
}

impl Engine {
    /// Build an engine around `client` and `store`.
    #[must_use]
    pub fn new(client: BotClient, store: ParamStore, options: EngineOptions) -> Arc<Self> {
        let hub = Arc::new(MessageHub::new());
        let commands = Arc::new(CommandRegistry::new(
            client.clone(),
            Arc::clone(&hub),
            store.clone(),
            options.dispatch,
        ));
        let callbacks = CallbackRegistry::new(client.clone(), store.clone(), options.missing_params);
        Arc::new(Self {
            client,
            hub,
            store,
            commands,
            callbacks,
        })
    }

    /// Outbound client.
    #[must_use]
    pub const fn client(&self) -> &BotClient {
        &self.client
    }

    /// Parameter store.
    #[must_use]
    pub const fn store(&self) -> &ParamStore {
        &self.store
    }

    /// Command registry.
    #[must_use]
    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    /// Register or replace a command.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if the definition is invalid.
    pub async fn define_command(&self, definition: CommandDefinition) -> Result<(), DefinitionError> {
        self.commands.define(definition).await
    }

    /// Register or replace a callback.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if the definition is invalid.
    pub async fn define_callback(
        &self,
        definition: CallbackDefinition,
    ) -> Result<ButtonFactory, DefinitionError> {
        self.callbacks.define(definition).await
    }

    /// Feed an inbound message.
    ///
    /// The message first answers any argument waiting in its chat. If it also
    /// triggers a command, the invocation runs on its own task whose handle is
    /// returned. A repeated delivery of a live invocation's trigger is dropped
    /// before it reaches either.
    pub async fn handle_message(
        self: &Arc<Self>,
        message: IncomingMessage,
    ) -> Option<JoinHandle<DispatchOutcome>> {
        let trigger = match message.text.as_deref() {
            Some(text) => self.commands.match_trigger(text).await,
            None => None,
        };
        if let Some((name, _)) = &trigger {
            if self.commands.is_duplicate_trigger(name, &message).await {
                debug!(
                    command = %name,
                    chat_id = message.chat_id.0,
                    message_id = message.id.0,
                    "Duplicate trigger ignored"
                );
                return None;
            }
        }

        self.hub.publish(&message);

        let (name, query) = trigger?;
        debug!(command = %name, chat_id = message.chat_id.0, "Command triggered");

        let engine = Arc::clone(self);
        Some(tokio::spawn(async move {
            engine.commands.dispatch(&name, message, query).await
        }))
    }

    /// Run command `name` directly, bypassing trigger matching.
    pub async fn dispatch(
        &self,
        name: &str,
        message: IncomingMessage,
        query: Option<String>,
    ) -> DispatchOutcome {
        self.commands.dispatch(name, message, query).await
    }

    /// Handle an interactive click.
    pub async fn handle_click(&self, click: CallbackClick) -> ClickOutcome {
        self.callbacks.handle_click(click).await
    }

    /// Run setup hooks and publish the command menu.
    ///
    /// # Errors
    ///
    /// Returns the last platform error once `attempts` attempts failed.
    pub async fn sync_commands(&self, attempts: usize) -> Result<(), ApiError> {
        self.commands.sync(attempts).await
    }

    /// Number of arguments waiting for a reply in `chat_id`.
    #[must_use]
    pub fn pending_replies(&self, chat_id: ChatId) -> usize {
        self.hub.pending(chat_id)
    }
}
