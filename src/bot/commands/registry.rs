//! Command registry and dispatcher.
//!
//! Every invocation runs lock, middlewares, argument collection, execution,
//! cleanup. Errors end the invocation at the [`CommandRegistry::dispatch`]
//! boundary and come back as a [`DispatchOutcome`].

use super::args::parse_inline_args;
use super::conversation::ArgumentCollector;
use super::definition::{CommandContext, CommandDefinition};
use super::middleware::{run_chain, Flow};
use crate::bot::client::{discard_file, BotClient, TemplateRequest};
use crate::bot::events::IncomingMessage;
use crate::bot::hub::MessageHub;
use crate::config::{COMMAND_SYNC_INITIAL_BACKOFF_MS, COMMAND_SYNC_MAX_BACKOFF_MS};
use crate::error::{ApiError, CommandError, DefinitionError};
use crate::store::ParamStore;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use teloxide::types::MessageId;
use tokio::sync::RwLock;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, error, info, warn};

/// Timing knobs of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Debounce window of the per-chat dispatch lock.
    pub lock_ttl: Duration,
    /// Reply timeout of each pending argument, `None` waits forever.
    pub reply_timeout: Option<Duration>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(5),
            reply_timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// How an invocation ended.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Execution callback finished.
    Completed,
    /// Another trigger of the same command in the same chat holds the lock.
    Debounced,
    /// No such command.
    Unknown,
    /// A middleware stopped the invocation, with the message sent to the user.
    Aborted(Option<String>),
    /// Middleware, argument collection or execution failed.
    Failed(CommandError),
}

struct RegisteredCommand {
    definition: CommandDefinition,
    trigger: Regex,
}

fn trigger_for(name: &str) -> Result<Regex, DefinitionError> {
    Regex::new(&format!(r"^/{}(\?.*)?$", regex::escape(name)))
        .map_err(|_| DefinitionError::InvalidCommandName(name.to_string()))
}

type Active = HashMap<(i64, String), MessageId>;

/// Marks an invocation as live until dropped.
struct ActiveInvocation<'a> {
    active: &'a Mutex<Active>,
    key: (i64, String),
    origin: MessageId,
}

impl Drop for ActiveInvocation<'_> {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if active.get(&self.key) == Some(&self.origin) {
            active.remove(&self.key);
        }
    }
}

/// Registered commands and the machinery to run them.
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, Arc<RegisteredCommand>>>,
    // trigger message of every invocation past its lock, by chat and command
    active: Mutex<Active>,
    client: BotClient,
    hub: Arc<MessageHub>,
    store: ParamStore,
    options: DispatchOptions,
}

impl CommandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        client: BotClient,
        hub: Arc<MessageHub>,
        store: ParamStore,
        options: DispatchOptions,
    ) -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            client,
            hub,
            store,
            options,
        }
    }

    /// Register or replace a command.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if the definition is invalid; nothing is
    /// registered then.
    pub async fn define(&self, definition: CommandDefinition) -> Result<(), DefinitionError> {
        definition.validate()?;
        let trigger = trigger_for(definition.name())?;
        let name = definition.name().to_string();

        let previous = self.commands.write().await.insert(
            name.clone(),
            Arc::new(RegisteredCommand {
                definition,
                trigger,
            }),
        );
        if previous.is_some() {
            warn!(command = %name, "Command redefined, previous trigger replaced");
        } else {
            info!(command = %name, "Registered command");
        }
        Ok(())
    }

    /// Find the command whose trigger matches `text`.
    ///
    /// Returns the command name and the inline query string, if any.
    pub async fn match_trigger(&self, text: &str) -> Option<(String, Option<String>)> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        let commands = self.commands.read().await;
        commands.values().find_map(|command| {
            command.trigger.captures(text).map(|caps| {
                (
                    command.definition.name().to_string(),
                    caps.get(1).map(|m| m.as_str().to_string()),
                )
            })
        })
    }

    fn active(&self) -> MutexGuard<'_, Active> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn track(&self, chat_id: i64, name: &str, origin: MessageId) -> ActiveInvocation<'_> {
        let key = (chat_id, name.to_string());
        self.active().insert(key.clone(), origin);
        ActiveInvocation {
            active: &self.active,
            key,
            origin,
        }
    }

    /// Whether `message` re-delivers the trigger of a live invocation of `name`.
    ///
    /// It does when it is the very message that started that invocation, or
    /// when the invocation still holds its dispatch lock. Such a message must
    /// neither start a new invocation nor answer the pending argument.
    pub async fn is_duplicate_trigger(&self, name: &str, message: &IncomingMessage) -> bool {
        let chat_id = message.chat_id.0;
        let origin = self.active().get(&(chat_id, name.to_string())).copied();
        let Some(origin) = origin else {
            return false;
        };
        if origin == message.id {
            return true;
        }
        match self.store.dispatch_lock_held(name, chat_id).await {
            Ok(held) => held,
            Err(e) => {
                warn!(command = name, chat_id, "Dispatch lock check failed: {e}");
                false
            }
        }
    }

    /// Registered definition by name.
    pub async fn get(&self, name: &str) -> Option<CommandDefinition> {
        self.commands
            .read()
            .await
            .get(name)
            .map(|c| c.definition.clone())
    }

    /// `(name, description)` of every command, sorted by name.
    pub async fn list(&self) -> Vec<(String, String)> {
        let mut list: Vec<_> = self
            .commands
            .read()
            .await
            .values()
            .map(|c| {
                (
                    c.definition.name().to_string(),
                    c.definition.description().to_string(),
                )
            })
            .collect();
        list.sort();
        list
    }

    /// Run command `name` for `message`.
    ///
    /// `query` is the inline query string of the trigger (`?from=...`). Also
    /// usable to replay a command programmatically.
    pub async fn dispatch(
        &self,
        name: &str,
        message: IncomingMessage,
        query: Option<String>,
    ) -> DispatchOutcome {
        let Some(command) = self.commands.read().await.get(name).cloned() else {
            warn!(command = name, "Dispatch of unknown command");
            return DispatchOutcome::Unknown;
        };
        let definition = &command.definition;
        let chat_id = message.chat_id;
        let origin = message.id;

        match self
            .store
            .acquire_dispatch_lock(name, chat_id.0, self.options.lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(command = name, chat_id = chat_id.0, "Dispatch debounced");
                return DispatchOutcome::Debounced;
            }
            Err(e) => {
                error!(command = name, chat_id = chat_id.0, "Dispatch lock failed: {e}");
                return DispatchOutcome::Failed(e.into());
            }
        }
        let live = self.track(chat_id.0, name, origin);

        let mut ctx = CommandContext::new(
            name,
            self.client.clone(),
            message,
            definition.static_data().cloned(),
        );
        if let Some(query) = &query {
            ctx.args = parse_inline_args(query, definition.args());
        }

        let result = self.run(definition, &mut ctx).await;

        if let Some(cleanup) = definition.cleanup_hook() {
            if let Err(e) = cleanup.handle(&ctx).await {
                error!(command = name, chat_id = chat_id.0, "Cleanup hook failed: {e:#}");
            }
        }
        self.remove_temp_files(chat_id.0, origin.0).await;
        drop(live);

        match result {
            Ok(Flow::Continue) => {
                debug!(command = name, chat_id = chat_id.0, "Command completed");
                DispatchOutcome::Completed
            }
            Ok(Flow::Abort(message)) => DispatchOutcome::Aborted(message),
            Err(
                e @ (CommandError::Interrupted(_)
                | CommandError::TimedOut(..)
                | CommandError::Closed(_)),
            ) => {
                info!(command = name, chat_id = chat_id.0, "Command abandoned: {e}");
                DispatchOutcome::Failed(e)
            }
            Err(e) => {
                error!(command = name, chat_id = chat_id.0, "Command failed: {e:#}");
                DispatchOutcome::Failed(e)
            }
        }
    }

    async fn run(
        &self,
        definition: &CommandDefinition,
        ctx: &mut CommandContext,
    ) -> Result<Flow, CommandError> {
        let chat_id = ctx.chat_id();

        let flow = run_chain(definition.middlewares(), ctx).await?;
        if let Flow::Abort(message) = &flow {
            if let Some(text) = message {
                if let Err(e) = self.client.send_formatted(chat_id, text, None).await {
                    warn!(command = %ctx.command, "Failed to send abort message: {e}");
                }
            }
            return Ok(flow);
        }

        ArgumentCollector::new(&self.client, &self.hub, &self.store, self.options.reply_timeout)
            .collect(chat_id, ctx.message.id, definition.args(), &mut ctx.args)
            .await?;

        match definition.handler_hook() {
            Some(handler) => handler.handle(ctx).await?,
            None => {
                let template = definition.default_template();
                let request = TemplateRequest::new(chat_id, &template)
                    .data(ctx.data.as_deref());
                self.client.send_template_document(request).await;
            }
        }
        Ok(Flow::Continue)
    }

    async fn remove_temp_files(&self, chat_id: i64, message_id: i32) {
        let files = match self.store.take_temp_files(chat_id, message_id).await {
            Ok(files) => files,
            Err(e) => {
                warn!(chat_id, "Failed to load temporary files: {e}");
                return;
            }
        };
        for path in files {
            discard_file(&path).await;
        }
    }

    /// Run setup hooks and publish the command menu.
    ///
    /// Setup hook failures are logged. Publishing is retried with exponential
    /// backoff, `attempts` times in total.
    ///
    /// # Errors
    ///
    /// Returns the last platform error once all attempts failed.
    pub async fn sync(&self, attempts: usize) -> Result<(), ApiError> {
        let definitions: Vec<_> = self
            .commands
            .read()
            .await
            .values()
            .map(|c| c.definition.clone())
            .collect();

        for definition in &definitions {
            if let Some(setup) = definition.setup_hook() {
                if let Err(e) = setup.setup(&self.client).await {
                    error!(command = definition.name(), "Setup hook failed: {e:#}");
                }
            }
        }

        let commands = self.list().await;
        let strategy = ExponentialBackoff::from_millis(COMMAND_SYNC_INITIAL_BACKOFF_MS)
            .max_delay(Duration::from_millis(COMMAND_SYNC_MAX_BACKOFF_MS))
            .map(jitter)
            .take(attempts.saturating_sub(1));

        Retry::spawn(strategy, || {
            let commands = commands.clone();
            async move { self.client.api().set_commands(commands).await }
        })
        .await
        .map_err(|e| {
            warn!("Command menu sync failed after {attempts} attempts: {e}");
            e
        })?;
        info!(count = commands.len(), "Command menu synchronised");
        Ok(())
    }
}
