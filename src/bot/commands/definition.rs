//! Command definitions, invocation context and hook traits.

use super::args::{ArgKind, ArgumentSpec, Args};
use super::middleware::Middleware;
use crate::bot::client::BotClient;
use crate::bot::events::IncomingMessage;
use crate::config::DEFAULT_TEMPLATE_EXTENSION;
use crate::error::DefinitionError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use teloxide::types::ChatId;

/// State of one command invocation, handed to every hook.
#[derive(Clone)]
pub struct CommandContext {
    /// Command name.
    pub command: String,
    /// Outbound client.
    pub client: BotClient,
    /// Message that triggered the command.
    pub message: IncomingMessage,
    /// Arguments collected so far.
    pub args: Args,
    /// Static data declared with the command.
    pub data: Option<Arc<Value>>,
    /// User record loaded by a middleware.
    pub user: Option<Value>,
}

impl CommandContext {
    /// Fresh context with no arguments.
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        client: BotClient,
        message: IncomingMessage,
        data: Option<Arc<Value>>,
    ) -> Self {
        Self {
            command: command.into(),
            client,
            message,
            args: Args::new(),
            data,
            user: None,
        }
    }

    /// Chat the command runs in.
    #[must_use]
    pub const fn chat_id(&self) -> ChatId {
        self.message.chat_id
    }

    /// Raw argument value.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Text argument.
    #[must_use]
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }

    /// Number argument.
    #[must_use]
    pub fn arg_i64(&self, name: &str) -> Option<i64> {
        self.arg(name).and_then(Value::as_i64)
    }

    /// Boolean argument.
    #[must_use]
    pub fn arg_bool(&self, name: &str) -> Option<bool> {
        self.arg(name).and_then(Value::as_bool)
    }

    /// Local path of a downloaded file argument.
    #[must_use]
    pub fn arg_path(&self, name: &str) -> Option<&Path> {
        self.arg_str(name).map(Path::new)
    }
}

/// Execution callback or cleanup hook of a command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run with the fully populated context.
    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        (self)(ctx.clone()).await
    }
}

/// Hook run once when commands are synchronised with the platform.
#[async_trait]
pub trait SetupHook: Send + Sync {
    /// Prepare whatever the command needs.
    async fn setup(&self, client: &BotClient) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> SetupHook for F
where
    F: Fn(BotClient) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn setup(&self, client: &BotClient) -> anyhow::Result<()> {
        (self)(client.clone()).await
    }
}

/// A user-invocable conversational command.
///
/// ```
/// use chatflow::bot::commands::{ArgumentSpec, CommandDefinition};
///
/// let report = CommandDefinition::new("report", "Monthly report")
///     .arg(ArgumentSpec::text("from", "start date"))
///     .arg(ArgumentSpec::number("limit", "row limit").optional());
/// assert_eq!(report.default_template(), "report.md");
/// ```
#[derive(Clone)]
pub struct CommandDefinition {
    name: String,
    description: String,
    args: Vec<ArgumentSpec>,
    template: Option<String>,
    handler: Option<Arc<dyn CommandHandler>>,
    cleanup: Option<Arc<dyn CommandHandler>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    setup: Option<Arc<dyn SetupHook>>,
    data: Option<Arc<Value>>,
}

impl CommandDefinition {
    /// Command `/name` shown with `description` in the command menu.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: Vec::new(),
            template: None,
            handler: None,
            cleanup: None,
            middlewares: Vec::new(),
            setup: None,
            data: None,
        }
    }

    /// Declare the next argument; arguments are collected in declaration order.
    #[must_use]
    pub fn arg(mut self, spec: ArgumentSpec) -> Self {
        self.args.retain(|existing| existing.name != spec.name);
        self.args.push(spec);
        self
    }

    /// Execution callback. Without one the command sends its template document.
    #[must_use]
    pub fn handler(mut self, handler: impl CommandHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Hook run after execution, whatever its outcome.
    #[must_use]
    pub fn cleanup(mut self, cleanup: impl CommandHandler + 'static) -> Self {
        self.cleanup = Some(Arc::new(cleanup));
        self
    }

    /// Append a middleware.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware.
    #[must_use]
    pub fn shared_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Setup hook.
    #[must_use]
    pub fn setup(mut self, setup: impl SetupHook + 'static) -> Self {
        self.setup = Some(Arc::new(setup));
        self
    }

    /// Static data passed into every invocation.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(Arc::new(data));
        self
    }

    /// Template document sent by the default handler.
    #[must_use]
    pub fn template(mut self, path: impl Into<String>) -> Self {
        self.template = Some(path.into());
        self
    }

    /// Command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Menu description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared arguments in order.
    #[must_use]
    pub fn args(&self) -> &[ArgumentSpec] {
        &self.args
    }

    pub(crate) fn handler_hook(&self) -> Option<&Arc<dyn CommandHandler>> {
        self.handler.as_ref()
    }

    pub(crate) fn cleanup_hook(&self) -> Option<&Arc<dyn CommandHandler>> {
        self.cleanup.as_ref()
    }

    pub(crate) fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    pub(crate) fn setup_hook(&self) -> Option<&Arc<dyn SetupHook>> {
        self.setup.as_ref()
    }

    pub(crate) fn static_data(&self) -> Option<&Arc<Value>> {
        self.data.as_ref()
    }

    /// Template used by the default handler: the declared one, else `<name>.md`.
    #[must_use]
    pub fn default_template(&self) -> String {
        self.template
            .clone()
            .unwrap_or_else(|| format!("{}.{DEFAULT_TEMPLATE_EXTENSION}", self.name))
    }

    /// Check the definition before it is registered.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` for an invalid name or a file argument
    /// without a template.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !lazy_regex::regex_is_match!(r"^[a-z0-9_]{1,32}$", &self.name) {
            return Err(DefinitionError::InvalidCommandName(self.name.clone()));
        }
        if let Some(spec) = self
            .args
            .iter()
            .find(|spec| spec.kind == ArgKind::File && spec.template.is_none())
        {
            return Err(DefinitionError::MissingTemplate {
                command: self.name.clone(),
                argument: spec.name.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("args", &self.args)
            .field("template", &self.template)
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}
