//! Interactive button definitions and builders.

use crate::bot::client::BotClient;
use crate::bot::commands::{ArgKind, ArgumentSpec, Args};
use crate::bot::events::CallbackClick;
use crate::config::MAX_QUERY_ID_LEN;
use crate::error::{CallbackError, DefinitionError};
use crate::store::ParamStore;
use crate::utils::substitute_placeholders;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use tracing::debug;

/// State of one click, handed to the callback.
#[derive(Clone)]
pub struct CallbackContext {
    /// Query id of the clicked button.
    pub query_id: String,
    /// The click itself.
    pub click: CallbackClick,
    /// Outbound client.
    pub client: BotClient,
    /// Stored button arguments.
    pub args: Args,
}

impl CallbackContext {
    /// Chat of the message carrying the button.
    #[must_use]
    pub const fn chat_id(&self) -> Option<ChatId> {
        self.click.chat_id
    }

    /// Message carrying the button.
    #[must_use]
    pub const fn message_id(&self) -> Option<MessageId> {
        self.click.message_id
    }

    /// Raw argument value.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }
}

/// Business logic behind a button.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Handle one click.
    async fn handle(&self, ctx: &CallbackContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> CallbackHandler for F
where
    F: Fn(CallbackContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: &CallbackContext) -> anyhow::Result<()> {
        (self)(ctx.clone()).await
    }
}

/// A button and the callback its clicks run.
#[derive(Clone)]
pub struct CallbackDefinition {
    query_id: String,
    text: String,
    args: Option<Vec<ArgumentSpec>>,
    handler: Arc<dyn CallbackHandler>,
    cleanup: Option<Arc<dyn CallbackHandler>>,
}

impl CallbackDefinition {
    /// Button `query_id` labelled `text`; `{name}` in the label is replaced
    /// with argument values.
    pub fn new(
        query_id: impl Into<String>,
        text: impl Into<String>,
        handler: impl CallbackHandler + 'static,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            text: text.into(),
            args: None,
            handler: Arc::new(handler),
            cleanup: None,
        }
    }

    /// Declare an argument; a definition with arguments yields a [`ButtonBuilder`].
    #[must_use]
    pub fn arg(mut self, spec: ArgumentSpec) -> Self {
        let args = self.args.get_or_insert_with(Vec::new);
        args.retain(|existing| existing.name != spec.name);
        args.push(spec);
        self
    }

    /// Hook run after the callback.
    #[must_use]
    pub fn cleanup(mut self, cleanup: impl CallbackHandler + 'static) -> Self {
        self.cleanup = Some(Arc::new(cleanup));
        self
    }

    /// Query id.
    #[must_use]
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Label template.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Declared arguments.
    #[must_use]
    pub fn args(&self) -> Option<&[ArgumentSpec]> {
        self.args.as_deref()
    }

    pub(crate) fn handler(&self) -> &Arc<dyn CallbackHandler> {
        &self.handler
    }

    pub(crate) fn cleanup_hook(&self) -> Option<&Arc<dyn CallbackHandler>> {
        self.cleanup.as_ref()
    }

    /// Check the definition before it is registered.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` for an empty, oversized or `:`-bearing query
    /// id, or a file argument.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.query_id.is_empty() {
            return Err(DefinitionError::EmptyQueryId);
        }
        if self.query_id.len() > MAX_QUERY_ID_LEN {
            return Err(DefinitionError::QueryIdTooLong(self.query_id.clone()));
        }
        if self.query_id.contains(':') {
            return Err(DefinitionError::QueryIdSeparator(self.query_id.clone()));
        }
        if let Some(spec) = self
            .args
            .iter()
            .flatten()
            .find(|spec| spec.kind == ArgKind::File)
        {
            return Err(DefinitionError::FileArgument {
                query: self.query_id.clone(),
                argument: spec.name.clone(),
            });
        }
        Ok(())
    }
}

/// A ready-to-send inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    /// Label.
    pub text: String,
    /// Payload, `<query id>` or `<query id>:<parameter key>`.
    pub data: String,
}

impl From<Button> for InlineKeyboardButton {
    fn from(button: Button) -> Self {
        Self::callback(button.text, button.data)
    }
}

impl Button {
    /// Keyboard from rows of buttons.
    #[must_use]
    pub fn keyboard(rows: Vec<Vec<Self>>) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::new(
            rows.into_iter()
                .map(|row| row.into_iter().map(InlineKeyboardButton::from).collect::<Vec<_>>()),
        )
    }
}

/// Builds buttons carrying stored arguments.
#[derive(Clone)]
pub struct ButtonBuilder {
    query_id: String,
    text: String,
    specs: Arc<Vec<ArgumentSpec>>,
    store: ParamStore,
}

impl ButtonBuilder {
    pub(crate) fn new(definition: &CallbackDefinition, store: ParamStore) -> Self {
        Self {
            query_id: definition.query_id.clone(),
            text: definition.text.clone(),
            specs: Arc::new(definition.args.clone().unwrap_or_default()),
            store,
        }
    }

    /// Store `args` and return a button pointing at them.
    ///
    /// # Errors
    ///
    /// Returns `CallbackError::MissingArgument` if a required argument is
    /// absent, or `CallbackError::Store` if the arguments cannot be stored.
    pub async fn build(&self, args: &Args) -> Result<Button, CallbackError> {
        if let Some(missing) = self
            .specs
            .iter()
            .find(|spec| spec.required && !args.contains_key(&spec.name))
        {
            return Err(CallbackError::MissingArgument(missing.name.clone()));
        }

        let param_key = self.store.store_callback_params(&self.query_id, args).await?;
        debug!(query = %self.query_id, "Built button");
        Ok(Button {
            text: substitute_placeholders(&self.text, args),
            data: format!("{}:{param_key}", self.query_id),
        })
    }

    /// Query id of the buttons.
    #[must_use]
    pub fn query_id(&self) -> &str {
        &self.query_id
    }
}

/// What registering a callback yields.
#[derive(Clone)]
pub enum ButtonFactory {
    /// Definition without arguments: one fixed button.
    Static(Button),
    /// Definition with arguments: build a button per argument set.
    Builder(ButtonBuilder),
}

impl ButtonFactory {
    /// The fixed button, if the definition has no arguments.
    #[must_use]
    pub fn into_static(self) -> Option<Button> {
        match self {
            Self::Static(button) => Some(button),
            Self::Builder(_) => None,
        }
    }

    /// The builder, if the definition has arguments.
    #[must_use]
    pub fn into_builder(self) -> Option<ButtonBuilder> {
        match self {
            Self::Static(_) => None,
            Self::Builder(builder) => Some(builder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    async fn noop(_ctx: CallbackContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn store() -> ParamStore {
        ParamStore::new(Arc::new(MemoryStore::new(100)), Duration::from_secs(60))
    }

    #[test]
    fn test_query_id_validation() {
        let ok = "q".repeat(MAX_QUERY_ID_LEN);
        assert!(CallbackDefinition::new(ok, "", noop).validate().is_ok());

        let long = "q".repeat(MAX_QUERY_ID_LEN + 1);
        assert_eq!(
            CallbackDefinition::new(long.clone(), "", noop).validate(),
            Err(DefinitionError::QueryIdTooLong(long))
        );
        assert_eq!(
            CallbackDefinition::new("", "", noop).validate(),
            Err(DefinitionError::EmptyQueryId)
        );
        assert_eq!(
            CallbackDefinition::new("a:b", "", noop).validate(),
            Err(DefinitionError::QueryIdSeparator("a:b".into()))
        );
    }

    #[test]
    fn test_file_arguments_rejected() {
        let def = CallbackDefinition::new("q", "", noop)
            .arg(ArgumentSpec::file("f", "").template("f.csv"));
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::FileArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_builder_stores_args_and_fills_label() {
        let store = store();
        let def = CallbackDefinition::new("approve", "Approve #{id} for {who}", noop)
            .arg(ArgumentSpec::number("id", ""))
            .arg(ArgumentSpec::text("note", "").optional());
        let builder = ButtonBuilder::new(&def, store.clone());

        let args = json!({"id": 42, "who": "Ann"})
            .as_object()
            .cloned()
            .expect("object");
        let button = builder.build(&args).await.expect("build");

        assert_eq!(button.text, "Approve #42 for Ann");
        let (query, key) = button.data.split_once(':').expect("payload has key");
        assert_eq!(query, "approve");
        assert_eq!(
            store.load_callback_params(query, key).await.expect("load"),
            Some(args)
        );
    }

    #[tokio::test]
    async fn test_builder_requires_required_args() {
        let def = CallbackDefinition::new("approve", "Approve", noop)
            .arg(ArgumentSpec::number("id", ""));
        let builder = ButtonBuilder::new(&def, store());
        assert!(matches!(
            builder.build(&Args::new()).await,
            Err(CallbackError::MissingArgument(name)) if name == "id"
        ));
    }

    #[test]
    fn test_keyboard() {
        let markup = Button::keyboard(vec![vec![Button {
            text: "Go".into(),
            data: "go".into(),
        }]]);
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0][0].text, "Go");
    }
}
