//! Callback query registry and click handling.

use super::definition::{Button, ButtonBuilder, ButtonFactory, CallbackContext, CallbackDefinition};
use crate::bot::client::BotClient;
use crate::bot::commands::Args;
use crate::bot::events::CallbackClick;
use crate::error::DefinitionError;
use crate::store::ParamStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const ALERT_MISSING_DATA: &str = "This button has no action";
const ALERT_MISSING_QUERY: &str = "This button has no action id";
const ALERT_UNKNOWN_QUERY: &str = "This action is no longer available";
const ALERT_EXPIRED: &str = "This button has expired";
const ALERT_INTERNAL: &str = "Something went wrong, please try again";

/// What to do when a click references parameters that are gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingParams {
    /// Run the callback with no arguments.
    #[default]
    Lenient,
    /// Reject the click with an "expired" alert.
    Strict,
}

/// How a click ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Validation failed; the user got this alert.
    Rejected(String),
    /// Callback and cleanup finished.
    Completed,
    /// Callback, cleanup or parameter lookup failed.
    Failed(String),
}

/// Split a button payload into query id and optional parameter key.
#[must_use]
pub fn parse_payload(data: &str) -> (&str, Option<&str>) {
    match data.split_once(':') {
        Some((query, key)) if !key.is_empty() => (query, Some(key)),
        Some((query, _)) => (query, None),
        None => (data, None),
    }
}

/// Registered callbacks.
pub struct CallbackRegistry {
    callbacks: RwLock<HashMap<String, Arc<CallbackDefinition>>>,
    client: BotClient,
    store: ParamStore,
    missing_params: MissingParams,
}

impl CallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(client: BotClient, store: ParamStore, missing_params: MissingParams) -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            client,
            store,
            missing_params,
        }
    }

    /// Register or replace a callback.
    ///
    /// Returns a fixed button for definitions without arguments, a builder
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if the definition is invalid.
    pub async fn define(
        &self,
        definition: CallbackDefinition,
    ) -> Result<ButtonFactory, DefinitionError> {
        definition.validate()?;

        let factory = if definition.args().is_some() {
            ButtonFactory::Builder(ButtonBuilder::new(&definition, self.store.clone()))
        } else {
            ButtonFactory::Static(Button {
                text: definition.text().to_string(),
                data: definition.query_id().to_string(),
            })
        };

        let query_id = definition.query_id().to_string();
        if self
            .callbacks
            .write()
            .await
            .insert(query_id.clone(), Arc::new(definition))
            .is_some()
        {
            warn!(query = %query_id, "Callback redefined");
        } else {
            info!(query = %query_id, "Registered callback");
        }
        Ok(factory)
    }

    /// Check whether `query_id` is registered.
    pub async fn contains(&self, query_id: &str) -> bool {
        self.callbacks.read().await.contains_key(query_id)
    }

    async fn reject(&self, click: &CallbackClick, reason: &str) -> ClickOutcome {
        warn!(click = %click.id, data = ?click.data, "Callback rejected: {reason}");
        if let Err(e) = self.client.alert(&click.id, reason).await {
            warn!(click = %click.id, "Failed to show alert: {e}");
        }
        ClickOutcome::Rejected(reason.to_string())
    }

    async fn resolve_args(
        &self,
        query_id: &str,
        param_key: Option<&str>,
    ) -> Result<Option<Args>, crate::error::StoreError> {
        let Some(param_key) = param_key else {
            return Ok(Some(Args::new()));
        };
        match self.store.load_callback_params(query_id, param_key).await? {
            Some(args) => Ok(Some(args)),
            None if self.missing_params == MissingParams::Lenient => {
                debug!(query = query_id, param_key, "Stored parameters missing, continuing without arguments");
                Ok(Some(Args::new()))
            }
            None => Ok(None),
        }
    }

    /// Handle one click.
    ///
    /// Validation failures are answered with an alert; callback failures are
    /// logged. Nothing propagates to the caller.
    pub async fn handle_click(&self, click: CallbackClick) -> ClickOutcome {
        let Some(data) = click.data.clone().filter(|d| !d.is_empty()) else {
            return self.reject(&click, ALERT_MISSING_DATA).await;
        };
        let (query_id, param_key) = parse_payload(&data);
        if query_id.is_empty() {
            return self.reject(&click, ALERT_MISSING_QUERY).await;
        }
        let Some(definition) = self.callbacks.read().await.get(query_id).cloned() else {
            return self.reject(&click, ALERT_UNKNOWN_QUERY).await;
        };

        let args = match self.resolve_args(query_id, param_key).await {
            Ok(Some(args)) => args,
            Ok(None) => return self.reject(&click, ALERT_EXPIRED).await,
            Err(e) => {
                error!(query = query_id, "Failed to load callback parameters: {e}");
                if let Err(e) = self.client.alert(&click.id, ALERT_INTERNAL).await {
                    warn!(click = %click.id, "Failed to show alert: {e}");
                }
                return ClickOutcome::Failed(e.to_string());
            }
        };

        if let Some(missing) = definition
            .args()
            .unwrap_or_default()
            .iter()
            .find(|spec| spec.required && !args.contains_key(&spec.name))
        {
            let reason = format!("Missing required argument: {}", missing.name);
            return self.reject(&click, &reason).await;
        }

        if let Err(e) = self.client.acknowledge(&click.id).await {
            warn!(query = query_id, "Failed to acknowledge click: {e}");
        }

        let ctx = CallbackContext {
            query_id: query_id.to_string(),
            click: click.clone(),
            client: self.client.clone(),
            args,
        };
        let result = async {
            definition.handler().handle(&ctx).await?;
            if let Some(cleanup) = definition.cleanup_hook() {
                cleanup.handle(&ctx).await?;
            }
            anyhow::Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                debug!(query = query_id, "Callback completed");
                ClickOutcome::Completed
            }
            Err(e) => {
                error!(query = query_id, chat_id = ?ctx.chat_id(), "Callback failed: {e:#}");
                ClickOutcome::Failed(format!("{e:#}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("approve"), ("approve", None));
        assert_eq!(parse_payload("approve:abcd1234"), ("approve", Some("abcd1234")));
        assert_eq!(parse_payload("approve:"), ("approve", None));
        assert_eq!(parse_payload(":abcd1234"), ("", Some("abcd1234")));
    }
}
