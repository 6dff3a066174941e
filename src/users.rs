//! User lookup by chat id.
//!
//! The engine does not own user records. A [`UserDirectory`] looks them up,
//! [`CachedUserDirectory`] keeps recent hits in memory and [`RequireUser`]
//! loads the record into a command context.

use crate::bot::commands::{CommandContext, Flow, Middleware};
use crate::config::Settings;
use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Interface for user record providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find the user owning `chat_id`.
    async fn find_by_chat(&self, chat_id: i64) -> anyhow::Result<Option<Value>>;
}

/// Capacity-bounded cache in front of another directory.
///
/// Only found users are cached; misses always go to the backing directory.
pub struct CachedUserDirectory {
    inner: Arc<dyn UserDirectory>,
    cache: Cache<i64, Arc<Value>>,
}

impl CachedUserDirectory {
    /// Creates a cache holding at most `max_capacity` users.
    #[must_use]
    pub fn new(inner: Arc<dyn UserDirectory>, max_capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// Creates a cache sized by `user_cache_capacity`.
    #[must_use]
    pub fn from_settings(inner: Arc<dyn UserDirectory>, settings: &Settings) -> Self {
        Self::new(inner, settings.user_cache_capacity)
    }

    /// Drop the cached record of `chat_id`.
    pub async fn invalidate(&self, chat_id: i64) {
        self.cache.invalidate(&chat_id).await;
    }

    /// Returns the approximate number of cached users.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl UserDirectory for CachedUserDirectory {
    async fn find_by_chat(&self, chat_id: i64) -> anyhow::Result<Option<Value>> {
        if let Some(user) = self.cache.get(&chat_id).await {
            return Ok(Some(user.as_ref().clone()));
        }
        let user = self.inner.find_by_chat(chat_id).await?;
        if let Some(user) = &user {
            self.cache.insert(chat_id, Arc::new(user.clone())).await;
        }
        Ok(user)
    }
}

/// Middleware that loads the user into [`CommandContext::user`].
///
/// Commands run by unknown chats are aborted with `message`.
pub struct RequireUser {
    directory: Arc<dyn UserDirectory>,
    message: Option<String>,
}

impl RequireUser {
    /// Abort unknown chats without telling them.
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            message: None,
        }
    }

    /// Message sent to unknown chats.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[async_trait]
impl Middleware for RequireUser {
    fn name(&self) -> &str {
        "require_user"
    }

    async fn check(&self, ctx: &mut CommandContext) -> anyhow::Result<Flow> {
        let chat_id = ctx.chat_id().0;
        match self.directory.find_by_chat(chat_id).await? {
            Some(user) => {
                ctx.user = Some(user);
                Ok(Flow::Continue)
            }
            None => {
                debug!(chat_id, command = %ctx.command, "Unknown user");
                Ok(Flow::Abort(self.message.clone()))
            }
        }
    }
}
