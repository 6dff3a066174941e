//! Pre-execution middleware chain.
//!
//! Middlewares run in registration order before argument collection. Each one
//! may enrich the context or stop the invocation.

use super::definition::CommandContext;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Decision of a middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Go on with the next middleware.
    Continue,
    /// Stop the invocation, optionally telling the user why.
    Abort(Option<String>),
}

impl Flow {
    /// Abort with a message for the user.
    pub fn abort_with(message: impl Into<String>) -> Self {
        Self::Abort(Some(message.into()))
    }
}

/// Trait for implementing command middlewares.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name of the middleware for logging.
    fn name(&self) -> &str {
        "middleware"
    }

    /// Inspect or enrich the context.
    ///
    /// Errors end the invocation like an abort without a message.
    async fn check(&self, ctx: &mut CommandContext) -> anyhow::Result<Flow>;
}

/// Closures get a copy of the context; implement the trait to modify it.
#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
{
    async fn check(&self, ctx: &mut CommandContext) -> anyhow::Result<Flow> {
        (self)(ctx.clone()).await
    }
}

/// Run `middlewares` in order; the first non-`Continue` result stops the chain.
///
/// # Errors
///
/// Returns the first middleware error.
pub async fn run_chain(
    middlewares: &[Arc<dyn Middleware>],
    ctx: &mut CommandContext,
) -> anyhow::Result<Flow> {
    for middleware in middlewares {
        match middleware.check(ctx).await? {
            Flow::Continue => {
                debug!(middleware = middleware.name(), "Middleware passed");
            }
            abort @ Flow::Abort(_) => {
                info!(
                    middleware = middleware.name(),
                    command = %ctx.command,
                    chat_id = ctx.chat_id().0,
                    "Middleware aborted command"
                );
                return Ok(abort);
            }
        }
    }
    Ok(Flow::Continue)
}
