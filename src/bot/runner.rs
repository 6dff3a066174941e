//! Telegram runtime: wiring and the update dispatcher.

use super::client::BotClient;
use super::engine::{Engine, EngineOptions};
use super::events::{CallbackClick, IncomingMessage};
use crate::config::Settings;
use crate::limiter::LimiterPool;
use crate::store::{MemoryStore, ParamStore};
use anyhow::Context;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::update_listeners::webhooks;
use tracing::info;
use url::Url;

/// Build an engine for `bot` with an in-memory shared store.
///
/// Clients built from the same `pool` and token share one rate limit.
pub async fn build_engine(bot: Bot, settings: &Settings, pool: &LimiterPool) -> Arc<Engine> {
    let client = BotClient::telegram(bot, settings, pool).await;
    let store = ParamStore::new(
        Arc::new(MemoryStore::new(settings.store_capacity)),
        settings.params_ttl(),
    );
    info!(
        limiter = %settings.limiter_id(),
        store_capacity = settings.store_capacity,
        "Engine initialized"
    );
    Engine::new(client, store, EngineOptions::from(settings))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message))
}

async fn handle_message(msg: Message, engine: Arc<Engine>) -> Result<(), teloxide::RequestError> {
    engine.handle_message(IncomingMessage::from(&msg)).await;
    respond(())
}

async fn handle_callback(
    q: CallbackQuery,
    engine: Arc<Engine>,
) -> Result<(), teloxide::RequestError> {
    let click = CallbackClick::from(&q);
    // a slow callback must not hold back later updates of the same chat
    tokio::spawn(async move {
        engine.handle_click(click).await;
    });
    respond(())
}

/// Receive updates until Ctrl+C, by webhook when `webhook_url` is set and by
/// long polling otherwise.
///
/// # Errors
///
/// Returns an error if the webhook URL or address is invalid or the webhook
/// cannot be registered.
pub async fn run(bot: Bot, engine: Arc<Engine>, settings: &Settings) -> anyhow::Result<()> {
    let mut dispatcher = Dispatcher::builder(bot.clone(), setup_handler())
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build();

    if let Some(webhook_url) = &settings.webhook_url {
        let url = Url::parse(webhook_url).context("invalid webhook_url")?;
        let addr = settings
            .webhook_socket_addr()
            .context("invalid webhook_addr")?;
        let listener = webhooks::axum(bot, webhooks::Options::new(addr, url))
            .await
            .context("failed to set up webhook")?;

        info!(%addr, "Bot is running (webhook)...");
        dispatcher
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the update listener"),
            )
            .await;
    } else {
        info!("Bot is running (long polling)...");
        dispatcher.dispatch().await;
    }
    Ok(())
}
