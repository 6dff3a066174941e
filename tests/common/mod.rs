//! Shared fixtures: an in-memory chat platform and an engine built on it.

#![allow(dead_code)]

use async_trait::async_trait;
use chatflow::bot::commands::DispatchOptions;
use chatflow::bot::{ChatApi, DocumentUpload, Engine, EngineOptions, IncomingMessage, SendOptions};
use chatflow::bot::callbacks::MissingParams;
use chatflow::bot::BotClient;
use chatflow::error::ApiError;
use chatflow::store::{KeyValueStore, MemoryStore, ParamStore};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teloxide::types::{ChatId, MessageId};
use tempfile::TempDir;

pub const CHAT: ChatId = ChatId(42);

/// One outbound call seen by [`FakeApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(ChatId, String, SendOptions),
    Document(ChatId, DocumentUpload, SendOptions),
    Answer {
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    },
}

/// Platform double recording every call.
#[derive(Default)]
pub struct FakeApi {
    next_id: AtomicI32,
    pub sent: Mutex<Vec<Sent>>,
    pub menus: Mutex<Vec<Vec<(String, String)>>>,
    pub download: Mutex<Vec<u8>>,
}

impl FakeApi {
    fn next_message_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1000)
    }

    fn record(&self, call: Sent) {
        self.sent.lock().expect("lock").push(call);
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|call| match call {
                Sent::Text(_, text, _) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn answers(&self) -> Vec<(Option<String>, bool)> {
        self.sent
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|call| match call {
                Sent::Answer {
                    text, show_alert, ..
                } => Some((text.clone(), *show_alert)),
                _ => None,
            })
            .collect()
    }

    pub fn calls(&self) -> Vec<Sent> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: String,
        options: SendOptions,
    ) -> Result<MessageId, ApiError> {
        self.record(Sent::Text(chat_id, text, options));
        Ok(self.next_message_id())
    }

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        _message_id: MessageId,
        text: String,
        options: SendOptions,
    ) -> Result<(), ApiError> {
        self.record(Sent::Text(chat_id, text, options));
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        document: DocumentUpload,
        options: SendOptions,
    ) -> Result<MessageId, ApiError> {
        self.record(Sent::Document(chat_id, document, options));
        Ok(self.next_message_id())
    }

    async fn edit_message_document(
        &self,
        chat_id: ChatId,
        _message_id: MessageId,
        document: DocumentUpload,
        options: SendOptions,
    ) -> Result<(), ApiError> {
        self.record(Sent::Document(chat_id, document, options));
        Ok(())
    }

    async fn delete_message(&self, _chat_id: ChatId, _message_id: MessageId) -> Result<(), ApiError> {
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    ) -> Result<(), ApiError> {
        self.record(Sent::Answer {
            callback_id,
            text,
            show_alert,
        });
        Ok(())
    }

    async fn download_file(&self, _file_id: String) -> Result<Vec<u8>, ApiError> {
        Ok(self.download.lock().expect("lock").clone())
    }

    async fn set_commands(&self, commands: Vec<(String, String)>) -> Result<(), ApiError> {
        self.menus.lock().expect("lock").push(commands);
        Ok(())
    }
}

/// Engine over a [`FakeApi`], with its directories kept alive alongside.
pub struct Harness {
    pub api: Arc<FakeApi>,
    pub engine: Arc<Engine>,
    pub documents: TempDir,
    pub temp: TempDir,
}

pub fn harness() -> Harness {
    harness_with(MissingParams::Lenient, Some(Duration::from_secs(5)))
}

pub fn harness_with(missing_params: MissingParams, reply_timeout: Option<Duration>) -> Harness {
    build(Arc::new(MemoryStore::new(1_000)), missing_params, reply_timeout)
}

/// Engine over a custom key/value store.
pub fn harness_on(store: Arc<dyn KeyValueStore>) -> Harness {
    build(store, MissingParams::Lenient, Some(Duration::from_secs(5)))
}

fn build(
    store: Arc<dyn KeyValueStore>,
    missing_params: MissingParams,
    reply_timeout: Option<Duration>,
) -> Harness {
    let api = Arc::new(FakeApi::default());
    let documents = TempDir::new().expect("temp dir");
    let temp = TempDir::new().expect("temp dir");
    let client = BotClient::new(api.clone(), documents.path(), temp.path());
    let store = ParamStore::new(store, Duration::from_secs(60));
    let options = EngineOptions {
        dispatch: DispatchOptions {
            lock_ttl: Duration::from_millis(200),
            reply_timeout,
        },
        missing_params,
    };
    Harness {
        api,
        engine: Engine::new(client, store, options),
        documents,
        temp,
    }
}

pub fn text(id: i32, body: &str) -> IncomingMessage {
    IncomingMessage::text(CHAT, MessageId(id), body)
}

/// Wait until the engine is blocked on a reply in [`CHAT`].
pub async fn until_waiting(engine: &Engine) {
    for _ in 0..200 {
        if engine.pending_replies(CHAT) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("engine never started waiting for a reply");
}
