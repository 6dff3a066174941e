//! Rate-limited [`ChatApi`] decorator.

use super::api::{ChatApi, DocumentUpload, SendOptions};
use crate::error::ApiError;
use crate::limiter::{Limiter, RetryClassifier, TelegramClassifier};
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::types::{ChatId, MessageId};

/// Forwards every call to the wrapped client through a shared [`Limiter`].
///
/// Errors of the wrapped client come back unchanged once the classifier stops
/// retrying.
pub struct Throttled<A> {
    inner: A,
    limiter: Arc<Limiter>,
    classifier: Arc<dyn RetryClassifier<ApiError>>,
}

impl<A: ChatApi> Throttled<A> {
    /// Wrap `inner` with the chat platform classifier.
    pub fn new(inner: A, limiter: Arc<Limiter>) -> Self {
        Self::with_classifier(inner, limiter, Arc::new(TelegramClassifier))
    }

    /// Wrap `inner` with a custom classifier.
    pub fn with_classifier(
        inner: A,
        limiter: Arc<Limiter>,
        classifier: Arc<dyn RetryClassifier<ApiError>>,
    ) -> Self {
        Self {
            inner,
            limiter,
            classifier,
        }
    }

    /// The wrapped client.
    pub const fn inner(&self) -> &A {
        &self.inner
    }

    /// The limiter calls go through.
    pub fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }
}

#[async_trait]
impl<A: ChatApi> ChatApi for Throttled<A> {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: String,
        options: SendOptions,
    ) -> Result<MessageId, ApiError> {
        self.limiter
            .schedule("send_message", self.classifier.as_ref(), || {
                self.inner
                    .send_message(chat_id, text.clone(), options.clone())
            })
            .await
    }

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        options: SendOptions,
    ) -> Result<(), ApiError> {
        self.limiter
            .schedule("edit_message_text", self.classifier.as_ref(), || {
                self.inner
                    .edit_message_text(chat_id, message_id, text.clone(), options.clone())
            })
            .await
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        document: DocumentUpload,
        options: SendOptions,
    ) -> Result<MessageId, ApiError> {
        self.limiter
            .schedule("send_document", self.classifier.as_ref(), || {
                self.inner
                    .send_document(chat_id, document.clone(), options.clone())
            })
            .await
    }

    async fn edit_message_document(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        document: DocumentUpload,
        options: SendOptions,
    ) -> Result<(), ApiError> {
        self.limiter
            .schedule("edit_message_document", self.classifier.as_ref(), || {
                self.inner.edit_message_document(
                    chat_id,
                    message_id,
                    document.clone(),
                    options.clone(),
                )
            })
            .await
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ApiError> {
        self.limiter
            .schedule("delete_message", self.classifier.as_ref(), || {
                self.inner.delete_message(chat_id, message_id)
            })
            .await
    }

    async fn answer_callback_query(
        &self,
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    ) -> Result<(), ApiError> {
        self.limiter
            .schedule("answer_callback_query", self.classifier.as_ref(), || {
                self.inner
                    .answer_callback_query(callback_id.clone(), text.clone(), show_alert)
            })
            .await
    }

    async fn download_file(&self, file_id: String) -> Result<Vec<u8>, ApiError> {
        self.limiter
            .schedule("download_file", self.classifier.as_ref(), || {
                self.inner.download_file(file_id.clone())
            })
            .await
    }

    async fn set_commands(&self, commands: Vec<(String, String)>) -> Result<(), ApiError> {
        self.limiter
            .schedule("set_commands", self.classifier.as_ref(), || {
                self.inner.set_commands(commands.clone())
            })
            .await
    }
}
