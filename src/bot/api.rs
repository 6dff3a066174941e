//! Outbound chat platform capability.
//!
//! [`ChatApi`] is the whole call surface the engine needs. `teloxide::Bot`
//! implements it directly; [`crate::bot::throttled::Throttled`] wraps any
//! implementation with the rate limiter.

use crate::error::ApiError;
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, CallbackQueryId, FileId, InlineKeyboardMarkup, InputFile, InputMedia,
    InputMediaDocument, MessageId, ParseMode,
};

/// Presentation options shared by message and document calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// Parse mode of the text or caption.
    pub parse_mode: Option<ParseMode>,
    /// Inline keyboard attached to the message.
    pub reply_markup: Option<InlineKeyboardMarkup>,
    /// Document caption; ignored by text calls.
    pub caption: Option<String>,
}

impl SendOptions {
    /// HTML parse mode, no keyboard, no caption.
    #[must_use]
    pub fn html() -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            ..Self::default()
        }
    }

    /// Attach an inline keyboard.
    #[must_use]
    pub fn with_markup(mut self, markup: Option<InlineKeyboardMarkup>) -> Self {
        self.reply_markup = markup;
        self
    }

    /// Set the document caption.
    #[must_use]
    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption;
        self
    }
}

/// In-memory document to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    /// File name shown to the user.
    pub file_name: String,
    /// File content.
    pub bytes: Vec<u8>,
}

/// Calls the engine makes against the chat platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a text message, returning its id.
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: String,
        options: SendOptions,
    ) -> Result<MessageId, ApiError>;

    /// Replace the text of a sent message.
    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        options: SendOptions,
    ) -> Result<(), ApiError>;

    /// Send a document, returning the message id.
    async fn send_document(
        &self,
        chat_id: ChatId,
        document: DocumentUpload,
        options: SendOptions,
    ) -> Result<MessageId, ApiError>;

    /// Replace the document of a sent message.
    async fn edit_message_document(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        document: DocumentUpload,
        options: SendOptions,
    ) -> Result<(), ApiError>;

    /// Delete a message.
    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId)
        -> Result<(), ApiError>;

    /// Answer an interactive click, optionally with a notification or alert.
    async fn answer_callback_query(
        &self,
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    ) -> Result<(), ApiError>;

    /// Download a file by its platform id.
    async fn download_file(&self, file_id: String) -> Result<Vec<u8>, ApiError>;

    /// Publish the command menu as `(command, description)` pairs.
    async fn set_commands(&self, commands: Vec<(String, String)>) -> Result<(), ApiError>;
}

fn document_file(document: DocumentUpload) -> InputFile {
    InputFile::memory(document.bytes).file_name(document.file_name)
}

#[async_trait]
impl ChatApi for Bot {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: String,
        options: SendOptions,
    ) -> Result<MessageId, ApiError> {
        let mut req = Requester::send_message(self, chat_id, text);
        if let Some(pm) = options.parse_mode {
            req = req.parse_mode(pm);
        }
        if let Some(markup) = options.reply_markup {
            req = req.reply_markup(markup);
        }
        Ok(req.await?.id)
    }

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        options: SendOptions,
    ) -> Result<(), ApiError> {
        let mut req = Requester::edit_message_text(self, chat_id, message_id, text);
        if let Some(pm) = options.parse_mode {
            req = req.parse_mode(pm);
        }
        if let Some(markup) = options.reply_markup {
            req = req.reply_markup(markup);
        }
        req.await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        document: DocumentUpload,
        options: SendOptions,
    ) -> Result<MessageId, ApiError> {
        let mut req = Requester::send_document(self, chat_id, document_file(document));
        if let Some(caption) = options.caption {
            req = req.caption(caption);
        }
        if let Some(pm) = options.parse_mode {
            req = req.parse_mode(pm);
        }
        if let Some(markup) = options.reply_markup {
            req = req.reply_markup(markup);
        }
        Ok(req.await?.id)
    }

    async fn edit_message_document(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        document: DocumentUpload,
        options: SendOptions,
    ) -> Result<(), ApiError> {
        let mut media = InputMediaDocument::new(document_file(document));
        if let Some(caption) = options.caption {
            media = media.caption(caption);
        }
        if let Some(pm) = options.parse_mode {
            media = media.parse_mode(pm);
        }
        let mut req =
            Requester::edit_message_media(self, chat_id, message_id, InputMedia::Document(media));
        if let Some(markup) = options.reply_markup {
            req = req.reply_markup(markup);
        }
        req.await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ApiError> {
        Requester::delete_message(self, chat_id, message_id).await?;
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    ) -> Result<(), ApiError> {
        let mut req = Requester::answer_callback_query(self, CallbackQueryId(callback_id));
        if let Some(text) = text {
            req = req.text(text).show_alert(show_alert);
        }
        req.await?;
        Ok(())
    }

    async fn download_file(&self, file_id: String) -> Result<Vec<u8>, ApiError> {
        let file = Requester::get_file(self, FileId(file_id)).await?;
        let mut buf = Vec::new();
        Download::download_file(self, &file.path, &mut buf)
            .await
            .map_err(|e| ApiError::Network(format!("Telegram download error: {e}")))?;
        Ok(buf)
    }

    async fn set_commands(&self, commands: Vec<(String, String)>) -> Result<(), ApiError> {
        let commands = commands
            .into_iter()
            .map(|(command, description)| BotCommand::new(command, description));
        Requester::set_my_commands(self, commands).await?;
        Ok(())
    }
}
