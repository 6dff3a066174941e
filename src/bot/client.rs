//! Outbound client facade.
//!
//! [`BotClient`] is what business logic and the engine talk to: formatted
//! sends and edits, template messages and documents, click answers and file
//! downloads, all on top of a (normally throttled) [`ChatApi`].

use super::api::{ChatApi, DocumentUpload, SendOptions};
use super::events::Attachment;
use super::throttled::Throttled;
use crate::config::Settings;
use crate::error::{ApiError, CommandError};
use crate::limiter::{LimiterPolicy, LimiterPool};
use crate::utils::{self, MESSAGE_LIMIT};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use teloxide::types::{ChatId, InlineKeyboardMarkup, MessageId};
use teloxide::Bot;
use tracing::{debug, warn};

/// Which template to send and how.
#[derive(Debug, Clone)]
pub struct TemplateRequest<'a> {
    chat_id: ChatId,
    name: &'a str,
    data: Option<&'a Value>,
    caption: Option<String>,
    markup: Option<InlineKeyboardMarkup>,
    edit: Option<MessageId>,
}

impl<'a> TemplateRequest<'a> {
    /// Template `name` (relative to the documents directory) for `chat_id`.
    #[must_use]
    pub const fn new(chat_id: ChatId, name: &'a str) -> Self {
        Self {
            chat_id,
            name,
            data: None,
            caption: None,
            markup: None,
            edit: None,
        }
    }

    /// Render `{{ var }}` placeholders against `data`.
    #[must_use]
    pub const fn data(mut self, data: Option<&'a Value>) -> Self {
        self.data = data;
        self
    }

    /// Document caption, formatted like a message.
    #[must_use]
    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Attach an inline keyboard.
    #[must_use]
    pub fn markup(mut self, markup: InlineKeyboardMarkup) -> Self {
        self.markup = Some(markup);
        self
    }

    /// Edit `message_id` instead of sending a new message.
    #[must_use]
    pub const fn edit(mut self, message_id: MessageId) -> Self {
        self.edit = Some(message_id);
        self
    }
}

/// Chat client used by commands, callbacks and the engine.
#[derive(Clone)]
pub struct BotClient {
    api: Arc<dyn ChatApi>,
    documents_dir: PathBuf,
    temp_dir: PathBuf,
}

fn is_plain_relative(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Remove a temporary file; a file that is already gone is not an error.
pub async fn discard_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove temporary file: {e}"),
    }
}

fn sanitize_file_name(name: Option<&str>) -> String {
    let cleaned: String = name
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

impl BotClient {
    /// Build a client over any [`ChatApi`].
    pub fn new(
        api: Arc<dyn ChatApi>,
        documents_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            documents_dir: documents_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Build a throttled Telegram client.
    ///
    /// Every client built for the same token shares one limiter from `pool`.
    pub async fn telegram(bot: Bot, settings: &Settings, pool: &LimiterPool) -> Self {
        let limiter = pool
            .shared(&settings.limiter_id(), LimiterPolicy::from(settings))
            .await;
        Self::new(
            Arc::new(Throttled::new(bot, limiter)),
            settings.documents_dir.clone(),
            settings.temp_dir.clone(),
        )
    }

    /// Raw platform calls.
    #[must_use]
    pub fn api(&self) -> &Arc<dyn ChatApi> {
        &self.api
    }

    /// Directory templates are read from.
    #[must_use]
    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Directory downloads are written to.
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Format and send `text`, split into several messages when it is too long.
    ///
    /// The keyboard goes on the last part. Returns the id of the last message.
    ///
    /// # Errors
    ///
    /// Returns the first failed send.
    pub async fn send_formatted(
        &self,
        chat_id: ChatId,
        text: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageId, ApiError> {
        let mut parts = utils::split_long_message(text, MESSAGE_LIMIT);
        if parts.is_empty() {
            parts.push(text.to_string());
        }

        let last = parts.len() - 1;
        let mut markup = markup;
        let mut sent = None;
        for (i, part) in parts.iter().enumerate() {
            let options = SendOptions::html().with_markup(if i == last {
                markup.take()
            } else {
                None
            });
            sent = Some(
                self.api
                    .send_message(chat_id, utils::format_text(part), options)
                    .await?,
            );
        }
        sent.ok_or_else(|| ApiError::BadRequest("message text is empty".into()))
    }

    /// Format `text` and replace the content of `message_id` with it.
    ///
    /// Text over the message limit is truncated. "Message is not modified"
    /// counts as success.
    ///
    /// # Errors
    ///
    /// Returns any other platform failure.
    pub async fn edit_formatted(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<(), ApiError> {
        let text = if text.chars().count() > MESSAGE_LIMIT {
            format!("{}...", utils::truncate_str(text, MESSAGE_LIMIT))
        } else {
            text.to_string()
        };

        match self
            .api
            .edit_message_text(
                chat_id,
                message_id,
                utils::format_text(&text),
                SendOptions::html().with_markup(markup),
            )
            .await
        {
            Err(e) if e.is_not_modified() => {
                debug!("Message update skipped: {e}");
                Ok(())
            }
            other => other,
        }
    }

    async fn read_template(&self, request: &TemplateRequest<'_>) -> anyhow::Result<Vec<u8>> {
        if !is_plain_relative(request.name) {
            anyhow::bail!("template path '{}' leaves the documents directory", request.name);
        }
        let raw = tokio::fs::read(self.documents_dir.join(request.name)).await?;
        match request.data {
            Some(data) => {
                let text = String::from_utf8(raw)?;
                Ok(utils::render_template(&text, data)?.into_bytes())
            }
            None => Ok(raw),
        }
    }

    async fn try_send_template(&self, request: &TemplateRequest<'_>) -> anyhow::Result<MessageId> {
        let text = String::from_utf8(self.read_template(request).await?)?;
        match request.edit {
            Some(message_id) => {
                self.edit_formatted(request.chat_id, message_id, &text, request.markup.clone())
                    .await?;
                Ok(message_id)
            }
            None => Ok(self
                .send_formatted(request.chat_id, &text, request.markup.clone())
                .await?),
        }
    }

    async fn try_send_template_document(
        &self,
        request: &TemplateRequest<'_>,
    ) -> anyhow::Result<MessageId> {
        let bytes = self.read_template(request).await?;
        let file_name = Path::new(request.name)
            .file_name()
            .map_or_else(|| request.name.to_string(), |n| n.to_string_lossy().into_owned());
        let document = DocumentUpload { file_name, bytes };
        let options = SendOptions::html()
            .with_markup(request.markup.clone())
            .with_caption(request.caption.as_deref().map(utils::format_text));

        match request.edit {
            Some(message_id) => {
                self.api
                    .edit_message_document(request.chat_id, message_id, document, options)
                    .await?;
                Ok(message_id)
            }
            None => Ok(self
                .api
                .send_document(request.chat_id, document, options)
                .await?),
        }
    }

    /// Send (or edit into) a text message read from a template file.
    ///
    /// Missing or malformed templates and failed sends are logged and yield
    /// `None`.
    pub async fn send_template(&self, request: TemplateRequest<'_>) -> Option<MessageId> {
        match self.try_send_template(&request).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(template = request.name, chat_id = request.chat_id.0, "Template message failed: {e:#}");
                None
            }
        }
    }

    /// Send (or edit into) a template file as a document.
    ///
    /// Failures are logged and yield `None`.
    pub async fn send_template_document(&self, request: TemplateRequest<'_>) -> Option<MessageId> {
        match self.try_send_template_document(&request).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(template = request.name, chat_id = request.chat_id.0, "Template document failed: {e:#}");
                None
            }
        }
    }

    /// Stop the loading indicator of a click.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    pub async fn acknowledge(&self, click_id: &str) -> Result<(), ApiError> {
        self.api
            .answer_callback_query(click_id.to_string(), None, false)
            .await
    }

    /// Answer a click with a modal alert.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    pub async fn alert(&self, click_id: &str, text: &str) -> Result<(), ApiError> {
        self.api
            .answer_callback_query(click_id.to_string(), Some(text.to_string()), true)
            .await
    }

    /// Download an attachment to `<temp dir>/<unique id>-<file name>`.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Api` if the download fails and `CommandError::Io`
    /// if the file cannot be written.
    pub async fn download_attachment(&self, attachment: &Attachment) -> Result<PathBuf, CommandError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let path = self.temp_dir.join(format!(
            "{}-{}",
            attachment.unique_id,
            sanitize_file_name(attachment.file_name.as_deref())
        ));

        let bytes = self.api.download_file(attachment.file_id.clone()).await?;
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            discard_file(&path).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), "Downloaded attachment");
        Ok(path)
    }
}
