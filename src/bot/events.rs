//! Decoded inbound events.
//!
//! The engine works on these plain structs instead of raw platform updates so
//! tests and other transports can feed it directly.

use teloxide::types::{CallbackQuery, ChatId, Message, MessageId};

/// Document attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Platform file id used for downloading.
    pub file_id: String,
    /// Stable unique id, used to name the local copy.
    pub unique_id: String,
    /// Original file name.
    pub file_name: Option<String>,
    /// Declared MIME type.
    pub mime_type: Option<String>,
    /// Size in bytes.
    pub size: u32,
}

/// Inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Message id.
    pub id: MessageId,
    /// Chat the message was sent in.
    pub chat_id: ChatId,
    /// Text or caption.
    pub text: Option<String>,
    /// Attached document.
    pub document: Option<Attachment>,
}

impl IncomingMessage {
    /// Plain text message.
    pub fn text(chat_id: ChatId, id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            chat_id,
            text: Some(text.into()),
            document: None,
        }
    }

    /// Message carrying only a document.
    #[must_use]
    pub const fn document(chat_id: ChatId, id: MessageId, document: Attachment) -> Self {
        Self {
            id,
            chat_id,
            text: None,
            document: Some(document),
        }
    }

    /// Trimmed text, if any.
    #[must_use]
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim)
    }
}

impl From<&Message> for IncomingMessage {
    fn from(msg: &Message) -> Self {
        let document = msg.document().map(|doc| Attachment {
            file_id: doc.file.id.to_string(),
            unique_id: doc.file.unique_id.to_string(),
            file_name: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(ToString::to_string),
            size: doc.file.size,
        });

        Self {
            id: msg.id,
            chat_id: msg.chat.id,
            text: msg.text().or_else(|| msg.caption()).map(str::to_string),
            document,
        }
    }
}

/// Interactive button click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackClick {
    /// Click id, used to answer it.
    pub id: String,
    /// User who clicked.
    pub from_id: i64,
    /// Chat of the message carrying the button.
    pub chat_id: Option<ChatId>,
    /// Message carrying the button.
    pub message_id: Option<MessageId>,
    /// Button payload.
    pub data: Option<String>,
}

impl From<&CallbackQuery> for CallbackClick {
    fn from(q: &CallbackQuery) -> Self {
        Self {
            id: q.id.to_string(),
            from_id: q.from.id.0.cast_signed(),
            chat_id: q.message.as_ref().map(|m| m.chat().id),
            message_id: q.message.as_ref().map(|m| m.id()),
            data: q.data.clone(),
        }
    }
}
