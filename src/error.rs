//! Error types shared across the engine.
//!
//! Outbound platform failures, store failures, registration-time validation
//! and per-invocation failures each get their own enum so callers can match on
//! the category they care about.

use std::time::Duration;
use thiserror::Error;

/// Failure of an outbound chat platform call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The platform rejected the request as malformed.
    #[error("Bad Request: {0}")]
    BadRequest(String),
    /// The platform refused the call because of flood control.
    #[error("Too Many Requests: {0}")]
    RateLimited(String),
    /// Transport-level failure (connection reset, timeout, DNS).
    #[error("Network error: {0}")]
    Network(String),
    /// Any other platform-side failure.
    #[error("Telegram API error: {0}")]
    Api(String),
}

impl ApiError {
    /// Returns `true` for failures that retrying cannot fix.
    ///
    /// Besides the dedicated variants, an error message mentioning a bad
    /// request or flood control counts too.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::BadRequest(_) | Self::RateLimited(_) => true,
            Self::Network(_) => false,
            Self::Api(text) => {
                let lower = text.to_lowercase();
                lower.contains("bad request") || lower.contains("too many requests")
            }
        }
    }

    /// Returns `true` when an edit failed only because the content did not change.
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        self.to_string().contains("message is not modified")
    }
}

impl From<teloxide::RequestError> for ApiError {
    fn from(err: teloxide::RequestError) -> Self {
        use teloxide::RequestError;

        let text = err.to_string();
        match err {
            RequestError::RetryAfter(_) => Self::RateLimited(text),
            RequestError::Network(_) | RequestError::Io(_) => Self::Network(text),
            RequestError::Api(_) => {
                if text.contains("Too Many Requests") {
                    Self::RateLimited(text)
                } else if text.contains("Bad Request") {
                    Self::BadRequest(text)
                } else {
                    Self::Api(text)
                }
            }
            _ => Self::Api(text),
        }
    }
}

/// Failure of the shared key/value store or of (de)serialising its records.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend failure reported by the store implementation.
    #[error("Store backend error: {0}")]
    Backend(String),
    /// Record could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Registration-time validation failure for commands and callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// Command names must be 1-32 characters of `a-z`, `0-9` or `_`.
    #[error("invalid command name '{0}'")]
    InvalidCommandName(String),
    /// A file argument was declared without a template document.
    #[error("file argument '{argument}' of command '{command}' has no template")]
    MissingTemplate {
        /// Command being registered.
        command: String,
        /// Offending argument.
        argument: String,
    },
    /// Query ids cannot be empty.
    #[error("callback query id is empty")]
    EmptyQueryId,
    /// Query id leaves no room for the parameter key inside the button payload.
    #[error("callback query id '{0}' is longer than {max} bytes", max = crate::config::MAX_QUERY_ID_LEN)]
    QueryIdTooLong(String),
    /// Query ids cannot contain the payload separator.
    #[error("callback query id '{0}' contains ':'")]
    QueryIdSeparator(String),
    /// Callbacks only accept text, boolean and number arguments.
    #[error("callback '{query}' declares file argument '{argument}'")]
    FileArgument {
        /// Callback being registered.
        query: String,
        /// Offending argument.
        argument: String,
    },
}

/// Failure that ends a single command invocation.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The user started another command while an argument was pending.
    #[error("conversation interrupted by '{0}'")]
    Interrupted(String),
    /// `/yes` or `/no` was sent for an argument that is not boolean.
    #[error("argument '{0}' is not a yes/no question")]
    UnexpectedConfirmation(String),
    /// `/skip` was sent for a required argument.
    #[error("argument '{0}' is required and cannot be skipped")]
    RequiredSkipped(String),
    /// A file argument received a message without a document.
    #[error("argument '{0}' expects a document attachment")]
    MissingAttachment(String),
    /// A text-like argument received a message without text.
    #[error("argument '{0}' expects a text reply")]
    MissingText(String),
    /// A number argument received something that is not an integer.
    #[error("argument '{argument}' expects a whole number, got '{value}'")]
    InvalidNumber {
        /// Argument being collected.
        argument: String,
        /// Raw reply.
        value: String,
    },
    /// No reply arrived within the configured timeout.
    #[error("no reply for argument '{0}' within {1:?}")]
    TimedOut(String, Duration),
    /// The reply channel was closed before a reply arrived.
    #[error("conversation closed while waiting for argument '{0}'")]
    Closed(String),
    /// Outbound call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Shared store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Local file handling failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Business logic (handler, middleware or hook) failed.
    #[error(transparent)]
    Hook(#[from] anyhow::Error),
}

/// Failure while building an interactive button.
#[derive(Error, Debug)]
pub enum CallbackError {
    /// A required argument was not supplied.
    #[error("missing required argument '{0}'")]
    MissingArgument(String),
    /// Storing the button parameters failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
