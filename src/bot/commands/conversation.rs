//! Conversational argument collection.
//!
//! Each missing argument is asked for in turn; the next message in the chat
//! answers it. Replies are classified by [`classify_reply`], a pure function,
//! and applied by [`ArgumentCollector`].

use super::args::{ArgKind, ArgumentSpec, Args};
use crate::bot::client::{discard_file, BotClient, TemplateRequest};
use crate::bot::events::{Attachment, IncomingMessage};
use crate::bot::hub::MessageHub;
use crate::error::CommandError;
use crate::store::ParamStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{ChatId, MessageId};
use tracing::{debug, info};

/// What a reply means for the pending argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Leave the optional argument unset.
    Skip,
    /// Use this value.
    Value(Value),
    /// Download this document and use its local path.
    Download(Attachment),
}

/// Interpret `message` as the answer to `spec`.
///
/// # Errors
///
/// Returns the `CommandError` that aborts the whole command: a new command,
/// `/yes`/`/no` for a non-boolean, `/skip` for a required argument, a missing
/// document or text, or an unparsable number.
pub fn classify_reply(spec: &ArgumentSpec, message: &IncomingMessage) -> Result<Reply, CommandError> {
    let text = message.trimmed_text();

    match text {
        Some("/skip") if spec.required => {
            return Err(CommandError::RequiredSkipped(spec.name.clone()));
        }
        Some("/skip") => return Ok(Reply::Skip),
        Some(answer @ ("/yes" | "/no")) => {
            return if spec.kind == ArgKind::Boolean {
                Ok(Reply::Value(Value::Bool(answer == "/yes")))
            } else {
                Err(CommandError::UnexpectedConfirmation(spec.name.clone()))
            };
        }
        Some(command) if command.starts_with('/') => {
            let name = command.split_whitespace().next().unwrap_or(command);
            return Err(CommandError::Interrupted(name.to_string()));
        }
        _ => {}
    }

    if spec.kind == ArgKind::File {
        return message
            .document
            .clone()
            .map(Reply::Download)
            .ok_or_else(|| CommandError::MissingAttachment(spec.name.clone()));
    }

    let raw = text.ok_or_else(|| CommandError::MissingText(spec.name.clone()))?;
    spec.kind
        .coerce(raw)
        .map(Reply::Value)
        .ok_or_else(|| CommandError::InvalidNumber {
            argument: spec.name.clone(),
            value: raw.to_string(),
        })
}

/// Runs the prompt/wait/apply loop for one invocation.
pub struct ArgumentCollector<'a> {
    client: &'a BotClient,
    hub: &'a Arc<MessageHub>,
    store: &'a ParamStore,
    timeout: Option<Duration>,
}

impl<'a> ArgumentCollector<'a> {
    /// Collector waiting at most `timeout` per reply (`None` waits forever).
    #[must_use]
    pub const fn new(
        client: &'a BotClient,
        hub: &'a Arc<MessageHub>,
        store: &'a ParamStore,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            hub,
            store,
            timeout,
        }
    }

    /// Ask for every argument of `specs` missing from `args`, in order.
    ///
    /// Downloaded files are recorded for cleanup under `origin`, the message
    /// that started the invocation.
    ///
    /// # Errors
    ///
    /// Returns the first `CommandError`; arguments after it are not asked for.
    pub async fn collect(
        &self,
        chat_id: ChatId,
        origin: MessageId,
        specs: &[ArgumentSpec],
        args: &mut Args,
    ) -> Result<(), CommandError> {
        for spec in specs {
            if args.contains_key(&spec.name) {
                continue;
            }
            if let Some(value) = self.collect_one(chat_id, origin, spec).await? {
                args.insert(spec.name.clone(), value);
            }
        }
        Ok(())
    }

    async fn prompt(&self, chat_id: ChatId, spec: &ArgumentSpec) -> Result<(), CommandError> {
        let prompt = spec.prompt();
        if let (ArgKind::File, Some(template)) = (spec.kind, &spec.template) {
            let request = TemplateRequest::new(chat_id, template).caption(prompt.clone());
            if self.client.send_template_document(request).await.is_some() {
                return Ok(());
            }
        }
        self.client.send_formatted(chat_id, &prompt, None).await?;
        Ok(())
    }

    async fn wait(&self, spec: &ArgumentSpec, chat_id: ChatId) -> Result<IncomingMessage, CommandError> {
        // subscribed before prompting so a fast reply cannot slip through
        let mut subscription = self.hub.subscribe(chat_id);
        self.prompt(chat_id, spec).await?;

        let reply = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, subscription.recv())
                .await
                .map_err(|_| CommandError::TimedOut(spec.name.clone(), limit))?,
            None => subscription.recv().await,
        };
        drop(subscription);
        reply.ok_or_else(|| CommandError::Closed(spec.name.clone()))
    }

    async fn collect_one(
        &self,
        chat_id: ChatId,
        origin: MessageId,
        spec: &ArgumentSpec,
    ) -> Result<Option<Value>, CommandError> {
        let reply = self.wait(spec, chat_id).await?;

        match classify_reply(spec, &reply)? {
            Reply::Skip => {
                debug!(argument = %spec.name, chat_id = chat_id.0, "Argument skipped");
                Ok(None)
            }
            Reply::Value(value) => Ok(Some(value)),
            Reply::Download(attachment) => {
                if let (Some(expected), Some(actual)) = (&spec.accept, &attachment.mime_type) {
                    if expected != actual {
                        info!(
                            argument = %spec.name,
                            expected = %expected,
                            actual = %actual,
                            "Attachment content type differs from the expected one"
                        );
                    }
                }
                let path = self.client.download_attachment(&attachment).await?;
                // unrecorded files would outlive the invocation's cleanup
                if let Err(e) = self
                    .store
                    .record_temp_file(chat_id.0, origin.0, path.clone())
                    .await
                {
                    discard_file(&path).await;
                    return Err(e.into());
                }
                Ok(Some(Value::String(path.to_string_lossy().into_owned())))
            }
        }
    }
}
