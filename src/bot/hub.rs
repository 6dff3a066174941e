//! Per-chat one-shot subscriptions to inbound messages.
//!
//! A pending argument subscribes to its chat, waits for exactly one message and
//! unsubscribes when its [`Subscription`] is dropped, whichever way the wait ends.

use super::events::IncomingMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use teloxide::types::ChatId;
use tokio::sync::oneshot;
use tracing::debug;

type Waiters = HashMap<ChatId, Vec<(u64, oneshot::Sender<IncomingMessage>)>>;

/// Routes inbound messages to conversations waiting on the same chat.
#[derive(Default)]
pub struct MessageHub {
    waiters: Mutex<Waiters>,
    next_id: AtomicU64,
}

/// Pending wait for the next message of one chat.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    hub: Arc<MessageHub>,
    chat_id: ChatId,
    id: u64,
    rx: Option<oneshot::Receiver<IncomingMessage>>,
}

impl MessageHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Subscribe to the next message of `chat_id`.
    pub fn subscribe(self: &Arc<Self>, chat_id: ChatId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().entry(chat_id).or_default().push((id, tx));
        Subscription {
            hub: Arc::clone(self),
            chat_id,
            id,
            rx: Some(rx),
        }
    }

    /// Deliver `message` to every subscriber of its chat.
    ///
    /// Returns how many subscribers received it. Each subscriber gets at most
    /// one message.
    pub fn publish(&self, message: &IncomingMessage) -> usize {
        let senders = self.lock().remove(&message.chat_id).unwrap_or_default();
        let delivered = senders
            .into_iter()
            .filter(|(_, tx)| !tx.is_closed())
            .filter_map(|(_, tx)| tx.send(message.clone()).ok())
            .count();
        if delivered > 0 {
            debug!(chat_id = message.chat_id.0, delivered, "Delivered reply");
        }
        delivered
    }

    /// Number of subscribers waiting on `chat_id`.
    pub fn pending(&self, chat_id: ChatId) -> usize {
        self.lock().get(&chat_id).map_or(0, Vec::len)
    }

    fn unsubscribe(&self, chat_id: ChatId, id: u64) {
        let mut waiters = self.lock();
        if let Some(list) = waiters.get_mut(&chat_id) {
            list.retain(|(other, _)| *other != id);
            if list.is_empty() {
                waiters.remove(&chat_id);
            }
        }
    }
}

impl Subscription {
    /// Wait for the message; `None` if the hub dropped the subscription.
    pub async fn recv(&mut self) -> Option<IncomingMessage> {
        match self.rx.take() {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }

    /// Chat this subscription listens to.
    #[must_use]
    pub const fn chat_id(&self) -> ChatId {
        self.chat_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.chat_id, self.id);
    }
}
