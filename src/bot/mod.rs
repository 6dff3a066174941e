/// Outbound chat platform capability.
pub mod api;
/// Built-in commands.
pub mod builtin;
/// Interactive buttons and click handling.
pub mod callbacks;
/// Outbound client facade.
pub mod client;
/// Conversational commands.
pub mod commands;
/// Engine wiring registries, hub and store.
pub mod engine;
/// Decoded inbound events.
pub mod events;
/// Per-chat reply subscriptions.
pub mod hub;
/// Telegram runtime.
pub mod runner;
/// Rate-limited client decorator.
pub mod throttled;

pub use api::{ChatApi, DocumentUpload, SendOptions};
pub use client::{BotClient, TemplateRequest};
pub use engine::{Engine, EngineOptions};
pub use events::{Attachment, CallbackClick, IncomingMessage};
pub use hub::{MessageHub, Subscription};
pub use throttled::Throttled;
