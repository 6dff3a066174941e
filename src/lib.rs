//! Conversational command and callback engine for Telegram bots.
//!
//! Commands collect their typed arguments over several messages, buttons carry
//! their arguments through a shared TTL store, and every outbound call goes
//! through a shared rate limiter with retries.

#![deny(missing_docs)]

/// Chat engine: client, registries and runtime.
pub mod bot;
/// Configuration and settings management.
pub mod config;
/// Error types.
pub mod error;
/// Rate limiting and retries.
pub mod limiter;
/// Shared key/value store and ephemeral parameters.
pub mod store;
/// User lookup.
pub mod users;
/// Text formatting and templating helpers.
pub mod utils;
