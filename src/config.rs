//! Configuration and settings management.
//!
//! Settings come from optional `config/*` files and the environment. Engine
//! constants and defaults live here as well.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Longest a callback query id may be: the 64-byte payload limit minus `:` and
/// an 8-character parameter key.
pub const MAX_QUERY_ID_LEN: usize = 55;
/// Length of the random key that addresses stored button parameters.
pub const PARAM_KEY_LEN: usize = 8;
/// Extension used when a command has no declared template.
pub const DEFAULT_TEMPLATE_EXTENSION: &str = "md";
/// Initial delay of the command-list sync retry loop.
pub const COMMAND_SYNC_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound on a single command-list sync backoff.
pub const COMMAND_SYNC_MAX_BACKOFF_MS: u64 = 8_000;

/// Application settings loaded from files and environment variables.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token.
    pub telegram_token: String,

    /// Minimum milliseconds between two outbound call starts.
    #[serde(default = "default_limiter_min_time_ms")]
    pub limiter_min_time_ms: u64,
    /// Maximum number of outbound calls in flight.
    #[serde(default = "default_limiter_max_concurrent")]
    pub limiter_max_concurrent: usize,
    /// Retries granted to a failing outbound call.
    #[serde(default = "default_limiter_retry_limit")]
    pub limiter_retry_limit: u32,
    /// Fixed delay before each retry.
    #[serde(default = "default_limiter_retry_delay_ms")]
    pub limiter_retry_delay_ms: u64,

    /// TTL of stored button parameters and file cleanup pointers.
    #[serde(default = "default_params_ttl_secs")]
    pub params_ttl_secs: u64,
    /// Debounce window of the per-chat dispatch lock.
    #[serde(default = "default_dispatch_lock_ttl_secs")]
    pub dispatch_lock_ttl_secs: u64,
    /// How long a pending argument waits for a reply, `0` waits forever.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
    /// Reject clicks whose stored parameters expired instead of running them without arguments.
    #[serde(default)]
    pub strict_callback_params: bool,

    /// Directory holding template documents.
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    /// Directory receiving downloaded file arguments.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Capacity of the in-process shared store.
    #[serde(default = "default_store_capacity")]
    pub store_capacity: u64,
    /// Capacity of the user-context cache.
    #[serde(default = "default_user_cache_capacity")]
    pub user_cache_capacity: u64,
    /// Attempts made to publish the command list.
    #[serde(default = "default_command_sync_attempts")]
    pub command_sync_attempts: usize,

    /// Public webhook URL; long polling is used when unset.
    pub webhook_url: Option<String>,
    /// Local address the webhook listener binds to.
    #[serde(default = "default_webhook_addr")]
    pub webhook_addr: String,
}

const fn default_limiter_min_time_ms() -> u64 {
    50
}

const fn default_limiter_max_concurrent() -> usize {
    4
}

const fn default_limiter_retry_limit() -> u32 {
    10
}

const fn default_limiter_retry_delay_ms() -> u64 {
    1_000
}

const fn default_params_ttl_secs() -> u64 {
    24 * 60 * 60
}

const fn default_dispatch_lock_ttl_secs() -> u64 {
    5
}

const fn default_reply_timeout_secs() -> u64 {
    30 * 60
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("documents")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

const fn default_store_capacity() -> u64 {
    100_000
}

const fn default_user_cache_capacity() -> u64 {
    1_000
}

const fn default_command_sync_attempts() -> usize {
    5
}

fn default_webhook_addr() -> String {
    "0.0.0.0:8443".to_string()
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // plain UPPER_SNAKE_CASE variables; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Load settings from files and environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or `TELEGRAM_TOKEN` is missing.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Identifier of the limiter shared by every client of this bot token.
    ///
    /// Derived from a digest so the token never shows up in ids or logs.
    #[must_use]
    pub fn limiter_id(&self) -> String {
        let digest = format!("{:x}", Sha256::digest(self.telegram_token.as_bytes()));
        format!("telegram:{}", &digest[..16])
    }

    /// Minimum spacing between outbound call starts.
    #[must_use]
    pub const fn limiter_min_time(&self) -> Duration {
        Duration::from_millis(self.limiter_min_time_ms)
    }

    /// Delay before retrying a failed outbound call.
    #[must_use]
    pub const fn limiter_retry_delay(&self) -> Duration {
        Duration::from_millis(self.limiter_retry_delay_ms)
    }

    /// Default TTL of ephemeral parameters.
    #[must_use]
    pub const fn params_ttl(&self) -> Duration {
        Duration::from_secs(self.params_ttl_secs)
    }

    /// Debounce window of the dispatch lock.
    #[must_use]
    pub const fn dispatch_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.dispatch_lock_ttl_secs)
    }

    /// Argument reply timeout, `None` when disabled.
    #[must_use]
    pub const fn reply_timeout(&self) -> Option<Duration> {
        if self.reply_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.reply_timeout_secs))
        }
    }

    /// Parsed webhook listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if `webhook_addr` is not a socket address.
    pub fn webhook_socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.webhook_addr.parse()
    }
}
