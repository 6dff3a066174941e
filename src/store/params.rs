//! Ephemeral parameter store.
//!
//! Namespaced JSON records on top of a [`KeyValueStore`]: stored button
//! parameters, per-invocation temporary file pointers and dispatch locks.

use super::KeyValueStore;
use crate::config::PARAM_KEY_LEN;
use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// JSON records with a default TTL.
#[derive(Clone)]
pub struct ParamStore {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

fn callback_key(query_id: &str, param_key: &str) -> String {
    format!("callback:{query_id}:{param_key}")
}

fn lock_key(command: &str, chat_id: i64) -> String {
    format!("lock:{command}:{chat_id}")
}

fn files_key(chat_id: i64, message_id: i32) -> String {
    format!("files:{chat_id}:{message_id}")
}

/// Short random id used inside button payloads.
#[must_use]
pub fn generate_param_key() -> String {
    Uuid::new_v4().simple().to_string()[..PARAM_KEY_LEN].to_string()
}

impl ParamStore {
    /// Wrap `store`, writing records with `default_ttl` unless told otherwise.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// TTL applied to button parameters and file pointers.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Serialize `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if encoding or the backend write fails.
    pub async fn put_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, bytes, ttl).await
    }

    /// Read and decode the record under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend read or decoding fails.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove the record under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(key).await
    }

    /// Store button arguments and return the generated parameter key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be written.
    pub async fn store_callback_params(
        &self,
        query_id: &str,
        args: &Map<String, Value>,
    ) -> Result<String, StoreError> {
        let param_key = generate_param_key();
        self.put_json(&callback_key(query_id, &param_key), args, self.default_ttl)
            .await?;
        debug!(query = query_id, param_key = %param_key, "Stored callback parameters");
        Ok(param_key)
    }

    /// Load button arguments, `None` if they expired or were never stored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend read or decoding fails.
    pub async fn load_callback_params(
        &self,
        query_id: &str,
        param_key: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        self.get_json(&callback_key(query_id, param_key)).await
    }

    /// Try to take the dispatch lock of `command` in `chat_id`.
    ///
    /// Returns `false` while another trigger holds it. The lock is never
    /// released explicitly; it expires after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    pub async fn acquire_dispatch_lock(
        &self,
        command: &str,
        chat_id: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.store
            .set_if_absent(&lock_key(command, chat_id), b"1".to_vec(), ttl)
            .await
    }

    /// Whether the dispatch lock of `command` in `chat_id` is held.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    pub async fn dispatch_lock_held(&self, command: &str, chat_id: i64) -> Result<bool, StoreError> {
        Ok(self.store.get(&lock_key(command, chat_id)).await?.is_some())
    }

    /// Remember a downloaded file for cleanup of the invocation started by `message_id`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    pub async fn record_temp_file(
        &self,
        chat_id: i64,
        message_id: i32,
        path: PathBuf,
    ) -> Result<(), StoreError> {
        let key = files_key(chat_id, message_id);
        let mut files: Vec<PathBuf> = self.get_json(&key).await?.unwrap_or_default();
        files.push(path);
        self.put_json(&key, &files, self.default_ttl).await
    }

    /// Remove and return every file recorded for the invocation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    pub async fn take_temp_files(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let key = files_key(chat_id, message_id);
        let files = self.get_json(&key).await?.unwrap_or_default();
        self.store.delete(&key).await?;
        Ok(files)
    }
}
