//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name used for the messaging network shared secret.
pub const KEYRING_SERVICE: &str = "chat-bridge";

/// Dispatcher and output tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RpcConfig {
    /// Maximum number of requests executing at the same time.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Lines buffered by the output channel before new lines are dropped.
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,
}

fn default_max_concurrent_requests() -> usize {
    32
}

fn default_output_capacity() -> usize {
    10_000
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            output_capacity: default_output_capacity(),
        }
    }
}

/// Sync pipeline tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// In-memory queue capacity before payloads overflow to disk.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of drain workers delivering to the backend.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-request timeout for backend calls.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Additional delivery attempts after a 5xx or timeout.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential delivery backoff.
    #[serde(default = "default_retry_base_millis")]
    pub retry_base_millis: u64,
    /// Idle poll interval of the overflow-drain loop.
    #[serde(default = "default_overflow_poll_millis")]
    pub overflow_poll_millis: u64,
    /// Minimum spacing between "buffering to disk" notices.
    #[serde(default = "default_queue_full_notice_seconds")]
    pub queue_full_notice_seconds: u64,
}

fn default_queue_capacity() -> usize {
    2000
}

fn default_workers() -> usize {
    4
}

fn default_request_timeout_seconds() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_millis() -> u64 {
    1000
}

fn default_overflow_poll_millis() -> u64 {
    1000
}

fn default_queue_full_notice_seconds() -> u64 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_base_millis: default_retry_base_millis(),
            overflow_poll_millis: default_overflow_poll_millis(),
            queue_full_notice_seconds: default_queue_full_notice_seconds(),
        }
    }
}

impl SyncConfig {
    /// Backend request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Base unit of the delivery backoff.
    #[must_use]
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_millis)
    }

    /// Overflow-drain idle interval.
    #[must_use]
    pub fn overflow_poll(&self) -> Duration {
        Duration::from_millis(self.overflow_poll_millis)
    }

    /// Queue-full notice window.
    #[must_use]
    pub fn queue_full_notice(&self) -> Duration {
        Duration::from_secs(self.queue_full_notice_seconds)
    }
}

/// Account supervisor tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Interval between account policy refreshes.
    #[serde(default = "default_policy_refresh_seconds")]
    pub policy_refresh_seconds: u64,
    /// Window within which at most one refresh error is reported per account.
    #[serde(default = "default_refresh_error_window_seconds")]
    pub refresh_error_window_seconds: u64,
    /// Reconnection attempts before giving up on an account.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Base unit of the reconnection backoff.
    #[serde(default = "default_reconnect_base_millis")]
    pub reconnect_base_millis: u64,
}

fn default_policy_refresh_seconds() -> u64 {
    30
}

fn default_refresh_error_window_seconds() -> u64 {
    60
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_millis() -> u64 {
    1000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            policy_refresh_seconds: default_policy_refresh_seconds(),
            refresh_error_window_seconds: default_refresh_error_window_seconds(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_base_millis: default_reconnect_base_millis(),
        }
    }
}

impl SupervisorConfig {
    /// Policy refresh interval.
    #[must_use]
    pub fn policy_refresh(&self) -> Duration {
        Duration::from_secs(self.policy_refresh_seconds)
    }

    /// Refresh error notification window.
    #[must_use]
    pub fn refresh_error_window(&self) -> Duration {
        Duration::from_secs(self.refresh_error_window_seconds)
    }

    /// Base unit of the reconnection backoff.
    #[must_use]
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_millis)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".queue")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Numeric application identifier for the messaging network.
    #[serde(default)]
    pub api_id: i64,
    /// Shared secret for the messaging network (populated at runtime).
    #[serde(skip)]
    pub api_hash: String,
    /// Base URL of the remote ingestion API; absent disables syncing.
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Directory holding the overflow store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Dispatcher settings.
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Sync pipeline settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Account supervisor settings.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            backend_url: None,
            data_dir: default_data_dir(),
            rpc: RpcConfig::default(),
            sync: SyncConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BRIDGE_API_ID` and `BRIDGE_BACKEND_URL` overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `BRIDGE_API_ID` is not an integer.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = env::var("BRIDGE_API_ID") {
            self.api_id = raw
                .trim()
                .parse()
                .map_err(|err| AppError::Config(format!("BRIDGE_API_ID invalid: {err}")))?;
        }
        if let Ok(url) = env::var("BRIDGE_BACKEND_URL") {
            self.backend_url = Some(url);
        }
        Ok(())
    }

    /// Load the network shared secret from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither the keychain nor
    /// `BRIDGE_API_HASH` provide the secret, or if `api_id` is unset.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.api_hash = load_credential("api_hash", "BRIDGE_API_HASH").await?;
        if self.api_id <= 0 {
            return Err(AppError::Config(
                "api_id must be set in config or BRIDGE_API_ID".into(),
            ));
        }
        Ok(())
    }

    /// Backend base URL without a trailing slash, if syncing is enabled.
    #[must_use]
    pub fn backend_url(&self) -> Option<&str> {
        self.backend_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    /// Path of the `SQLite` overflow store.
    #[must_use]
    pub fn overflow_db_path(&self) -> PathBuf {
        self.data_dir.join("queue.sqlite3")
    }

    fn validate(&self) -> Result<()> {
        let zeroed = [
            ("rpc.max_concurrent_requests", self.rpc.max_concurrent_requests == 0),
            ("rpc.output_capacity", self.rpc.output_capacity == 0),
            ("sync.queue_capacity", self.sync.queue_capacity == 0),
            ("sync.workers", self.sync.workers == 0),
            ("sync.request_timeout_seconds", self.sync.request_timeout_seconds == 0),
            ("sync.overflow_poll_millis", self.sync.overflow_poll_millis == 0),
            ("supervisor.policy_refresh_seconds", self.supervisor.policy_refresh_seconds == 0),
            ("supervisor.reconnect_attempts", self.supervisor.reconnect_attempts == 0),
            ("supervisor.reconnect_base_millis", self.supervisor.reconnect_base_millis == 0),
        ];
        match zeroed.iter().find(|(_, zero)| *zero) {
            Some((name, _)) => Err(AppError::Config(format!(
                "{name} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}
