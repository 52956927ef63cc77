//! HTTP client for the ingestion API.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::models::payload::SyncPayload;
use crate::models::policy::AccountPolicy;
use crate::notify::truncate;
use crate::supervisor::PolicySource;
use crate::{AppError, Result};

/// Mutation that stores one message.
pub const INGEST_PATH: &str = "messages:ingest";

/// Query returning an account's mirroring policy.
pub const ACCOUNT_POLICY_PATH: &str = "accounts:get";

/// Result of a successful ingest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The backend stored a new message.
    Saved,
    /// The backend already had this message.
    Deduplicated,
    /// The backend accepted the call but stored nothing.
    NotSaved,
}

/// Failure of a single HTTP attempt.
#[derive(Debug)]
enum AttemptError {
    /// 5xx or timeout; worth retrying.
    Transient(String),
    /// Anything else.
    Permanent(String),
}

/// Ingestion API client.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_base: Duration,
}

impl BackendClient {
    /// Build a client for `base_url` using the sync timeouts and retry policy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the HTTP client cannot be built.
    pub fn new(base_url: &str, config: &SyncConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            max_retries: config.max_retries,
            retry_base: config.retry_base(),
        })
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a query once and return its unwrapped value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` on transport failure, non-2xx status, or
    /// an error envelope.
    pub async fn query(&self, path: &str, args: impl Serialize) -> Result<Value> {
        self.post_once("api/query", path, &args)
            .await
            .map_err(|err| match err {
                AttemptError::Transient(msg) | AttemptError::Permanent(msg) => AppError::Backend(msg),
            })
    }

    /// Run a mutation, retrying 5xx responses and timeouts with exponential
    /// backoff.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` once retries are exhausted or on any
    /// non-retryable failure.
    pub async fn mutation(&self, path: &str, args: impl Serialize) -> Result<Value> {
        let mut attempt = 0_u32;
        loop {
            match self.post_once("api/mutation", path, &args).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Transient(msg)) if attempt < self.max_retries => {
                    let delay = self.retry_base.saturating_mul(2_u32.saturating_pow(attempt));
                    warn!(path, attempt, ?delay, error = %msg, "backend call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Transient(msg) | AttemptError::Permanent(msg)) => {
                    return Err(AppError::Backend(msg));
                }
            }
        }
    }

    /// Deliver one payload through the ingest mutation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` when delivery fails; see [`Self::mutation`].
    pub async fn ingest(&self, payload: &SyncPayload) -> Result<IngestOutcome> {
        let value = self.mutation(INGEST_PATH, payload.to_ingest_args()).await?;
        Ok(classify_ingest(&value))
    }

    /// Fetch an account's policy. `Ok(None)` means the backend has none.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the call fails or the policy document
    /// does not decode.
    pub async fn account_policy(&self, account_id: &str) -> Result<Option<AccountPolicy>> {
        let value = self
            .query(ACCOUNT_POLICY_PATH, json!({ "accountId": account_id }))
            .await?;
        if !value.is_object() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| AppError::Backend(format!("invalid account policy: {err}")))
    }

    async fn post_once(
        &self,
        endpoint: &str,
        path: &str,
        args: &impl Serialize,
    ) -> std::result::Result<Value, AttemptError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let body = json!({ "path": path, "args": args });
        let response = match self.http.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Err(AttemptError::Transient("Backend timeout after retries".into()));
            }
            Err(err) => {
                return Err(AttemptError::Permanent(format!(
                    "Sync error: {}",
                    truncate(&err.to_string(), 50)
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let msg = format!("Backend error: {} - {}", status.as_u16(), truncate(&text, 50));
            return Err(if status.is_server_error() {
                AttemptError::Transient(msg)
            } else {
                AttemptError::Permanent(msg)
            });
        }

        let value: Value = match response.json().await {
            Ok(value) => value,
            Err(err) if err.is_timeout() => {
                return Err(AttemptError::Transient("Backend timeout after retries".into()));
            }
            Err(err) => {
                return Err(AttemptError::Permanent(format!(
                    "Sync error: invalid response body: {}",
                    truncate(&err.to_string(), 50)
                )));
            }
        };
        debug!(path, "backend call succeeded");
        unwrap_envelope(value).map_err(AttemptError::Permanent)
    }
}

impl PolicySource for BackendClient {
    fn fetch_policy<'a>(&'a self, account_id: &'a str) -> BoxFuture<'a, Result<Option<AccountPolicy>>> {
        Box::pin(self.account_policy(account_id))
    }
}

/// Strip the optional `{status, value}` envelope.
///
/// # Errors
///
/// Returns the backend's error text when `status` is `"error"`.
pub fn unwrap_envelope(body: Value) -> std::result::Result<Value, String> {
    let Value::Object(mut map) = body else {
        return Ok(body);
    };
    match map.get("status").and_then(Value::as_str) {
        Some("success") => Ok(map.remove("value").unwrap_or(Value::Null)),
        Some("error") => {
            let detail = map
                .get("errorMessage")
                .or_else(|| map.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(format!("Backend error: {}", truncate(detail, 50)))
        }
        _ => Ok(Value::Object(map)),
    }
}

/// Interpret the ingest mutation's value.
#[must_use]
pub fn classify_ingest(value: &Value) -> IngestOutcome {
    let flag = |key: &str| match value.get(key) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n > 0),
        _ => false,
    };
    if flag("saved") {
        IngestOutcome::Saved
    } else if flag("deduped") {
        IngestOutcome::Deduplicated
    } else {
        IngestOutcome::NotSaved
    }
}
