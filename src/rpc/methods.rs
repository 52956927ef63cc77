//! Method table exposed over JSON-RPC.
//!
//! | Method                 | Supervisor operation                    |
//! |------------------------|-----------------------------------------|
//! | `ping`                 | none; answers `{"pong": true}`          |
//! | `login`                | [`Supervisor::login`]                   |
//! | `verify_code`          | [`Supervisor::verify_code`]             |
//! | `connect_with_session` | [`Supervisor::connect_with_session`]    |
//! | `disconnect`           | [`Supervisor::disconnect`]              |
//! | `get_dialogs`          | [`Supervisor::get_dialogs`]             |
//! | `fetch_messages`       | [`Supervisor::fetch_messages`]          |
//! | `send_message`         | [`Supervisor::send_message`]            |

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::models::auth::AuthOutcome;
use crate::rpc::dispatcher::{CallError, RpcHandler};
use crate::supervisor::Supervisor;
use crate::{AppError, Result};

const DEFAULT_DIALOG_LIMIT: u32 = 50;
const DEFAULT_MESSAGE_LIMIT: u32 = 50;

// ── Parameters ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LoginParams {
    phone: String,
    account_id: String,
}

#[derive(Debug, Deserialize)]
struct VerifyCodeParams {
    phone: String,
    code: String,
    #[serde(alias = "phone_code_hash")]
    correlation_token: String,
    account_id: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    account_id: String,
    #[serde(alias = "session_string")]
    credential_string: String,
}

#[derive(Debug, Deserialize)]
struct AccountParams {
    account_id: String,
}

#[derive(Debug, Deserialize)]
struct DialogsParams {
    account_id: String,
    #[serde(default = "default_dialog_limit")]
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct FetchMessagesParams {
    account_id: String,
    #[serde(deserialize_with = "string_or_number")]
    peer_id: String,
    #[serde(default = "default_message_limit")]
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct SendMessageParams {
    account_id: String,
    #[serde(deserialize_with = "string_or_number")]
    peer_id: String,
    text: String,
    #[serde(default)]
    reply_to: Option<i64>,
}

fn default_dialog_limit() -> u32 {
    DEFAULT_DIALOG_LIMIT
}

fn default_message_limit() -> u32 {
    DEFAULT_MESSAGE_LIMIT
}

/// Peer ids arrive as strings or bare integers depending on the client.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|err| AppError::InvalidParams(err.to_string()))
}

// ── Handler ──────────────────────────────────────────────────────────────────

/// Routes method calls to the [`Supervisor`].
pub struct BridgeMethods {
    supervisor: Arc<Supervisor>,
}

impl BridgeMethods {
    /// Create the method table.
    #[must_use]
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    async fn dispatch(&self, method: &str, params: Value) -> std::result::Result<Value, CallError> {
        let result = match method {
            "ping" => Ok(json!({ "pong": true })),
            "login" => self.login(parse(params)?).await,
            "verify_code" => self.verify_code(parse(params)?).await,
            "connect_with_session" => self.connect_with_session(parse(params)?).await,
            "disconnect" => self.disconnect(parse(params)?).await,
            "get_dialogs" => self.get_dialogs(parse(params)?).await,
            "fetch_messages" => self.fetch_messages(parse(params)?).await,
            "send_message" => self.send_message(parse(params)?).await,
            other => return Err(CallError::MethodNotFound(other.to_owned())),
        };
        result.map_err(CallError::Failed)
    }

    async fn login(&self, params: LoginParams) -> Result<Value> {
        let token = self
            .supervisor
            .login(&params.account_id, &params.phone)
            .await?;
        Ok(json!({ "correlation_token": token, "needs_code": true }))
    }

    async fn verify_code(&self, params: VerifyCodeParams) -> Result<Value> {
        let outcome = self
            .supervisor
            .verify_code(
                &params.account_id,
                &params.phone,
                &params.code,
                &params.correlation_token,
                params.password.as_deref(),
            )
            .await?;
        match outcome {
            AuthOutcome::Success(login) => Ok(json!({
                "credential_string": login.credential,
                "name": login.identity.display_name(),
                "username": login.identity.username,
                "user_id": login.identity.user_id.to_string(),
            })),
            AuthOutcome::NeedsSecondFactor => Ok(json!({ "needs_2fa": true })),
            AuthOutcome::SessionExpired => Err(AppError::Protocol("Session expired".into())),
            AuthOutcome::Failed(reason) => Err(AppError::Protocol(reason)),
        }
    }

    async fn connect_with_session(&self, params: ConnectParams) -> Result<Value> {
        let outcome = match self
            .supervisor
            .connect_with_session(&params.account_id, &params.credential_string)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => AuthOutcome::Failed(err.message().to_owned()),
        };
        Ok(match outcome {
            AuthOutcome::Success(identity) => json!({
                "success": true,
                "name": identity.display_name(),
                "username": identity.username,
            }),
            AuthOutcome::SessionExpired => json!({ "success": false, "error": "Session expired" }),
            AuthOutcome::NeedsSecondFactor => {
                json!({ "success": false, "error": "Second factor required" })
            }
            AuthOutcome::Failed(reason) => json!({ "success": false, "error": reason }),
        })
    }

    async fn disconnect(&self, params: AccountParams) -> Result<Value> {
        Ok(match self.supervisor.disconnect(&params.account_id).await {
            AuthOutcome::Success(()) => json!({ "success": true }),
            AuthOutcome::Failed(reason) => json!({ "success": false, "error": reason }),
            AuthOutcome::SessionExpired | AuthOutcome::NeedsSecondFactor => {
                json!({ "success": false, "error": "Client not found" })
            }
        })
    }

    async fn get_dialogs(&self, params: DialogsParams) -> Result<Value> {
        let dialogs = self
            .supervisor
            .get_dialogs(&params.account_id, params.limit)
            .await?;
        Ok(serde_json::to_value(dialogs)?)
    }

    async fn fetch_messages(&self, params: FetchMessagesParams) -> Result<Value> {
        let messages = self
            .supervisor
            .fetch_messages(&params.account_id, &params.peer_id, params.limit)
            .await?;
        Ok(serde_json::to_value(messages)?)
    }

    async fn send_message(&self, params: SendMessageParams) -> Result<Value> {
        match self
            .supervisor
            .send_message(&params.account_id, &params.peer_id, &params.text, params.reply_to)
            .await
        {
            Ok(sent) => Ok(json!({
                "success": true,
                "message_id": sent.message_id,
                "timestamp": sent.timestamp,
            })),
            Err(err) => Ok(json!({ "success": false, "error": err.message() })),
        }
    }
}

impl RpcHandler for BridgeMethods {
    fn call(&self, method: String, params: Value) -> BoxFuture<'_, std::result::Result<Value, CallError>> {
        Box::pin(async move { self.dispatch(&method, params).await })
    }
}
