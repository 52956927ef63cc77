//! JSON-RPC 2.0 envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request line was not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Valid JSON that is not a request object.
pub const INVALID_REQUEST: i64 = -32600;
/// Unknown method name.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The operation itself failed (server-defined range).
pub const INTERNAL_ERROR: i64 = -32000;

/// Inbound request. `jsonrpc` is accepted but not enforced.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Protocol version tag sent by the client.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Method name.
    pub method: String,
    /// Method parameters; defaults to an empty object.
    #[serde(default)]
    pub params: Option<Value>,
    /// Correlation id echoed in the response.
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    /// Parse one request line.
    ///
    /// # Errors
    ///
    /// Returns an error response (with `id: null`, or the request's id when
    /// one can be recovered) if the line is not a well-formed request.
    pub fn parse(line: &str) -> std::result::Result<Self, RpcResponse> {
        let value: Value = serde_json::from_str(line)
            .map_err(|err| RpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {err}")))?;
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|err| RpcResponse::error(id, INVALID_REQUEST, format!("Invalid Request: {err}")))
    }

    /// Parameters, or an empty object when absent.
    #[must_use]
    pub fn params_or_empty(&mut self) -> Value {
        match self.params.take() {
            Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
            Some(params) => params,
        }
    }
}

/// Error member of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
}

/// Either the result or the error member of a response.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RpcOutcome {
    /// Successful result value.
    Result(Value),
    /// Failure description.
    Error(RpcErrorObject),
}

/// Outbound response envelope.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcResponse {
    jsonrpc: &'static str,
    /// Echo of the request id.
    pub id: Value,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    /// Successful response.
    #[must_use]
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            outcome: RpcOutcome::Result(result),
        }
    }

    /// Error response.
    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            outcome: RpcOutcome::Error(RpcErrorObject {
                code,
                message: message.into(),
            }),
        }
    }

    /// Error code, if this is an error response.
    #[must_use]
    pub fn error_code(&self) -> Option<i64> {
        match &self.outcome {
            RpcOutcome::Error(err) => Some(err.code),
            RpcOutcome::Result(_) => None,
        }
    }

    /// Serialize to a single output line.
    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{INTERNAL_ERROR},"message":"response encoding failed: {}"}}}}"#,
                err.to_string().replace('"', "'")
            )
        })
    }
}
