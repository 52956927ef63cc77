//! Unsolicited `notification` messages sent to the front-end.
//!
//! Notifications share the output stream with RPC responses but carry no
//! `id`. Each one has a `type` (`log`, `debug`, `error`, `sync`,
//! `new_message`) plus free-form fields.

pub mod rate_limit;

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

pub use rate_limit::RateLimiter;

/// Destination for fully serialized outbound lines.
///
/// Implementations must never block the caller.
pub trait LineSink: Send + Sync {
    /// Queue one line (without trailing newline) for output.
    fn write_line(&self, line: String);
}

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Informational progress message.
    Log,
    /// Diagnostic message.
    Debug,
    /// Failure report.
    Error,
    /// Sync delivery outcome.
    Sync,
    /// A message event was captured for an account.
    NewMessage,
}

impl NotificationKind {
    /// Wire value of the `type` field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Debug => "debug",
            Self::Error => "error",
            Self::Sync => "sync",
            Self::NewMessage => "new_message",
        }
    }
}

/// One notification under construction.
#[derive(Debug, Clone)]
pub struct Notification {
    kind: NotificationKind,
    fields: Map<String, Value>,
}

impl Notification {
    /// Start a notification of the given kind.
    #[must_use]
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            fields: Map::new(),
        }
    }

    /// Notification with a single `message` field.
    #[must_use]
    pub fn message(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self::new(kind).with("message", message.into())
    }

    /// Attach a field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }

    /// Category of this notification.
    #[must_use]
    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    /// Full JSON-RPC notification envelope.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut params = Map::with_capacity(self.fields.len() + 1);
        params.insert("type".to_owned(), Value::from(self.kind.as_str()));
        for (key, value) in &self.fields {
            params.insert(key.clone(), value.clone());
        }
        json!({
            "jsonrpc": "2.0",
            "method": "notification",
            "params": Value::Object(params),
        })
    }
}

/// Writes notifications to the shared output sink.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn LineSink>,
}

impl Notifier {
    /// Create a notifier writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn LineSink>) -> Self {
        Self { sink }
    }

    /// Emit a notification.
    pub fn notify(&self, notification: Notification) {
        let value = notification.to_value();
        debug!(kind = notification.kind().as_str(), "notification");
        self.sink.write_line(value.to_string());
    }

    /// Emit a `log` notification.
    pub fn log(&self, message: impl Into<String>) {
        self.notify(Notification::message(NotificationKind::Log, message));
    }

    /// Emit a `debug` notification.
    pub fn debug(&self, message: impl Into<String>) {
        self.notify(Notification::message(NotificationKind::Debug, message));
    }

    /// Emit an `error` notification.
    pub fn error(&self, message: impl Into<String>) {
        self.notify(Notification::message(NotificationKind::Error, message));
    }
}

/// First eight characters of an account id, for human-facing messages.
#[must_use]
pub fn short_id(account_id: &str) -> &str {
    account_id
        .char_indices()
        .nth(8)
        .map_or(account_id, |(idx, _)| &account_id[..idx])
}

/// Truncate `text` to at most `max` characters.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
