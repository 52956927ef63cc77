//! Protocol-client abstraction.
//!
//! The [`ProtocolConnector`] and [`ProtocolSession`] traits decouple the
//! account supervisor from the messaging network's client library. A session
//! is an opaque handle offering connect, authorize, disconnect, send,
//! history iteration, and an event subscription. Events are handed off by
//! message passing: the client pushes already-mapped [`InboundMessage`]
//! records onto the channel passed to [`ProtocolSession::subscribe`].

pub mod memory;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::account::{AccountIdentity, DialogSummary, MessageRecord, SentMessage};
use crate::models::auth::SignInStep;
use crate::models::event::InboundMessage;
use crate::Result;

/// Boxed future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Factory for protocol session handles.
pub trait ProtocolConnector: Send + Sync {
    /// Build a new, not-yet-connected handle.
    ///
    /// With `credential` the handle resumes a previously authorized session
    /// and skips the code challenge.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the
    /// credential cannot be parsed.
    fn open(&self, credential: Option<&str>) -> Result<Arc<dyn ProtocolSession>>;
}

/// One client handle to the messaging network.
pub trait ProtocolSession: Send + Sync {
    /// Establish (or re-establish) the transport.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the
    /// network cannot be reached.
    fn connect(&self) -> DriverFuture<'_, ()>;

    /// Whether the transport is currently up.
    fn is_connected(&self) -> bool;

    /// Whether the handle holds a valid authorization.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the
    /// transport is down.
    fn is_authorized(&self) -> DriverFuture<'_, bool>;

    /// Ask the network to send a login code; returns the correlation token.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the phone
    /// number is rejected.
    fn request_login_code(&self, phone: &str) -> DriverFuture<'_, String>;

    /// Complete the code challenge.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the code or
    /// token is invalid.
    fn sign_in(&self, phone: &str, code: &str, correlation_token: &str)
        -> DriverFuture<'_, SignInStep>;

    /// Supply the second-factor password after [`SignInStep::PasswordRequired`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the
    /// password is wrong.
    fn check_password(&self, password: &str) -> DriverFuture<'_, ()>;

    /// Identity of the authorized user.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) when not
    /// authorized.
    fn current_identity(&self) -> DriverFuture<'_, AccountIdentity>;

    /// Serialize the authorization into a reusable credential string.
    fn export_credential(&self) -> String;

    /// Close the transport.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the close
    /// handshake fails.
    fn disconnect(&self) -> DriverFuture<'_, ()>;

    /// Resolve once the transport is down.
    fn disconnected(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Route new-message events to `events`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the client
    /// refuses the subscription.
    fn subscribe(&self, events: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Most recent conversations.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) on network failure.
    fn dialogs(&self, limit: u32) -> DriverFuture<'_, Vec<DialogSummary>>;

    /// Most recent messages of one conversation, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) on network failure.
    fn history(&self, peer_id: &str, limit: u32) -> DriverFuture<'_, Vec<MessageRecord>>;

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) if the send fails.
    fn send_message(
        &self,
        peer_id: &str,
        text: &str,
        reply_to: Option<i64>,
    ) -> DriverFuture<'_, SentMessage>;
}
