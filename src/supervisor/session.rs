//! Per-account runtime state.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::driver::ProtocolSession;
use crate::models::account::AccountIdentity;

/// Handle awaiting code verification.
pub(crate) struct PendingLogin {
    pub(crate) handle: Arc<dyn ProtocolSession>,
    pub(crate) phone: String,
}

/// Result of a completed login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    /// Credential to pass to `connect_with_session` on later runs.
    pub credential: String,
    /// The authorized user.
    pub identity: AccountIdentity,
}

/// A live, authorized account.
pub(crate) struct Session {
    pub(crate) handle: Arc<dyn ProtocolSession>,
    /// Distinguishes this session from earlier ones for the same account.
    pub(crate) generation: u64,
    /// Cancels every background task owned by this session.
    pub(crate) cancel: CancellationToken,
    pub(crate) refresh_task: Option<JoinHandle<()>>,
    pub(crate) liveness_task: Option<JoinHandle<()>>,
    pub(crate) event_task: Option<JoinHandle<()>>,
    /// The event subscription is registered once per handle.
    pub(crate) hook_installed: bool,
}

impl Session {
    pub(crate) fn new(handle: Arc<dyn ProtocolSession>, generation: u64, cancel: CancellationToken) -> Self {
        Self {
            handle,
            generation,
            cancel,
            refresh_task: None,
            liveness_task: None,
            event_task: None,
            hook_installed: false,
        }
    }

    /// Whether the periodic refresh task needs (re)starting.
    pub(crate) fn refresh_stopped(&self) -> bool {
        self.refresh_task
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }
}
