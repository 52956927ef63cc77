//! Liveness watch and bounded reconnection.
//!
//! The watch waits for the handle to report a disconnect, then retries with
//! exponential backoff: attempt `n` (0-based) waits `base * 2^n` first. A
//! reconnect succeeds only once authorization is confirmed; an
//! unauthorized handle ends the sequence immediately as expired.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::driver::ProtocolSession;
use crate::models::auth::ReconnectOutcome;
use crate::notify::{short_id, truncate};
use crate::Result;

use super::Supervisor;

impl Supervisor {
    pub(super) async fn run_liveness(
        self: Arc<Self>,
        account_id: String,
        generation: u64,
        handle: Arc<dyn ProtocolSession>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = handle.disconnected() => {}
            }
            if cancel.is_cancelled() || !self.is_current(&account_id, generation).await {
                return;
            }

            warn!(%account_id, "connection lost");
            self.notifier.log(format!(
                "Disconnected {}, reconnecting...",
                short_id(&account_id)
            ));

            match self
                .reconnect(&account_id, generation, &handle, &cancel)
                .await
            {
                ReconnectOutcome::Reconnected => {}
                ReconnectOutcome::SessionExpired | ReconnectOutcome::Exhausted => {
                    self.retire(&account_id, generation).await;
                    return;
                }
                ReconnectOutcome::Superseded => return,
            }
        }
    }

    /// Run the reconnection sequence for one disconnect.
    pub(super) async fn reconnect(
        self: &Arc<Self>,
        account_id: &str,
        generation: u64,
        handle: &Arc<dyn ProtocolSession>,
        cancel: &CancellationToken,
    ) -> ReconnectOutcome {
        let attempts = self.config.reconnect_attempts;
        for attempt in 0..attempts {
            let delay = backoff_delay(self.config.reconnect_base(), attempt);
            tokio::select! {
                () = cancel.cancelled() => return ReconnectOutcome::Superseded,
                () = tokio::time::sleep(delay) => {}
            }
            if !self.is_current(account_id, generation).await {
                return ReconnectOutcome::Superseded;
            }

            match self.try_reconnect(account_id, generation, handle).await {
                Ok(true) => {
                    info!(account_id, attempt, "reconnected");
                    self.notifier
                        .log(format!("Reconnected {}", short_id(account_id)));
                    return ReconnectOutcome::Reconnected;
                }
                Ok(false) => {
                    warn!(account_id, "credential no longer authorized");
                    self.notifier
                        .error(format!("Session expired for {}", short_id(account_id)));
                    return ReconnectOutcome::SessionExpired;
                }
                Err(err) => {
                    warn!(account_id, attempt, %err, "reconnect attempt failed");
                    self.notifier.error(format!(
                        "Reconnect attempt {} failed: {}",
                        attempt + 1,
                        truncate(err.message(), 30)
                    ));
                }
            }
        }

        self.notifier.error(format!(
            "Failed to reconnect {} after {attempts} attempts",
            short_id(account_id)
        ));
        ReconnectOutcome::Exhausted
    }

    /// One attempt: reconnect the transport, confirm authorization, reload
    /// the policy, and restore missing background tasks.
    async fn try_reconnect(
        self: &Arc<Self>,
        account_id: &str,
        generation: u64,
        handle: &Arc<dyn ProtocolSession>,
    ) -> Result<bool> {
        if !handle.is_connected() {
            handle.connect().await?;
        }
        if !handle.is_authorized().await? {
            return Ok(false);
        }
        self.refresh_policy(account_id).await;
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions
            .get_mut(account_id)
            .filter(|session| session.generation == generation)
        {
            self.spawn_session_tasks(account_id, session, false);
        }
        Ok(true)
    }
}

/// Delay before attempt `attempt` (0-based).
#[must_use]
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt))
}
