//! Account policy loading and periodic refresh.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::policy::AccountPolicy;
use crate::notify::truncate;
use crate::Result;

use super::Supervisor;

/// Where account policies come from.
pub trait PolicySource: Send + Sync {
    /// Fetch the current policy; `Ok(None)` when none is stored.
    fn fetch_policy<'a>(&'a self, account_id: &'a str) -> BoxFuture<'a, Result<Option<AccountPolicy>>>;
}

impl Supervisor {
    /// One synchronous load at activation. Returns whether a policy was
    /// obtained; failures are logged but not reported.
    pub(super) async fn load_policy(&self, account_id: &str) -> bool {
        let Some(source) = self.policy_source.as_ref() else {
            return false;
        };
        match source.fetch_policy(account_id).await {
            Ok(Some(policy)) => {
                self.store_policy(account_id, policy).await;
                true
            }
            Ok(None) => false,
            Err(err) => {
                debug!(account_id, %err, "initial policy load failed");
                false
            }
        }
    }

    /// Refresh the cached policy. Failures keep the previous policy and are
    /// reported at most once per window per account.
    pub(super) async fn refresh_policy(&self, account_id: &str) {
        let Some(source) = self.policy_source.as_ref() else {
            return;
        };
        match source.fetch_policy(account_id).await {
            Ok(Some(policy)) => self.store_policy(account_id, policy).await,
            Ok(None) => debug!(account_id, "no stored policy, keeping current"),
            Err(err) => {
                warn!(account_id, %err, "policy refresh failed");
                let key = format!("policy_refresh:{account_id}");
                if self
                    .limiter
                    .allow(&key, self.config.refresh_error_window())
                {
                    self.notifier.error(format!(
                        "Failed to refresh account settings: {}",
                        truncate(err.message(), 80)
                    ));
                }
            }
        }
    }

    async fn store_policy(&self, account_id: &str, policy: AccountPolicy) {
        self.policies
            .lock()
            .await
            .insert(account_id.to_owned(), policy);
    }

    /// Background refresh loop; exits when cancelled or superseded.
    pub(super) async fn run_policy_refresh(
        self: Arc<Self>,
        account_id: String,
        generation: u64,
        cancel: CancellationToken,
    ) {
        let interval = self.config.policy_refresh();
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }
            if !self.is_current(&account_id, generation).await {
                return;
            }
            self.refresh_policy(&account_id).await;
        }
    }
}
