//! Account supervisor.
//!
//! Owns every authorized [`Session`] and in-flight login. For each session
//! it runs three background tasks, all tied to the session's cancellation
//! token:
//!
//! - periodic policy refresh (`policy`),
//! - liveness watch with bounded reconnection (`liveness`),
//! - the event pump feeding the sync pipeline (`events`).
//!
//! A background task only acts while its session is still the current one
//! for the account; the check compares the session generation.

mod events;
mod liveness;
mod policy;
mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SupervisorConfig;
use crate::driver::{ProtocolConnector, ProtocolSession};
use crate::models::account::{AccountIdentity, DialogSummary, MessageRecord, SentMessage};
use crate::models::auth::{AuthOutcome, SignInStep};
use crate::models::policy::AccountPolicy;
use crate::notify::{short_id, Notifier, RateLimiter};
use crate::sync::SyncPipeline;
use crate::{AppError, Result};

pub use policy::PolicySource;
pub use session::LoginResult;

use session::{PendingLogin, Session};

/// Supervises all accounts of this process.
pub struct Supervisor {
    connector: Arc<dyn ProtocolConnector>,
    policy_source: Option<Arc<dyn PolicySource>>,
    pipeline: Arc<SyncPipeline>,
    notifier: Notifier,
    limiter: Arc<RateLimiter>,
    config: SupervisorConfig,
    sessions: Mutex<HashMap<String, Session>>,
    pending: Mutex<HashMap<String, PendingLogin>>,
    policies: Mutex<HashMap<String, AccountPolicy>>,
    activations: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Create a supervisor.
    #[must_use]
    pub fn new(
        connector: Arc<dyn ProtocolConnector>,
        policy_source: Option<Arc<dyn PolicySource>>,
        pipeline: Arc<SyncPipeline>,
        notifier: Notifier,
        limiter: Arc<RateLimiter>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            connector,
            policy_source,
            pipeline,
            notifier,
            limiter,
            config,
            sessions: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            policies: Mutex::new(HashMap::new()),
            activations: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    // ── Authentication ───────────────────────────────────────────────────────

    /// Start a login: connect a fresh handle and request a code.
    ///
    /// Any earlier pending login for the account is replaced and its handle
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the network is unreachable or rejects
    /// the phone number.
    pub async fn login(&self, account_id: &str, phone: &str) -> Result<String> {
        let handle = self.connector.open(None)?;
        handle.connect().await?;
        let token = match handle.request_login_code(phone).await {
            Ok(token) => token,
            Err(err) => {
                close_quietly(handle.as_ref()).await;
                return Err(err);
            }
        };

        let previous = self.pending.lock().await.insert(
            account_id.to_owned(),
            PendingLogin {
                handle,
                phone: phone.to_owned(),
            },
        );
        if let Some(previous) = previous {
            debug!(account_id, phone = %previous.phone, "replacing pending login");
            close_quietly(previous.handle.as_ref()).await;
        }
        info!(account_id, "login code requested");
        Ok(token)
    }

    /// Complete a pending login with the received code and, when the account
    /// has one, its password.
    ///
    /// Without a password for a second-factor account the pending login is
    /// kept and [`AuthOutcome::NeedsSecondFactor`] is returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` without a pending login, or
    /// `AppError::Protocol` if the code or password is rejected.
    pub async fn verify_code(
        self: &Arc<Self>,
        account_id: &str,
        phone: &str,
        code: &str,
        correlation_token: &str,
        password: Option<&str>,
    ) -> Result<AuthOutcome<LoginResult>> {
        let handle = self
            .pending
            .lock()
            .await
            .get(account_id)
            .map(|pending| Arc::clone(&pending.handle))
            .ok_or_else(|| AppError::NotFound("No pending login for this account".into()))?;

        match handle.sign_in(phone, code, correlation_token).await? {
            SignInStep::Complete => {}
            SignInStep::PasswordRequired => match password {
                Some(password) => handle.check_password(password).await?,
                None => return Ok(AuthOutcome::NeedsSecondFactor),
            },
        }

        let identity = handle.current_identity().await?;
        let credential = handle.export_credential();
        self.pending.lock().await.remove(account_id);
        self.notifier
            .log(format!("Logged in as {}", identity.label()));

        self.activate(account_id, handle).await;
        Ok(AuthOutcome::Success(LoginResult {
            credential,
            identity,
        }))
    }

    /// Resume a previously authorized account from its credential.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the credential is malformed or the
    /// network cannot be reached.
    pub async fn connect_with_session(
        self: &Arc<Self>,
        account_id: &str,
        credential: &str,
    ) -> Result<AuthOutcome<AccountIdentity>> {
        let handle = self.connector.open(Some(credential))?;
        handle.connect().await?;
        if !handle.is_authorized().await? {
            close_quietly(handle.as_ref()).await;
            info!(account_id, "stored credential is no longer authorized");
            return Ok(AuthOutcome::SessionExpired);
        }
        let identity = handle.current_identity().await?;
        self.activate(account_id, handle).await;
        Ok(AuthOutcome::Success(identity))
    }

    /// Tear down an account's session.
    pub async fn disconnect(&self, account_id: &str) -> AuthOutcome<()> {
        let Some(session) = self.sessions.lock().await.remove(account_id) else {
            return AuthOutcome::Failed("Client not found".into());
        };
        self.teardown(account_id, session, false).await;
        AuthOutcome::Success(())
    }

    // ── Read and send ────────────────────────────────────────────────────────

    /// Most recent conversations; empty when the account has no session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the network call fails.
    pub async fn get_dialogs(&self, account_id: &str, limit: u32) -> Result<Vec<DialogSummary>> {
        match self.handle_for(account_id).await {
            Some(handle) => handle.dialogs(limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Recent messages of one conversation; empty when the account has no
    /// session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the network call fails.
    pub async fn fetch_messages(
        &self,
        account_id: &str,
        peer_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        match self.handle_for(account_id).await {
            Some(handle) => handle.history(peer_id, limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Send a text message from an account.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` without a session, or
    /// `AppError::Protocol` if the send fails.
    pub async fn send_message(
        &self,
        account_id: &str,
        peer_id: &str,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<SentMessage> {
        let handle = self
            .handle_for(account_id)
            .await
            .ok_or_else(|| AppError::NotFound("Client not connected".into()))?;
        handle.send_message(peer_id, text, reply_to).await
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Cancel every background task and disconnect every handle.
    ///
    /// Returns the number of sessions torn down.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let sessions: Vec<(String, Session)> = self.sessions.lock().await.drain().collect();
        let count = sessions.len();
        for (account_id, session) in sessions {
            self.teardown(&account_id, session, false).await;
        }
        let pending: Vec<PendingLogin> = self
            .pending
            .lock()
            .await
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        for login in pending {
            close_quietly(login.handle.as_ref()).await;
        }
        info!(sessions = count, "supervisor stopped");
        count
    }

    /// Whether an account currently has a session.
    pub async fn has_session(&self, account_id: &str) -> bool {
        self.sessions.lock().await.contains_key(account_id)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether a login is awaiting code verification.
    pub async fn has_pending_login(&self, account_id: &str) -> bool {
        self.pending.lock().await.contains_key(account_id)
    }

    /// Effective policy for an account.
    pub async fn policy(&self, account_id: &str) -> AccountPolicy {
        self.policies
            .lock()
            .await
            .get(account_id)
            .copied()
            .unwrap_or_default()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Register an authorized handle as the account's session and start its
    /// background tasks. A previous session for the account is torn down.
    ///
    /// Activations for one account run one at a time.
    async fn activate(self: &Arc<Self>, account_id: &str, handle: Arc<dyn ProtocolSession>) {
        let gate = self.activation_gate(account_id).await;
        let _serial = gate.lock().await;

        let previous = self.sessions.lock().await.remove(account_id);
        if let Some(previous) = previous {
            info!(account_id, "replacing existing session");
            self.teardown(account_id, previous, false).await;
        }

        if !self.load_policy(account_id).await {
            self.notifier
                .log(format!("Using default settings for {}", short_id(account_id)));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut session = Session::new(handle, generation, self.shutdown.child_token());
        let replaced = {
            let mut sessions = self.sessions.lock().await;
            self.spawn_session_tasks(account_id, &mut session, true);
            sessions.insert(account_id.to_owned(), session)
        };
        if let Some(replaced) = replaced {
            warn!(account_id, generation = replaced.generation, "dropping overlapping session");
            self.teardown(account_id, replaced, false).await;
        }
        info!(account_id, generation, "session active");
    }

    async fn activation_gate(&self, account_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.activations
                .lock()
                .await
                .entry(account_id.to_owned())
                .or_default(),
        )
    }

    /// Spawn whichever background tasks `session` is missing.
    ///
    /// With `with_liveness` the liveness watch is spawned too; the watch
    /// itself passes `false` when restoring after a reconnect. Callers hold
    /// the `sessions` lock so the tasks cannot observe a half-registered
    /// session.
    fn spawn_session_tasks(self: &Arc<Self>, account_id: &str, session: &mut Session, with_liveness: bool) {
        let generation = session.generation;
        if self.policy_source.is_some() && session.refresh_stopped() {
            let task = Arc::clone(self)
                .run_policy_refresh(account_id.to_owned(), generation, session.cancel.clone())
                .instrument(info_span!("policy_refresh", account_id));
            session.refresh_task = Some(tokio::spawn(task));
        }

        if with_liveness {
            let task = Arc::clone(self)
                .run_liveness(
                    account_id.to_owned(),
                    generation,
                    Arc::clone(&session.handle),
                    session.cancel.clone(),
                )
                .instrument(info_span!("liveness", account_id, generation));
            session.liveness_task = Some(tokio::spawn(task));
        }

        if let Err(err) = self.install_event_hook(account_id, session) {
            warn!(account_id, %err, "failed to subscribe to message events");
            self.notifier
                .error(format!("Failed to register message handlers: {}", err.message()));
        }
    }

    async fn is_current(&self, account_id: &str, generation: u64) -> bool {
        self.sessions
            .lock()
            .await
            .get(account_id)
            .is_some_and(|session| session.generation == generation)
    }

    async fn handle_for(&self, account_id: &str) -> Option<Arc<dyn ProtocolSession>> {
        self.sessions
            .lock()
            .await
            .get(account_id)
            .map(|session| Arc::clone(&session.handle))
    }

    /// Stop a session's tasks and close its handle.
    ///
    /// `from_watch` is set when the liveness task itself is tearing the
    /// session down; its own join handle is then left alone.
    async fn teardown(&self, account_id: &str, mut session: Session, from_watch: bool) {
        session.cancel.cancel();
        let mut tasks = vec![session.refresh_task.take(), session.event_task.take()];
        if from_watch {
            drop(session.liveness_task.take());
        } else {
            tasks.push(session.liveness_task.take());
        }
        for task in tasks.into_iter().flatten() {
            task.abort();
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(account_id, %err, "session task ended abnormally");
                }
            }
        }
        close_quietly(session.handle.as_ref()).await;
        debug!(account_id, generation = session.generation, "session torn down");
    }

    /// Remove the session if it is still `generation`; used when the
    /// liveness watch gives up on it.
    async fn retire(&self, account_id: &str, generation: u64) {
        let session = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(account_id) {
                Some(session) if session.generation == generation => sessions.remove(account_id),
                _ => None,
            }
        };
        if let Some(session) = session {
            self.teardown(account_id, session, true).await;
        }
    }
}

async fn close_quietly(handle: &dyn ProtocolSession) {
    if let Err(err) = handle.disconnect().await {
        debug!(%err, "disconnect failed");
    }
}
