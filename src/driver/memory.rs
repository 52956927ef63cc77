//! In-process messaging network.
//!
//! [`MemoryNetwork`] simulates the messaging network well enough to drive
//! the full login, reconnect, and event flows without a real client
//! library. The binary uses it for front-end development; the test suite
//! scripts it to inject events, drop transports, and revoke credentials.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use crate::driver::{DriverFuture, ProtocolConnector, ProtocolSession};
use crate::models::account::{AccountIdentity, DialogSummary, MessageRecord, SentMessage};
use crate::models::auth::SignInStep;
use crate::models::event::InboundMessage;
use crate::{AppError, Result};

/// Login code accepted by every simulated account.
pub const DEFAULT_LOGIN_CODE: &str = "12345";

/// Phone number of the account seeded by [`MemoryNetwork::demo`].
pub const DEMO_PHONE: &str = "+10000000000";

#[derive(Debug, Clone)]
struct MemoryAccount {
    identity: AccountIdentity,
    password: Option<String>,
    dialogs: Vec<DialogSummary>,
    history: HashMap<String, Vec<MessageRecord>>,
}

#[derive(Default)]
struct NetworkState {
    accounts: HashMap<String, MemoryAccount>,
    credentials: HashMap<String, String>,
    unreachable: bool,
    failing_connects: u32,
    connect_attempts: u64,
    next_message_id: i64,
    handles: Vec<Weak<MemorySession>>,
}

/// Shared, scriptable state of the simulated network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Empty network with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Network seeded with one demo account reachable at [`DEMO_PHONE`].
    #[must_use]
    pub fn demo() -> Self {
        let network = Self::new();
        network.register_account(
            DEMO_PHONE,
            AccountIdentity {
                user_id: 1,
                first_name: Some("Demo".into()),
                last_name: Some("User".into()),
                username: Some("demo".into()),
            },
            None,
        );
        network
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register an account that can log in with `phone`.
    pub fn register_account(
        &self,
        phone: &str,
        identity: AccountIdentity,
        password: Option<String>,
    ) {
        self.lock().accounts.insert(
            phone.to_owned(),
            MemoryAccount {
                identity,
                password,
                dialogs: Vec::new(),
                history: HashMap::new(),
            },
        );
    }

    /// Add a conversation to an account's dialog list.
    pub fn add_dialog(&self, phone: &str, dialog: DialogSummary) {
        if let Some(account) = self.lock().accounts.get_mut(phone) {
            account.dialogs.push(dialog);
        }
    }

    /// Issue a credential for `phone` without the interactive login flow.
    ///
    /// Returns `None` if the phone is unknown.
    #[must_use]
    pub fn issue_credential(&self, phone: &str) -> Option<String> {
        let mut state = self.lock();
        if !state.accounts.contains_key(phone) {
            return None;
        }
        let credential = Uuid::new_v4().to_string();
        state.credentials.insert(credential.clone(), phone.to_owned());
        Some(credential)
    }

    /// Invalidate a credential; handles using it become unauthorized.
    pub fn revoke_credential(&self, credential: &str) {
        self.lock().credentials.remove(credential);
    }

    /// Make every connect attempt fail (`false`) or succeed (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    /// Total connect attempts seen by the network.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.lock().connect_attempts
    }

    /// Drop the transport of every live handle.
    pub fn drop_connections(&self) {
        for handle in self.live_handles() {
            handle.set_connected(false);
        }
    }

    /// Deliver `event` to every connected, subscribed handle signed in as
    /// `phone`. Returns the number of handles that accepted it.
    #[must_use]
    pub fn emit(&self, phone: &str, event: &InboundMessage) -> usize {
        let mut delivered = 0;
        for handle in self.live_handles() {
            if handle.signed_in_phone().as_deref() != Some(phone) || !handle.is_connected() {
                continue;
            }
            if let Some(tx) = handle.event_sender() {
                if tx.try_send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Total `subscribe` calls across handles signed in as `phone`.
    #[must_use]
    pub fn subscription_count(&self, phone: &str) -> usize {
        self.live_handles()
            .iter()
            .filter(|handle| handle.signed_in_phone().as_deref() == Some(phone))
            .map(|handle| handle.subscriptions.load(Ordering::SeqCst))
            .sum()
    }

    /// Number of handles still alive and connected.
    #[must_use]
    pub fn connected_handles(&self) -> usize {
        self.live_handles()
            .iter()
            .filter(|handle| handle.is_connected())
            .count()
    }

    fn live_handles(&self) -> Vec<Arc<MemorySession>> {
        let mut state = self.lock();
        state.handles.retain(|weak| weak.strong_count() > 0);
        state.handles.iter().filter_map(Weak::upgrade).collect()
    }

    fn try_connect(&self) -> Result<()> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.unreachable {
            return Err(AppError::Protocol("network unreachable".into()));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(AppError::Protocol("connection reset".into()));
        }
        Ok(())
    }
}

/// [`ProtocolConnector`] over a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryConnector {
    network: MemoryNetwork,
}

impl MemoryConnector {
    /// Create a connector for `network`.
    #[must_use]
    pub fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }

    /// The simulated network behind this connector.
    #[must_use]
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl ProtocolConnector for MemoryConnector {
    fn open(&self, credential: Option<&str>) -> Result<Arc<dyn ProtocolSession>> {
        if credential.is_some_and(str::is_empty) {
            return Err(AppError::Protocol("empty credential".into()));
        }
        let (connected, _) = watch::channel(false);
        let session = Arc::new(MemorySession {
            network: self.network.clone(),
            auth: Mutex::new(AuthState {
                credential: credential.map(str::to_owned),
                ..AuthState::default()
            }),
            connected,
            events: Mutex::new(None),
            subscriptions: AtomicUsize::new(0),
        });
        self.network
            .lock()
            .handles
            .push(Arc::downgrade(&session));
        Ok(session)
    }
}

#[derive(Default)]
struct AuthState {
    credential: Option<String>,
    pending_code: Option<(String, String)>,
    awaiting_password: Option<String>,
}

/// Handle to the simulated network.
pub struct MemorySession {
    network: MemoryNetwork,
    auth: Mutex<AuthState>,
    connected: watch::Sender<bool>,
    events: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    subscriptions: AtomicUsize,
}

impl MemorySession {
    fn auth(&self) -> MutexGuard<'_, AuthState> {
        match self.auth.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_connected(&self, up: bool) {
        self.connected.send_replace(up);
    }

    fn event_sender(&self) -> Option<mpsc::Sender<InboundMessage>> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn signed_in_phone(&self) -> Option<String> {
        let credential = self.auth().credential.clone()?;
        self.network.lock().credentials.get(&credential).cloned()
    }

    fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AppError::Protocol("not connected".into()))
        }
    }

    fn require_account(&self) -> Result<MemoryAccount> {
        self.require_connected()?;
        let phone = self
            .signed_in_phone()
            .ok_or_else(|| AppError::Protocol("not authorized".into()))?;
        self.network
            .lock()
            .accounts
            .get(&phone)
            .cloned()
            .ok_or_else(|| AppError::Protocol("account deleted".into()))
    }

    fn authorize(&self, phone: &str) -> String {
        let credential = Uuid::new_v4().to_string();
        self.network
            .lock()
            .credentials
            .insert(credential.clone(), phone.to_owned());
        let mut auth = self.auth();
        auth.credential = Some(credential.clone());
        auth.pending_code = None;
        auth.awaiting_password = None;
        credential
    }
}

impl ProtocolSession for MemorySession {
    fn connect(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.network.try_connect()?;
            self.set_connected(true);
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn is_authorized(&self) -> DriverFuture<'_, bool> {
        Box::pin(async move {
            self.require_connected()?;
            Ok(self.signed_in_phone().is_some())
        })
    }

    fn request_login_code(&self, phone: &str) -> DriverFuture<'_, String> {
        let phone = phone.to_owned();
        Box::pin(async move {
            self.require_connected()?;
            if !self.network.lock().accounts.contains_key(&phone) {
                return Err(AppError::Protocol(format!(
                    "phone number invalid: {phone}"
                )));
            }
            let token = Uuid::new_v4().simple().to_string();
            self.auth().pending_code = Some((phone, token.clone()));
            Ok(token)
        })
    }

    fn sign_in(
        &self,
        phone: &str,
        code: &str,
        correlation_token: &str,
    ) -> DriverFuture<'_, SignInStep> {
        let phone = phone.to_owned();
        let code = code.to_owned();
        let token = correlation_token.to_owned();
        Box::pin(async move {
            self.require_connected()?;
            let matches = self
                .auth()
                .pending_code
                .as_ref()
                .is_some_and(|(p, t)| *p == phone && *t == token);
            if !matches {
                return Err(AppError::Protocol("phone code hash invalid".into()));
            }
            if code != DEFAULT_LOGIN_CODE {
                return Err(AppError::Protocol("phone code invalid".into()));
            }
            let has_password = self
                .network
                .lock()
                .accounts
                .get(&phone)
                .is_some_and(|account| account.password.is_some());
            if has_password {
                self.auth().awaiting_password = Some(phone);
                return Ok(SignInStep::PasswordRequired);
            }
            self.authorize(&phone);
            Ok(SignInStep::Complete)
        })
    }

    fn check_password(&self, password: &str) -> DriverFuture<'_, ()> {
        let password = password.to_owned();
        Box::pin(async move {
            self.require_connected()?;
            let phone = self
                .auth()
                .awaiting_password
                .clone()
                .ok_or_else(|| AppError::Protocol("no password challenge pending".into()))?;
            let expected = self
                .network
                .lock()
                .accounts
                .get(&phone)
                .and_then(|account| account.password.clone());
            if expected.as_deref() != Some(password.as_str()) {
                return Err(AppError::Protocol("password invalid".into()));
            }
            self.authorize(&phone);
            Ok(())
        })
    }

    fn current_identity(&self) -> DriverFuture<'_, AccountIdentity> {
        Box::pin(async move { Ok(self.require_account()?.identity) })
    }

    fn export_credential(&self) -> String {
        self.auth().credential.clone().unwrap_or_default()
    }

    fn disconnect(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.set_connected(false);
            debug!("memory session disconnected");
            Ok(())
        })
    }

    fn disconnected(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let mut rx = self.connected.subscribe();
        Box::pin(async move {
            // A closed sender means the handle is gone, which also counts.
            let _ = rx.wait_for(|up| !*up).await;
        })
    }

    fn subscribe(&self, events: mpsc::Sender<InboundMessage>) -> Result<()> {
        match self.events.lock() {
            Ok(mut guard) => *guard = Some(events),
            Err(poisoned) => *poisoned.into_inner() = Some(events),
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dialogs(&self, limit: u32) -> DriverFuture<'_, Vec<DialogSummary>> {
        Box::pin(async move {
            let account = self.require_account()?;
            Ok(account
                .dialogs
                .into_iter()
                .take(limit as usize)
                .collect())
        })
    }

    fn history(&self, peer_id: &str, limit: u32) -> DriverFuture<'_, Vec<MessageRecord>> {
        let peer_id = peer_id.to_owned();
        Box::pin(async move {
            let account = self.require_account()?;
            let mut messages = account.history.get(&peer_id).cloned().unwrap_or_default();
            messages.reverse();
            messages.truncate(limit as usize);
            Ok(messages)
        })
    }

    fn send_message(
        &self,
        peer_id: &str,
        text: &str,
        reply_to: Option<i64>,
    ) -> DriverFuture<'_, SentMessage> {
        let peer_id = peer_id.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            self.require_account()?;
            if peer_id.parse::<i64>().is_err() {
                return Err(AppError::Protocol(format!("invalid peer id: {peer_id}")));
            }
            let phone = self
                .signed_in_phone()
                .ok_or_else(|| AppError::Protocol("not authorized".into()))?;
            let timestamp = chrono::Utc::now().timestamp_millis();

            let mut state = self.network.lock();
            state.next_message_id += 1;
            let message_id = state.next_message_id;
            let from_id = state
                .accounts
                .get(&phone)
                .map(|account| account.identity.user_id.to_string());
            if let Some(account) = state.accounts.get_mut(&phone) {
                account
                    .history
                    .entry(peer_id)
                    .or_default()
                    .push(MessageRecord {
                        telegram_id: message_id,
                        text: Some(text),
                        from_id,
                        from_name: None,
                        is_outgoing: true,
                        timestamp,
                        media_type: None,
                        reply_to_id: reply_to,
                    });
            }
            Ok(SentMessage {
                message_id,
                timestamp,
            })
        })
    }
}
