//! Event subscription and the per-session event pump.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::models::event::InboundMessage;
use crate::models::payload::SyncPayload;
use crate::notify::{short_id, truncate, Notification, NotificationKind};
use crate::Result;

use super::session::Session;
use super::Supervisor;

/// Events buffered between the protocol client and the pump.
const EVENT_BUFFER: usize = 256;

impl Supervisor {
    /// Subscribe to the handle's message events unless already subscribed.
    pub(super) fn install_event_hook(self: &Arc<Self>, account_id: &str, session: &mut Session) -> Result<()> {
        if session.hook_installed {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        session.handle.subscribe(tx)?;
        session.hook_installed = true;
        let task = Arc::clone(self)
            .run_event_pump(account_id.to_owned(), rx, session.cancel.clone())
            .instrument(info_span!("event_pump", account_id));
        session.event_task = Some(tokio::spawn(task));
        self.notifier.debug(format!(
            "Message handlers registered for {}",
            short_id(account_id)
        ));
        Ok(())
    }

    async fn run_event_pump(
        self: Arc<Self>,
        account_id: String,
        mut events: mpsc::Receiver<InboundMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!(%account_id, "event stream closed");
                return;
            };
            self.handle_event(&account_id, &event).await;
        }
    }

    /// Filter one event through the account policy, enqueue it for sync,
    /// and announce it to the front-end.
    pub(super) async fn handle_event(&self, account_id: &str, event: &InboundMessage) {
        let policy = self.policy(account_id).await;
        if !policy.admits_chat(event.chat) {
            return;
        }
        if !policy.admits_classified(event.peer.kind, event.is_bot_content(), event.sender_is_bot()) {
            return;
        }

        let payload = SyncPayload::from_event(account_id, event);
        if let Err(err) = self.pipeline.enqueue(payload).await {
            warn!(account_id, %err, "failed to enqueue payload");
            self.notifier
                .error(format!("Handler error: {}", truncate(err.message(), 50)));
        }

        self.notifier.notify(
            Notification::new(NotificationKind::NewMessage)
                .with("account_id", account_id)
                .with("peer_id", event.peer.id.as_str())
                .with("message_id", event.message_id),
        );
    }
}
