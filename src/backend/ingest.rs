//! Pipeline sink that delivers payloads to the ingestion API.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::backend::client::{BackendClient, IngestOutcome};
use crate::models::payload::SyncPayload;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::sync::PayloadSink;

/// Delivers payloads through [`BackendClient::ingest`] and reports the
/// outcome to the front-end.
pub struct IngestSink {
    client: Arc<BackendClient>,
    notifier: Notifier,
}

impl IngestSink {
    /// Create a sink over `client`.
    #[must_use]
    pub fn new(client: Arc<BackendClient>, notifier: Notifier) -> Self {
        Self { client, notifier }
    }

    async fn deliver_payload(&self, payload: SyncPayload) {
        match self.client.ingest(&payload).await {
            Ok(IngestOutcome::Saved) => {
                self.notifier.notify(
                    Notification::new(NotificationKind::Sync)
                        .with("saved", true)
                        .with(
                            "message",
                            format!("Saved msg from {}: {}", payload.name, payload.preview()),
                        ),
                );
            }
            Ok(outcome) => {
                debug!(
                    account_id = %payload.account_id,
                    peer_id = %payload.peer_id,
                    message_id = payload.message_id,
                    ?outcome,
                    "ingest accepted without storing"
                );
            }
            Err(err) => {
                warn!(
                    account_id = %payload.account_id,
                    message_id = payload.message_id,
                    %err,
                    "ingest failed"
                );
                self.notifier.error(err.message());
            }
        }
    }
}

impl PayloadSink for IngestSink {
    fn deliver(&self, payload: SyncPayload) -> BoxFuture<'_, ()> {
        Box::pin(self.deliver_payload(payload))
    }
}
