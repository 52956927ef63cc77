//! Service assembly and ordered shutdown.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::backend::{BackendClient, IngestSink};
use crate::config::GlobalConfig;
use crate::driver::ProtocolConnector;
use crate::notify::{LineSink, Notifier, RateLimiter};
use crate::persistence::db::Database;
use crate::persistence::overflow_repo::OverflowStore;
use crate::rpc::dispatcher::{DispatchSummary, Dispatcher};
use crate::rpc::methods::BridgeMethods;
use crate::rpc::output::OutputChannel;
use crate::supervisor::{PolicySource, Supervisor};
use crate::sync::{PayloadSink, SyncPipeline};
use crate::Result;

/// The running bridge: dispatcher, supervisor, and sync pipeline sharing one
/// output channel and one overflow store.
pub struct Bridge {
    output: Arc<OutputChannel>,
    store: Arc<OverflowStore>,
    pipeline: Arc<SyncPipeline>,
    supervisor: Arc<Supervisor>,
    dispatcher: Dispatcher,
}

impl Bridge {
    /// Wire every component together.
    ///
    /// Imports legacy overflow files from the data directory and resumes
    /// delivery of anything left over from a previous run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the HTTP client cannot be built, or
    /// `AppError::Db` if the overflow store cannot be read.
    pub async fn start(
        config: &GlobalConfig,
        connector: Arc<dyn ProtocolConnector>,
        output: Arc<OutputChannel>,
        db: Database,
    ) -> Result<Self> {
        let sink: Arc<dyn LineSink> = Arc::clone(&output) as Arc<dyn LineSink>;
        let notifier = Notifier::new(Arc::clone(&sink));
        let limiter = Arc::new(RateLimiter::new());

        let store = Arc::new(OverflowStore::new(Arc::new(db)));
        if let Err(err) = store.migrate_legacy_files(&config.data_dir).await {
            warn!(%err, "legacy overflow migration failed");
        }

        let backend = match config.backend_url() {
            Some(url) => Some(Arc::new(BackendClient::new(url, &config.sync)?)),
            None => None,
        };
        let payload_sink = backend.as_ref().map(|client| {
            Arc::new(IngestSink::new(Arc::clone(client), notifier.clone())) as Arc<dyn PayloadSink>
        });
        let policy_source = backend
            .as_ref()
            .map(|client| Arc::clone(client) as Arc<dyn PolicySource>);

        let pipeline = Arc::new(SyncPipeline::new(
            payload_sink,
            Arc::clone(&store),
            notifier.clone(),
            Arc::clone(&limiter),
            config.sync.clone(),
        ));
        let supervisor = Arc::new(Supervisor::new(
            connector,
            policy_source,
            Arc::clone(&pipeline),
            notifier.clone(),
            limiter,
            config.supervisor.clone(),
        ));
        let dispatcher = Dispatcher::new(
            Arc::new(BridgeMethods::new(Arc::clone(&supervisor))),
            sink,
            config.rpc.max_concurrent_requests,
        );

        let pending = pipeline.resume_pending().await?;
        let sync_state = if pipeline.is_enabled() { "enabled" } else { "disabled" };
        notifier.log(format!(
            "Bridge started (api_id {}, sync {sync_state}, {pending} queued)",
            config.api_id
        ));
        info!(api_id = config.api_id, sync = sync_state, pending, "bridge started");

        Ok(Self {
            output,
            store,
            pipeline,
            supervisor,
            dispatcher,
        })
    }

    /// Account supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Sync pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<SyncPipeline> {
        &self.pipeline
    }

    /// Serve requests from `input` until it ends or `cancel` fires, then shut
    /// everything down in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if reading `input` fails; shutdown still runs.
    pub async fn run<R>(&self, input: R, cancel: CancellationToken) -> Result<DispatchSummary>
    where
        R: AsyncRead + Unpin,
    {
        let served = self
            .dispatcher
            .serve(input, cancel)
            .instrument(info_span!("dispatcher"))
            .await;
        self.shutdown().await;
        served
    }

    /// Ordered shutdown: sessions, then the pipeline, then the store, then
    /// the output channel.
    pub async fn shutdown(&self) {
        let sessions = self.supervisor.shutdown().await;
        self.pipeline.shutdown().await;
        self.store.close().await;
        info!(sessions, dropped_lines = self.output.dropped_lines(), "bridge stopped");
        self.output.close();
    }
}
