//! Bounded queue, worker pool, and overflow drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::SyncConfig;
use crate::models::payload::{SyncPayload, SYSTEM_NOTICES_PEER_ID};
use crate::notify::{Notification, NotificationKind, Notifier, RateLimiter};
use crate::persistence::overflow_repo::OverflowStore;
use crate::sync::PayloadSink;
use crate::Result;

/// Overflow rows fetched per drain pass.
const DRAIN_BATCH: u32 = 100;

const QUEUE_FULL_NOTICE_KEY: &str = "sync:queue_full";

/// Where an accepted payload went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Placed on the in-memory queue.
    Queued,
    /// Written to the overflow store.
    Overflowed,
    /// Syncing is not configured; the payload was discarded.
    Disabled,
}

enum QueueItem {
    Payload(SyncPayload),
    Stop,
}

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<QueueItem>>>;

/// Tasks and channels created on first use.
struct Running {
    queue: mpsc::Sender<QueueItem>,
    overflow_ready: Arc<Notify>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

/// Sync pipeline shared by all accounts.
pub struct SyncPipeline {
    sink: Option<Arc<dyn PayloadSink>>,
    store: Arc<OverflowStore>,
    notifier: Notifier,
    limiter: Arc<RateLimiter>,
    config: SyncConfig,
    running: OnceLock<Running>,
    closed: AtomicBool,
}

impl SyncPipeline {
    /// Create a pipeline. Without a `sink`, syncing is disabled and every
    /// payload is discarded.
    #[must_use]
    pub fn new(
        sink: Option<Arc<dyn PayloadSink>>,
        store: Arc<OverflowStore>,
        notifier: Notifier,
        limiter: Arc<RateLimiter>,
        config: SyncConfig,
    ) -> Self {
        Self {
            sink,
            store,
            notifier,
            limiter,
            config,
            running: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether a delivery sink is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Whether the workers have been started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.get().is_some()
    }

    /// Accept a payload without waiting on delivery.
    ///
    /// The first call starts the workers and the overflow drain.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the queue is full and the overflow write
    /// fails.
    pub async fn enqueue(&self, payload: SyncPayload) -> Result<EnqueueOutcome> {
        if self.closed.load(Ordering::SeqCst) {
            if !self.is_enabled() {
                return Ok(EnqueueOutcome::Disabled);
            }
            // Keep it for the next run.
            self.store.append(&payload).await?;
            return Ok(EnqueueOutcome::Overflowed);
        }
        let Some(running) = self.ensure_started() else {
            return Ok(EnqueueOutcome::Disabled);
        };

        match running.queue.try_send(QueueItem::Payload(payload)) {
            Ok(()) => Ok(EnqueueOutcome::Queued),
            Err(TrySendError::Full(item) | TrySendError::Closed(item)) => {
                let QueueItem::Payload(payload) = item else {
                    return Ok(EnqueueOutcome::Queued);
                };
                self.store.append(&payload).await?;
                running.overflow_ready.notify_one();
                if self
                    .limiter
                    .allow(QUEUE_FULL_NOTICE_KEY, self.config.queue_full_notice())
                {
                    self.notifier.log("Queue full, buffering to disk");
                }
                debug!(
                    account_id = %payload.account_id,
                    message_id = payload.message_id,
                    "payload written to overflow store"
                );
                Ok(EnqueueOutcome::Overflowed)
            }
        }
    }

    /// Start draining if overflow entries survive from a previous run.
    ///
    /// Returns the number of pending entries found.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be counted.
    pub async fn resume_pending(&self) -> Result<u64> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let pending = self.store.count().await?;
        if pending > 0 {
            info!(pending, "resuming overflow delivery");
            self.ensure_started();
        }
        Ok(pending)
    }

    /// Stop the drain loop, let workers finish what is queued in memory,
    /// and wait for them to exit. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(running) = self.running.get() else {
            return;
        };

        running.cancel.cancel();
        let drain = take_lock(&running.drain).take();
        if let Some(drain) = drain {
            if let Err(err) = drain.await {
                warn!(%err, "overflow drain ended abnormally");
            }
        }

        let workers = std::mem::take(&mut *take_lock(&running.workers));
        for _ in 0..workers.len() {
            if running.queue.send(QueueItem::Stop).await.is_err() {
                break;
            }
        }
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(%err, "sync worker ended abnormally");
            }
        }
        info!("sync pipeline stopped");
    }

    fn ensure_started(&self) -> Option<&Running> {
        let sink = self.sink.as_ref()?;
        Some(self.running.get_or_init(|| self.start(sink)))
    }

    fn start(&self, sink: &Arc<dyn PayloadSink>) -> Running {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let receiver: SharedReceiver = Arc::new(AsyncMutex::new(rx));
        let overflow_ready = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let workers = (0..self.config.workers)
            .map(|index| {
                let worker = run_worker(
                    index,
                    Arc::clone(&receiver),
                    Arc::clone(sink),
                    self.notifier.clone(),
                );
                tokio::spawn(worker.instrument(info_span!("sync_worker", index)))
            })
            .collect();

        let drain = tokio::spawn(run_overflow_drain(
            Arc::clone(&self.store),
            tx.clone(),
            Arc::clone(&overflow_ready),
            self.notifier.clone(),
            self.config.overflow_poll(),
            cancel.clone(),
        )
        .instrument(info_span!("overflow_drain")));

        info!(
            workers = self.config.workers,
            capacity = self.config.queue_capacity,
            "sync pipeline started"
        );
        Running {
            queue: tx,
            overflow_ready,
            cancel,
            workers: Mutex::new(workers),
            drain: Mutex::new(Some(drain)),
        }
    }
}

fn take_lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Workers ──────────────────────────────────────────────────────────────────

async fn run_worker(
    index: usize,
    receiver: SharedReceiver,
    sink: Arc<dyn PayloadSink>,
    notifier: Notifier,
) {
    debug!(worker = index, "sync worker started");
    loop {
        let item = receiver.lock().await.recv().await;
        match item {
            Some(QueueItem::Payload(payload)) => {
                if payload.is_system_notice() {
                    notifier.notify(
                        Notification::new(NotificationKind::Sync)
                            .with("saved", false)
                            .with("message", format!("Skip: excluded peer {SYSTEM_NOTICES_PEER_ID}")),
                    );
                    continue;
                }
                sink.deliver(payload).await;
            }
            Some(QueueItem::Stop) | None => break,
        }
    }
    debug!(worker = index, "sync worker stopped");
}

// ── Overflow drain ───────────────────────────────────────────────────────────

enum DrainPass {
    /// Store is empty.
    Idle,
    /// A full batch moved; more may remain.
    More,
    /// The in-memory queue has no room.
    QueueFull,
    /// The queue is gone.
    Closed,
}

async fn run_overflow_drain(
    store: Arc<OverflowStore>,
    queue: mpsc::Sender<QueueItem>,
    overflow_ready: Arc<Notify>,
    notifier: Notifier,
    poll: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let pass = match drain_once(&store, &queue, &notifier).await {
            Ok(pass) => pass,
            Err(err) => {
                error!(%err, "overflow drain failed");
                DrainPass::Idle
            }
        };
        match pass {
            DrainPass::More => continue,
            DrainPass::Closed => return,
            DrainPass::QueueFull => {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(poll) => {}
                }
            }
            DrainPass::Idle => {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = overflow_ready.notified() => {}
                    () = tokio::time::sleep(poll) => {}
                }
            }
        }
    }
}

/// Move up to one batch of overflow entries into the queue, oldest first.
///
/// Each entry is deleted only after the queue has accepted it.
async fn drain_once(
    store: &OverflowStore,
    queue: &mpsc::Sender<QueueItem>,
    notifier: &Notifier,
) -> Result<DrainPass> {
    let entries = store.read_oldest(DRAIN_BATCH).await?;
    if entries.is_empty() {
        return Ok(DrainPass::Idle);
    }
    let full_batch = entries.len() >= DRAIN_BATCH as usize;

    for entry in entries {
        let payload = match entry.decode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(id = entry.id, %err, "discarding corrupt overflow entry");
                notifier.error(format!("Dropped corrupt queued payload {}", entry.id));
                store.delete(entry.id).await?;
                continue;
            }
        };
        match queue.try_reserve() {
            Ok(permit) => {
                permit.send(QueueItem::Payload(payload));
                store.delete(entry.id).await?;
            }
            Err(TrySendError::Full(())) => return Ok(DrainPass::QueueFull),
            Err(TrySendError::Closed(())) => return Ok(DrainPass::Closed),
        }
    }

    Ok(if full_batch { DrainPass::More } else { DrainPass::Idle })
}
