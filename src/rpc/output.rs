//! Batched output channel for responses and notifications.
//!
//! Producers never block: lines are handed to a bounded queue drained by a
//! dedicated writer thread. When the queue is full the line is dropped and
//! counted. The writer flushes every [`FLUSH_LINES`] lines or after
//! [`FLUSH_INTERVAL`] of inactivity, whichever comes first.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::notify::LineSink;
use crate::{AppError, Result};

/// Lines written before a forced flush.
pub const FLUSH_LINES: usize = 100;

/// Maximum time a written line waits for a flush.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

enum Frame {
    Line(String),
    Close,
}

/// Non-blocking line writer backed by a dedicated thread.
pub struct OutputChannel {
    tx: SyncSender<Frame>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl OutputChannel {
    /// Spawn the writer thread over `writer`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the thread cannot be spawned.
    pub fn spawn<W>(writer: W, capacity: usize) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let worker = std::thread::Builder::new()
            .name("rpc-output".into())
            .spawn(move || run_writer(writer, &rx))
            .map_err(|err| AppError::Io(format!("failed to spawn output thread: {err}")))?;
        Ok(Self {
            tx,
            worker: Mutex::new(Some(worker)),
            dropped: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    /// Writer over the process's standard output.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the thread cannot be spawned.
    pub fn stdout(capacity: usize) -> Result<Self> {
        Self::spawn(std::io::stdout(), capacity)
    }

    /// Lines discarded because the queue was full or already closed.
    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flush everything queued so far and stop the writer thread.
    ///
    /// Lines submitted after this call are dropped. Calling it twice is a
    /// no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Blocking send: the writer is still draining, so space frees up.
        if self.tx.send(Frame::Close).is_err() {
            debug!("output writer already stopped");
        }
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("output writer thread panicked");
            }
        }
        let dropped = self.dropped_lines();
        if dropped > 0 {
            warn!(dropped, "output lines dropped under back-pressure");
        }
    }
}

impl LineSink for OutputChannel {
    fn write_line(&self, line: String) {
        if self.closed.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.tx.try_send(Frame::Line(line)) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for OutputChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_writer<W: Write>(mut out: W, rx: &Receiver<Frame>) {
    let mut batch: Vec<String> = Vec::with_capacity(FLUSH_LINES);
    let mut last_flush = Instant::now();
    loop {
        match rx.recv_timeout(FLUSH_INTERVAL) {
            Ok(Frame::Line(line)) => {
                batch.push(line);
                if batch.len() >= FLUSH_LINES || last_flush.elapsed() >= FLUSH_INTERVAL {
                    flush_batch(&mut out, &mut batch);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !batch.is_empty() {
                    flush_batch(&mut out, &mut batch);
                }
                last_flush = Instant::now();
            }
            Ok(Frame::Close) | Err(RecvTimeoutError::Disconnected) => {
                flush_batch(&mut out, &mut batch);
                return;
            }
        }
    }
}

fn flush_batch<W: Write>(out: &mut W, batch: &mut Vec<String>) {
    for line in batch.drain(..) {
        if let Err(err) = out
            .write_all(line.as_bytes())
            .and_then(|()| out.write_all(b"\n"))
        {
            warn!(%err, "failed to write output line");
        }
    }
    if let Err(err) = out.flush() {
        warn!(%err, "failed to flush output");
    }
}
