//! Crash-safe sync pipeline.
//!
//! Payloads enter a bounded in-memory queue drained by a fixed pool of
//! workers. When the queue is full, payloads go to the `SQLite` overflow
//! store and a background loop feeds them back as capacity frees up.

pub mod pipeline;

use futures_util::future::BoxFuture;

use crate::models::payload::SyncPayload;

pub use pipeline::{EnqueueOutcome, SyncPipeline};

/// Final destination of queued payloads.
///
/// Implementations report their own delivery outcomes; the pipeline only
/// guarantees each payload is handed over once per process lifetime.
pub trait PayloadSink: Send + Sync + 'static {
    /// Deliver one payload.
    fn deliver(&self, payload: SyncPayload) -> BoxFuture<'_, ()>;
}
