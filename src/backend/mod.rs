//! Remote ingestion API client.
//!
//! The backend exposes two POST endpoints taking `{path, args}` bodies:
//! `/api/mutation` for writes and `/api/query` for reads. Responses may be
//! wrapped in a `{status, value}` envelope.

pub mod client;
pub mod ingest;

pub use client::{BackendClient, IngestOutcome};
pub use ingest::IngestSink;
