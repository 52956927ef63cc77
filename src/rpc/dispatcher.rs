//! Request dispatcher.
//!
//! Reads newline-delimited requests through [`FramedRead`] backed by
//! [`RpcCodec`] and runs each one as its own task, so a slow method never
//! delays unrelated requests. A [`Semaphore`] caps how many handlers run at
//! once; requests beyond the cap wait for a permit. Responses are written
//! to the shared [`LineSink`] in completion order.
//!
//! Handler panics are caught and reported as an internal error for that
//! request only.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notify::LineSink;
use crate::rpc::codec::{InboundFrame, RpcCodec, MAX_LINE_BYTES};
use crate::rpc::protocol::{
    RpcRequest, RpcResponse, INTERNAL_ERROR, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::{AppError, Result};

// ── Handler seam ─────────────────────────────────────────────────────────────

/// Failure of a single method call.
#[derive(Debug)]
pub enum CallError {
    /// No method with this name.
    MethodNotFound(String),
    /// The method ran and failed.
    Failed(AppError),
}

impl From<AppError> for CallError {
    fn from(err: AppError) -> Self {
        Self::Failed(err)
    }
}

/// Method table invoked by the dispatcher.
pub trait RpcHandler: Send + Sync + 'static {
    /// Execute `method` with `params`.
    fn call(&self, method: String, params: Value) -> BoxFuture<'_, std::result::Result<Value, CallError>>;
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// Counters reported when the input stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Requests that parsed and were handed to the method table.
    pub accepted: u64,
    /// Lines answered with a parse or invalid-request error.
    pub rejected: u64,
}

/// Concurrent JSON-RPC dispatcher.
pub struct Dispatcher {
    handler: Arc<dyn RpcHandler>,
    output: Arc<dyn LineSink>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher allowing `max_concurrent` handlers at once.
    #[must_use]
    pub fn new(handler: Arc<dyn RpcHandler>, output: Arc<dyn LineSink>, max_concurrent: usize) -> Self {
        Self {
            handler,
            output,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Serve requests from `input` until end of stream or `cancel` fires.
    ///
    /// Requests already accepted are allowed to finish and write their
    /// responses before this returns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if reading the input stream fails.
    pub async fn serve<R>(&self, input: R, cancel: CancellationToken) -> Result<DispatchSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(input, RpcCodec::new());
        let mut in_flight = JoinSet::new();
        let mut summary = DispatchSummary::default();
        let mut read_error = None;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("dispatcher cancelled, no longer reading input");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(&joined);
                }
                frame = frames.next() => {
                    let line = match frame {
                        None => {
                            info!("input stream closed");
                            break;
                        }
                        Some(Err(err)) => {
                            warn!(%err, "input stream failed");
                            read_error = Some(err);
                            break;
                        }
                        Some(Ok(InboundFrame::Line(line))) => line,
                        Some(Ok(InboundFrame::Oversized)) => {
                            summary.rejected += 1;
                            self.reject(format!("Parse error: line exceeds {MAX_LINE_BYTES} bytes"));
                            continue;
                        }
                        Some(Ok(InboundFrame::Malformed(reason))) => {
                            summary.rejected += 1;
                            self.reject(format!("Parse error: {reason}"));
                            continue;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match RpcRequest::parse(&line) {
                        Ok(request) => {
                            summary.accepted += 1;
                            self.spawn_request(&mut in_flight, request);
                        }
                        Err(response) => {
                            summary.rejected += 1;
                            debug!(code = ?response.error_code(), "rejected request line");
                            self.output.write_line(response.to_line());
                        }
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            log_join(&joined);
        }
        debug!(accepted = summary.accepted, rejected = summary.rejected, "dispatcher drained");

        match read_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    fn reject(&self, message: String) {
        self.output
            .write_line(RpcResponse::error(Value::Null, PARSE_ERROR, message).to_line());
    }

    fn spawn_request(&self, in_flight: &mut JoinSet<()>, request: RpcRequest) {
        let handler = Arc::clone(&self.handler);
        let output = Arc::clone(&self.output);
        let permits = Arc::clone(&self.permits);
        in_flight.spawn(async move {
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let response = execute(handler.as_ref(), request).await;
            output.write_line(response.to_line());
        });
    }
}

/// Run one request to a response, converting panics into internal errors.
pub async fn execute(handler: &dyn RpcHandler, mut request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let params = request.params_or_empty();
    let method = request.method;
    debug!(%method, "dispatching request");

    let call = AssertUnwindSafe(handler.call(method.clone(), params)).catch_unwind();
    match call.await {
        Ok(Ok(result)) => RpcResponse::result(id, result),
        Ok(Err(CallError::MethodNotFound(name))) => {
            RpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {name}"))
        }
        Ok(Err(CallError::Failed(err))) => {
            debug!(%method, %err, "request failed");
            let message = if matches!(err, AppError::InvalidParams(_)) {
                err.to_string()
            } else {
                err.message().to_owned()
            };
            RpcResponse::error(id, INTERNAL_ERROR, message)
        }
        Err(_) => {
            warn!(%method, "request handler panicked");
            RpcResponse::error(id, INTERNAL_ERROR, format!("internal error while handling {method}"))
        }
    }
}

fn log_join(joined: &std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        warn!(%err, "request task ended abnormally");
    }
}
