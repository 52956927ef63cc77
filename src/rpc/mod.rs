//! Line-delimited JSON-RPC 2.0 surface exposed to the front-end.
//!
//! - `codec`: newline framing with a per-line size limit.
//! - `protocol`: request/response envelopes and error codes.
//! - `output`: batched, non-blocking writer thread for outbound lines.
//! - `dispatcher`: concurrent request execution under a permit ceiling.
//! - `methods`: the bridge's method table.

pub mod codec;
pub mod dispatcher;
pub mod methods;
pub mod output;
pub mod protocol;
