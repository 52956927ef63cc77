//! Newline codec for the inbound request stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving front-end cannot make the dispatcher buffer without bound.
//! Over-long and non-UTF-8 lines are surfaced as frames rather than errors,
//! so the stream keeps going and the dispatcher can answer each one with a
//! parse error.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted request line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A complete line without its terminator.
    Line(String),
    /// A line exceeded [`MAX_LINE_BYTES`]; its bytes were discarded.
    Oversized,
    /// A line was not valid UTF-8.
    Malformed(String),
}

/// Request-stream codec.
#[derive(Debug)]
pub struct RpcCodec(LinesCodec);

impl RpcCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = InboundFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_result(self.0.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_result(self.0.decode_eof(src))
    }
}

fn map_result(
    result: std::result::Result<Option<String>, LinesCodecError>,
) -> Result<Option<InboundFrame>> {
    match result {
        Ok(line) => Ok(line.map(InboundFrame::Line)),
        // LinesCodec keeps discarding until the next newline on its own.
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(InboundFrame::Oversized)),
        Err(LinesCodecError::Io(err)) if err.kind() == std::io::ErrorKind::InvalidData => {
            Ok(Some(InboundFrame::Malformed(err.to_string())))
        }
        Err(LinesCodecError::Io(err)) => Err(AppError::Io(err.to_string())),
    }
}
