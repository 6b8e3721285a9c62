//! NDJSON codec for the agent's stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! agent that never emits a newline cannot grow the read buffer without bound.
//! The codec owns the partial-line buffering: bytes after the last `\n` stay
//! in the `BytesMut` until the next read completes the line, so a line is
//! never handed to the JSON parser before its terminator has arrived.

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::{AppError, Result};

/// Maximum line length accepted from the agent: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One decoded unit of the agent's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, without its terminator.
    Line(String),
    /// A line that was consumed but could not be used (too long, not UTF-8).
    Rejected(String),
}

/// Line codec for agent traffic.
///
/// Failures that only affect one line are yielded as [`Frame::Rejected`]
/// rather than as errors: `FramedRead` ends the stream once after a decoder
/// error, which the reader would mistake for EOF. Only genuine I/O failures
/// surface as [`AppError::Io`].
#[derive(Debug)]
pub struct AgentCodec(LinesCodec);

impl AgentCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }
}

impl Default for AgentCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AgentCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode(src) {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(e) => map_codec_error(e).map(Some),
        }
    }

    /// At EOF an unterminated trailing fragment is discarded, never parsed.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "agent codec: discarding unterminated fragment at EOF");
            src.clear();
        }
        Ok(None)
    }
}

fn map_codec_error(e: LinesCodecError) -> Result<Frame> {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            Ok(Frame::Rejected(format!("line too long: exceeded {MAX_LINE_BYTES} bytes")))
        }
        // LinesCodec consumes the line before validating UTF-8.
        LinesCodecError::Io(io_err) if io_err.kind() == ErrorKind::InvalidData => {
            Ok(Frame::Rejected(format!("line is not valid utf-8: {io_err}")))
        }
        LinesCodecError::Io(io_err) => Err(AppError::Io(io_err.to_string())),
    }
}
