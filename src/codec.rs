//! Newline-delimited JSON framing.
//!
//! One frame = one compact JSON object + `\n`. serde_json never emits a
//! raw newline in compact output, so the delimiter is unambiguous.
//!
//! Decoding runs over an accumulating buffer (`LinesCodec`), so a read
//! may carry half a frame or several frames.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::{FrameError, ProtocolError};
use crate::schema::{Frame, WorkerMessage};
use crate::util;

/// Default upper bound for a single frame, in bytes.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// Codec turning a byte stream into `Frame`s and back.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    lines: LinesCodec,
    max_frame: usize,
}

impl FrameCodec {
    /// `max_frame` bounds the decoded line length (delimiter excluded).
    pub fn new(max_frame: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame),
            max_frame,
        }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    fn map_lines_err(&self, err: LinesCodecError) -> FrameError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLong {
                max: self.max_frame,
            }
            .into(),
            // LinesCodec reports bad UTF-8 as InvalidData
            LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                ProtocolError::InvalidUtf8.into()
            }
            LinesCodecError::Io(e) => FrameError::Io(e),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

/// Empty line written by an otherwise silent worker so the mothership's
/// idle timer sees traffic. Decoders skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat;

/// Wrap a message into a frame stamped with the current time.
pub fn frame(message: WorkerMessage) -> Frame {
    Frame {
        sent_at: util::now_ms(),
        message,
    }
}

/// Decode one line (without its delimiter) into a frame.
pub fn decode_frame(line: &str) -> Result<Frame, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

/// Encode one frame as a compact JSON line (without its delimiter).
pub fn encode_frame(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.lines.decode(src) {
                // keep-alive blank lines carry nothing
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(decode_frame(&line)?)),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.map_lines_err(e)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(decode_frame(&line)?)),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.map_lines_err(e)),
            }
        }
    }
}

impl<'a> Encoder<&'a Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &'a Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let line = encode_frame(item)?;
        if line.len() > self.max_frame {
            return Err(ProtocolError::FrameTooLong {
                max: self.max_frame,
            }
            .into());
        }
        self.lines
            .encode(line.as_str(), dst)
            .map_err(|e| self.map_lines_err(e))
    }
}

impl Encoder<Heartbeat> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, _item: Heartbeat, dst: &mut BytesMut) -> Result<(), FrameError> {
        self.lines
            .encode("", dst)
            .map_err(|e| self.map_lines_err(e))
    }
}
