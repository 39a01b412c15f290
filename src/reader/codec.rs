//! Line framing for the log stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! writer that never emits a newline cannot grow the buffer without bound.
//! Lines that are too long or not valid UTF-8 are reported as
//! [`Line::Skipped`] and framing resumes at the next newline.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Why a line was dropped before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Longer than the configured maximum.
    TooLong,
    /// Not valid UTF-8.
    InvalidUtf8,
}

/// One framed unit of the log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete line without its `\n` / `\r\n` terminator.
    Text(String),
    /// A line that was discarded.
    Skipped(SkipReason),
}

/// Newline codec for child log output.
#[derive(Debug)]
pub struct LogLineCodec(LinesCodec);

impl LogLineCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }

    /// The configured line limit.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.0.max_length()
    }
}

impl Default for LogLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LogLineCodec {
    type Item = Line;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_decoded(self.0.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_decoded(self.0.decode_eof(src))
    }
}

fn map_decoded(
    decoded: std::result::Result<Option<String>, LinesCodecError>,
) -> Result<Option<Line>> {
    match decoded {
        Ok(line) => Ok(line.map(Line::Text)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Line::Skipped(SkipReason::TooLong))),
        Err(LinesCodecError::Io(err)) if err.kind() == std::io::ErrorKind::InvalidData => {
            Ok(Some(Line::Skipped(SkipReason::InvalidUtf8)))
        }
        Err(LinesCodecError::Io(err)) => Err(AppError::Io(err.to_string())),
    }
}

/// Reassembles lines from arbitrarily sized chunks.
///
/// Bytes after the last newline stay buffered until the next
/// [`push`](Self::push). [`finish`](Self::finish) flushes them when the writer
/// disconnects; [`clear`](Self::clear) drops them after a failed read.
#[derive(Debug)]
pub struct LineSplitter {
    codec: LogLineCodec,
    buf: BytesMut,
}

impl LineSplitter {
    /// Splitter with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(LogLineCodec::new())
    }

    /// Splitter around an explicit codec.
    #[must_use]
    pub fn with_codec(codec: LogLineCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::new(),
        }
    }

    /// Append raw bytes from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line, or `None` when only a partial line remains.
    pub fn next_line(&mut self) -> Option<Line> {
        // The underlying codec only reports I/O errors for UTF-8 failures,
        // which are mapped above; anything else ends this batch.
        self.codec.decode(&mut self.buf).ok().flatten()
    }

    /// Flush the unterminated tail once the writer has gone away.
    ///
    /// Yields any remaining complete lines first, then the tail as a final
    /// line. Returns `None` once the buffer is empty.
    pub fn finish(&mut self) -> Option<Line> {
        self.codec.decode_eof(&mut self.buf).ok().flatten()
    }

    /// Bytes waiting for a terminating newline.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial line and reset the framing state.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.codec = LogLineCodec::with_max_length(self.codec.max_length());
    }
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}
