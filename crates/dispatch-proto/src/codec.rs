//! Newline-delimited frame codec.
//!
//! Inbound, bytes are buffered until a `\n` arrives; the line is stripped of
//! trailing whitespace and empty lines are skipped. A frame boundary may
//! fall anywhere inside a read chunk. Outbound, a message is serialized to
//! compact JSON (which never contains a raw newline) and terminated with
//! exactly one `\n`.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{DecodeError, EncodeError, FramingError, SendError};
use crate::message::Message;

/// Default longest accepted frame, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Incremental line splitter over an append-only byte buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    /// A decoder rejecting frames longer than `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_frame_len: max_frame_len.max(1),
            discarding: false,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes held that do not yet form a complete line.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any incomplete line. Returns how many bytes were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        self.discarding = false;
        dropped
    }

    /// The next complete, non-empty line.
    ///
    /// `None` means more bytes are needed. A line that grows past the limit
    /// yields one [`FramingError::Oversized`] and is skipped up to its
    /// terminating newline.
    pub fn next_line(&mut self) -> Option<Result<String, FramingError>> {
        loop {
            let Some(newline) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.discarding {
                    self.buf.clear();
                } else if self.buf.len() > self.max_frame_len {
                    let len = self.buf.len();
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Err(self.oversized(len)));
                }
                return None;
            };

            let frame = self.buf.split_to(newline.saturating_add(1));
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let body = frame.get(..newline).unwrap_or_default();
            if body.len() > self.max_frame_len {
                return Some(Err(self.oversized(body.len())));
            }
            let text = match std::str::from_utf8(body) {
                Ok(text) => text,
                Err(_utf8) => {
                    return Some(Err(FramingError::InvalidUtf8 {
                        raw: String::from_utf8_lossy(body).into_owned(),
                    }));
                }
            };
            let line = text.trim_end();
            if line.is_empty() {
                continue;
            }
            return Some(Ok(line.to_owned()));
        }
    }

    /// The next complete line parsed as structured text.
    pub fn next_frame(&mut self) -> Option<Result<Value, FramingError>> {
        self.next_line()
            .map(|line| line.and_then(|line| parse_frame(&line)))
    }

    /// The next complete line decoded as a [`Message`].
    pub fn next_message(&mut self) -> Option<Result<Message, DecodeError>> {
        self.next_line().map(|line| decode_line(&line?))
    }

    const fn oversized(&self, len: usize) -> FramingError {
        FramingError::Oversized {
            len,
            limit: self.max_frame_len,
        }
    }
}

/// Parse one line as JSON.
pub fn parse_frame(line: &str) -> Result<Value, FramingError> {
    serde_json::from_str(line).map_err(|err| FramingError::Malformed {
        raw: line.to_owned(),
        reason: err.to_string(),
    })
}

/// Parse and interpret one line.
pub fn decode_line(line: &str) -> Result<Message, DecodeError> {
    Ok(Message::from_value(parse_frame(line)?)?)
}

/// Serialize `message` as one newline-terminated frame.
pub fn encode_line(message: &Message) -> Result<Bytes, EncodeError> {
    let mut writer = BytesMut::with_capacity(256).writer();
    serde_json::to_writer(&mut writer, message)?;
    let mut buf = writer.into_inner();
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Serialize `message` without the terminator, for message-oriented
/// transports such as WebSocket text frames.
pub fn encode_text(message: &Message) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(message)?)
}

/// Reads frames from an async byte stream.
#[derive(Debug)]
pub struct FramedReader<R> {
    inner: R,
    decoder: FrameDecoder,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Wrap `inner` with a decoder limited to `max_frame_len` bytes.
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(max_frame_len),
            eof: false,
        }
    }

    /// The next line. `Ok(None)` is end of stream; an incomplete final line
    /// is dropped. I/O errors are returned as `Err`, framing errors inside
    /// `Ok(Some(Err(..)))` so the caller can keep reading.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Result<String, FramingError>>> {
        loop {
            if let Some(line) = self.decoder.next_line() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }
            self.decoder.buf.reserve(READ_CHUNK);
            let read = self.inner.read_buf(&mut self.decoder.buf).await?;
            if read == 0 {
                self.eof = true;
                let dropped = self.decoder.clear();
                if dropped > 0 {
                    debug!(bytes = dropped, "Incomplete frame dropped at end of stream");
                }
            }
        }
    }

    /// The next line decoded as a [`Message`].
    pub async fn next_message(&mut self) -> std::io::Result<Option<Result<Message, DecodeError>>> {
        Ok(self
            .next_line()
            .await?
            .map(|line| line.map_err(DecodeError::from).and_then(|l| decode_line(&l))))
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes frames to an async byte stream.
#[derive(Debug)]
pub struct FramedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    /// Wrap `inner`.
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode and write one message, then flush.
    pub async fn send(&mut self, message: &Message) -> Result<(), SendError> {
        let frame = encode_line(message)?;
        self.send_frame(&frame).await
    }

    /// Write an already encoded, newline-terminated frame, then flush.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<(), SendError> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}
