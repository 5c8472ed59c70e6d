//! Frame type and stream framing.
//!
//! A [`Message`] is one header plus exactly `body_len` bytes of body.
//! [`read_frame`] pulls one message off an async byte stream and
//! [`encode_frame`] produces the bytes for one.
//!
//! # Example
//!
//! ```
//! use ferry::protocol::{encode_frame, Header, Message};
//! use bytes::Bytes;
//!
//! let msg = Message::new(Header::request(1, 2), Bytes::from_static(b"{}"));
//! let bytes = encode_frame(&msg);
//! assert_eq!(bytes.len(), 19 + 2);
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use super::wire_format::{Header, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use crate::error::{FerryError, Result};

/// Read buffer size for [`FrameReader`].
pub const READ_BUFFER_SIZE: usize = 1024;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Decoded header.
    pub header: Header,
    /// Body bytes.
    pub body: Bytes,
}

impl Message {
    /// Create a new message from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Get the sequence id.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Build a complete frame as a single byte vector.
///
/// The header's `body_len` is written as-is; callers keep it equal to the body length.
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + message.body.len());
    buf.extend_from_slice(&message.header.encode());
    buf.extend_from_slice(&message.body);
    buf
}

/// Read exactly one frame from `reader`.
///
/// Returns [`FerryError::ConnectionClosed`] if the stream ends before the first
/// header byte, and an `UnexpectedEof` I/O error if it ends anywhere after that.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    read_frame_limited(reader, DEFAULT_MAX_BODY_SIZE).await
}

async fn read_frame_limited<R>(reader: &mut R, max_body_size: u32) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_SIZE];
    match fill(reader, &mut head).await? {
        0 => return Err(FerryError::ConnectionClosed),
        HEADER_SIZE => {}
        got => return Err(truncated("header", got, HEADER_SIZE)),
    }

    let header = Header::decode(&head)?;
    if header.body_len > max_body_size {
        return Err(FerryError::Protocol(format!(
            "Body size {} exceeds maximum {}",
            header.body_len, max_body_size
        )));
    }

    let mut body = vec![0u8; header.body_len as usize];
    let got = fill(reader, &mut body).await?;
    if got < body.len() {
        return Err(truncated("body", got, body.len()));
    }

    Ok(Message::new(header, Bytes::from(body)))
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn truncated(part: &str, got: usize, want: usize) -> FerryError {
    FerryError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("stream ended inside frame {} ({}/{} bytes)", part, got, want),
    ))
}

/// Buffered frame reader owning the read half of a connection.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_body_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `reader` with the default body limit.
    pub fn new(reader: R) -> Self {
        Self::with_max_body(reader, DEFAULT_MAX_BODY_SIZE)
    }

    /// Wrap `reader` rejecting bodies larger than `max_body_size`.
    pub fn with_max_body(reader: R, max_body_size: u32) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            max_body_size,
        }
    }

    /// Read the next frame. See [`read_frame`] for end-of-stream semantics.
    pub async fn read_frame(&mut self) -> Result<Message> {
        read_frame_limited(&mut self.inner, self.max_body_size).await
    }
}
