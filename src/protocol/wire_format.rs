//! Wire format encoding and decoding.
//!
//! Implements the 19-byte header format:
//! ```text
//! ┌─────────┬──────┬──────────┬──────────┬───────────┬──────────┐
//! │ Version │ Kind │ Compress │ Seq ID   │ Extension │ Length   │
//! │ 1 byte  │1 byte│ 1 byte   │ 8 bytes  │ 4 bytes   │ 4 bytes  │
//! │         │      │          │ uint64 BE│ uint32 BE │ uint32 BE│
//! └─────────┴──────┴──────────┴──────────┴───────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{FerryError, Result};

/// Header size in bytes (fixed, exactly 19).
pub const HEADER_SIZE: usize = 19;

/// Protocol version written by this crate.
pub const PROTOCOL_VERSION: u8 = 0;

/// Default maximum body size accepted by a reader (64 MiB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

/// What a frame carries.
///
/// Bytes other than 0 and 1 decode to [`MessageKind::Reserved`] so a reader
/// can skip the frame instead of failing the whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Caller to callee.
    Request,
    /// Callee to caller.
    Response,
    /// Any other kind byte.
    Reserved(u8),
}

impl From<u8> for MessageKind {
    fn from(value: u8) -> Self {
        match value {
            0 => MessageKind::Request,
            1 => MessageKind::Response,
            other => MessageKind::Reserved(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Request => 0,
            MessageKind::Response => 1,
            MessageKind::Reserved(byte) => byte,
        }
    }
}

/// Body compression. Only `None` is produced; other bytes are carried through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressKind {
    /// Body is sent as-is.
    #[default]
    None,
    /// A compression byte this crate does not implement.
    Reserved(u8),
}

impl From<u8> for CompressKind {
    fn from(value: u8) -> Self {
        match value {
            0 => CompressKind::None,
            other => CompressKind::Reserved(other),
        }
    }
}

impl From<CompressKind> for u8 {
    fn from(compress: CompressKind) -> Self {
        match compress {
            CompressKind::None => 0,
            CompressKind::Reserved(byte) => byte,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Request or response.
    pub kind: MessageKind,
    /// Body compression.
    pub compress: CompressKind,
    /// Caller-assigned correlation id.
    pub seq: u64,
    /// Reserved, currently always 0 on send and ignored on receive.
    pub extension: u32,
    /// Body length in bytes.
    pub body_len: u32,
}

impl Header {
    /// Header for a request frame.
    pub fn request(seq: u64, body_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind: MessageKind::Request,
            compress: CompressKind::None,
            seq,
            extension: 0,
            body_len,
        }
    }

    /// Header for the response to `request`, echoing its version, compression and seq.
    pub fn response_to(request: &Header, body_len: u32) -> Self {
        Self {
            version: request.version,
            kind: MessageKind::Response,
            compress: request.compress,
            seq: request.seq,
            extension: 0,
            body_len,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use ferry::protocol::Header;
    ///
    /// let header = Header::request(42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 19);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1] = self.kind.into();
        buf[2] = self.compress.into();
        buf[3..11].copy_from_slice(&self.seq.to_be_bytes());
        buf[11..15].copy_from_slice(&self.extension.to_be_bytes());
        buf[15..19].copy_from_slice(&self.body_len.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Fails only if the buffer is shorter than [`HEADER_SIZE`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(FerryError::Protocol(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let mut seq = [0u8; 8];
        seq.copy_from_slice(&buf[3..11]);

        Ok(Self {
            version: buf[0],
            kind: MessageKind::from(buf[1]),
            compress: CompressKind::from(buf[2]),
            seq: u64::from_be_bytes(seq),
            extension: u32::from_be_bytes([buf[11], buf[12], buf[13], buf[14]]),
            body_len: u32::from_be_bytes([buf[15], buf[16], buf[17], buf[18]]),
        })
    }

    /// Check if this is a request.
    #[inline]
    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Result<Header> {
    Header::decode(buf)
}
