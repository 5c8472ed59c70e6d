//! Protocol module - wire format, framing, and body envelopes.
//!
//! This module implements the binary protocol:
//! - 19-byte header encoding/decoding
//! - Frame reading with exact-length bodies
//! - JSON request/response envelopes

mod envelope;
mod frame;
mod wire_format;

pub use envelope::{codes, RawRequest, RawResponse, Request, Response};
pub use frame::{encode_frame, read_frame, FrameReader, Message, READ_BUFFER_SIZE};
pub use wire_format::{
    decode_header, encode_header, CompressKind, Header, MessageKind, DEFAULT_MAX_BODY_SIZE,
    HEADER_SIZE, PROTOCOL_VERSION,
};
