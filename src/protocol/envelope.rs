//! JSON envelopes carried in frame bodies.
//!
//! Requests are `{"path", "method", "args"}` and responses are
//! `{"code", "error", "result"}`. The `Raw*` variants keep every argument or
//! result as an undecoded JSON fragment so the receiver can type each one
//! against the method's declared signature.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use super::frame::Message;
use super::wire_format::{Header, MessageKind};
use crate::codec::JsonCodec;
use crate::error::{FerryError, Result};

/// Response codes carried in [`Response::code`].
pub mod codes {
    /// Success.
    pub const OK: u32 = 0;
    /// No service registered under the request path.
    pub const SERVICE_NOT_FOUND: u32 = 1;
    /// Service has no such method.
    pub const METHOD_NOT_FOUND: u32 = 2;
    /// Argument count differs from the method's inputs.
    pub const ARGUMENT_COUNT: u32 = 3;
    /// An argument does not decode into its declared type.
    pub const ARGUMENT_DECODE: u32 = 4;
    /// The request body could not be decoded at all.
    pub const BAD_REQUEST: u32 = 5;
    /// The method's results could not be encoded.
    pub const RESULT_ENCODE: u32 = 6;
    /// The method panicked or was cancelled before returning.
    pub const HANDLER_FAILURE: u32 = 7;
}

/// Outgoing call payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Service name.
    pub path: String,
    /// Method name.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

/// Incoming call payload with undecoded arguments.
#[derive(Debug, Deserialize)]
pub struct RawRequest {
    /// Service name.
    pub path: String,
    /// Method name.
    pub method: String,
    /// Positional arguments as raw JSON fragments.
    #[serde(default)]
    pub args: Vec<Box<RawValue>>,
}

/// Outgoing result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `codes::OK` on success.
    pub code: u32,
    /// Empty on success.
    pub error: String,
    /// Every value the method returned, trailing error included.
    pub result: Vec<Value>,
}

impl Response {
    /// Successful response carrying `result`.
    pub fn success(result: Vec<Value>) -> Self {
        Self {
            code: codes::OK,
            error: String::new(),
            result,
        }
    }

    /// Failure response built from a dispatch error.
    pub fn failure(err: &FerryError) -> Self {
        Self {
            code: err.code(),
            error: err.to_string(),
            result: Vec::new(),
        }
    }
}

/// Incoming result payload with undecoded results.
#[derive(Debug, Deserialize)]
pub struct RawResponse {
    /// Response code.
    #[serde(default)]
    pub code: u32,
    /// Error text, empty on success.
    #[serde(default)]
    pub error: String,
    /// Results as raw JSON fragments.
    #[serde(default)]
    pub result: Vec<Box<RawValue>>,
}

impl RawResponse {
    /// True when the callee reported a failure.
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

impl Message {
    /// Build a request frame for `request` under `seq`.
    pub fn from_request(seq: u64, request: &Request) -> Result<Self> {
        let body = JsonCodec::encode(request)?;
        Ok(Self::new(Header::request(seq, body_len(&body)?), body))
    }

    /// Build the response frame answering `request_header`.
    pub fn from_response(request_header: &Header, response: &Response) -> Result<Self> {
        let body = JsonCodec::encode(response)?;
        Ok(Self::new(
            Header::response_to(request_header, body_len(&body)?),
            body,
        ))
    }

    /// Decode the body as a request.
    pub fn decode_request(&self) -> Result<RawRequest> {
        self.expect_body(MessageKind::Request)?;
        JsonCodec::decode(&self.body)
    }

    /// Decode the body as a response.
    pub fn decode_response(&self) -> Result<RawResponse> {
        self.expect_body(MessageKind::Response)?;
        JsonCodec::decode(&self.body)
    }

    fn expect_body(&self, kind: MessageKind) -> Result<()> {
        if self.header.kind != kind {
            return Err(FerryError::Protocol(format!(
                "expected {:?} message, got {:?}",
                kind, self.header.kind
            )));
        }
        if self.body.is_empty() {
            return Err(FerryError::Protocol("empty message body".to_string()));
        }
        Ok(())
    }
}

fn body_len(body: &Bytes) -> Result<u32> {
    u32::try_from(body.len())
        .map_err(|_| FerryError::Protocol(format!("body of {} bytes too large", body.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = Request {
            path: "Student".to_string(),
            method: "Register".to_string(),
            args: vec![json!("leo"), json!(18)],
        };
        let msg = Message::from_request(1, &request).unwrap();

        assert_eq!(
            &msg.body[..],
            br#"{"path":"Student","method":"Register","args":["leo",18]}"#
        );
        assert_eq!(msg.header.body_len as usize, msg.body.len());
        assert_eq!(msg.header.kind, MessageKind::Request);
    }

    #[test]
    fn test_decode_request_keeps_raw_args() {
        let request = Request {
            path: "Arith".to_string(),
            method: "Add".to_string(),
            args: vec![json!(3), json!({"a": [1, 2]})],
        };
        let msg = Message::from_request(9, &request).unwrap();
        let raw = msg.decode_request().unwrap();

        assert_eq!(raw.path, "Arith");
        assert_eq!(raw.method, "Add");
        assert_eq!(raw.args.len(), 2);
        assert_eq!(raw.args[0].get(), "3");
        assert_eq!(raw.args[1].get(), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_response_echoes_header() {
        let request = Message::from_request(
            4,
            &Request {
                path: "Arith".to_string(),
                method: "Add".to_string(),
                args: vec![],
            },
        )
        .unwrap();
        let msg =
            Message::from_response(&request.header, &Response::success(vec![json!(8), Value::Null]))
                .unwrap();

        assert_eq!(msg.seq(), 4);
        assert_eq!(&msg.body[..], br#"{"code":0,"error":"","result":[8,null]}"#);

        let raw = msg.decode_response().unwrap();
        assert!(!raw.is_error());
        assert_eq!(raw.result[0].get(), "8");
        assert_eq!(raw.result[1].get(), "null");
    }

    #[test]
    fn test_decode_wrong_kind_fails() {
        let msg = Message::from_request(
            1,
            &Request {
                path: "A".to_string(),
                method: "B".to_string(),
                args: vec![],
            },
        )
        .unwrap();
        assert!(msg.decode_response().is_err());
    }

    #[test]
    fn test_decode_empty_body_fails() {
        let msg = Message::new(Header::request(1, 0), Bytes::new());
        let err = msg.decode_request().unwrap_err();
        assert!(err.to_string().contains("empty message body"));
    }

    #[test]
    fn test_decode_bad_json_fails() {
        let msg = Message::new(Header::request(1, 3), Bytes::from_static(b"{{{"));
        assert!(matches!(msg.decode_request(), Err(FerryError::Json(_))));
    }

    #[test]
    fn test_failure_response_carries_code() {
        let resp = Response::failure(&FerryError::ServiceNotFound("Nope".to_string()));
        assert_eq!(resp.code, codes::SERVICE_NOT_FOUND);
        assert_eq!(resp.error, "can't find service: Nope");
        assert!(resp.result.is_empty());
    }
}
