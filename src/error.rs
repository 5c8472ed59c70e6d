//! Error types for ferry.

use thiserror::Error;

/// Main error type for all ferry operations.
#[derive(Debug, Error)]
pub enum FerryError {
    /// I/O error on the underlying stream, propagated verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (short header, unknown kind, wrong kind, empty body).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer closed the stream cleanly at a frame boundary.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The local side closed the client before the call completed.
    #[error("connection is shut down")]
    Shutdown,

    /// The peer closed the stream while calls were still outstanding.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A call exceeded its configured deadline.
    #[error("call {method} timed out")]
    Timeout {
        /// Method that timed out.
        method: String,
    },

    /// Method signature violates the error-like contract.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Service registration rejected.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// No service registered under the requested path.
    #[error("can't find service: {0}")]
    ServiceNotFound(String),

    /// The service has no method with that name.
    #[error("can't find method: {service}.{method}")]
    MethodNotFound {
        /// Service path.
        service: String,
        /// Method name.
        method: String,
    },

    /// Argument count does not match the declared inputs.
    #[error("method args count unequal, demand {expected} have {actual}")]
    ArgumentCount {
        /// Declared input count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },

    /// An argument or result fragment did not match its declared type.
    #[error("value {index} does not decode: {reason}")]
    Decode {
        /// Position of the offending value.
        index: usize,
        /// What went wrong.
        reason: String,
    },

    /// Decoded arguments could not be converted into the handler's parameter types.
    #[error("arguments do not match handler parameters: {0}")]
    Arguments(String),

    /// A method's results could not be turned into JSON.
    #[error("result does not encode: {0}")]
    Encode(String),

    /// A method panicked or was cancelled before producing results.
    #[error("method {method} failed: {message}")]
    Handler {
        /// `Service.Method` that failed.
        method: String,
        /// Panic message or cancellation reason.
        message: String,
    },

    /// The remote side answered with an error response.
    #[error("remote error (code {code}): {message}")]
    Remote {
        /// Non-zero error code from the response.
        code: u32,
        /// Error text from the response.
        message: String,
    },
}

impl FerryError {
    /// Wire error code for dispatch failures. `0` for everything else.
    ///
    /// `Json` and `Protocol` only reach a response from request decoding;
    /// failures on the result path are reported as `Encode`.
    pub fn code(&self) -> u32 {
        use crate::protocol::codes;

        match self {
            FerryError::ServiceNotFound(_) => codes::SERVICE_NOT_FOUND,
            FerryError::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            FerryError::ArgumentCount { .. } => codes::ARGUMENT_COUNT,
            FerryError::Decode { .. } | FerryError::Arguments(_) => codes::ARGUMENT_DECODE,
            FerryError::Json(_) | FerryError::Protocol(_) => codes::BAD_REQUEST,
            FerryError::Encode(_) => codes::RESULT_ENCODE,
            FerryError::Handler { .. } => codes::HANDLER_FAILURE,
            FerryError::Remote { code, .. } => *code,
            _ => codes::OK,
        }
    }
}

/// Result type alias using FerryError.
pub type Result<T> = std::result::Result<T, FerryError>;
