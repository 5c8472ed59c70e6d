//! Codec module - serialization/deserialization for frame bodies.
//!
//! Bodies are JSON documents. [`JsonCodec`] is a marker struct with static
//! methods, so call sites pick the codec at compile time.
//!
//! # Example
//!
//! ```
//! use ferry::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&("hello", 3)).unwrap();
//! let decoded: (String, i64) = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, ("hello".to_string(), 3));
//! ```

mod json;

pub use json::JsonCodec;
