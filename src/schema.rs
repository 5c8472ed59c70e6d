//! Method signatures and value descriptors.
//!
//! Both ends describe each method with an explicit [`MethodSignature`]: the
//! ordered input and output [`TypeDesc`]s. The last output must be error-like
//! ([`TypeDesc::Error`]). Descriptors drive how each JSON fragment is decoded:
//! arguments on the server, results on the client.
//!
//! # Example
//!
//! ```
//! use ferry::schema::{MethodSignature, TypeDesc};
//!
//! let add = MethodSignature::new(
//!     vec![TypeDesc::Int, TypeDesc::Int],
//!     vec![TypeDesc::Int, TypeDesc::Error],
//! );
//! assert!(add.validate().is_ok());
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use crate::error::{FerryError, Result};

/// Shape of one argument or result value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
    /// JSON boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Unsigned integer.
    Uint,
    /// Any JSON number.
    Float,
    /// JSON string.
    String,
    /// Homogeneous array.
    List(Box<TypeDesc>),
    /// JSON object.
    Map,
    /// Anything, passed through unchecked.
    Any,
    /// Value or null.
    Optional(Box<TypeDesc>),
    /// Error-like: null for "no failure", otherwise the failure message.
    Error,
}

impl TypeDesc {
    /// Whether this descriptor can carry "no failure" versus a failure.
    pub fn is_error_like(&self) -> bool {
        matches!(self, TypeDesc::Error)
    }

    /// Value a `null` fragment decodes to.
    pub fn zero(&self) -> Value {
        match self {
            TypeDesc::Bool => Value::Bool(false),
            TypeDesc::Int | TypeDesc::Uint => Value::from(0),
            TypeDesc::Float => Value::from(0.0),
            TypeDesc::String => Value::String(String::new()),
            TypeDesc::List(_) => Value::Array(Vec::new()),
            TypeDesc::Map => Value::Object(Map::new()),
            TypeDesc::Any | TypeDesc::Optional(_) | TypeDesc::Error => Value::Null,
        }
    }

    /// Parse a raw fragment and check it against this descriptor.
    pub fn decode(&self, raw: &RawValue) -> std::result::Result<Value, String> {
        let value: Value = serde_json::from_str(raw.get()).map_err(|e| e.to_string())?;
        self.conform(value)
    }

    /// Check an already-parsed value against this descriptor.
    pub fn conform(&self, value: Value) -> std::result::Result<Value, String> {
        if value.is_null() {
            return Ok(self.zero());
        }

        match (self, value) {
            (TypeDesc::Any, v) => Ok(v),
            (TypeDesc::Optional(inner), v) => inner.conform(v),
            (TypeDesc::Bool, v @ Value::Bool(_)) => Ok(v),
            (TypeDesc::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                if n.is_u64() && !n.is_i64() {
                    return Err(format!("{} overflows a signed integer", n));
                }
                Ok(Value::Number(n))
            }
            (TypeDesc::Uint, Value::Number(n)) if n.is_u64() => Ok(Value::Number(n)),
            (TypeDesc::Float, Value::Number(n)) => Ok(Value::Number(n)),
            (TypeDesc::String, v @ Value::String(_)) => Ok(v),
            (TypeDesc::Map, v @ Value::Object(_)) => Ok(v),
            (TypeDesc::List(elem), Value::Array(items)) => items
                .into_iter()
                .map(|item| elem.conform(item))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            (TypeDesc::Error, Value::String(s)) => Ok(Value::String(s)),
            (TypeDesc::Error, Value::Object(obj)) => {
                match obj.get("message").or_else(|| obj.get("error")) {
                    Some(Value::String(s)) => Ok(Value::String(s.clone())),
                    // An error value with no readable text still signals failure.
                    _ => Ok(Value::String(Value::Object(obj).to_string())),
                }
            }
            (desc, v) => Err(format!("expected {}, got {}", desc, v)),
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Bool => f.write_str("bool"),
            TypeDesc::Int => f.write_str("int"),
            TypeDesc::Uint => f.write_str("uint"),
            TypeDesc::Float => f.write_str("float"),
            TypeDesc::String => f.write_str("string"),
            TypeDesc::List(elem) => write!(f, "[]{}", elem),
            TypeDesc::Map => f.write_str("map"),
            TypeDesc::Any => f.write_str("any"),
            TypeDesc::Optional(inner) => write!(f, "*{}", inner),
            TypeDesc::Error => f.write_str("error"),
        }
    }
}

/// Ordered inputs and outputs of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    /// Argument descriptors.
    pub inputs: Vec<TypeDesc>,
    /// Result descriptors, last one error-like.
    pub outputs: Vec<TypeDesc>,
}

impl MethodSignature {
    /// Create a signature. Call [`validate`](Self::validate) before use.
    pub fn new(inputs: Vec<TypeDesc>, outputs: Vec<TypeDesc>) -> Self {
        Self { inputs, outputs }
    }

    /// Signature for a typed `A -> Result<T, RemoteError>` method.
    pub fn of<A: DescribeArgs, T: Describe>() -> Self {
        Self::new(A::describe_args(), vec![T::describe(), TypeDesc::Error])
    }

    /// Require at least one output and an error-like last output.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.outputs.last() {
            None => Err("has no outputs".to_string()),
            Some(last) if !last.is_error_like() => {
                Err(format!("last output is {}, must be error", last))
            }
            Some(_) => Ok(()),
        }
    }

    /// Decode `raw` fragments positionally against `descs`.
    pub fn decode_all(descs: &[TypeDesc], raw: &[Box<RawValue>]) -> Result<Vec<Value>> {
        if raw.len() != descs.len() {
            return Err(FerryError::ArgumentCount {
                expected: descs.len(),
                actual: raw.len(),
            });
        }

        descs
            .iter()
            .zip(raw)
            .enumerate()
            .map(|(index, (desc, fragment))| {
                desc.decode(fragment)
                    .map_err(|reason| FerryError::Decode { index, reason })
            })
            .collect()
    }
}

/// The error-like value carried over the wire.
///
/// Serializes as its message string. Deserializes from a string or an object
/// with a `message` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    message: String,
}

impl RemoteError {
    /// Create an error with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteError {}

impl Serialize for RemoteError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.message)
    }
}

impl<'de> Deserialize<'de> for RemoteError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Object { message: String },
        }

        match Repr::deserialize(deserializer) {
            Ok(Repr::Text(message)) | Ok(Repr::Object { message }) => Ok(Self { message }),
            Err(_) => Err(de::Error::custom("expected error string or {\"message\": ..}")),
        }
    }
}

/// Rust types with a fixed [`TypeDesc`].
pub trait Describe {
    /// Descriptor for `Self`.
    fn describe() -> TypeDesc;
}

macro_rules! describe_as {
    ($desc:expr => $($ty:ty),+) => {
        $(impl Describe for $ty {
            fn describe() -> TypeDesc {
                $desc
            }
        })+
    };
}

describe_as!(TypeDesc::Bool => bool);
describe_as!(TypeDesc::Int => i8, i16, i32, i64, isize);
describe_as!(TypeDesc::Uint => u8, u16, u32, u64, usize);
describe_as!(TypeDesc::Float => f32, f64);
describe_as!(TypeDesc::String => String);
describe_as!(TypeDesc::Any => Value, ());
describe_as!(TypeDesc::Error => RemoteError);

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> TypeDesc {
        TypeDesc::List(Box::new(T::describe()))
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDesc {
        TypeDesc::Optional(Box::new(T::describe()))
    }
}

impl<V> Describe for HashMap<String, V> {
    fn describe() -> TypeDesc {
        TypeDesc::Map
    }
}

/// Argument tuples whose elements all implement [`Describe`].
pub trait DescribeArgs {
    /// Descriptors for each position.
    fn describe_args() -> Vec<TypeDesc>;
}

macro_rules! describe_args_tuple {
    ($($name:ident),*) => {
        impl<$($name: Describe),*> DescribeArgs for ($($name,)*) {
            fn describe_args() -> Vec<TypeDesc> {
                vec![$($name::describe()),*]
            }
        }
    };
}

describe_args_tuple!();
describe_args_tuple!(A);
describe_args_tuple!(A, B);
describe_args_tuple!(A, B, C);
describe_args_tuple!(A, B, C, D);
describe_args_tuple!(A, B, C, D, E);
