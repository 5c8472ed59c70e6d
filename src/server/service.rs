//! Service definitions and registration checks.
//!
//! A [`ServiceDefinition`] binds a receiver to a set of candidate methods.
//! Each candidate carries an explicit [`MethodSignature`] and a [`Handler`]
//! that closes over the receiver. Registration keeps only the candidates that
//! are exported and whose last output is error-like.
//!
//! # Example
//!
//! ```
//! use ferry::schema::RemoteError;
//! use ferry::server::ServiceDefinition;
//!
//! struct Arith;
//!
//! let def = ServiceDefinition::new(Arith)
//!     .method_typed("Add", |_rcvr, (a, b): (i64, i64)| async move {
//!         Ok::<_, RemoteError>(a + b)
//!     });
//! assert_eq!(def.name(), "Arith");
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{FerryError, Result};
use crate::schema::{Describe, DescribeArgs, MethodSignature, RemoteError};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A callable method bound to its receiver.
pub trait Handler: Send + Sync + 'static {
    /// Invoke with arguments already checked against the method's inputs.
    ///
    /// Returns every output value, the trailing error included.
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Vec<Value>>>;
}

/// Handler over untyped values.
struct RawHandler<R, F> {
    receiver: Arc<R>,
    handler: F,
}

impl<R, F, Fut> Handler for RawHandler<R, F>
where
    R: Send + Sync + 'static,
    F: Fn(Arc<R>, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<Value>> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Vec<Value>>> {
        let fut = (self.handler)(self.receiver.clone(), args);
        Box::pin(async move { Ok(fut.await) })
    }
}

/// Wrapper that converts arguments into a tuple before calling the handler,
/// and flattens `Result<T, RemoteError>` into `[value, error]`.
pub struct TypedHandler<R, F, A, T, Fut> {
    receiver: Arc<R>,
    handler: F,
    _phantom: PhantomData<fn(A) -> (T, Fut)>,
}

impl<R, F, A, T, Fut> Handler for TypedHandler<R, F, A, T, Fut>
where
    R: Send + Sync + 'static,
    F: Fn(Arc<R>, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    T: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<T, RemoteError>> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Vec<Value>>> {
        // No arguments means the unit tuple, which serde reads from null.
        let args = if args.is_empty() {
            Value::Null
        } else {
            Value::Array(args)
        };
        let parsed: A = match serde_json::from_value(args) {
            Ok(v) => v,
            Err(e) => {
                let err = FerryError::Arguments(e.to_string());
                return Box::pin(async move { Err(err) });
            }
        };

        let fut = (self.handler)(self.receiver.clone(), parsed);
        Box::pin(async move {
            match fut.await {
                Ok(value) => {
                    let value = serde_json::to_value(value)
                        .map_err(|e| FerryError::Encode(e.to_string()))?;
                    Ok(vec![value, Value::Null])
                }
                Err(err) => Ok(vec![Value::Null, Value::String(err.message().to_string())]),
            }
        })
    }
}

/// One dispatchable method.
pub struct MethodDescriptor {
    /// Declared inputs and outputs.
    pub signature: MethodSignature,
    handler: Box<dyn Handler>,
}

impl MethodDescriptor {
    /// Invoke the bound handler.
    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Vec<Value>>> {
        self.handler.call(args)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A registered service: its name and qualifying methods.
#[derive(Debug)]
pub struct ServiceEntry {
    /// Exported service name.
    pub name: String,
    /// Methods by name.
    pub methods: HashMap<String, MethodDescriptor>,
}

struct Candidate {
    name: String,
    signature: MethodSignature,
    handler: Box<dyn Handler>,
}

/// Builder collecting a receiver's candidate methods.
pub struct ServiceDefinition<R> {
    name: String,
    receiver: Arc<R>,
    candidates: Vec<Candidate>,
}

impl<R: Send + Sync + 'static> ServiceDefinition<R> {
    /// Define a service named after the receiver's type.
    pub fn new(receiver: R) -> Self {
        Self::named(short_type_name::<R>(), receiver)
    }

    /// Define a service under an explicit name.
    pub fn named(name: impl Into<String>, receiver: R) -> Self {
        Self::from_arc(name, Arc::new(receiver))
    }

    /// Define a service sharing an existing receiver.
    pub fn from_arc(name: impl Into<String>, receiver: Arc<R>) -> Self {
        Self {
            name: name.into(),
            receiver,
            candidates: Vec::new(),
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a method over untyped values with an explicit signature.
    ///
    /// The handler receives arguments already conformed to `signature.inputs`
    /// and must return one value per output.
    pub fn method<F, Fut>(mut self, name: &str, signature: MethodSignature, handler: F) -> Self
    where
        F: Fn(Arc<R>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Value>> + Send + 'static,
    {
        self.candidates.push(Candidate {
            name: name.to_string(),
            signature,
            handler: Box::new(RawHandler {
                receiver: self.receiver.clone(),
                handler,
            }),
        });
        self
    }

    /// Add a typed method. The signature is derived from `A` and `T`.
    pub fn method_typed<F, A, T, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Arc<R>, A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + DescribeArgs + Send + 'static,
        T: Serialize + Describe + Send + 'static,
        Fut: Future<Output = std::result::Result<T, RemoteError>> + Send + 'static,
    {
        self.candidates.push(Candidate {
            name: name.to_string(),
            signature: MethodSignature::of::<A, T>(),
            handler: Box::new(TypedHandler {
                receiver: self.receiver.clone(),
                handler,
                _phantom: PhantomData,
            }),
        });
        self
    }

    /// Validate the definition and keep only the qualifying methods.
    pub(crate) fn into_entry(self) -> Result<ServiceEntry> {
        if self.name.is_empty() {
            return Err(FerryError::Registration(format!(
                "no service name for type {}",
                std::any::type_name::<R>()
            )));
        }
        if !is_exported(&self.name) {
            return Err(FerryError::Registration(format!(
                "type {} is not exported",
                self.name
            )));
        }

        let mut methods = HashMap::new();
        let mut unexported_but_valid = 0;

        for candidate in self.candidates {
            let valid = match candidate.signature.validate() {
                Ok(()) => true,
                Err(reason) => {
                    tracing::warn!(
                        service = %self.name,
                        method = %candidate.name,
                        "skipping method: {}",
                        reason
                    );
                    false
                }
            };

            if !is_exported(&candidate.name) {
                if valid {
                    unexported_but_valid += 1;
                }
                continue;
            }

            if valid {
                methods.insert(
                    candidate.name,
                    MethodDescriptor {
                        signature: candidate.signature,
                        handler: candidate.handler,
                    },
                );
            }
        }

        if methods.is_empty() {
            let msg = if unexported_but_valid > 0 {
                format!(
                    "type {} has no exported methods of suitable type (hint: method names must start with an uppercase letter)",
                    self.name
                )
            } else {
                format!("type {} has no exported methods of suitable type", self.name)
            };
            tracing::warn!("{}", msg);
            return Err(FerryError::Registration(msg));
        }

        Ok(ServiceEntry {
            name: self.name,
            methods,
        })
    }
}

/// An identifier is exported when it starts with an uppercase letter.
pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn short_type_name<R>() -> String {
    let full = std::any::type_name::<R>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
