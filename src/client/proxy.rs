//! Client-side service proxies.
//!
//! A [`ServiceSchema`] lists the methods a caller expects a remote service
//! to have. [`Client::proxy`](super::Client::proxy) validates it once and
//! returns a [`Proxy`] whose [`RemoteMethod`]s forward calls over the
//! connection and decode results against the declared outputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::Client;
use crate::error::{FerryError, Result};
use crate::schema::{Describe, DescribeArgs, MethodSignature, TypeDesc};

/// Method signatures of a remote service, keyed by method name.
#[derive(Debug, Clone)]
pub struct ServiceSchema {
    name: String,
    methods: BTreeMap<String, MethodSignature>,
}

impl ServiceSchema {
    /// Start a schema for the service registered under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Declare a method with an explicit signature.
    pub fn method(mut self, name: impl Into<String>, signature: MethodSignature) -> Self {
        self.methods.insert(name.into(), signature);
        self
    }

    /// Declare a method taking the tuple `A` and producing `T` plus an error.
    pub fn method_typed<A: DescribeArgs, T: Describe>(self, name: impl Into<String>) -> Self {
        self.method(name, MethodSignature::of::<A, T>())
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Callable view of one remote service.
pub struct Proxy {
    service: Arc<str>,
    methods: HashMap<String, RemoteMethod>,
}

impl Proxy {
    pub(super) fn build(client: Client, schema: ServiceSchema) -> Result<Self> {
        let service: Arc<str> = Arc::from(schema.name);
        let mut methods = HashMap::with_capacity(schema.methods.len());

        for (name, signature) in schema.methods {
            signature.validate().map_err(|reason| {
                FerryError::InvalidSignature(format!("{}.{} {}", service, name, reason))
            })?;

            let method = RemoteMethod {
                client: client.clone(),
                service: service.clone(),
                name: Arc::from(name.as_str()),
                outputs: Arc::from(signature.outputs.clone()),
                signature: Arc::new(signature),
            };
            methods.insert(name, method);
        }

        Ok(Self { service, methods })
    }

    /// Name of the remote service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Look up a declared method.
    pub fn method(&self, name: &str) -> Option<&RemoteMethod> {
        self.methods.get(name)
    }

    /// Declared method names.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Call a declared method by name.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        match self.methods.get(name) {
            Some(method) => method.call(args).await,
            None => Err(FerryError::MethodNotFound {
                service: self.service.to_string(),
                method: name.to_string(),
            }),
        }
    }
}

/// One remote method bound to a connection.
///
/// Cloning is cheap; clones can be moved into separate tasks and called
/// concurrently.
#[derive(Clone)]
pub struct RemoteMethod {
    client: Client,
    service: Arc<str>,
    name: Arc<str>,
    signature: Arc<MethodSignature>,
    outputs: Arc<[TypeDesc]>,
}

impl RemoteMethod {
    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared signature.
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Send `args` and return the decoded results, one per declared output.
    ///
    /// The arity is checked locally; nothing is sent on a mismatch.
    pub async fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        if args.len() != self.signature.inputs.len() {
            return Err(FerryError::ArgumentCount {
                expected: self.signature.inputs.len(),
                actual: args.len(),
            });
        }

        self.client
            .call(&self.service, &self.name, args, self.outputs.clone())
            .await
    }

    /// Typed form of [`call`](Self::call).
    ///
    /// `args` serializes to the argument list: a tuple becomes one argument
    /// per element, `()` becomes no arguments, anything else a single
    /// argument. Results deserialize into `R` as a JSON array, typically a
    /// tuple ending in `Option<RemoteError>`.
    pub async fn invoke<A, R>(&self, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = match serde_json::to_value(args)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };

        let results = self.call(args).await?;
        Ok(serde_json::from_value(Value::Array(results))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, read_frame, Message, Response};
    use crate::schema::RemoteError;
    use serde_json::json;
    use tokio::io::{duplex, AsyncWriteExt};

    fn arith_schema() -> ServiceSchema {
        ServiceSchema::new("Arith")
            .method_typed::<(i64, i64), i64>("Add")
            .method(
                "Divide",
                MethodSignature::new(
                    vec![TypeDesc::Int, TypeDesc::Int],
                    vec![TypeDesc::Optional(Box::new(TypeDesc::Int)), TypeDesc::Error],
                ),
            )
    }

    #[tokio::test]
    async fn test_proxy_rejects_invalid_signature() {
        let (client_side, _server_side) = duplex(1024);
        let client = Client::new(client_side);

        let schema = ServiceSchema::new("Broken")
            .method("NoOutputs", MethodSignature::new(vec![], vec![]));
        match client.proxy(schema) {
            Err(FerryError::InvalidSignature(msg)) => {
                assert!(msg.contains("Broken.NoOutputs"));
                assert!(msg.contains("has no outputs"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected invalid signature"),
        }

        let schema = ServiceSchema::new("Broken").method(
            "TrailingInt",
            MethodSignature::new(vec![], vec![TypeDesc::Error, TypeDesc::Int]),
        );
        assert!(matches!(
            client.proxy(schema),
            Err(FerryError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_arity_checked_before_sending() {
        let (client_side, _server_side) = duplex(1024);
        let client = Client::new(client_side);
        let proxy = client.proxy(arith_schema()).unwrap();

        let err = proxy.call("Add", vec![json!(1)]).await.unwrap_err();
        assert!(matches!(
            err,
            FerryError::ArgumentCount {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_method_is_local_error() {
        let (client_side, _server_side) = duplex(1024);
        let client = Client::new(client_side);
        let proxy = client.proxy(arith_schema()).unwrap();

        assert!(proxy.method("Multiply").is_none());
        let err = proxy.call("Multiply", vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "can't find method: Arith.Multiply");
    }

    #[tokio::test]
    async fn test_invoke_round_trip_with_typed_results() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);
        let proxy = client.proxy(arith_schema()).unwrap();
        let divide = proxy.method("Divide").unwrap().clone();

        let call = tokio::spawn(async move {
            divide
                .invoke::<_, (Option<i64>, Option<RemoteError>)>((10, 0))
                .await
        });

        let request = read_frame(&mut server_side).await.unwrap();
        let raw = request.decode_request().unwrap();
        assert_eq!(raw.method, "Divide");
        assert_eq!(raw.args.len(), 2);
        assert_eq!(raw.args[0].get(), "10");

        let reply = Message::from_response(
            &request.header,
            &Response::success(vec![Value::Null, json!("divide by zero")]),
        )
        .unwrap();
        server_side.write_all(&encode_frame(&reply)).await.unwrap();

        let (quotient, err) = call.await.unwrap().unwrap();
        assert_eq!(quotient, None);
        assert_eq!(err.unwrap().message(), "divide by zero");
    }

    #[tokio::test]
    async fn test_null_result_decodes_to_zero_value() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);
        let proxy = client.proxy(arith_schema()).unwrap();
        let add = proxy.method("Add").unwrap().clone();

        let call = tokio::spawn(async move { add.call(vec![json!(1), json!(2)]).await });

        let request = read_frame(&mut server_side).await.unwrap();
        let reply = Message::from_response(
            &request.header,
            &Response::success(vec![Value::Null, Value::Null]),
        )
        .unwrap();
        server_side.write_all(&encode_frame(&reply)).await.unwrap();

        assert_eq!(call.await.unwrap().unwrap(), vec![json!(0), Value::Null]);
    }
}
