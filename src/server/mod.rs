//! Callee engine: service registry, connection serving and dispatch.
//!
//! The [`Server`] keeps a registry of named services. Each accepted
//! connection gets one read loop; every request frame is dispatched on its
//! own task and answered through the connection's writer task, so responses
//! may leave in a different order than their requests arrived.
//!
//! # Example
//!
//! ```ignore
//! use ferry::schema::RemoteError;
//! use ferry::server::{Server, ServiceDefinition};
//!
//! struct Arith;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new();
//!     server.register(
//!         ServiceDefinition::new(Arith)
//!             .method_typed("Add", |_, (a, b): (i64, i64)| async move {
//!                 Ok::<_, RemoteError>(a + b)
//!             }),
//!     )?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```

mod service;

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;

use crate::error::{FerryError, Result};
use crate::protocol::{FrameReader, Message, RawRequest, Response, DEFAULT_MAX_BODY_SIZE};
use crate::schema::MethodSignature;
use crate::transport::Listener;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

pub use service::{
    is_exported, BoxFuture, Handler, MethodDescriptor, ServiceDefinition, ServiceEntry,
    TypedHandler,
};

/// Default maximum concurrent dispatches per connection.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

/// Builder for configuring a [`Server`].
pub struct ServerBuilder {
    max_concurrent_requests: usize,
    writer_config: WriterConfig,
    max_body_size: u32,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            writer_config: WriterConfig::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Set the maximum number of requests dispatched concurrently per connection.
    ///
    /// When the limit is reached the connection stops reading until a
    /// dispatch finishes.
    /// Default: 256
    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit.max(1);
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the largest request body accepted.
    ///
    /// Default: 64 MiB
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.max_body_size = size;
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                services: RwLock::new(HashMap::new()),
                max_concurrent_requests: self.max_concurrent_requests,
                writer_config: self.writer_config,
                max_body_size: self.max_body_size,
            }),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ServerInner {
    services: RwLock<HashMap<String, Arc<ServiceEntry>>>,
    max_concurrent_requests: usize,
    writer_config: WriterConfig,
    max_body_size: u32,
}

/// RPC server. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a server with default configuration.
    pub fn new() -> Self {
        ServerBuilder::new().build()
    }

    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Publish a service.
    ///
    /// Re-registering a name replaces the previous service.
    pub fn register<R: Send + Sync + 'static>(&self, definition: ServiceDefinition<R>) -> Result<()> {
        let entry = definition.into_entry()?;
        tracing::debug!(
            service = %entry.name,
            methods = entry.methods.len(),
            "registered service"
        );

        let mut services = self.inner.services.write();
        if services
            .insert(entry.name.clone(), Arc::new(entry))
            .is_some()
        {
            tracing::debug!("replaced previously registered service");
        }
        Ok(())
    }

    /// Names of all registered services.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Signature of a registered method, if any.
    pub fn signature(&self, service: &str, method: &str) -> Option<MethodSignature> {
        let services = self.inner.services.read();
        services
            .get(service)
            .and_then(|s| s.methods.get(method))
            .map(|m| m.signature.clone())
    }

    /// Accept connections until the listener fails, serving each on its own task.
    pub async fn serve<L: Listener>(&self, mut listener: L) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("accept failed: {}", e);
                    return Err(e.into());
                }
            };

            tracing::debug!(%peer, "accepted connection");
            let server = self.clone();
            tokio::spawn(async move {
                server.serve_conn(stream).await;
                tracing::debug!(%peer, "connection finished");
            });
        }
    }

    /// Serve requests on one established stream until it ends.
    pub async fn serve_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, _writer_task) = spawn_writer_task(write_half, self.inner.writer_config.clone());
        let mut reader = FrameReader::with_max_body(read_half, self.inner.max_body_size);
        let semaphore = Arc::new(Semaphore::new(self.inner.max_concurrent_requests));

        loop {
            let msg = match reader.read_frame().await {
                Ok(msg) => msg,
                Err(FerryError::ConnectionClosed) => {
                    tracing::debug!("peer closed connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!("read failed: {}", e);
                    break;
                }
            };

            if !msg.header.is_request() {
                tracing::warn!(
                    seq = msg.seq(),
                    "received {:?} frame on server connection, closing",
                    msg.header.kind
                );
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let server = self.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                let _permit = permit;
                server.dispatch_frame(msg, &writer).await;
            });
        }
    }

    /// Decode, dispatch and answer one request frame.
    async fn dispatch_frame(&self, msg: Message, writer: &WriterHandle) {
        let outcome = match msg.decode_request() {
            Ok(req) => self.handle_request(&req).await,
            Err(e) => Err(e),
        };

        let response = match outcome {
            Ok(result) => Response::success(result),
            Err(e) => {
                tracing::warn!(seq = msg.seq(), "dispatch failed: {}", e);
                Response::failure(&e)
            }
        };

        let reply = match Message::from_response(&msg.header, &response) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(seq = msg.seq(), "encoding response failed: {}", e);
                let fallback = Response::failure(&FerryError::Encode(e.to_string()));
                match Message::from_response(&msg.header, &fallback) {
                    Ok(reply) => reply,
                    Err(_) => return,
                }
            }
        };

        if let Err(e) = writer.send(reply).await {
            tracing::warn!(seq = msg.seq(), "sending response failed: {}", e);
        }
    }

    /// Find the target method, check and decode its arguments, and invoke it.
    ///
    /// Returns every output value in order, the trailing error included.
    pub async fn handle_request(&self, req: &RawRequest) -> Result<Vec<Value>> {
        let service = self
            .inner
            .services
            .read()
            .get(&req.path)
            .cloned()
            .ok_or_else(|| FerryError::ServiceNotFound(req.path.clone()))?;

        let method = service
            .methods
            .get(&req.method)
            .ok_or_else(|| FerryError::MethodNotFound {
                service: req.path.clone(),
                method: req.method.clone(),
            })?;

        let args = MethodSignature::decode_all(&method.signature.inputs, &req.args)?;

        // The handler runs on its own task so a panic becomes an error response.
        let call = match panic::catch_unwind(AssertUnwindSafe(|| method.call(args))) {
            Ok(call) => call,
            Err(payload) => return Err(handler_failure(req, panic_message(payload.as_ref()))),
        };
        match tokio::spawn(call).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                Err(handler_failure(req, panic_message(e.into_panic().as_ref())))
            }
            Err(_) => Err(handler_failure(req, "cancelled".to_string())),
        }
    }
}

fn handler_failure(req: &RawRequest, message: String) -> FerryError {
    FerryError::Handler {
        method: format!("{}.{}", req.path, req.method),
        message,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let text = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string payload".to_string()
    };
    format!("panicked: {}", text)
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}
