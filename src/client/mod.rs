//! Caller engine: sequence allocation, call correlation and shutdown.
//!
//! A [`Client`] owns one connection. Calls are written through a dedicated
//! writer task; a single read loop owns the read side and hands each
//! response frame to its own task, which matches it to the waiting call by
//! sequence id. When the read side ends, every outstanding call fails.
//!
//! # Example
//!
//! ```ignore
//! use ferry::client::{Client, ServiceSchema};
//! use ferry::schema::RemoteError;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder().dial("127.0.0.1:8080").await?;
//!     let arith = client.proxy(ServiceSchema::new("Arith").method_typed::<(i64, i64), i64>("Add"))?;
//!
//!     let (sum, err): (i64, Option<RemoteError>) = arith.method("Add").unwrap().invoke((3, 5)).await?;
//!     assert_eq!(sum, 8);
//!     assert!(err.is_none());
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

mod proxy;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::{oneshot, Notify};

use crate::codec::JsonCodec;
use crate::error::{FerryError, Result};
use crate::protocol::{FrameReader, Header, Message, Request, DEFAULT_MAX_BODY_SIZE};
use crate::schema::TypeDesc;
use crate::transport::dial;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

pub use proxy::{Proxy, RemoteMethod, ServiceSchema};

/// Builder for configuring and connecting a [`Client`].
pub struct ClientBuilder {
    writer_config: WriterConfig,
    max_body_size: u32,
    call_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            writer_config: WriterConfig::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            call_timeout: None,
        }
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the largest response body accepted.
    ///
    /// Default: 64 MiB
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.max_body_size = size;
        self
    }

    /// Fail calls that get no response within `timeout`.
    ///
    /// Default: no deadline; a call waits until its response arrives or the
    /// connection ends.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Start a client over an established stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<S>(self, stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, _writer_task) = spawn_writer_task(write_half, self.writer_config);

        let close_signal = Arc::new(Notify::new());
        let inner = Arc::new(ClientInner {
            table: Mutex::new(CallTable::default()),
            writer,
            close_signal: close_signal.clone(),
            call_timeout: self.call_timeout,
        });

        let reader = FrameReader::with_max_body(read_half, self.max_body_size);
        tokio::spawn(read_loop(reader, Arc::downgrade(&inner), close_signal));

        Client { inner }
    }

    /// Dial `addr` over TCP and start a client on the connection.
    pub async fn dial<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let stream = dial(addr).await?;
        Ok(self.connect(stream))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Correlation state for one in-flight call.
struct PendingCall {
    service: String,
    method: String,
    args: Vec<Value>,
    outputs: Arc<[TypeDesc]>,
    done: oneshot::Sender<Result<Vec<Value>>>,
}

impl PendingCall {
    /// Resolve the call. Never blocks; a call nobody waits for is dropped.
    fn complete(self, result: Result<Vec<Value>>) {
        if self.done.send(result).is_err() {
            tracing::warn!(
                service = %self.service,
                method = %self.method,
                "discarding reply, caller no longer waiting"
            );
        }
    }
}

/// Sequence counter, pending table and lifecycle flags, guarded together.
#[derive(Default)]
struct CallTable {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// `close()` was called.
    closing: bool,
    /// The read loop has ended.
    shutdown: bool,
}

struct ClientInner {
    table: Mutex<CallTable>,
    writer: WriterHandle,
    close_signal: Arc<Notify>,
    call_timeout: Option<Duration>,
}

/// A connection to an RPC server. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start a client with default configuration over an established stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        ClientBuilder::new().connect(stream)
    }

    /// Build a proxy for `schema`.
    ///
    /// Every method is validated up front; a method with no outputs or a
    /// non-error last output fails the whole build.
    pub fn proxy(&self, schema: ServiceSchema) -> Result<Proxy> {
        Proxy::build(self.clone(), schema)
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.table.lock().pending.len()
    }

    /// Whether the connection has ended.
    pub fn is_shutdown(&self) -> bool {
        self.inner.table.lock().shutdown
    }

    /// Close the connection. Outstanding calls fail with [`FerryError::Shutdown`].
    pub async fn close(&self) -> Result<()> {
        {
            let mut table = self.inner.table.lock();
            if table.closing {
                return Err(FerryError::Shutdown);
            }
            table.closing = true;
        }

        self.inner.close_signal.notify_one();
        match self.inner.writer.shutdown().await {
            Ok(()) | Err(FerryError::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Send one call and wait for its result.
    ///
    /// Results are decoded positionally against `outputs`.
    pub(crate) async fn call(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        outputs: Arc<[TypeDesc]>,
    ) -> Result<Vec<Value>> {
        let request = Request {
            path: service.to_string(),
            method: method.to_string(),
            args,
        };
        let body = JsonCodec::encode(&request)?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| FerryError::Protocol(format!("body of {} bytes too large", body.len())))?;

        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut table = self.inner.table.lock();
            if table.shutdown || table.closing {
                return Err(FerryError::Shutdown);
            }
            let seq = table.seq;
            table.seq = table.seq.wrapping_add(1);
            table.pending.insert(
                seq,
                PendingCall {
                    service: request.path,
                    method: request.method,
                    args: request.args,
                    outputs,
                    done: tx,
                },
            );
            seq
        };

        let msg = Message::new(Header::request(seq, body_len), body);
        if let Err(e) = self.inner.writer.send(msg).await {
            self.inner.table.lock().pending.remove(&seq);
            return Err(e);
        }

        let received = match self.inner.call_timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.table.lock().pending.remove(&seq);
                    tracing::debug!(seq, method, "call timed out");
                    return Err(FerryError::Timeout {
                        method: format!("{}.{}", service, method),
                    });
                }
            },
        };

        // A dropped sender means the call was torn down without a result.
        received.unwrap_or(Err(FerryError::Shutdown))
    }
}

/// Own the read side: hand each frame to a task until the stream ends.
///
/// Holds the client weakly; once every `Client` is dropped the loop stops
/// and the connection closes.
async fn read_loop<R>(
    mut reader: FrameReader<R>,
    inner: Weak<ClientInner>,
    close_signal: Arc<Notify>,
) where
    R: AsyncRead + Unpin,
{
    let err = loop {
        let frame = tokio::select! {
            frame = reader.read_frame() => frame,
            _ = close_signal.notified() => Err(FerryError::Shutdown),
        };

        match frame {
            Ok(msg) => match inner.upgrade() {
                Some(inner) => {
                    tokio::spawn(async move { inner.handle_response(msg) });
                }
                None => break FerryError::Shutdown,
            },
            Err(e) => break e,
        }
    };

    if !matches!(err, FerryError::ConnectionClosed | FerryError::Shutdown) {
        tracing::warn!("read loop ended: {}", err);
    }
    match inner.upgrade() {
        Some(inner) => inner.terminate(err),
        None => tracing::debug!("client dropped, connection closed"),
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // Dropping the writer handle lets the writer task close the write half.
        self.close_signal.notify_one();
    }
}

impl ClientInner {
    /// Match one response frame to its pending call and resolve it.
    fn handle_response(&self, msg: Message) {
        if !msg.header.is_response() {
            tracing::warn!(
                seq = msg.seq(),
                "discarding {:?} frame on client connection",
                msg.header.kind
            );
            return;
        }

        let call = self.table.lock().pending.remove(&msg.seq());
        let Some(call) = call else {
            tracing::warn!(seq = msg.seq(), "discarding response for unknown call");
            return;
        };

        let result = decode_results(&msg, &call.outputs);
        if let Err(e) = &result {
            tracing::debug!(seq = msg.seq(), method = %call.method, "call failed: {}", e);
        }
        call.complete(result);
    }

    /// Mark the client shut down and fail every pending call.
    fn terminate(&self, err: FerryError) {
        let (calls, closing) = {
            let mut table = self.table.lock();
            table.shutdown = true;
            (std::mem::take(&mut table.pending), table.closing)
        };

        if !calls.is_empty() {
            tracing::debug!(pending = calls.len(), "failing outstanding calls: {}", err);
        }
        for (seq, call) in calls {
            tracing::trace!(seq, method = %call.method, args = call.args.len(), "call aborted");
            call.complete(Err(shutdown_error(&err, closing)));
        }
    }
}

/// Decode a response body against the call's declared outputs.
fn decode_results(msg: &Message, outputs: &[TypeDesc]) -> Result<Vec<Value>> {
    let resp = msg.decode_response()?;
    if resp.is_error() {
        return Err(FerryError::Remote {
            code: resp.code,
            message: resp.error,
        });
    }

    if resp.result.len() != outputs.len() {
        return Err(FerryError::Protocol(format!(
            "expected {} results, got {}",
            outputs.len(),
            resp.result.len()
        )));
    }

    outputs
        .iter()
        .zip(&resp.result)
        .enumerate()
        .map(|(index, (desc, raw))| {
            desc.decode(raw)
                .map_err(|reason| FerryError::Decode { index, reason })
        })
        .collect()
}

/// The failure each pending call sees when the read loop ends with `err`.
fn shutdown_error(err: &FerryError, closing: bool) -> FerryError {
    match err {
        FerryError::ConnectionClosed | FerryError::Shutdown if closing => FerryError::Shutdown,
        FerryError::ConnectionClosed => FerryError::UnexpectedEof,
        FerryError::Shutdown => FerryError::Shutdown,
        FerryError::Io(e) => FerryError::Io(std::io::Error::new(e.kind(), e.to_string())),
        FerryError::Protocol(msg) => FerryError::Protocol(msg.clone()),
        other => FerryError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_frame, Response};
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn outputs() -> Arc<[TypeDesc]> {
        Arc::from(vec![TypeDesc::Int, TypeDesc::Error])
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder()
            .channel_capacity(32)
            .max_body_size(2048)
            .call_timeout(Duration::from_secs(3));

        assert_eq!(builder.writer_config.channel_capacity, 32);
        assert_eq!(builder.max_body_size, 2048);
        assert_eq!(builder.call_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_shutdown_error_mapping() {
        assert!(matches!(
            shutdown_error(&FerryError::ConnectionClosed, true),
            FerryError::Shutdown
        ));
        assert!(matches!(
            shutdown_error(&FerryError::ConnectionClosed, false),
            FerryError::UnexpectedEof
        ));
        let io = FerryError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        match shutdown_error(&io, false) {
            FerryError::Io(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset);
                assert_eq!(e.to_string(), "reset by peer");
            }
            other => panic!("unexpected: {other}"),
        }

        let protocol = FerryError::Protocol("body too large".to_string());
        assert_eq!(
            shutdown_error(&protocol, false).to_string(),
            "Protocol error: body too large"
        );
    }

    #[tokio::test]
    async fn test_reserved_kind_frame_is_skipped() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("A", "B", vec![], outputs()).await });
        let request = read_frame(&mut server_side).await.unwrap();

        let mut stray = Header::response_to(&request.header, 2);
        stray.kind = crate::protocol::MessageKind::Reserved(2);
        let stray = Message::new(stray, bytes::Bytes::from_static(b"{}"));
        server_side
            .write_all(&crate::protocol::encode_frame(&stray))
            .await
            .unwrap();

        let reply = Message::from_response(
            &request.header,
            &Response::success(vec![json!(5), Value::Null]),
        )
        .unwrap();
        server_side
            .write_all(&crate::protocol::encode_frame(&reply))
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), vec![json!(5), Value::Null]);
        assert!(!client.is_shutdown());
    }

    #[tokio::test]
    async fn test_dropping_client_closes_connection() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);
        let clone = client.clone();
        drop(client);
        drop(clone);

        let mut rest = Vec::new();
        let read = tokio::time::timeout(
            Duration::from_secs(1),
            server_side.read_to_end(&mut rest),
        )
            .await
            .expect("peer should see end of stream");
        assert_eq!(read.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_response_delivers_decoded_results() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);

        let caller = client.clone();
        let call = tokio::spawn(async move {
            caller
                .call("Arith", "Add", vec![json!(1), json!(2)], outputs())
                .await
        });

        let request = read_frame(&mut server_side).await.unwrap();
        let raw = request.decode_request().unwrap();
        assert_eq!(request.seq(), 0);
        assert_eq!(raw.path, "Arith");
        assert_eq!(raw.method, "Add");

        let reply = Message::from_response(
            &request.header,
            &Response::success(vec![json!(3), Value::Null]),
        )
        .unwrap();
        server_side
            .write_all(&crate::protocol::encode_frame(&reply))
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), vec![json!(3), Value::Null]);
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_error_response_becomes_remote_error() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);

        let caller = client.clone();
        let call =
            tokio::spawn(async move { caller.call("Nope", "Add", vec![], outputs()).await });

        let request = read_frame(&mut server_side).await.unwrap();
        let failure = Response::failure(&FerryError::ServiceNotFound("Nope".to_string()));
        let reply = Message::from_response(&request.header, &failure).unwrap();
        server_side
            .write_all(&crate::protocol::encode_frame(&reply))
            .await
            .unwrap();

        match call.await.unwrap().unwrap_err() {
            FerryError::Remote { code, message } => {
                assert_eq!(code, crate::protocol::codes::SERVICE_NOT_FOUND);
                assert_eq!(message, "can't find service: Nope");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_seq_is_discarded() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);

        let stray = Message::from_response(
            &Header::request(999, 0),
            &Response::success(vec![json!(1), Value::Null]),
        )
        .unwrap();
        server_side
            .write_all(&crate::protocol::encode_frame(&stray))
            .await
            .unwrap();

        // The client keeps working after discarding the stray frame.
        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("A", "B", vec![], outputs()).await });
        let request = read_frame(&mut server_side).await.unwrap();
        let reply = Message::from_response(
            &request.header,
            &Response::success(vec![json!(7), Value::Null]),
        )
        .unwrap();
        server_side
            .write_all(&crate::protocol::encode_frame(&reply))
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap()[0], json!(7));
        assert!(!client.is_shutdown());
    }

    #[tokio::test]
    async fn test_unexpected_eof_fails_pending() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("A", "B", vec![], outputs()).await });

        read_frame(&mut server_side).await.unwrap();
        drop(server_side);

        assert!(matches!(
            call.await.unwrap().unwrap_err(),
            FerryError::UnexpectedEof
        ));
        assert!(client.is_shutdown());
        assert_eq!(client.pending_calls(), 0);

        let err = client.call("A", "B", vec![], outputs()).await.unwrap_err();
        assert!(matches!(err, FerryError::Shutdown));
    }

    #[tokio::test]
    async fn test_close_fails_pending_with_shutdown() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("A", "B", vec![], outputs()).await });
        read_frame(&mut server_side).await.unwrap();

        client.close().await.unwrap();
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "connection is shut down");

        assert!(matches!(client.close().await, Err(FerryError::Shutdown)));
    }

    #[tokio::test]
    async fn test_call_timeout_removes_pending() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::builder()
            .call_timeout(Duration::from_millis(50))
            .connect(client_side);

        let err = client
            .call("Slow", "Wait", vec![], outputs())
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::Timeout { .. }));
        assert_eq!(client.pending_calls(), 0);

        // A late response for the timed-out call is dropped quietly.
        let request = read_frame(&mut server_side).await.unwrap();
        let reply = Message::from_response(
            &request.header,
            &Response::success(vec![json!(1), Value::Null]),
        )
        .unwrap();
        server_side
            .write_all(&crate::protocol::encode_frame(&reply))
            .await
            .unwrap();
        assert!(!client.is_shutdown());
    }

    #[tokio::test]
    async fn test_result_count_mismatch_fails_call() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let client = Client::new(client_side);

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("A", "B", vec![], outputs()).await });

        let request = read_frame(&mut server_side).await.unwrap();
        let reply =
            Message::from_response(&request.header, &Response::success(vec![json!(1)])).unwrap();
        server_side
            .write_all(&crate::protocol::encode_frame(&reply))
            .await
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("expected 2 results, got 1"));
    }
}
