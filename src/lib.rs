//! # ferry
//!
//! Sequence-correlated RPC over any bidirectional byte stream.
//!
//! A [`Client`] sends requests naming a service and method; a [`Server`]
//! dispatches them to registered services and answers on the same
//! connection. Calls are correlated by a 64-bit sequence id, so many calls
//! can be outstanding at once and responses may arrive in any order.
//!
//! ## Wire format
//!
//! - **Header**: 19 bytes, big-endian (version, kind, compress, seq, extension, body length)
//! - **Body**: a JSON request `{"path","method","args"}` or response `{"code","error","result"}`
//!
//! ## Example
//!
//! ```ignore
//! use ferry::{Client, RemoteError, Server, ServiceDefinition, ServiceSchema};
//!
//! struct Arith;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new();
//!     server.register(ServiceDefinition::new(Arith).method_typed(
//!         "Add",
//!         |_, (a, b): (i64, i64)| async move { Ok::<_, RemoteError>(a + b) },
//!     ))?;
//!
//!     let (client_side, server_side) = tokio::io::duplex(64 * 1024);
//!     tokio::spawn(async move { server.serve_conn(server_side).await });
//!
//!     let client = Client::new(client_side);
//!     let arith = client.proxy(ServiceSchema::new("Arith").method_typed::<(i64, i64), i64>("Add"))?;
//!     let (sum, _): (i64, Option<RemoteError>) = arith.method("Add").unwrap().invoke((3, 5)).await?;
//!     assert_eq!(sum, 8);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod transport;
pub mod writer;

pub use client::{Client, ClientBuilder, Proxy, RemoteMethod, ServiceSchema};
pub use error::{FerryError, Result};
pub use schema::{MethodSignature, RemoteError, TypeDesc};
pub use server::{Server, ServerBuilder, ServiceDefinition};
