//! Listener abstraction and TCP dialing.
//!
//! # Example
//!
//! ```ignore
//! use ferry::transport::{dial, Listener};
//!
//! let mut listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?;
//! let client_side = dial(addr).await?;
//! let (server_side, peer) = Listener::accept(&mut listener).await?;
//! ```

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::Result;
use crate::server::BoxFuture;

/// Source of accepted connections.
pub trait Listener: Send {
    /// Stream type yielded per connection.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Wait for the next connection, returning it with a printable peer address.
    fn accept(&mut self) -> BoxFuture<'_, io::Result<(Self::Stream, String)>>;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<(Self::Stream, String)>> {
        Box::pin(async move {
            let (stream, addr) = TcpListener::accept(self).await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("set_nodelay failed: {}", e);
            }
            Ok((stream, addr.to_string()))
        })
    }
}

#[cfg(unix)]
impl Listener for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<(Self::Stream, String)>> {
        Box::pin(async move {
            let (stream, addr) = tokio::net::UnixListener::accept(self).await?;
            Ok((stream, format!("{:?}", addr)))
        })
    }
}

/// Connect a TCP stream to `addr` with Nagle disabled.
pub async fn dial<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
