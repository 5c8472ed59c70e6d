//! Transport module - stream establishment.
//!
//! The engines only need an established bidirectional byte stream. This
//! module provides the [`Listener`] abstraction the server accepts from, and
//! [`dial`] for clients:
//! - TCP sockets (all platforms)
//! - Unix Domain Sockets (unix)

mod listener;

pub use listener::{dial, Listener};
