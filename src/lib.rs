//! `protocore` terminates HTTP/1.0-1.1, HTTP/2 and WebSockets over a single
//! accepted connection and hands fully parsed requests to a user-supplied
//! handler. The crate does not accept sockets or negotiate TLS itself; it
//! expects an already-accepted, already-ALPN-resolved byte stream and drives
//! one of its protocol state machines over it.
//!
//! # Layout
//!
//! - [`dispatch`] — chooses HTTP/1 vs HTTP/2 for a freshly accepted stream.
//! - [`http1`] — the HTTP/1.x request/response state machine.
//! - [`http2`] — the HTTP/2 connection and stream state machines.
//! - [`ws`] — the WebSocket frame extractor, reassembler and close handshake.
//! - [`pipeline`] — glue between a parsed request, the user handler, and the
//! transport that commits the response (and performs the WebSocket upgrade).
//! - [`model`] — the `Request`/`Response`/`Body` data model shared by every
//! protocol.
//! - [`handler`] — the traits a caller implements to receive requests and
//! WebSocket messages.
//! - [`config`] — per-protocol configuration structs with RFC-conformant
//! defaults.
//! - [`fuse`] — connection idle/abuse-timeout monitoring, independent of any
//! one protocol's own per-read timeout.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fuse;
pub mod handler;
#[cfg(feature = "http1")]
pub mod http1;
#[cfg(feature = "http2")]
pub mod http2;
pub mod model;
pub mod pipeline;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod ws;

pub use async_trait::async_trait;
pub use config::{Http1Config, Http2Config, ServerConfig, WsConfig};
pub use dispatch::{Protocol, detect_plaintext_preface};
pub use error::{BoxedError, Error};
pub use fuse::{ConnectionWatch, FuseEvent, IdleTimeoutWatch};
pub use handler::{Handler, HandlerOutcome, WebSocketHandler};
pub use model::{Body, Request, Response};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Re-exports intended for `use protocore::prelude::*;`.
pub mod prelude {
    pub use crate::config::{Http1Config, Http2Config, ServerConfig, WsConfig};
    pub use crate::error::{Error, Result};
    pub use crate::handler::{Handler, HandlerOutcome, WebSocketHandler};
    pub use crate::model::{Body, Request, Response};
}
