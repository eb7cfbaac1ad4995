//! HTTP/2 (RFC 9113) support, feature-gated by `http2`.

pub mod connection;
pub mod flow;
pub mod frame;
pub mod hpack;
pub mod stream;

pub use connection::serve;
