//! WebSocket Connection component: frame extractor, message
//! reassembler, per-message deflate, close handshake, and upgrade handshake.

pub mod connection;
pub mod deflate;
pub mod frame;
pub mod handshake;
pub mod message;

pub use connection::{CloseReason, WsConnection};
pub use deflate::{DeflateContext, DeflateParams};
pub use frame::{Frame, Opcode};
pub use handshake::{UpgradeRequest, compute_accept_key, validate_upgrade};
pub use message::{FragmentAccumulator, Message};
