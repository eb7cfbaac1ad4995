//! WebSocket upgrade handshake: validating the request headers and
//! computing the `sec-websocket-accept` response value.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};

use crate::error::WsError;
use crate::model::Request;
use crate::ws::deflate::DeflateParams;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The subset of request state the handshake needs, and what it hands back.
pub struct UpgradeRequest {
    pub accept_key: String,
    pub deflate: Option<DeflateParams>,
}

/// Validates an upgrade request per RFC 6455 and computes the
/// `Sec-WebSocket-Accept` value. Returns `Err` with the reason a caller
/// should fall back to an ordinary 4xx response rather than upgrading.
pub fn validate_upgrade(req: &Request) -> Result<UpgradeRequest, WsError> {
    if req.method != http::Method::GET {
        return Err(WsError::Handshake("method must be GET".into()));
    }
    if req.version != http::Version::HTTP_11 {
        return Err(WsError::Handshake("upgrade requires HTTP/1.1".into()));
    }
    if req.header("host").is_none_or(str::is_empty) {
        return Err(WsError::Handshake("missing host".into()));
    }

    let upgrade = req.header("upgrade").ok_or_else(|| WsError::Handshake("missing upgrade header".into()))?;
    if !contains_token_ci(upgrade, "websocket") {
        return Err(WsError::Handshake("upgrade header does not contain websocket".into()));
    }

    let connection = req
        .header("connection")
        .ok_or_else(|| WsError::Handshake("missing connection header".into()))?;
    if !contains_token_ci(connection, "upgrade") {
        return Err(WsError::Handshake("connection header does not contain upgrade".into()));
    }

    let keys: Vec<&str> = req.headers_named("sec-websocket-key").collect();
    if keys.len() != 1 {
        return Err(WsError::Handshake("expected exactly one sec-websocket-key".into()));
    }
    let key = keys[0];

    let version = req
        .header("sec-websocket-version")
        .ok_or_else(|| WsError::Handshake("missing sec-websocket-version".into()))?;
    if version != "13" {
        return Err(WsError::Handshake(format!("unsupported sec-websocket-version {version}")));
    }

    let deflate = req
        .header("sec-websocket-extensions")
        .and_then(crate::ws::deflate::negotiate);

    Ok(UpgradeRequest {
        accept_key: compute_accept_key(key),
        deflate,
    })
}

/// `base64(sha1(key + GUID))`, per RFC 6455.
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    let digest = hasher.finalize();
    BASE64.encode(digest)
}

fn contains_token_ci(header_value: &str, token: &str) -> bool {
    header_value
        .split(',')
        .map(str::trim)
        .any(|t| t.eq_ignore_ascii_case(token))
}
