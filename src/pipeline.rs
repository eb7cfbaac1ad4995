//! Pipeline: given a completed request, invokes the user handler,
//! commits the response through the [`crate::transport::HttpTransport`], and
//! on an upgrade result switches the connection to a WebSocket handler.
//! Handler failures are caught here and rendered as a fallback response
//! instead of escaping to the transport.

use http::StatusCode;

use crate::handler::{Handler, HandlerOutcome};
use crate::model::{Request, Response};
use crate::transport::{Disposition, HttpTransport};

/// The outcome of running one request through the pipeline, used by the
/// HTTP/1 and HTTP/2 drivers to decide what happens next on the connection.
pub enum PipelineOutcome {
    /// The response was committed normally; the connection continues
    /// (HTTP/1 keep-alive) or the stream closes (HTTP/2).
    Committed,
    /// The response was a 101 upgrade; the caller must now hand the
    /// transport's underlying socket to a WebSocket connection driver.
    Upgraded(Box<dyn crate::handler::WebSocketHandler>),
}

/// Runs `handler` against `req`, committing whatever it returns through
/// `transport`. Handler errors are caught here ("Handler exceptions:
/// caught; a fallback status is sent if no response has been committed");
/// the error is then returned to the caller so a supervisor can still
/// observe it.
///
/// `compress` mirrors `Http1Config::compress_enabled`; callers that cannot
/// negotiate `accept-encoding` (HTTP/2 has no such concept) pass `false`.
pub async fn run(
    handler: &dyn Handler,
    req: Request,
    transport: &mut dyn HttpTransport,
    allow_upgrade: bool,
    compress: bool,
) -> crate::Result<PipelineOutcome> {
    let accept_encoding = if compress {
        req.header("accept-encoding").map(str::to_string)
    } else {
        None
    };
    let is_head = req.method == http::Method::HEAD;
    match handler.call(req).await {
        Ok(HandlerOutcome::Response(resp)) => {
            let resp = apply_compression(resp, accept_encoding.as_deref()).await?;
            commit_response(transport, resp, is_head).await?;
            Ok(PipelineOutcome::Committed)
        }
        Ok(HandlerOutcome::Upgrade { response, handler }) if allow_upgrade => {
            commit_response(transport, response, is_head).await?;
            Ok(PipelineOutcome::Upgraded(handler))
        }
        Ok(HandlerOutcome::Upgrade {.. }) => {
            // Upgrade requested on a transport that cannot serve one
            // Upgrade is only valid on HTTP/1.1. This is a handler bug,
            // mapped to 500 exactly like any other handler error.
            let resp = fallback_response(StatusCode::INTERNAL_SERVER_ERROR);
            commit_response(transport, resp, is_head).await?;
            Ok(PipelineOutcome::Committed)
        }
        Err(err) => {
            let resp = fallback_response(StatusCode::INTERNAL_SERVER_ERROR);
            commit_response(transport, resp, is_head).await?;
            Err(err)
        }
    }
}

/// Negotiates and applies response body compression: if
/// `accept-encoding` offered a recognized encoding and the handler didn't
/// already set `content-encoding`, compress the body and record
/// `content-encoding`/`vary`. Only `Inline` bodies, and `File` bodies the
/// handler explicitly opted into via `force_compress_file`, are compressed —
/// a file range is never read into memory for compression unless asked to,
/// and a `Chunked` stream is left alone since it is already being
/// streamed incrementally to the peer.
#[cfg(feature = "http1")]
async fn apply_compression(mut resp: Response, accept_encoding: Option<&str>) -> crate::Result<Response> {
    use crate::model::Body;
    use http::{HeaderValue, header};

    let Some(accept_encoding) = accept_encoding else {
        return Ok(resp);
    };
    let already_set = resp.headers.contains_key(header::CONTENT_ENCODING);

    let data = match &resp.body {
        Body::Inline(b) => Some(b.clone()),
        Body::File { path, offset, length } if resp.force_compress_file => {
            let bytes = tokio::fs::read(path).await?;
            let start = (*offset as usize).min(bytes.len());
            let end = start.saturating_add(*length as usize).min(bytes.len());
            Some(bytes::Bytes::copy_from_slice(&bytes[start..end]))
        }
        _ => None,
    };
    let Some(data) = data else {
        return Ok(resp);
    };
    let Some(encoding) = crate::http1::negotiate_compression(Some(accept_encoding), already_set) else {
        return Ok(resp);
    };
    let compressed = crate::http1::compress(encoding, &data)?;
    resp.headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding));
    resp.headers
        .append(header::VARY, HeaderValue::from_static("accept-encoding"));
    resp.headers.remove(header::CONTENT_LENGTH);
    resp.body = Body::Inline(bytes::Bytes::from(compressed));
    Ok(resp)
}

#[cfg(not(feature = "http1"))]
async fn apply_compression(resp: Response, _accept_encoding: Option<&str>) -> crate::Result<Response> {
    Ok(resp)
}

/// Drives one HTTP/1.1 connection end to end: reads successive requests,
/// runs each through [`run`], and on [`PipelineOutcome::Upgraded`] hands the
/// socket off to a [`crate::ws::WsConnection`] ("the HTTP/1 state
/// machine is replaced in place by a WebSocket Connection bound to the same
/// underlying socket"). Returns once the connection closes, keep-alive ends,
/// or the WebSocket connection's own `run` returns.
///
/// `deflate` is the permessage-deflate parameters to drive the upgraded
/// connection with, if any — the pipeline itself never inspects
/// `Sec-WebSocket-Extensions`; a `Handler` that negotiates deflate in its 101
/// response is expected to report the same parameters here, since
/// [`HandlerOutcome::Upgrade`] only carries the socket handler, not the
/// negotiated extension.
#[cfg(all(feature = "http1", feature = "websocket"))]
pub async fn serve_http1<S>(
    mut conn: crate::http1::Http1Connection<S>,
    handler: &dyn Handler,
    ws_config: crate::config::WsConfig,
    deflate: Option<crate::ws::DeflateParams>,
) -> crate::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let compress = conn.compress_enabled();
    loop {
        let Some(req) = conn.read_request().await? else {
            break;
        };
        match run(handler, req, &mut conn, true, compress).await? {
            PipelineOutcome::Committed => {
                conn.ensure_completed().await?;
                if !conn.should_keep_alive() {
                    break;
                }
            }
            PipelineOutcome::Upgraded(mut ws_handler) => {
                let (socket, leftover) = conn.into_parts()?;
                let ws = crate::ws::WsConnection::new(socket, leftover, ws_config, deflate);
                ws.run(ws_handler.as_mut()).await;
                return Ok(());
            }
        }
    }
    conn.close().await;
    Ok(())
}

fn fallback_response(status: StatusCode) -> Response {
    Response::new(status)
}

/// Commits `resp` through `transport`. `is_head` marks a request whose
/// method was `HEAD`: its response must carry the same headers (including a
/// derived `content-length`) a `GET` would have produced, but no body octets
/// are written.
async fn commit_response(
    transport: &mut dyn HttpTransport,
    mut resp: Response,
    is_head: bool,
) -> crate::Result<()> {
    let omits_content_length = resp.status.is_informational()
    || resp.status == StatusCode::NO_CONTENT
    || resp.status == StatusCode::NOT_MODIFIED;
    let suppresses_body = is_head || omits_content_length;

    let disposition = if resp.status.is_informational() {
        Disposition::Inform
    } else if omits_content_length || resp.body.is_none() {
        Disposition::NoBody
    } else if resp.body.known_length().is_some() {
        Disposition::Raw
    } else {
        Disposition::ChunkEncoded
    };

    // Synthesize `content-length` for a body of known length —
    // including a HEAD response, which reports the length a GET would have
    // sent without sending the bytes — unless the handler already set one or
    // the status forbids the header entirely (1xx/204/304).
    if !omits_content_length && !resp.headers.contains_key(http::header::CONTENT_LENGTH) {
        if let Some(len) = resp.body.known_length() {
            resp.headers.insert(
                http::header::CONTENT_LENGTH,
                http::HeaderValue::from_str(&len.to_string())
                    .expect("decimal digits are always a valid header value"),
            );
        }
    }

    transport
        .send_headers(resp.status, &resp.headers, disposition)
        .await?;
    if !suppresses_body && !matches!(disposition, Disposition::NoBody | Disposition::Inform) {
        transport.send_body(resp.body).await?;
    }
    Ok(())
}
