//! The HTTP/2 connection state machine.
//! One connection task drives frame I/O, flow control, SETTINGS and HPACK;
//! each stream gets a subordinate task for the user handler. A single
//! `serve` call drives one connection from preface exchange to close.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::config::Http2Config;
use crate::dispatch::HTTP2_PREFACE;
use crate::error::{Http2Error, Http2ErrorCode};
use crate::handler::{Handler, HandlerOutcome};
use crate::http2::flow::Window;
use crate::http2::frame::{self, Frame};
use crate::http2::hpack::{HpackDecoder, HpackEncoder};
use crate::http2::stream::{Stream, StreamOutboundItem};
use crate::model::{BodyReader, HeaderList, Request};
use std::sync::Arc;

/// Settings values currently in effect for one direction, keyed exactly as
/// the local-SETTINGS-defaults table.
#[derive(Debug, Clone)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: false,
            max_concurrent_streams: 100,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    fn from_config(cfg: &Http2Config) -> Self {
        Self {
            header_table_size: cfg.header_table_size,
            enable_push: false,
            max_concurrent_streams: cfg.max_concurrent_streams,
            initial_window_size: cfg.initial_window_size,
            max_frame_size: cfg.max_frame_size,
            max_header_list_size: cfg.max_header_list_size,
        }
    }

    fn as_params(&self) -> Vec<(u16, u32)> {
        let mut v = vec![
            (0x1, self.header_table_size),
            (0x2, u32::from(self.enable_push)),
            (0x3, self.max_concurrent_streams),
            (0x4, self.initial_window_size),
            (0x5, self.max_frame_size),
        ];
        if let Some(max) = self.max_header_list_size {
            v.push((0x6, max));
        }
        v
    }
}

/// The `pending-continuation` slot in the connection state: `nil` or
/// `{stream-id, accumulated fragment, end-stream-flag}`.
struct PendingContinuation {
    stream_id: u32,
    fragment: BytesMut,
    end_stream: bool,
}

/// RFC 9113 /pseudo-header and forbidden-header validation for a
/// decoded request header list.
fn validate_request_pseudo_headers(headers: &HeaderList) -> Result<(String, String, String, Option<String>), String> {
    let mut method = None;
    let mut scheme = None;
    let mut path = None;
    let mut authority = None;
    let mut seen_regular = false;

    for (name, value) in headers {
        if name.starts_with(':') {
            if seen_regular {
                return Err("pseudo-header after regular header".into());
            }
            match name.as_str() {
                ":method" => method = Some(value.clone()),
                ":scheme" => scheme = Some(value.clone()),
                ":path" => path = Some(value.clone()),
                ":authority" => authority = Some(value.clone()),
                other => return Err(format!("unrecognized pseudo-header {other}")),
            }
        } else {
            seen_regular = true;
            if name.chars().any(|c| c.is_ascii_uppercase()) {
                return Err(format!("uppercase header name {name}"));
            }
            if matches!(name.as_str(), "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "upgrade")
            {
                return Err(format!("forbidden connection-specific header {name}"));
            }
            if name == "te" && value != "trailers" {
                return Err("te header must be 'trailers'".into());
            }
        }
    }

    let method = method.ok_or("missing:method")?;
    let scheme = scheme.ok_or("missing:scheme")?;
    let path = path.ok_or("missing:path")?;
    Ok((method, scheme, path, authority))
}

/// RFC 9113: multiple `cookie` headers are concatenated with `"; "`.
fn concat_cookies(headers: &mut HeaderList) {
    let cookie_values: Vec<String> = headers
        .iter()
        .filter(|(n, _)| n == "cookie")
        .map(|(_, v)| v.clone())
        .collect();
    if cookie_values.len() <= 1 {
        return;
    }
    headers.retain(|(n, _)| n != "cookie");
    headers.push(("cookie".to_string(), cookie_values.join("; ")));
}

/// Applies a SETTINGS parameter to connection-scoped remote settings and,
/// for `initial_window_size`, to every existing stream's send-window.
fn apply_setting(
    settings: &mut Settings,
    id: u16,
    value: u32,
    streams: &mut HashMap<u32, Stream>,
) -> Result<(), Http2Error> {
    match id {
        0x1 => settings.header_table_size = value,
        0x2 => settings.enable_push = value != 0,
        0x3 => settings.max_concurrent_streams = value,
        0x4 => {
            if value > crate::http2::flow::MAX_WINDOW_SIZE as u32 {
                return Err(Http2Error::connection(
                    Http2ErrorCode::FlowControlError,
                    "initial_window_size exceeds maximum",
                ));
            }
            let delta = i64::from(value) - i64::from(settings.initial_window_size);
            for stream in streams.values_mut() {
                stream.send_window.apply_settings_delta(delta);
            }
            settings.initial_window_size = value;
        }
        0x5 => {
            if !(16_384..=16_777_215).contains(&value) {
                return Err(Http2Error::connection(Http2ErrorCode::ProtocolError, "invalid max_frame_size"));
            }
            settings.max_frame_size = value;
        }
        0x6 => settings.max_header_list_size = Some(value),
        _ => {} // unrecognized settings are ignored per RFC 9113
    }
    Ok(())
}

/// Drives one HTTP/2 connection to completion: exchanges preface/SETTINGS,
/// then loops reading frames and dispatching request-complete streams to
/// `handler` on their own task.
pub async fn serve<S>(socket: S, config: Http2Config, handler: Arc<dyn Handler>) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    serve_with_watch(socket, config, handler, crate::fuse::none()).await
}

/// As [`serve`], but fusing the connection (sending GOAWAY and returning)
/// once `watch` decides the connection has stalled — the read-loop's single
/// suspension point doubles as the header-read, body-read, and
/// WINDOW_UPDATE-wait points, since HTTP/2 multiplexes all three onto the
/// same socket read.
pub async fn serve_with_watch<S>(
    mut socket: S,
    config: Http2Config,
    handler: Arc<dyn Handler>,
    watch: crate::fuse::SharedWatch,
) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let local_settings = Settings::from_config(&config);
    socket
        .write_all(&frame::encode_settings(false, &local_settings.as_params()))
        .await?;

    let mut buf = BytesMut::new();
    read_until(&mut socket, &mut buf, HTTP2_PREFACE.len()).await?;
    if &buf[..HTTP2_PREFACE.len()] != HTTP2_PREFACE {
        return Err(Http2Error::connection(Http2ErrorCode::ProtocolError, "bad client preface").into());
    }
    let _ = buf.split_to(HTTP2_PREFACE.len());

    let mut remote_settings = Settings::default();
    let mut streams: HashMap<u32, Stream> = HashMap::new();
    let mut connection_send_window = Window::new(65_535);
    let mut connection_recv_window = Window::new(config.connection_window_high_water_mark);
    let mut hpack_decoder = HpackDecoder::new(local_settings.header_table_size as usize);
    let mut hpack_encoder = HpackEncoder::new(local_settings.header_table_size as usize);
    let mut pending_continuation: Option<PendingContinuation> = None;
    let mut last_remote_stream_id: u32 = 0;

    loop {
        let frame_opt = loop {
            match frame::try_parse_frame(&buf, remote_settings.max_frame_size) {
                Ok(Some((frame, consumed))) => {
                    let _ = buf.split_to(consumed);
                    break Some(frame);
                }
                Ok(None) => {
                    watch.on_event(crate::fuse::FuseEvent::WindowUpdateWait);
                    let mut tmp = [0u8; 8192];
                    let n = tokio::select! {
                        biased;
                        () = watch.should_fuse() => break None,
                        result = socket.read(&mut tmp) => result?,
                    };
                    if n == 0 {
                        break None;
                    }
                    buf.extend_from_slice(&tmp[..n]);
                    watch.on_event(crate::fuse::FuseEvent::Progress);
                }
                Err(e) => return Err(e.into()),
            }
        };
        // Drain each stream's completed response items before handling the
        // next inbound frame, so a slow client doesn't starve responses that
        // are already ready.
        drain_stream_outbound(
            &mut socket,
            &mut streams,
            remote_settings.max_frame_size as usize,
            &mut connection_send_window,
            &mut hpack_encoder,
        )
            .await?;

        let Some(frame) = frame_opt else { break };

        // While a CONTINUATION is pending, only a CONTINUATION on the
        // same stream may follow.
        if let Some(pending) = &pending_continuation {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == pending.stream_id => {}
                _ => {
                    return Err(Http2Error::connection(
                        Http2ErrorCode::ProtocolError,
                        "expected CONTINUATION on pending stream",
                        )
                            .into())
                }
            }
        }

        match frame {
            Frame::Settings { ack, params } => {
                if ack {
                    // client ACKed our SETTINGS; nothing further to do.
                } else {
                    for (id, value) in params {
                        apply_setting(&mut remote_settings, id, value, &mut streams)?;
                    }
                    socket.write_all(&frame::encode_settings(true, &[])).await?;
                }
            }
            Frame::Ping { ack, payload } => {
                if !ack {
                    socket.write_all(&frame::encode_ping(true, payload)).await?;
                }
            }
            Frame::WindowUpdate { stream_id, increment } => {
                if stream_id == 0 {
                    connection_send_window.apply_increment(increment, 0)?;
                } else if let Some(stream) = streams.get_mut(&stream_id) {
                    // A zero-increment or overflowing stream-level
                    // WINDOW_UPDATE is a stream error (RST_STREAM), not a
                    // connection error — only the offending stream dies,
                    // the connection keeps running.
                    if let Err(err) = stream.send_window.apply_increment(increment, stream_id) {
                        match err {
                            Http2Error::Stream { code, .. } => {
                                let _ = stream.outbound_tx.send(StreamOutboundItem::Reset { error_code: code });
                            }
                            connection_err @ Http2Error::Connection { .. } => return Err(connection_err.into()),
                        }
                    }
                }
            }
            Frame::GoAway { last_stream_id, .. } => {
                streams.retain(|id, _| *id <= last_stream_id);
                break;
            }
            Frame::RstStream { stream_id, .. } => {
                if let Some(stream) = streams.get_mut(&stream_id) {
                    stream.on_reset();
                }
            }
            Frame::Priority {.. } => {
                // accepted and ignored: no reprioritization.
            }
            Frame::Headers {
                stream_id,
                header_block,
                end_stream,
                end_headers,
            } => {
                if stream_id <= last_remote_stream_id {
                    return Err(
                        Http2Error::connection(Http2ErrorCode::ProtocolError, "non-increasing stream id").into(),
                    );
                }
                last_remote_stream_id = stream_id;

                if header_block.len() > config.max_header_block_size {
                    return Err(Http2Error::connection(
                        Http2ErrorCode::FrameSizeError,
                        "header block exceeds max_header_block_size",
                    )
                    .into());
                }

                if !end_headers {
                    pending_continuation = Some(PendingContinuation {
                        stream_id,
                        fragment: BytesMut::from(&header_block[..]),
                        end_stream,
                    });
                    continue;
                }

                if streams.len() >= remote_settings.max_concurrent_streams as usize {
                    socket
                        .write_all(&frame::encode_rst_stream(stream_id, Http2ErrorCode::RefusedStream.code()))
                        .await?;
                    continue;
                }

                dispatch_new_stream(
                    stream_id,
                    &header_block,
                    end_stream,
                    &mut hpack_decoder,
                    &mut streams,
                    &local_settings,
                    remote_settings.initial_window_size,
                    handler.clone(),
                )
                    .await?;
            }
            Frame::Continuation {
                stream_id,
                header_block,
                end_headers,
            } => {
                let pending = pending_continuation
                    .as_mut()
                    .filter(|p| p.stream_id == stream_id)
                    .ok_or_else(|| {
                    Http2Error::connection(Http2ErrorCode::ProtocolError, "unexpected CONTINUATION")
                })?;
                pending.fragment.extend_from_slice(&header_block);

                if pending.fragment.len() > config.max_header_block_size {
                    return Err(Http2Error::connection(
                        Http2ErrorCode::FrameSizeError,
                        "accumulated header block exceeds max_header_block_size",
                    )
                    .into());
                }

                if end_headers {
                    let PendingContinuation {
                        stream_id,
                        fragment,
                        end_stream,
                    } = pending_continuation.take().unwrap();

                    if streams.len() >= remote_settings.max_concurrent_streams as usize {
                        socket
                            .write_all(&frame::encode_rst_stream(stream_id, Http2ErrorCode::RefusedStream.code()))
                            .await?;
                        continue;
                    }

                    dispatch_new_stream(
                        stream_id,
                        &fragment,
                        end_stream,
                        &mut hpack_decoder,
                        &mut streams,
                        &local_settings,
                        remote_settings.initial_window_size,
                        handler.clone(),
                    )
                        .await?;
                }
            }
            Frame::Data { stream_id, data, end_stream } => {
                let len = data.len() as u32;
                connection_recv_window.consume_recv(len);
                if let Some(stream) = streams.get_mut(&stream_id) {
                    stream.recv_window.consume_recv(len);
                    stream.on_data_received(data, end_stream)?;
                }

                // Replenish windows once they drop below half the configured
                // high-water mark, so a long request body doesn't stall once
                // the initial window is exhausted.
                let high_water = config.connection_window_high_water_mark;
                if connection_recv_window.available() < i64::from(high_water / 2) {
                    let increment = high_water - u32::try_from(connection_recv_window.available().max(0)).unwrap_or(0);
                    connection_recv_window.apply_increment(increment, 0)?;
                    socket.write_all(&frame::encode_window_update(0, increment)).await?;
                }
                if let Some(stream) = streams.get_mut(&stream_id) {
                    if stream.recv_window.available() < i64::from(local_settings.initial_window_size / 2) {
                        let target = local_settings.initial_window_size;
                        let increment = target - u32::try_from(stream.recv_window.available().max(0)).unwrap_or(0);
                        stream.recv_window.apply_increment(increment, stream_id)?;
                        socket.write_all(&frame::encode_window_update(stream_id, increment)).await?;
                    }
                }
            }
            Frame::PushPromise {.. } => unreachable!("rejected during parse"),
            Frame::Unknown {.. } => {}
        }

        streams.retain(|_, s| !s.is_closed());
    }

    let _ = socket
        .write_all(&frame::encode_goaway(last_remote_stream_id, Http2ErrorCode::NoError.code(), b""))
        .await;
    Ok(())
}

/// Writes as many DATA frames for `data` as the stream/connection send
/// windows currently allow, starting at offset 0. Returns the offset
/// reached — `data.len()` if the whole fragment was written, or a smaller
/// offset if the windows ran out first, in which case the caller is
/// responsible for stashing `data[offset..]` on the stream's
/// `pending-send-queue` rather than discarding it.
async fn send_data_frames<S>(
    socket: &mut S,
    stream_id: u32,
    send_window: &mut Window,
    connection_send_window: &mut Window,
    remote_max_frame_size: usize,
    data: &Bytes,
    end_stream: bool,
) -> crate::Result<usize>
where
    S: AsyncWrite + Unpin,
{
    let mut offset = 0usize;
    while offset < data.len() {
        let window_budget = send_window.available().max(0).min(connection_send_window.available().max(0)) as usize;
        let chunk_len = window_budget.min(remote_max_frame_size).min(data.len() - offset);
        if chunk_len == 0 {
            // Blocked on flow control; the remaining bytes stay with the
            // caller to queue for the next drain once a WINDOW_UPDATE
            // replenishes the window.
            break;
        }
        let chunk = data.slice(offset..offset + chunk_len);
        let is_last = offset + chunk_len == data.len();
        socket
            .write_all(&frame::encode_data(stream_id, &chunk, end_stream && is_last))
            .await?;
        send_window.consume(chunk_len as u32);
        connection_send_window.consume(chunk_len as u32);
        offset += chunk_len;
    }
    Ok(offset)
}

/// Drains every open stream's outbound queue and writes the resulting
/// HEADERS/CONTINUATION/DATA/RST_STREAM frames to the socket, splitting DATA
/// to fit the remote's `max_frame_size` and the connection/stream
/// send-windows. A DATA item only partially writable under the current
/// windows is stashed on `Stream::pending_send` (the §3 "pending-send-queue")
/// and resumed — at its unsent offset, before any newer item — on the next
/// call, once a WINDOW_UPDATE has made room; it is never dropped.
async fn drain_stream_outbound<S>(
    socket: &mut S,
    streams: &mut HashMap<u32, Stream>,
    remote_max_frame_size: usize,
    connection_send_window: &mut Window,
    hpack_encoder: &mut HpackEncoder,
) -> crate::Result<()>
where
    S: AsyncWrite + Unpin,
{
    for stream in streams.values_mut() {
        if let Some((data, end_stream)) = stream.pending_send.take() {
            let offset = send_data_frames(
                socket,
                stream.id,
                &mut stream.send_window,
                connection_send_window,
                remote_max_frame_size,
                &data,
                end_stream,
            )
            .await?;
            if offset < data.len() {
                // Still blocked; don't pull any newer item out of order
                // until this one has fully drained.
                stream.pending_send = Some((data.slice(offset..), end_stream));
                continue;
            }
            if end_stream {
                stream.on_local_end_stream();
            }
        }

        let Some(rx) = stream.outbound_rx.as_mut() else { continue };
        while let Ok(item) = rx.try_recv() {
            match item {
                StreamOutboundItem::Headers { headers, end_stream } => {
                    // Encoded here, on the connection task, with the single
                    // encoder that owns the send-direction dynamic table —
                    // HPACK's dynamic table is shared across the whole
                    // connection, so header blocks for different streams
                    // can't each get their own encoder state once they're
                    // interleaved on the wire.
                    let header_block = hpack_encoder.encode(&headers);
                    for frame in
                    frame::encode_headers_with_continuation(stream.id, &header_block, end_stream, remote_max_frame_size)
                    {
                        socket.write_all(&frame).await?;
                    }
                    if end_stream {
                        stream.on_local_end_stream();
                    }
                }
                StreamOutboundItem::Data { data, end_stream } => {
                    if data.is_empty() {
                        // An empty fragment only carries meaning when it signals
                        // end-of-stream; otherwise there is nothing to write.
                        if end_stream {
                            socket.write_all(&frame::encode_data(stream.id, &[], true)).await?;
                            stream.on_local_end_stream();
                        }
                        continue;
                    }
                    let offset = send_data_frames(
                        socket,
                        stream.id,
                        &mut stream.send_window,
                        connection_send_window,
                        remote_max_frame_size,
                        &data,
                        end_stream,
                    )
                    .await?;
                    if offset < data.len() {
                        // Blocked partway through; queue the remainder and
                        // stop draining this stream so later items can't
                        // jump the FIFO order ahead of it.
                        stream.pending_send = Some((data.slice(offset..), end_stream));
                        break;
                    }
                    if end_stream {
                        stream.on_local_end_stream();
                    }
                }
                StreamOutboundItem::Reset { error_code } => {
                    socket.write_all(&frame::encode_rst_stream(stream.id, error_code.code())).await?;
                    stream.on_reset();
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_new_stream(
    stream_id: u32,
    header_block: &[u8],
    end_stream: bool,
    hpack_decoder: &mut HpackDecoder,
    streams: &mut HashMap<u32, Stream>,
    local_settings: &Settings,
    remote_initial_window: u32,
    handler: Arc<dyn Handler>,
) -> crate::Result<()> {
    let mut headers = hpack_decoder.decode(header_block)?;
    concat_cookies(&mut headers);
    let (method, scheme, path, authority) = validate_request_pseudo_headers(&headers).map_err(|msg| {
        tracing::debug!(stream_id, %msg, "rejecting malformed request headers");
        crate::Error::from(Http2Error::stream(stream_id, Http2ErrorCode::ProtocolError))
    })?;

    let mut stream = Stream::new(stream_id, remote_initial_window, local_settings.initial_window_size);
    stream.on_headers_received(end_stream)?;
    stream.request_headers = Some(headers.clone());

    let inbound_rx = stream.inbound_rx.take();
    let outbound_tx = stream.outbound_tx.clone();
    streams.insert(stream_id, stream);

    tokio::spawn(run_stream_handler(
        method,
        scheme,
        path,
        authority,
        headers,
        inbound_rx,
        outbound_tx,
        handler,
    ));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_stream_handler(
    method: String,
    scheme: String,
    path: String,
    authority: Option<String>,
    headers: HeaderList,
    inbound_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    outbound_tx: mpsc::UnboundedSender<StreamOutboundItem>,
    handler: Arc<dyn Handler>,
) {
    let method = method.parse().unwrap_or(http::Method::GET);
    let mut req = Request::new(method, path, http::Version::HTTP_2);
    req.scheme = scheme;
    req.authority = authority;
    req.headers = headers;
    let req = req.with_body(StreamBodyReader { rx: inbound_rx });

    let outcome = handler.call(req).await;
    match outcome {
        Ok(HandlerOutcome::Response(resp)) => {
            let headers = response_header_list(&resp);
            let body = resp.body;
            match body {
                crate::model::Body::None => {
                    let _ = outbound_tx.send(StreamOutboundItem::Headers { headers, end_stream: true });
                }
                crate::model::Body::Inline(bytes) => {
                    let _ = outbound_tx.send(StreamOutboundItem::Headers { headers, end_stream: false });
                    let _ = outbound_tx.send(StreamOutboundItem::Data { data: bytes, end_stream: true });
                }
                crate::model::Body::File { path, offset, length } => {
                    let _ = outbound_tx.send(StreamOutboundItem::Headers { headers, end_stream: false });
                    match read_file_range(&path, offset, length).await {
                        Ok(bytes) => {
                            let _ = outbound_tx.send(StreamOutboundItem::Data { data: bytes, end_stream: true });
                        }
                        Err(err) => {
                            tracing::warn!(?path, %err, "failed to read file body for http/2 response");
                            let _ = outbound_tx.send(StreamOutboundItem::Reset {
                                error_code: Http2ErrorCode::InternalError,
                            });
                        }
                    }
                }
                crate::model::Body::Chunked(mut stream) => {
                    let _ = outbound_tx.send(StreamOutboundItem::Headers { headers, end_stream: false });
                    loop {
                        match stream.next().await {
                            Some(Ok(chunk)) => {
                                if outbound_tx
                                    .send(StreamOutboundItem::Data { data: chunk, end_stream: false })
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                tracing::warn!(%err, "chunked body stream errored mid-response");
                                let _ = outbound_tx.send(StreamOutboundItem::Reset {
                                    error_code: Http2ErrorCode::InternalError,
                                });
                                return;
                            }
                            None => break,
                        }
                    }
                    let _ = outbound_tx.send(StreamOutboundItem::Data {
                        data: Bytes::new(),
                        end_stream: true,
                    });
                }
            }
        }
        Ok(HandlerOutcome::Upgrade {.. }) => {
            let _ = outbound_tx.send(StreamOutboundItem::Reset {
                error_code: Http2ErrorCode::InternalError,
            });
        }
        Err(_) => {
            let _ = outbound_tx.send(StreamOutboundItem::Reset {
                error_code: Http2ErrorCode::InternalError,
            });
        }
    }
}

/// Builds `:status` plus the response's ordinary headers as an ordered list.
/// HPACK-encoded later by the connection task's single shared encoder,
/// which owns the send-direction dynamic table.
fn response_header_list(resp: &crate::model::Response) -> HeaderList {
    let mut list: HeaderList = vec![(":status".to_string(), resp.status.as_str().to_string())];
    for (name, value) in &resp.headers {
        if let Ok(v) = value.to_str() {
            list.push((name.as_str().to_string(), v.to_string()));
        }
    }
    list
}

struct StreamBodyReader {
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

#[async_trait::async_trait]
impl BodyReader for StreamBodyReader {
    async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
        match &mut self.rx {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }
}

/// Reads a `{path, offset, length}` file range into memory for HTTP/2 DATA
/// framing. Unlike HTTP/1's `send_file` (which can hand the range straight
/// to the transport), an HTTP/2 stream's body must be sliced under flow
/// control alongside every other stream's, so it is buffered here rather
/// than streamed directly to the socket.
async fn read_file_range(path: &std::path::Path, offset: u64, length: u64) -> crate::Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

async fn read_until<S: AsyncRead + Unpin>(socket: &mut S, buf: &mut BytesMut, n: usize) -> crate::Result<()> {
    while buf.len() < n {
        let mut tmp = [0u8; 256];
        let read = socket.read(&mut tmp).await?;
        if read == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        buf.extend_from_slice(&tmp[..read]);
    }
    Ok(())
}
