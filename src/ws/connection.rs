//! WebSocket Connection driver: owns a socket once it has been switched
//! over from HTTP/1, runs the frame extractor, reassembles messages,
//! drives per-message deflate, and dispatches to a [`WebSocketHandler`].
//! Reads accumulate into a `BytesMut`; each new chunk is re-parsed until a
//! full frame is available, the same buffer-then-parse shape the HTTP/1
//! head parser uses.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::WsConfig;
use crate::error::WsError;
use crate::fuse::{self, FuseEvent, SharedWatch};
use crate::handler::{OutboundMessage, WebSocketHandler};
use crate::ws::deflate::{DeflateContext, DeflateParams};
use crate::ws::frame::{Opcode, encode_frame, try_parse_frame};
use crate::ws::message::{FragmentAccumulator, close_reply_code, parse_close_payload};

/// Lifecycle states of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closing,
    Closed,
}

/// Why the connection ended, handed to [`WebSocketHandler::terminate`].
#[derive(Debug, Clone, Copy)]
pub enum CloseReason {
    /// A close handshake completed normally; carries the code sent to the peer.
    Handshake(u16),
    /// The transport failed or the peer vanished without a close frame (1006,
    /// never put on the wire, Shutdown).
    Abnormal,
}

/// One instance per upgraded connection. Drives the socket until the
/// close handshake completes or the transport fails.
pub struct WsConnection<S> {
    socket: S,
    read_buf: BytesMut,
    config: WsConfig,
    lifecycle: Lifecycle,
    fragments: FragmentAccumulator,
    deflate: Option<(DeflateParams, DeflateContext, DeflateContext)>,
    inbox: mpsc::UnboundedReceiver<OutboundMessage>,
    inbox_tx: mpsc::UnboundedSender<OutboundMessage>,
    watch: SharedWatch,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WsConnection<S> {
    /// Builds a connection from the raw socket and any bytes already read
    /// past the HTTP/1 upgrade response (leftover pipelined WS frames).
    #[must_use]
    pub fn new(socket: S, leftover: BytesMut, config: WsConfig, deflate: Option<DeflateParams>) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let deflate = deflate.map(|params| {
            (
                params,
                DeflateContext::new(params, config.deflate_level),
                DeflateContext::new(params, config.deflate_level),
            )
        });
        Self {
            socket,
            read_buf: leftover,
            config,
            lifecycle: Lifecycle::Open,
            fragments: FragmentAccumulator::new(),
            deflate,
            inbox_tx,
            inbox,
            watch: fuse::none(),
        }
    }

    /// Installs a [`crate::fuse::ConnectionWatch`] to monitor this
    /// connection's frame reads for abuse/idleness beyond its own per-frame
    /// `WsConfig::timeout`.
    #[must_use]
    pub fn with_watch(mut self, watch: SharedWatch) -> Self {
        self.watch = watch;
        self
    }

    /// A handle other tasks can use to push `handle_info` messages into this
    /// connection's inbox ("out-of-band messages arrive via the
    /// per-connection inbox").
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<OutboundMessage> {
        self.inbox_tx.clone()
    }

    /// Runs the connection to completion: `init`, then alternates between
    /// reading frames, dispatching to the handler, and draining the inbox,
    /// until a close handshake or transport failure ends it. Always calls
    /// `terminate` exactly once before returning.
    pub async fn run(mut self, handler: &mut dyn WebSocketHandler) {
        handler.init().await;
        let reason = self.drive(handler).await;
        let code = match reason {
            CloseReason::Handshake(code) => Some(code),
            CloseReason::Abnormal => None,
        };
        handler.terminate(code).await;
        let _ = self.socket.shutdown().await;
    }

    async fn drive(&mut self, handler: &mut dyn WebSocketHandler) -> CloseReason {
        loop {
            if self.lifecycle == Lifecycle::Closed {
                return CloseReason::Handshake(1000);
            }

            tokio::select! {
                biased;
                frame = self.read_frame() => {
                    match frame {
                        Ok(Some((opcode, fin, rsv1, payload))) => {
                            if let Err(reason) = self.handle_frame(handler, opcode, fin, rsv1, payload).await {
                                return reason;
                            }
                        }
                        Ok(None) => return CloseReason::Abnormal,
                        Err(err) => {
                            let code = err.close_code();
                            let _ = self.send_close(code, "").await;
                            return CloseReason::Handshake(code);
                        }
                    }
                }
                Some(message) = self.inbox.recv() => {
                    let pushed = handler.handle_info(message).await;
                    if let Err(reason) = self.push_all(pushed).await {
                        return reason;
                    }
                }
            }
        }
    }

    /// Reads and extracts exactly one complete frame, refilling the buffer
    /// as needed (mirrors `http1::codec::parse_head`'s buffer-then-parse
    /// loop). `Ok(None)` means the peer closed the socket cleanly with no
    /// frame pending.
    async fn read_frame(&mut self) -> Result<Option<(Opcode, bool, bool, Bytes)>, WsError> {
        loop {
            match try_parse_frame(&self.read_buf, self.config.max_frame_size) {
                Ok(Some((frame, consumed))) => {
                    let _ = self.read_buf.split_to(consumed);
                    return Ok(Some((frame.opcode, frame.fin, frame.rsv1, frame.payload)));
                }
                Ok(None) => {
                    self.watch.on_event(FuseEvent::WsFrameRead);
                    let mut tmp = [0u8; 8192];
                    let n = tokio::select! {
                        biased;
                        () = self.watch.should_fuse() => {
                            return Err(WsError::Protocol("idle timeout".into()));
                        }
                        result = timeout(self.config.timeout, self.socket.read(&mut tmp)) => {
                            match result {
                                Ok(Ok(n)) => n,
                                Ok(Err(_)) => return Ok(None),
                                Err(_) => return Err(WsError::Protocol("idle timeout".into())),
                            }
                        }
                    };
                    if n == 0 {
                        return Ok(None);
                    }
                    self.read_buf.extend_from_slice(&tmp[..n]);
                    self.watch.on_event(FuseEvent::Progress);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn handle_frame(
        &mut self,
        handler: &mut dyn WebSocketHandler,
        opcode: Opcode,
        fin: bool,
        rsv1: bool,
        payload: Bytes,
    ) -> Result<(), CloseReason> {
        match opcode {
            Opcode::Ping => {
                let pushed = handler.handle_control(payload.clone(), true).await;
                if self.send_frame(false, Opcode::Pong, &payload).await.is_err() {
                    return Err(CloseReason::Abnormal);
                }
                self.push_all(pushed).await
            }
            Opcode::Pong => {
                let pushed = handler.handle_control(payload, false).await;
                self.push_all(pushed).await
            }
            Opcode::Close => {
                let (code, _reason) = match parse_close_payload(&payload) {
                    Ok(v) => v,
                    Err(err) => {
                        let reply = err.close_code();
                        let _ = self.send_close(reply, "").await;
                        return Err(CloseReason::Handshake(reply));
                    }
                };
                let reply_code = close_reply_code(code);
                let _ = self.send_close(reply_code, "").await;
                self.lifecycle = Lifecycle::Closed;
                Err(CloseReason::Handshake(reply_code))
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                let assembled = self
                    .fragments
                    .push(fin, opcode, payload)
                    .map_err(|err| {
                    CloseReason::Handshake(err.close_code())
                });
                let (is_text, data) = match assembled {
                    Ok(Some(v)) => v,
                    Ok(None) => return Ok(()),
                    Err(reason) => {
                        if let CloseReason::Handshake(code) = reason {
                            let _ = self.send_close(code, "").await;
                        }
                        return Err(reason);
                    }
                };

                let data = if rsv1 {
                    match self.inflate(&data) {
                        Ok(d) => d,
                        Err(_) => {
                            let _ = self.send_close(1007, "").await;
                            return Err(CloseReason::Handshake(1007));
                        }
                    }
                } else {
                    data
                };

                if is_text && self.config.validate_text_frames && std::str::from_utf8(&data).is_err() {
                    let _ = self.send_close(1007, "").await;
                    return Err(CloseReason::Handshake(1007));
                }

                let pushed = handler.handle_in(Bytes::from(data), is_text).await;
                self.push_all(pushed).await
            }
        }
    }

    fn inflate(&mut self, data: &[u8]) -> Result<Vec<u8>, WsError> {
        let Some((_params, _tx, rx)) = &mut self.deflate else {
            return Err(WsError::InvalidPayload("rsv1 set without negotiated deflate".into()));
        };
        rx.inflate_message(data)
    }

    async fn push_all(&mut self, messages: Vec<OutboundMessage>) -> Result<(), CloseReason> {
        for message in messages {
            if self.send_outbound(message).await.is_err() {
                return Err(CloseReason::Abnormal);
            }
        }
        Ok(())
    }

    async fn send_outbound(&mut self, message: OutboundMessage) -> crate::Result<()> {
        match message {
            OutboundMessage::Text(text) => self.send_message(true, text.into_bytes()).await,
            OutboundMessage::Binary(data) => self.send_message(false, data.to_vec()).await,
            OutboundMessage::Ping(data) => self.send_frame(false, Opcode::Ping, &data).await,
            OutboundMessage::Pong(data) => self.send_frame(false, Opcode::Pong, &data).await,
        }
    }

    /// Sends one TEXT/BINARY message, deflating it first if negotiated and
    /// eligible.
    async fn send_message(&mut self, is_text: bool, data: Vec<u8>) -> crate::Result<()> {
        let opcode = if is_text { Opcode::Text } else { Opcode::Binary };
        if let Some((_, tx, _)) = &mut self.deflate {
            let compressed = tx.deflate_message(&data);
            self.send_frame(true, opcode, &compressed).await
        } else {
            self.send_frame(false, opcode, &data).await
        }
    }

    async fn send_frame(&mut self, rsv1: bool, opcode: Opcode, payload: &[u8]) -> crate::Result<()> {
        let frame = encode_frame(true, rsv1, opcode, payload);
        self.socket.write_all(&frame).await?;
        Ok(())
    }

    async fn send_close(&mut self, code: u16, reason: &str) -> crate::Result<()> {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        self.lifecycle = Lifecycle::Closing;
        self.send_frame(false, Opcode::Close, &payload).await
    }
}
