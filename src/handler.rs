//! The handler contracts a caller implements: an `#[async_trait]`
//! object-safe trait invoked by the pipeline, not a framework-specific
//! middleware chain.

use bytes::Bytes;

use crate::model::{Request, Response};

/// What a [`Handler`] returns: either a normal response, or a request to
/// switch the connection to a WebSocket, which is only legal on HTTP/1.1
///. The type itself makes "anything else" unrepresentable.
pub enum HandlerOutcome {
    /// A normal HTTP response to commit through the transport.
    Response(Response),
    /// Switch the connection to a WebSocket after a 101 response; carries the
    /// socket handler and options to drive it with.
    Upgrade {
        response: Response,
        handler: Box<dyn WebSocketHandler>,
    },
}

impl HandlerOutcome {
    #[must_use]
    pub fn response(resp: Response) -> Self {
        Self::Response(resp)
    }

    #[must_use]
    pub fn upgrade(response: Response, handler: impl WebSocketHandler + 'static) -> Self {
        Self::Upgrade {
            response,
            handler: Box::new(handler),
        }
    }
}

/// The request-side handler contract: given a read-only request view and
/// a blocking body reader, produce a response or a WebSocket upgrade.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Handles one fully parsed request. Errors are caught by the pipeline,
    /// mapped to a fallback status (default 500) if no response has yet been
    /// committed, and then propagated so a supervisor can observe them.
    async fn call(&self, req: Request) -> crate::Result<HandlerOutcome>;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync,
Fut: std::future::Future<Output = crate::Result<HandlerOutcome>> + Send,
{
    async fn call(&self, req: Request) -> crate::Result<HandlerOutcome> {
        (self)(req).await
    }
}

/// A single outbound WebSocket message a socket handler wants to push.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
}

/// The socket handler contract: lifecycle callbacks invoked by the
/// WebSocket connection driver. Implementations own their state; the driver
/// never shares it across tasks.
#[async_trait::async_trait]
pub trait WebSocketHandler: Send {
    /// Called once the upgrade completes, before any frames are exchanged.
    async fn init(&mut self);

    /// A complete TEXT or BINARY message was reassembled.
    async fn handle_in(&mut self, data: Bytes, is_text: bool) -> Vec<OutboundMessage>;

    /// A PING or PONG control frame arrived (the PONG reply to PING is sent
    /// by the driver itself regardless of this callback,).
    async fn handle_control(&mut self, _data: Bytes, _is_ping: bool) -> Vec<OutboundMessage> {
        Vec::new()
    }

    /// An out-of-band message arrived via the per-connection inbox: some
    /// other task asked this connection to push data.
    async fn handle_info(&mut self, _message: OutboundMessage) -> Vec<OutboundMessage> {
        Vec::new()
    }

    /// The connection is closing; `reason` is `Some(close_code)` on a normal
    /// close handshake or `None` on abnormal closure (1006,).
    async fn terminate(&mut self, _reason: Option<u16>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Version};

    struct Echo;

    #[async_trait::async_trait]
    impl Handler for Echo {
        async fn call(&self, _req: Request) -> crate::Result<HandlerOutcome> {
            Ok(HandlerOutcome::response(Response::ok()))
        }
    }

    #[tokio::test]
    async fn handler_trait_object_is_callable() {
        let h: Box<dyn Handler> = Box::new(Echo);
        let req = Request::new(Method::GET, "/", Version::HTTP_11);
        let outcome = h.call(req).await.unwrap();
        match outcome {
            HandlerOutcome::Response(resp) => assert_eq!(resp.status, http::StatusCode::OK),
            HandlerOutcome::Upgrade {.. } => panic!("unexpected upgrade"),
        }
    }

    #[tokio::test]
    async fn closure_implements_handler() {
        let h = |req: Request| async move {
            assert_eq!(req.method, Method::GET);
            Ok(HandlerOutcome::response(Response::ok()))
        };
        let req = Request::new(Method::GET, "/", Version::HTTP_11);
        h.call(req).await.unwrap();
    }
}
