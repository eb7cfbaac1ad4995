//! Connection abuse/idle protection: an event-driven watch trait plus a
//! default idle-timeout implementation, wired into the HTTP/1, HTTP/2, and
//! WebSocket drivers at each suspension point (header read, body read,
//! WINDOW_UPDATE wait, WS frame read).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

/// A point in a driver's read loop where it is about to suspend waiting for
/// more bytes, reported to a [`ConnectionWatch`] so it can reset its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuseEvent {
    /// Waiting for a request/response head (HTTP/1) or a HEADERS frame
    /// (HTTP/2).
    HeaderRead,
    /// Waiting for more request/response body bytes.
    BodyRead,
    /// Waiting for peer WINDOW_UPDATE before more DATA can be sent.
    WindowUpdateWait,
    /// Waiting for the next WebSocket frame.
    WsFrameRead,
    /// Bytes were actually read or written; the connection made progress.
    Progress,
}

/// Observes connection activity and decides when a stalled connection
/// should be torn down. Implementations must be cheap to call from `on_event`
/// since drivers call it on every suspension point, not just periodically.
#[async_trait::async_trait]
pub trait ConnectionWatch: Send + Sync {
    /// Records that `event` occurred (or is about to be waited on).
    fn on_event(&self, event: FuseEvent);

    /// Resolves once the connection should be fused (torn down). A watch
    /// that never fuses must await a future that never resolves, not return
    /// immediately.
    async fn should_fuse(&self);
}

/// A [`ConnectionWatch`] that never fuses a connection; the default when no
/// abuse protection beyond the driver's own per-read timeout is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverFuse;

#[async_trait::async_trait]
impl ConnectionWatch for NeverFuse {
    fn on_event(&self, _event: FuseEvent) {}

    async fn should_fuse(&self) {
        std::future::pending::<()>().await;
    }
}

/// Fuses a connection that goes `idle_timeout` without reporting any event.
/// Each [`ConnectionWatch::on_event`] call resets the clock; `should_fuse`
/// resolves once it has been `idle_timeout` since the last one.
pub struct IdleTimeoutWatch {
    idle_timeout: Duration,
    notify: Notify,
    last: Mutex<Instant>,
}

impl IdleTimeoutWatch {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            notify: Notify::new(),
            last: Mutex::new(Instant::now()),
        }
    }
}

#[async_trait::async_trait]
impl ConnectionWatch for IdleTimeoutWatch {
    fn on_event(&self, _event: FuseEvent) {
        *self.last.lock() = Instant::now();
        self.notify.notify_waiters();
    }

    async fn should_fuse(&self) {
        loop {
            let elapsed = self.last.lock().elapsed();
            if elapsed >= self.idle_timeout {
                return;
            }
            let remaining = self.idle_timeout - elapsed;
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = self.notify.notified() => {}
            }
        }
    }
}

/// A type-erased, shareable watch handle, the form drivers actually store.
pub type SharedWatch = Arc<dyn ConnectionWatch>;

/// Builds the default watch for a driver that was not handed one explicitly:
/// a [`NeverFuse`], matching each driver's existing per-read `timeout()` call
/// as the sole abuse protection unless a caller opts into `IdleTimeoutWatch`.
#[must_use]
pub fn none() -> SharedWatch {
    Arc::new(NeverFuse)
}
