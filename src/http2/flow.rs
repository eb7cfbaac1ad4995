//! Flow-control windows. A window is tracked as a signed value because
//! SETTINGS `initial_window_size` changes can legally drive an existing
//! stream's send-window negative, even though new frames may never be sent
//! while it is negative.

use crate::error::{Http2Error, Http2ErrorCode};

/// The largest legal flow-control window, per RFC 9113: `2^31 - 1`.
pub const MAX_WINDOW_SIZE: i64 = (1u64 << 31) as i64 - 1;

/// A single-direction flow-control window (either send or receive, either
/// connection-level or per-stream).
#[derive(Debug, Clone, Copy)]
pub struct Window {
    size: i64,
}

impl Window {
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self { size: i64::from(initial) }
    }

    #[must_use]
    pub fn available(&self) -> i64 {
        self.size
    }

    /// Consumes `n` bytes of window for an outbound DATA frame. Caller must
    /// have already checked `available() >= n`; this only asserts it.
    pub fn consume(&mut self, n: u32) {
        debug_assert!(self.size >= i64::from(n));
        self.size -= i64::from(n);
    }

    /// Applies a WINDOW_UPDATE increment.
    pub fn apply_increment(&mut self, increment: u32, stream_id: u32) -> Result<(), Http2Error> {
        if increment == 0 {
            let code = Http2ErrorCode::FlowControlError;
            return if stream_id == 0 {
                Err(Http2Error::connection(code, "zero-length connection WINDOW_UPDATE"))
            } else {
                Err(Http2Error::stream(stream_id, code))
            };
        }
        let new_size = self.size + i64::from(increment);
        if new_size > MAX_WINDOW_SIZE {
            let code = Http2ErrorCode::FlowControlError;
            return if stream_id == 0 {
                Err(Http2Error::connection(code, "connection window overflow"))
            } else {
                Err(Http2Error::stream(stream_id, code))
            };
        }
        self.size = new_size;
        Ok(())
    }

    /// Applies a SETTINGS `initial_window_size` delta to an existing
    /// stream's send-window ("apply delta to all existing streams'
    /// send-windows"). May legally drive the window negative.
    pub fn apply_settings_delta(&mut self, delta: i64) {
        self.size += delta;
    }

    /// Decrements for inbound DATA received (receive-window bookkeeping).
    pub fn consume_recv(&mut self, n: u32) {
        self.size -= i64::from(n);
    }

    /// Resets the window to a fresh value (used when (re)creating a stream).
    pub fn reset(&mut self, value: u32) {
        self.size = i64::from(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_window_has_initial_size() {
        let w = Window::new(65_535);
        assert_eq!(w.available(), 65_535);
    }

    #[test]
    fn zero_increment_is_flow_control_error() {
        let mut w = Window::new(100);
        let result = w.apply_increment(0, 1);
        assert!(matches!(
            result,
            Err(Http2Error::Stream { code: Http2ErrorCode::FlowControlError, .. })
        ));
    }

    #[test]
    fn zero_increment_on_stream_zero_is_connection_error() {
        let mut w = Window::new(100);
        let result = w.apply_increment(0, 0);
        assert!(matches!(
            result,
            Err(Http2Error::Connection { code: Http2ErrorCode::FlowControlError, .. })
        ));
    }

    #[test]
    fn overflow_beyond_max_is_flow_control_error() {
        let mut w = Window::new(u32::try_from(MAX_WINDOW_SIZE).unwrap());
        let result = w.apply_increment(1, 1);
        assert!(result.is_err());
    }

    /// Window never goes negative via consume() under legal use.
    #[test]
    fn consume_never_underflows_in_legal_trace() {
        let mut w = Window::new(100);
        assert!(w.available() >= 100);
        w.consume(100);
        assert_eq!(w.available(), 0);
    }

    #[test]
    fn settings_delta_can_drive_window_negative() {
        let mut w = Window::new(100);
        w.apply_settings_delta(-150);
        assert_eq!(w.available(), -50);
    }
}
