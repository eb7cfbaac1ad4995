//! Per-protocol configuration, builder-style: chainable `#[must_use]`
//! setters over plain structs, each implementing `Default` with the
//! RFC-conformant defaults.

use std::time::Duration;

/// HTTP/1 connection configuration.
#[derive(Debug, Clone)]
pub struct Http1Config {
    pub(crate) max_request_line_length: usize,
    pub(crate) max_header_length: usize,
    pub(crate) max_header_count: usize,
    pub(crate) max_requests: usize,
    pub(crate) compress: bool,
    pub(crate) log_protocol_errors: bool,
    pub(crate) gc_every_n_keepalive_requests: usize,
    pub(crate) read_timeout: Duration,
}

impl Default for Http1Config {
    fn default() -> Self {
        Self {
            max_request_line_length: 10_000,
            max_header_length: 10_000,
            max_header_count: 50,
            max_requests: 0,
            compress: true,
            log_protocol_errors: true,
            gc_every_n_keepalive_requests: 5,
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl Http1Config {
    /// Creates a config with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_request_line_length(mut self, v: usize) -> Self {
        self.max_request_line_length = v;
        self
    }

    #[must_use]
    pub fn max_header_length(mut self, v: usize) -> Self {
        self.max_header_length = v;
        self
    }

    #[must_use]
    pub fn max_header_count(mut self, v: usize) -> Self {
        self.max_header_count = v;
        self
    }

    /// `0` means unlimited requests per keep-alive connection.
    #[must_use]
    pub fn max_requests(mut self, v: usize) -> Self {
        self.max_requests = v;
        self
    }

    #[must_use]
    pub fn compress(mut self, v: bool) -> Self {
        self.compress = v;
        self
    }

    /// Whether response compression negotiation is enabled.
    #[must_use]
    pub fn compress_enabled(&self) -> bool {
        self.compress
    }

    #[must_use]
    pub fn log_protocol_errors(mut self, v: bool) -> Self {
        self.log_protocol_errors = v;
        self
    }

    #[must_use]
    pub fn gc_every_n_keepalive_requests(mut self, v: usize) -> Self {
        self.gc_every_n_keepalive_requests = v;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, v: Duration) -> Self {
        self.read_timeout = v;
        self
    }
}

/// HTTP/2 connection configuration.
#[derive(Debug, Clone)]
pub struct Http2Config {
    pub(crate) max_concurrent_streams: u32,
    pub(crate) max_frame_size: u32,
    pub(crate) max_header_block_size: usize,
    pub(crate) initial_window_size: u32,
    pub(crate) max_header_list_size: Option<u32>,
    pub(crate) header_table_size: u32,
    pub(crate) connection_window_high_water_mark: u32,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            max_frame_size: 16_384,
            max_header_block_size: 50_000,
            initial_window_size: 65_535,
            max_header_list_size: None,
            header_table_size: 4096,
            connection_window_high_water_mark: 65_535,
        }
    }
}

impl Http2Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_concurrent_streams(mut self, v: u32) -> Self {
        self.max_concurrent_streams = v;
        self
    }

    #[must_use]
    pub fn max_frame_size(mut self, v: u32) -> Self {
        self.max_frame_size = v;
        self
    }

    #[must_use]
    pub fn max_header_block_size(mut self, v: usize) -> Self {
        self.max_header_block_size = v;
        self
    }

    #[must_use]
    pub fn initial_window_size(mut self, v: u32) -> Self {
        self.initial_window_size = v;
        self
    }

    #[must_use]
    pub fn max_header_list_size(mut self, v: Option<u32>) -> Self {
        self.max_header_list_size = v;
        self
    }

    #[must_use]
    pub fn header_table_size(mut self, v: u32) -> Self {
        self.header_table_size = v;
        self
    }

    #[must_use]
    pub fn connection_window_high_water_mark(mut self, v: u32) -> Self {
        self.connection_window_high_water_mark = v;
        self
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub(crate) compress: bool,
    pub(crate) max_frame_size: usize,
    pub(crate) validate_text_frames: bool,
    pub(crate) timeout: Duration,
    pub(crate) deflate_level: flate2::Compression,
    pub(crate) server_no_context_takeover: bool,
    pub(crate) client_no_context_takeover: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            compress: false,
            max_frame_size: 0,
            validate_text_frames: true,
            timeout: Duration::from_secs(60),
            deflate_level: flate2::Compression::default(),
            server_no_context_takeover: false,
            client_no_context_takeover: false,
        }
    }
}

impl WsConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn compress(mut self, v: bool) -> Self {
        self.compress = v;
        self
    }

    /// `0` means unlimited.
    #[must_use]
    pub fn max_frame_size(mut self, v: usize) -> Self {
        self.max_frame_size = v;
        self
    }

    #[must_use]
    pub fn validate_text_frames(mut self, v: bool) -> Self {
        self.validate_text_frames = v;
        self
    }

    #[must_use]
    pub fn timeout(mut self, v: Duration) -> Self {
        self.timeout = v;
        self
    }

    #[must_use]
    pub fn deflate_level(mut self, v: flate2::Compression) -> Self {
        self.deflate_level = v;
        self
    }

    #[must_use]
    pub fn server_no_context_takeover(mut self, v: bool) -> Self {
        self.server_no_context_takeover = v;
        self
    }

    #[must_use]
    pub fn client_no_context_takeover(mut self, v: bool) -> Self {
        self.client_no_context_takeover = v;
        self
    }
}

/// Top-level configuration bundle handed to a connection driver.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub http1: Http1Config,
    pub http2: Http2Config,
    pub ws: WsConfig,
}

impl ServerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http1_defaults_are_rfc_conformant() {
        let cfg = Http1Config::default();
        assert_eq!(cfg.max_request_line_length, 10_000);
        assert_eq!(cfg.max_header_length, 10_000);
        assert_eq!(cfg.max_header_count, 50);
        assert_eq!(cfg.max_requests, 0);
        assert!(cfg.compress);
    }

    #[test]
    fn http2_defaults_are_rfc_conformant() {
        let cfg = Http2Config::default();
        assert_eq!(cfg.header_table_size, 4096);
        assert_eq!(cfg.max_concurrent_streams, 100);
        assert_eq!(cfg.initial_window_size, 65_535);
        assert_eq!(cfg.max_frame_size, 16_384);
        assert_eq!(cfg.max_header_list_size, None);
    }

    #[test]
    fn builder_methods_chain() {
        let cfg = Http1Config::new().max_requests(100).compress(false);
        assert_eq!(cfg.max_requests, 100);
        assert!(!cfg.compress);
    }
}
