//! Plain configuration structs for the transports and the deferred bridge.
//!
//! Binaries fill these from command-line flags; embedding code can use the
//! `Default` impls directly.

use std::time::Duration;

/// Default WebSocket listen port
pub const DEFAULT_WS_PORT: u16 = 18081;

/// Largest payload carried by a single UDP datagram before fragmenting
pub const MAX_UDP_PAYLOAD: usize = 60000;

/// Upper bound on fragments per reassembled UDP message
pub const DEFAULT_MAX_FRAGMENTS: usize = 256;

/// Bytes all incomplete UDP messages may reserve together
pub const DEFAULT_MAX_PENDING_BYTES: usize = 64 * 1024 * 1024;

/// How long a deferred host call may wait before failing
pub const DEFAULT_DEFER_TIMEOUT: Duration = Duration::from_millis(5000);

/// How the WebSocket transport answers inbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Dispatch on the session's own receive task and reply immediately
    #[default]
    Inline,
    /// Push onto the server-wide FIFO and reply from the queue processor
    Queued,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret expected as a bearer header or first `{"auth":..}` frame
    pub auth_token: Option<String>,
    /// How long a session without a bearer header may take to send its auth frame
    pub auth_timeout: Duration,
    pub dispatch: DispatchMode,
    /// Upper bound on waiting for sessions to deregister during `stop()`
    pub shutdown_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_WS_PORT,
            auth_token: None,
            auth_timeout: Duration::from_secs(5),
            dispatch: DispatchMode::Inline,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl WebSocketConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub host: String,
    pub port: u16,
    pub max_fragment_payload: usize,
    pub max_fragments: usize,
    pub max_pending_bytes: usize,
    /// Incomplete assemblies idle longer than this are evicted
    pub fragment_timeout: Duration,
    /// Pause between consecutive outbound fragments
    pub fragment_delay: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_WS_PORT + 1,
            max_fragment_payload: MAX_UDP_PAYLOAD,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            fragment_timeout: Duration::from_secs(10),
            fragment_delay: Duration::from_millis(1),
        }
    }
}

impl UdpConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BridgeConfig {
    pub defer_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            defer_timeout: DEFAULT_DEFER_TIMEOUT,
        }
    }
}
