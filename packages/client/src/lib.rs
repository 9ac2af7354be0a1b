//! Hostwire client bridge.
//!
//! Connects a line-delimited JSON-RPC controller on stdin / stdout to a
//! running `hostwire-server`, over WebSocket or over the fragmenting UDP
//! transport.

pub mod error;
pub mod io;
pub mod udp;
pub mod websocket;

pub use error::ClientError;
pub use udp::{UdpBridgeConfig, run_udp_bridge};
pub use websocket::{WsBridgeConfig, run_websocket_bridge};
