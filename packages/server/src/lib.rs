//! Hostwire server library.
//!
//! Exposes a JSON-RPC remote-control surface for a single-threaded host
//! application over a WebSocket transport and a fragmenting UDP transport.
//!
//! ## Layers
//!
//! - `deferred`: cross-thread bridge from network tasks to the host thread
//! - `host`: the host-owned patch model, only touched on the host thread
//! - `tools`: domain tool modules and their registry
//! - `rpc`: JSON-RPC envelope handling, the dispatcher and the router service
//! - `transport`: WebSocket session manager and UDP fragment transport

pub mod config;
pub mod deferred;
pub mod host;
pub mod rpc;
pub mod signal;
pub mod tools;
pub mod transport;

pub use config::{BridgeConfig, DispatchMode, UdpConfig, WebSocketConfig};
pub use deferred::{DeferredBridge, DeferredError, HostLoop};
pub use host::HostState;
pub use rpc::{Dispatcher, RpcRouter};
pub use transport::MessageHandler;
pub use tools::ToolRegistry;
