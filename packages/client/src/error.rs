//! Error types for the client bridge.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use hostwire_server::transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Server refused the bearer token
    #[error("Server rejected the authentication token")]
    Unauthorized,

    /// Every connection attempt failed
    #[error("Failed to connect after {0} attempts")]
    ConnectFailed(u32),

    #[error("Invalid server URL or header: {0}")]
    InvalidRequest(String),

    #[error("Could not resolve server address '{0}'")]
    Resolve(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("UDP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
