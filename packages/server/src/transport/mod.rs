//! Network transports.
//!
//! Both transports deliver complete JSON-RPC texts to a [`MessageHandler`]
//! and send back whatever it returns.

pub mod udp;
pub mod websocket;

use std::io;

use async_trait::async_trait;
use thiserror::Error;

/// Seam between a transport and whatever answers its messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Answer one complete message; `None` means send nothing back
    async fn handle(&self, session_id: &str, message: &str) -> Option<String>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Transport is already running")]
    AlreadyRunning,

    #[error("Transport is not running")]
    NotRunning,

    #[error("No peer address known yet")]
    NoPeer,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Message of {size} bytes needs more than {max} fragments")]
    MessageTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
