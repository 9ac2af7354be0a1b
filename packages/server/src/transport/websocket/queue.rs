//! Server-wide FIFO for the queued dispatch path.
//!
//! Requests from every session share one queue and are answered strictly in
//! arrival order, so one session's request can wait behind another's.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use hostwire_shared::time::{get_timestamp_millis, millis_since};

use crate::{
    rpc::{codes, envelope::Response},
    transport::MessageHandler,
};

use super::session::SessionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    pub session_id: String,
    pub message: String,
    /// Unix milliseconds when the frame arrived
    pub received_at: i64,
}

impl QueuedRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            received_at: get_timestamp_millis(),
        }
    }
}

pub type RequestQueue = mpsc::UnboundedSender<QueuedRequest>;

/// Drain the queue until it closes or shutdown is signalled
pub async fn queue_processor(
    mut rx: mpsc::UnboundedReceiver<QueuedRequest>,
    handler: Arc<dyn MessageHandler>,
    sessions: Arc<SessionManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.changed() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let QueuedRequest {
            session_id,
            message,
            received_at,
        } = request;
        tracing::debug!(
            "Dispatching request from '{}' after {} ms in queue",
            session_id,
            millis_since(received_at)
        );

        let response = match serde_json::from_str::<Value>(&message) {
            Ok(_) => handler.handle(&session_id, &message).await,
            Err(e) => {
                tracing::warn!("Queued message from '{}' is not JSON: {}", session_id, e);
                Some(
                    Response::error(Value::Null, codes::PARSE_ERROR, format!("Parse error: {e}"))
                        .to_json_string(),
                )
            }
        };

        let Some(response) = response else {
            continue;
        };
        if let Err(e) = sessions.send_to_client(&session_id, &response).await {
            // the session may have closed while its request waited
            tracing::debug!("Dropping response for '{}': {}", session_id, e);
        }
    }
    tracing::debug!("Queue processor stopped");
}
