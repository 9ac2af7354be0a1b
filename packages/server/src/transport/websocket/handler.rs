//! HTTP upgrade and per-connection tasks.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json,
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::{config::DispatchMode, transport::MessageHandler};

use super::{
    queue::{QueuedRequest, RequestQueue},
    session::SessionManager,
};

/// Sub-protocol offered by MCP clients
pub const SUBPROTOCOL: &str = "mcp";

/// Shared application state for the WebSocket routes
pub struct WsState {
    pub sessions: Arc<SessionManager>,
    pub handler: Arc<dyn MessageHandler>,
    pub auth_token: Option<String>,
    /// How long a header-less session may wait before sending its auth frame
    pub auth_timeout: Duration,
    pub dispatch: DispatchMode,
    /// Present only in queued mode
    pub queue: Option<RequestQueue>,
    pub shutdown: watch::Receiver<bool>,
}

/// First-frame authentication payload
#[derive(Debug, Deserialize)]
struct AuthFrame {
    auth: String,
}

/// Outcome of checking the `Authorization` header before upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderAuth {
    /// No token configured or the bearer token matched
    Granted,
    /// Token configured but no header sent; the first frame must carry it
    Deferred,
    Rejected,
}

fn check_header(headers: &HeaderMap, auth_token: Option<&str>) -> HeaderAuth {
    let Some(expected) = auth_token else {
        return HeaderAuth::Granted;
    };
    let Some(value) = headers.get(AUTHORIZATION) else {
        return HeaderAuth::Deferred;
    };

    match value.to_str().ok().and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) if token == expected => HeaderAuth::Granted,
        _ => HeaderAuth::Rejected,
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<WsState>>,
) -> Result<impl IntoResponse, StatusCode> {
    let authenticated = match check_header(&headers, state.auth_token.as_deref()) {
        HeaderAuth::Granted => true,
        HeaderAuth::Deferred => false,
        HeaderAuth::Rejected => {
            tracing::warn!("Rejecting WebSocket upgrade from {}: bad Authorization header", peer_addr);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    Ok(ws
        .protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state, peer_addr, authenticated)))
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<WsState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.client_count().await,
    }))
}

/// Forward queued outbound text to this session's socket
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    })
}

/// Resolves once the server starts shutting down
pub(super) async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Validate a first-frame `{"auth": ...}` message
fn first_frame_matches(text: &str, expected: Option<&str>) -> bool {
    match (serde_json::from_str::<AuthFrame>(text), expected) {
        (Ok(frame), Some(expected)) => frame.auth == expected,
        _ => false,
    }
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<WsState>,
    peer_addr: SocketAddr,
    authenticated: bool,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();

    let session_id = state.sessions.register(tx.clone(), peer_addr, authenticated).await;
    tracing::info!(
        "Session '{}' connected from {}{}",
        session_id,
        peer_addr,
        if authenticated { "" } else { ", awaiting auth frame" }
    );

    if !authenticated {
        let first = tokio::select! {
            first = tokio::time::timeout(state.auth_timeout, receiver.next()) => {
                first.unwrap_or_else(|_| {
                    tracing::warn!(
                        "Session '{}' sent no auth frame within {:?}",
                        session_id,
                        state.auth_timeout
                    );
                    None
                })
            }
            _ = stopped(state.shutdown.clone()) => None,
        };
        let granted = matches!(
            &first,
            Some(Ok(Message::Text(text)))
                if first_frame_matches(text.as_str(), state.auth_token.as_deref())
        );
        if !granted {
            tracing::warn!("Session '{}' failed authentication, closing", session_id);
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "authentication failed".into(),
                })))
                .await;
            state.sessions.unregister(&session_id).await;
            return;
        }
        state.sessions.set_authenticated(&session_id).await;
        tracing::info!("Session '{}' authenticated", session_id);
    }

    let state_clone = state.clone();
    let recv_session_id = session_id.clone();

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!("WebSocket error on '{}': {}", recv_session_id, e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    tracing::debug!("Received {} bytes from '{}'", text.len(), recv_session_id);
                    dispatch(&state_clone, &recv_session_id, text.as_str(), &tx).await;
                }
                Message::Ping(_) => {
                    tracing::trace!("Received ping");
                }
                Message::Close(_) => {
                    tracing::info!("Session '{}' requested close", recv_session_id);
                    break;
                }
                _ => {}
            }
        }
    });

    let mut send_task = pusher_loop(rx, sender);

    // If any one of the tasks completes, abort the other
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
        _ = stopped(state.shutdown.clone()) => {
            recv_task.abort();
            send_task.abort();
        }
    };

    match state.sessions.unregister(&session_id).await {
        Some(session) => tracing::info!(
            "Session '{}' from {} disconnected after {} ms",
            session.id,
            session.peer_addr,
            session.uptime_millis()
        ),
        None => tracing::info!("Session '{}' disconnected", session_id),
    }
}

async fn dispatch(
    state: &WsState,
    session_id: &str,
    text: &str,
    outbound: &mpsc::UnboundedSender<String>,
) {
    match (&state.dispatch, &state.queue) {
        (DispatchMode::Queued, Some(queue)) => {
            let request = QueuedRequest::new(session_id, text);
            if queue.send(request).is_err() {
                tracing::warn!("Request queue closed, dropping message from '{}'", session_id);
            }
        }
        _ => {
            let Some(response) = state.handler.handle(session_id, text).await else {
                return;
            };
            if outbound.send(response).is_err() {
                tracing::debug!("Session '{}' closed before its response was sent", session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_check_header() {
        // テスト項目: Authorization ヘッダの有無と一致で認証結果が決まる
        // given (前提条件):
        let token = Some("s3cret");

        // when (操作):
        let no_token = check_header(&headers(Some("Bearer nope")), None);
        let matched = check_header(&headers(Some("Bearer s3cret")), token);
        let wrong = check_header(&headers(Some("Bearer nope")), token);
        let not_bearer = check_header(&headers(Some("s3cret")), token);
        let missing = check_header(&headers(None), token);

        // then (期待する結果):
        assert_eq!(no_token, HeaderAuth::Granted);
        assert_eq!(matched, HeaderAuth::Granted);
        assert_eq!(wrong, HeaderAuth::Rejected);
        assert_eq!(not_bearer, HeaderAuth::Rejected);
        assert_eq!(missing, HeaderAuth::Deferred);
    }

    #[test]
    fn test_first_frame_matches() {
        assert!(first_frame_matches(r#"{"auth":"s3cret"}"#, Some("s3cret")));
        assert!(!first_frame_matches(r#"{"auth":"nope"}"#, Some("s3cret")));
        assert!(!first_frame_matches(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#, Some("s3cret")));
        assert!(!first_frame_matches("not json", Some("s3cret")));
    }
}
