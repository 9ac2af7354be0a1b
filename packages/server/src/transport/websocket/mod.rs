//! WebSocket transport.
//!
//! Every accepted connection becomes a session with its own outbound queue.
//! Inbound frames are answered inline on the session task, or pushed onto a
//! server-wide FIFO drained by a single queue processor.

pub mod handler;
pub mod queue;
pub mod session;

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::{Router, routing::get};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tower_http::trace::TraceLayer;

use crate::config::{DispatchMode, WebSocketConfig};

use self::{
    handler::{WsState, health_check, stopped, websocket_handler},
    queue::queue_processor,
    session::SessionManager,
};
use super::{MessageHandler, TransportError};

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    serve_task: JoinHandle<()>,
    queue_task: Option<JoinHandle<()>>,
}

pub struct WebSocketServer {
    config: WebSocketConfig,
    handler: Arc<dyn MessageHandler>,
    sessions: Arc<SessionManager>,
    running: tokio::sync::Mutex<Option<Running>>,
    active: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl WebSocketServer {
    pub fn new(config: WebSocketConfig, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            config,
            handler,
            sessions: Arc::new(SessionManager::new()),
            running: tokio::sync::Mutex::new(None),
            active: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Bind the listener and start serving; returns the bound address
    pub async fn start(&self) -> Result<SocketAddr, TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);

        let (queue, queue_task) = match self.config.dispatch {
            DispatchMode::Inline => (None, None),
            DispatchMode::Queued => {
                let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
                let task = tokio::spawn(queue_processor(
                    rx,
                    self.handler.clone(),
                    self.sessions.clone(),
                    shutdown_rx.clone(),
                ));
                (Some(tx), Some(task))
            }
        };

        let state = Arc::new(WsState {
            sessions: self.sessions.clone(),
            handler: self.handler.clone(),
            auth_token: self.config.auth_token.clone(),
            auth_timeout: self.config.auth_timeout,
            dispatch: self.config.dispatch,
            queue,
            shutdown: shutdown_rx.clone(),
        });

        let app = Router::new()
            .route("/", get(websocket_handler))
            .route("/ws", get(websocket_handler))
            .route("/api/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(stopped(shutdown_rx))
                .await
            {
                tracing::error!("WebSocket server error: {}", e);
            }
        });

        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        *running = Some(Running {
            local_addr,
            shutdown,
            serve_task,
            queue_task,
        });
        self.active.store(true, Ordering::Release);

        tracing::info!(
            "WebSocket transport listening on {} ({:?} dispatch{})",
            local_addr,
            self.config.dispatch,
            if self.config.auth_token.is_some() { ", auth required" } else { "" }
        );
        tracing::info!("Connect to: ws://{}/ws", local_addr);
        Ok(local_addr)
    }

    /// Close every session and join the serve and queue tasks.
    ///
    /// Returns immediately when not running. Sessions get up to
    /// `shutdown_timeout` to deregister before the serve task is aborted.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        self.active.store(false, Ordering::Release);
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let _ = running.shutdown.send(true);

        let deadline = self.config.shutdown_timeout;
        let drained = tokio::time::timeout(deadline, async {
            while self.sessions.client_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            let remaining = self.sessions.clear().await;
            tracing::warn!("{} session(s) did not close within {:?}", remaining, deadline);
        }

        let mut serve_task = running.serve_task;
        if tokio::time::timeout(deadline, &mut serve_task).await.is_err() {
            tracing::warn!("WebSocket server did not drain within {:?}, aborting", deadline);
            serve_task.abort();
        }
        if let Some(queue_task) = running.queue_task {
            if let Err(e) = queue_task.await {
                tracing::warn!("Queue processor ended abnormally: {}", e);
            }
        }

        tracing::info!("WebSocket transport on {} stopped", running.local_addr);
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn send_to_client(&self, session_id: &str, text: &str) -> Result<(), TransportError> {
        self.sessions.send_to_client(session_id, text).await
    }

    /// Fan `text` out to every live session; returns how many accepted it
    pub async fn broadcast(&self, text: &str) -> usize {
        self.sessions.broadcast(text).await
    }

    pub async fn client_count(&self) -> usize {
        self.sessions.client_count().await
    }

    pub async fn connected_clients(&self) -> Vec<String> {
        self.sessions.connected_clients().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockMessageHandler;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{Message, protocol::frame::coding::CloseCode},
    };

    fn test_config() -> WebSocketConfig {
        WebSocketConfig {
            port: 0,
            shutdown_timeout: Duration::from_millis(500),
            ..WebSocketConfig::default()
        }
    }

    fn echo_handler() -> Arc<dyn MessageHandler> {
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .returning(|session_id, message| Some(format!("{session_id}:{message}")));
        Arc::new(handler)
    }

    async fn wait_for_clients(server: &WebSocketServer, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.client_count().await != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle_is_idempotent() {
        // テスト項目: start の二重呼び出しは AlreadyRunning、stop は何度呼んでも安全
        // given (前提条件):
        let server = WebSocketServer::new(test_config(), echo_handler());

        // when (操作):
        let addr = server.start().await.unwrap();
        let second = server.start().await;
        let running = server.is_running();
        server.stop().await;
        server.stop().await;

        // then (期待する結果):
        assert_ne!(addr.port(), 0);
        assert!(matches!(second, Err(TransportError::AlreadyRunning)));
        assert!(running);
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_inline_reply_and_broadcast() {
        // テスト項目: インライン応答が発信元に返り、ブロードキャストが全セッションに届く
        // given (前提条件):
        let server = WebSocketServer::new(test_config(), echo_handler());
        let addr = server.start().await.unwrap();
        let url = format!("ws://{}/ws", addr);
        let (mut a, _) = connect_async(&url).await.unwrap();
        let (mut b, _) = connect_async(&url).await.unwrap();
        wait_for_clients(&server, 2).await;

        // when (操作):
        a.send(Message::Text("ping".into())).await.unwrap();
        let reply = a.next().await.unwrap().unwrap().into_text().unwrap();
        let delivered = server.broadcast("hello all").await;
        let at_a = a.next().await.unwrap().unwrap().into_text().unwrap();
        let at_b = b.next().await.unwrap().unwrap().into_text().unwrap();

        // then (期待する結果):
        let (session_id, message) = reply.as_str().split_once(':').unwrap();
        assert!(session_id.starts_with("client_"));
        assert_eq!(message, "ping");
        assert!(server.connected_clients().await.contains(&session_id.to_string()));
        assert_eq!(delivered, 2);
        assert_eq!(at_a.as_str(), "hello all");
        assert_eq!(at_b.as_str(), "hello all");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_live_sessions() {
        // テスト項目: stop で接続中のセッションが閉じられ、セッション数が 0 になる
        // given (前提条件):
        let server = WebSocketServer::new(test_config(), echo_handler());
        let addr = server.start().await.unwrap();
        let (mut client, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
        wait_for_clients(&server, 1).await;

        // when (操作):
        server.stop().await;
        let next = tokio::time::timeout(Duration::from_secs(2), client.next()).await.unwrap();

        // then (期待する結果):
        assert!(!matches!(next, Some(Ok(Message::Text(_)))));
        assert_eq!(server.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_silent_sessions_are_closed_after_auth_timeout() {
        // テスト項目: ヘッダも認証フレームも送らないセッションは auth_timeout 後に POLICY で閉じられる
        // given (前提条件):
        let config = WebSocketConfig {
            auth_token: Some("s3cret".to_string()),
            auth_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let server = WebSocketServer::new(config, echo_handler());
        let addr = server.start().await.unwrap();
        let url = format!("ws://{}/ws", addr);
        let mut clients = Vec::new();
        for _ in 0..5 {
            let (client, _) = connect_async(&url).await.unwrap();
            clients.push(client);
        }
        wait_for_clients(&server, 5).await;

        // when (操作):
        let mut close_codes = Vec::new();
        for client in clients.iter_mut() {
            let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .unwrap();
            if let Some(Ok(Message::Close(Some(close)))) = frame {
                close_codes.push(close.code);
            }
        }
        wait_for_clients(&server, 0).await;

        // then (期待する結果):
        assert_eq!(close_codes, vec![CloseCode::Policy; 5]);
        assert_eq!(server.client_count().await, 0);
        server.stop().await;
    }
}
