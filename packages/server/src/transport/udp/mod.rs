//! UDP transport with MCPF fragmentation.
//!
//! One socket serves one active peer at a time: the most recent sender
//! address becomes the destination for [`UdpServer::send_message`].

pub mod fragment;

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::{
    net::UdpSocket,
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::config::UdpConfig;

use self::fragment::{Reassembler, encode_fragments, fragment_count, is_fragment, parse_fragment};
use super::{MessageHandler, TransportError};

/// Large enough for any IPv4 UDP datagram
const RECV_BUFFER_SIZE: usize = 65536;

const REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// State shared between the server handle and its tasks
struct Shared {
    peer: Mutex<Option<SocketAddr>>,
    queue: Mutex<VecDeque<String>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
}

impl Shared {
    fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_peer(&self, addr: SocketAddr) {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
    }

    fn handler(&self) -> Option<Arc<dyn MessageHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct Running {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    recv_task: JoinHandle<()>,
    process_task: JoinHandle<()>,
}

pub struct UdpServer {
    config: UdpConfig,
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
    active: AtomicBool,
    socket: RwLock<Option<(Arc<UdpSocket>, SocketAddr)>>,
}

impl UdpServer {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                peer: Mutex::new(None),
                queue: Mutex::new(VecDeque::new()),
                handler: RwLock::new(None),
            }),
            running: tokio::sync::Mutex::new(None),
            active: AtomicBool::new(false),
            socket: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    /// Complete messages go to `handler` instead of the receive queue from now on
    pub fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Bind the socket and spawn the receive and processing tasks
    pub async fn start(&self) -> Result<SocketAddr, TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        let bind_addr = self.config.bind_addr();
        let socket = UdpSocket::bind(&bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (complete_tx, complete_rx) = mpsc::unbounded_channel();

        let recv_task = tokio::spawn(receive_loop(
            socket.clone(),
            self.shared.clone(),
            self.config.clone(),
            complete_tx,
            shutdown_rx.clone(),
        ));
        let process_task = tokio::spawn(process_loop(
            socket.clone(),
            self.shared.clone(),
            self.config.clone(),
            complete_rx,
            shutdown_rx,
        ));

        *self.socket.write().unwrap_or_else(PoisonError::into_inner) =
            Some((socket.clone(), local_addr));
        *running = Some(Running {
            socket,
            local_addr,
            shutdown,
            recv_task,
            process_task,
        });
        self.active.store(true, Ordering::Release);

        tracing::info!("UDP transport listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop both tasks and close the socket; no-op when already stopped
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        self.active.store(false, Ordering::Release);
        *self.socket.write().unwrap_or_else(PoisonError::into_inner) = None;

        let _ = running.shutdown.send(true);
        for (name, task) in [
            ("receive", running.recv_task),
            ("processing", running.process_task),
        ] {
            if let Err(e) = task.await {
                tracing::warn!("UDP {} task ended abnormally: {}", name, e);
            }
        }
        drop(running.socket);

        tracing::info!("UDP transport on {} stopped", running.local_addr);
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, addr)| *addr)
    }

    /// Last address a datagram arrived from
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer()
    }

    /// Send `text` to the last-known peer, fragmenting when needed
    pub async fn send_message(&self, text: &str) -> Result<(), TransportError> {
        let socket = self
            .socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(socket, _)| socket.clone())
            .ok_or(TransportError::NotRunning)?;
        let peer = self.shared.peer().ok_or(TransportError::NoPeer)?;
        send_to_peer(&socket, peer, text.as_bytes(), &self.config).await
    }

    /// Pop the oldest complete message received while no handler was set
    pub fn try_recv_message(&self) -> Option<String> {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Send one payload as a single datagram or as a fragment train
pub async fn send_to_peer(
    socket: &UdpSocket,
    peer: SocketAddr,
    payload: &[u8],
    config: &UdpConfig,
) -> Result<(), TransportError> {
    if payload.len() <= config.max_fragment_payload {
        socket.send_to(payload, peer).await?;
        return Ok(());
    }

    let total = fragment_count(payload.len(), config.max_fragment_payload);
    if total > config.max_fragments {
        return Err(TransportError::MessageTooLarge {
            size: payload.len(),
            max: config.max_fragments,
        });
    }

    let msg_id = fragment::next_message_id();
    let fragments = encode_fragments(&msg_id, payload, config.max_fragment_payload);
    tracing::debug!(
        "Sending {} bytes to {} as {} fragments (id {})",
        payload.len(),
        peer,
        fragments.len(),
        msg_id
    );
    for (i, datagram) in fragments.iter().enumerate() {
        if i > 0 && !config.fragment_delay.is_zero() {
            tokio::time::sleep(config.fragment_delay).await;
        }
        socket.send_to(datagram, peer).await?;
    }
    Ok(())
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    config: UdpConfig,
    complete_tx: mpsc::UnboundedSender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reassembler = Reassembler::new(config.max_fragment_payload, config.max_fragments)
        .with_pending_budget(config.max_pending_bytes);
    let mut reaper = tokio::time::interval(REAPER_INTERVAL);
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let (len, from) = tokio::select! {
            _ = shutdown.changed() => break,
            _ = reaper.tick() => {
                reassembler.evict_stale(Instant::now(), config.fragment_timeout);
                continue;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!("UDP receive failed, stopping receive loop: {}", e);
                    break;
                }
            },
        };

        shared.set_peer(from);
        let datagram = &buf[..len];

        let message = if is_fragment(datagram) {
            let accepted = parse_fragment(datagram)
                .and_then(|fragment| reassembler.accept(fragment, Instant::now()));
            match accepted {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Dropping fragment from {}: {}", from, e);
                    continue;
                }
            }
        } else {
            datagram.to_vec()
        };

        let text = match String::from_utf8(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Dropping non UTF-8 message from {}: {}", from, e);
                continue;
            }
        };
        tracing::debug!("Received {} byte message from {}", text.len(), from);

        if shared.handler().is_some() {
            if complete_tx.send(text).is_err() {
                tracing::error!("UDP processing task is gone, stopping receive loop");
                break;
            }
        } else {
            shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(text);
        }
    }
}

async fn process_loop(
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    config: UdpConfig,
    mut complete_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            message = complete_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let Some(handler) = shared.handler() else {
            continue;
        };
        let Some(peer) = shared.peer() else {
            continue;
        };

        let Some(response) = handler.handle(&peer.to_string(), &message).await else {
            continue;
        };
        // Reply goes to whoever spoke last, which may differ from the requester
        let target = shared.peer().unwrap_or(peer);
        if let Err(e) = send_to_peer(&socket, target, response.as_bytes(), &config).await {
            tracing::warn!("Failed to send UDP response to {}: {}", target, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockMessageHandler;

    fn test_config() -> UdpConfig {
        UdpConfig {
            port: 0,
            ..UdpConfig::default()
        }
    }

    async fn client_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    async fn wait_for_message(server: &UdpServer) -> String {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(message) = server.try_recv_message() {
                    return message;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle_is_idempotent() {
        // テスト項目: start の二重呼び出しは AlreadyRunning、stop は何度呼んでも安全
        // given (前提条件):
        let server = UdpServer::new(test_config());

        // when (操作):
        let addr = server.start().await.unwrap();
        let second = server.start().await;
        let running = server.is_running();
        server.stop().await;
        server.stop().await;

        // then (期待する結果):
        assert!(matches!(second, Err(TransportError::AlreadyRunning)));
        assert!(running);
        assert_ne!(addr.port(), 0);
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        // テスト項目: 使用中のポートへの bind 失敗が start の呼び出し元に返る
        // given (前提条件):
        let first = UdpServer::new(test_config());
        let addr = first.start().await.unwrap();
        let second = UdpServer::new(UdpConfig {
            port: addr.port(),
            ..UdpConfig::default()
        });

        // when (操作):
        let result = second.start().await;

        // then (期待する結果):
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(!second.is_running());
        assert!(first.is_running());
        first.stop().await;
    }

    #[tokio::test]
    async fn test_send_without_peer_fails() {
        // テスト項目: 送信元が未確定の状態での送信は NoPeer になる
        // given (前提条件):
        let server = UdpServer::new(test_config());
        let before_start = server.send_message("x").await;
        server.start().await.unwrap();

        // when (操作):
        let result = server.send_message("{}").await;

        // then (期待する結果):
        assert!(matches!(before_start, Err(TransportError::NotRunning)));
        assert!(matches!(result, Err(TransportError::NoPeer)));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_unfragmented_message_is_queued_without_handler() {
        // テスト項目: ハンドラ未設定時、受信メッセージはキューに積まれる
        // given (前提条件):
        let server = UdpServer::new(test_config());
        let addr = server.start().await.unwrap();
        let client = client_socket().await;

        // when (操作):
        client.send_to(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#, addr).await.unwrap();
        let message = wait_for_message(&server).await;

        // then (期待する結果):
        assert_eq!(message, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        assert_eq!(server.peer_addr(), Some(client.local_addr().unwrap()));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_out_of_order_fragments_are_reassembled() {
        // テスト項目: 逆順で届いたフラグメントが 1 つのメッセージに復元される
        // given (前提条件):
        let server = UdpServer::new(UdpConfig {
            max_fragment_payload: 8,
            ..test_config()
        });
        let addr = server.start().await.unwrap();
        let client = client_socket().await;
        let text = "0123456789abcdefghijklmnopqrstuvwxyz";
        let mut fragments = encode_fragments("t1", text.as_bytes(), 8);
        fragments.reverse();

        // when (操作):
        for datagram in &fragments {
            client.send_to(datagram, addr).await.unwrap();
        }
        let message = wait_for_message(&server).await;

        // then (期待する結果):
        assert_eq!(fragments.len(), 5);
        assert_eq!(message, text);
        assert!(server.try_recv_message().is_none());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_handler_response_is_sent_to_peer() {
        // テスト項目: ハンドラの戻り値が送信元アドレスへ返送される
        // given (前提条件):
        let server = UdpServer::new(test_config());
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .withf(|_, message| message == "hello")
            .times(1)
            .returning(|_, _| Some("world".to_string()));
        server.set_message_handler(Arc::new(handler));
        let addr = server.start().await.unwrap();
        let client = client_socket().await;

        // when (操作):
        client.send_to(b"hello", addr).await.unwrap();
        let mut buf = vec![0u8; 1024];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        // then (期待する結果):
        assert_eq!(&buf[..len], b"world");
        assert_eq!(from, addr);
        assert!(server.try_recv_message().is_none());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_large_response_is_fragmented() {
        // テスト項目: 上限を超える送信はヘッダ付きフラグメント列に分割される
        // given (前提条件):
        let server = UdpServer::new(UdpConfig {
            max_fragment_payload: 10,
            fragment_delay: Duration::ZERO,
            ..test_config()
        });
        let addr = server.start().await.unwrap();
        let client = client_socket().await;
        client.send_to(b"hi", addr).await.unwrap();
        wait_for_message(&server).await;

        // when (操作):
        server.send_message("abcdefghijklmnopqrstuvwxy").await.unwrap();
        let mut reassembler = Reassembler::new(10, 256);
        let mut buf = vec![0u8; 1024];
        let mut received = 0;
        let message = loop {
            let (len, _) = client.recv_from(&mut buf).await.unwrap();
            received += 1;
            let fragment = parse_fragment(&buf[..len]).unwrap();
            if let Some(message) = reassembler.accept(fragment, Instant::now()).unwrap() {
                break message;
            }
        };

        // then (期待する結果):
        assert_eq!(received, 3);
        assert_eq!(message, b"abcdefghijklmnopqrstuvwxy");
        server.stop().await;
    }
}
