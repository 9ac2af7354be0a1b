//! Process-wide router service.
//!
//! At most one `RpcRouter` may be alive per process. It owns the dispatcher
//! shared with the transports and the line-delimited stdio control task.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::oneshot,
    task::JoinHandle,
};

use super::Dispatcher;

static ROUTER_ALIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("An RpcRouter already exists in this process")]
    AlreadyExists,

    #[error("Router is already running")]
    AlreadyRunning,
}

struct ControlTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RpcRouter {
    dispatcher: Arc<Dispatcher>,
    control: Mutex<Option<ControlTask>>,
}

impl RpcRouter {
    /// Claim the process-wide router slot
    pub fn new(dispatcher: Arc<Dispatcher>) -> Result<Self, RouterError> {
        ROUTER_ALIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RouterError::AlreadyExists)?;
        tracing::debug!("RpcRouter created");
        Ok(Self {
            dispatcher,
            control: Mutex::new(None),
        })
    }

    /// Dispatcher to hand to the transports
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Thread-safe entry point shared by every transport
    pub async fn handle_request_string(&self, text: &str) -> Option<String> {
        self.dispatcher.handle_request_string(text).await
    }

    /// Serve JSON-RPC over process stdin / stdout
    pub fn start(&self) -> Result<(), RouterError> {
        self.start_with(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }

    /// Serve JSON-RPC over any line-oriented reader / writer pair
    pub fn start_with<R, W>(&self, reader: R, writer: W) -> Result<(), RouterError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.as_ref().is_some_and(|c| !c.handle.is_finished()) {
            return Err(RouterError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(control_loop(dispatcher, reader, writer, shutdown_rx));
        *control = Some(ControlTask { shutdown, handle });
        tracing::info!("JSON-RPC control path started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|c| !c.handle.is_finished())
    }

    /// Signal the control task and wait for it; no-op when not running
    pub async fn stop(&self) {
        let task = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };

        let _ = task.shutdown.send(());
        if let Err(e) = task.handle.await {
            tracing::warn!("JSON-RPC control task ended abnormally: {}", e);
        }
        tracing::info!("JSON-RPC control path stopped");
    }
}

impl Drop for RpcRouter {
    fn drop(&mut self) {
        let task = self
            .control
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            tracing::warn!("RpcRouter dropped while running, aborting control task");
            task.handle.abort();
        }
        ROUTER_ALIVE.store(false, Ordering::Release);
        tracing::debug!("RpcRouter released");
    }
}

async fn control_loop<R, W>(
    dispatcher: Arc<Dispatcher>,
    reader: R,
    mut writer: W,
    mut shutdown: oneshot::Receiver<()>,
) where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Control input closed");
                break;
            }
            Err(e) => {
                tracing::error!("Failed to read control input: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(response) = dispatcher.handle_request_string(line).await else {
            continue;
        };
        let written = async {
            writer.write_all(response.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            tracing::error!("Failed to write control output: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    // The router slot is process-wide; tests touching it take this lock
    static ROUTER_TEST_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(ToolRegistry::new()))
    }

    #[tokio::test]
    async fn test_second_router_is_rejected_until_first_dropped() {
        // テスト項目: ルーターは同時に 1 つしか存在できず、破棄後は再作成できる
        // given (前提条件):
        let _guard = ROUTER_TEST_LOCK.lock().await;
        let first = RpcRouter::new(dispatcher()).unwrap();

        // when (操作):
        let second = RpcRouter::new(dispatcher());
        drop(first);
        let third = RpcRouter::new(dispatcher());

        // then (期待する結果):
        assert_eq!(second.err(), Some(RouterError::AlreadyExists));
        assert!(third.is_ok());
        drop(third);
        assert!(RpcRouter::new(dispatcher()).is_ok());
    }

    #[tokio::test]
    async fn test_control_path_answers_line_delimited_requests() {
        // テスト項目: 行区切りのリクエストに 1 行ずつレスポンスを返す
        // given (前提条件):
        let _guard = ROUTER_TEST_LOCK.lock().await;
        let router = RpcRouter::new(dispatcher()).unwrap();
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        router
            .start_with(BufReader::new(server_read), server_write)
            .unwrap();

        // when (操作):
        client_write
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\n{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"tools/list\"}\n",
            )
            .await
            .unwrap();
        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();

        // then (期待する結果):
        let response: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["id"], 4);
        assert_eq!(response["result"]["tools"], serde_json::json!([]));
        router.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_idempotent() {
        // テスト項目: 2 回目の start は AlreadyRunning、stop は何度呼んでも安全
        // given (前提条件):
        let _guard = ROUTER_TEST_LOCK.lock().await;
        let router = RpcRouter::new(dispatcher()).unwrap();
        let (_client_a, server_a) = tokio::io::duplex(64);
        let (_client_b, server_b) = tokio::io::duplex(64);
        let (read_a, write_a) = tokio::io::split(server_a);
        let (read_b, write_b) = tokio::io::split(server_b);

        // when (操作):
        let first = router.start_with(BufReader::new(read_a), write_a);
        let second = router.start_with(BufReader::new(read_b), write_b);
        let running = router.is_running();
        router.stop().await;
        router.stop().await;

        // then (期待する結果):
        assert!(first.is_ok());
        assert_eq!(second, Err(RouterError::AlreadyRunning));
        assert!(running);
        assert!(!router.is_running());
    }
}
