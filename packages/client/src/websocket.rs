//! stdio ⇄ WebSocket bridge.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    net::TcpStream,
    time::Instant,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{
            HeaderValue, StatusCode,
            header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL},
        },
        protocol::Message,
    },
};

use hostwire_server::transport::websocket::handler::SUBPROTOCOL;

use crate::{
    error::ClientError,
    io::{spawn_line_reader, write_line},
};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_INTERVAL_SECS: u64 = 5;

/// How long to keep reading responses after input closes
pub const DEFAULT_DRAIN_IDLE: Duration = Duration::from_secs(6);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsBridgeConfig {
    pub url: String,
    pub token: Option<String>,
    pub max_attempts: u32,
    pub retry_interval: Duration,
    pub drain_idle: Duration,
}

impl WsBridgeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            retry_interval: Duration::from_secs(RECONNECT_INTERVAL_SECS),
            drain_idle: DEFAULT_DRAIN_IDLE,
        }
    }
}

fn build_request(config: &WsBridgeConfig) -> Result<Request, ClientError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

    let headers = request.headers_mut();
    headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    if let Some(token) = &config.token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(request)
}

/// Connect, retrying up to `max_attempts` times; an auth rejection is final
pub async fn connect_with_retry(config: &WsBridgeConfig) -> Result<WsStream, ClientError> {
    let mut attempt = 0;

    loop {
        attempt += 1;
        tracing::info!(
            "Attempting to connect to {} (attempt {}/{})",
            config.url,
            attempt,
            config.max_attempts
        );

        match connect_async(build_request(config)?).await {
            Ok((stream, _response)) => return Ok(stream),
            Err(tungstenite::Error::Http(response))
                if response.status() == StatusCode::UNAUTHORIZED =>
            {
                return Err(ClientError::Unauthorized);
            }
            Err(e) => {
                tracing::warn!("Connection failed: {}", e);
                if attempt >= config.max_attempts {
                    tracing::error!("Failed to connect after {} attempts. Exiting.", attempt);
                    return Err(ClientError::ConnectFailed(attempt));
                }

                tracing::info!(
                    "Reconnecting in {:?}... (attempt {}/{})",
                    config.retry_interval,
                    attempt + 1,
                    config.max_attempts
                );
                tokio::time::sleep(config.retry_interval).await;
            }
        }
    }
}

/// Forward `input` lines to the server and server messages to `output`
pub async fn run_websocket_bridge<R, W>(
    config: WsBridgeConfig,
    input: R,
    mut output: W,
) -> Result<(), ClientError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut lines = spawn_line_reader(input);
    let stream = connect_with_retry(&config).await?;
    tracing::info!("Connected to {}", config.url);

    let (mut write, mut read) = stream.split();
    let mut input_open = true;
    let mut idle_deadline = Instant::now() + config.drain_idle;

    loop {
        tokio::select! {
            line = lines.recv(), if input_open => match line {
                Some(line) => write.send(Message::Text(line.into())).await?,
                None => {
                    input_open = false;
                    idle_deadline = Instant::now() + config.drain_idle;
                    tracing::debug!("Input closed, draining responses");
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    write_line(&mut output, text.as_str()).await?;
                    idle_deadline = Instant::now() + config.drain_idle;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("Server closed the connection: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            _ = tokio::time::sleep_until(idle_deadline), if !input_open => {
                tracing::debug!("No response for {:?} after input closed", config.drain_idle);
                break;
            }
        }
    }

    let _ = write.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_sets_subprotocol_and_token() {
        // テスト項目: サブプロトコルと Bearer トークンがヘッダに設定される
        // given (前提条件):
        let mut config = WsBridgeConfig::new("ws://127.0.0.1:18081/ws");
        config.token = Some("s3cret".to_string());

        // when (操作):
        let request = build_request(&config).unwrap();

        // then (期待する結果):
        assert_eq!(request.headers()[SEC_WEBSOCKET_PROTOCOL], "mcp");
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer s3cret");
    }

    #[test]
    fn test_build_request_rejects_bad_url() {
        let config = WsBridgeConfig::new("not a url");
        assert!(matches!(
            build_request(&config),
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_attempts() {
        // テスト項目: 接続できない場合、指定回数で諦めて ConnectFailed を返す
        // given (前提条件):
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut config = WsBridgeConfig::new(format!("ws://127.0.0.1:{port}/ws"));
        config.max_attempts = 2;
        config.retry_interval = Duration::from_millis(10);

        // when (操作):
        let result = connect_with_retry(&config).await;

        // then (期待する結果):
        assert!(matches!(result, Err(ClientError::ConnectFailed(2))));
    }
}
