//! stdio ⇄ UDP bridge using the same MCPF codec as the server.

use std::time::Duration;

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    net::{UdpSocket, lookup_host},
    time::Instant,
};

use hostwire_server::{
    config::UdpConfig,
    transport::udp::{
        fragment::{Reassembler, is_fragment, parse_fragment},
        send_to_peer,
    },
};

use crate::{
    error::ClientError,
    io::{spawn_line_reader, write_line},
    websocket::DEFAULT_DRAIN_IDLE,
};

const RECV_BUFFER_SIZE: usize = 65536;

#[derive(Debug, Clone)]
pub struct UdpBridgeConfig {
    /// `host:port` of the server's UDP transport
    pub server: String,
    pub max_fragment_payload: usize,
    pub max_fragments: usize,
    pub max_pending_bytes: usize,
    pub fragment_delay: Duration,
    pub fragment_timeout: Duration,
    pub drain_idle: Duration,
}

impl UdpBridgeConfig {
    pub fn new(server: impl Into<String>) -> Self {
        let defaults = UdpConfig::default();
        Self {
            server: server.into(),
            max_fragment_payload: defaults.max_fragment_payload,
            max_fragments: defaults.max_fragments,
            max_pending_bytes: defaults.max_pending_bytes,
            fragment_delay: defaults.fragment_delay,
            fragment_timeout: defaults.fragment_timeout,
            drain_idle: DEFAULT_DRAIN_IDLE,
        }
    }

    fn send_config(&self) -> UdpConfig {
        UdpConfig {
            max_fragment_payload: self.max_fragment_payload,
            max_fragments: self.max_fragments,
            max_pending_bytes: self.max_pending_bytes,
            fragment_delay: self.fragment_delay,
            fragment_timeout: self.fragment_timeout,
            ..UdpConfig::default()
        }
    }
}

/// Forward `input` lines to the server and its replies to `output`
pub async fn run_udp_bridge<R, W>(
    config: UdpBridgeConfig,
    input: R,
    mut output: W,
) -> Result<(), ClientError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let server = lookup_host(&config.server)
        .await?
        .next()
        .ok_or_else(|| ClientError::Resolve(config.server.clone()))?;
    let socket = UdpSocket::bind(if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }).await?;
    tracing::info!("Sending to {} from {}", server, socket.local_addr()?);

    let send_config = config.send_config();
    let mut reassembler = Reassembler::new(config.max_fragment_payload, config.max_fragments)
        .with_pending_budget(config.max_pending_bytes);
    let mut reaper = tokio::time::interval(Duration::from_secs(1));
    let mut lines = spawn_line_reader(input);
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut input_open = true;
    let mut idle_deadline = Instant::now() + config.drain_idle;

    loop {
        tokio::select! {
            line = lines.recv(), if input_open => match line {
                Some(line) => send_to_peer(&socket, server, line.as_bytes(), &send_config).await?,
                None => {
                    input_open = false;
                    idle_deadline = Instant::now() + config.drain_idle;
                    tracing::debug!("Input closed, draining responses");
                }
            },
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received?;
                let datagram = &buf[..len];
                let message = if is_fragment(datagram) {
                    let accepted = parse_fragment(datagram)
                        .and_then(|fragment| reassembler.accept(fragment, std::time::Instant::now()));
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

                write_line(&mut output, &String::from_utf8_lossy(&message)).await?;
                idle_deadline = Instant::now() + config.drain_idle;
            },
            _ = reaper.tick() => {
                reassembler.evict_stale(std::time::Instant::now(), config.fragment_timeout);
            },
            _ = tokio::time::sleep_until(idle_deadline), if !input_open => {
                tracing::debug!("No response for {:?} after input closed", config.drain_idle);
                break;
            }
        }
    }
    Ok(())
}
