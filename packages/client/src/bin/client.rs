//! Stdio bridge to a Hostwire server.
//!
//! Reads JSON-RPC requests line by line from stdin, forwards them to the
//! server, and prints every server message on its own line to stdout.
//! Logs go to stderr.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hostwire-client
//! cargo run --bin hostwire-client -- --url ws://127.0.0.1:18081/ws --token s3cret
//! cargo run --bin hostwire-client -- --transport udp --port 18082
//! ```

use clap::{Parser, ValueEnum};
use tokio::io::BufReader;

use hostwire_client::{UdpBridgeConfig, WsBridgeConfig, run_udp_bridge, run_websocket_bridge};
use hostwire_server::config::{DEFAULT_WS_PORT, MAX_UDP_PAYLOAD};
use hostwire_shared::logger::setup_logger;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Ws,
    Udp,
}

#[derive(Parser, Debug)]
#[command(name = "hostwire-client")]
#[command(about = "Bridge stdin / stdout JSON-RPC to a Hostwire server", long_about = None)]
struct Args {
    /// Full WebSocket URL; overrides --host / --port
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port (18081 for ws, 18082 for udp)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Bearer token for WebSocket authentication
    #[arg(short = 't', long)]
    token: Option<String>,

    #[arg(long, value_enum, default_value = "ws")]
    transport: Transport,

    /// Largest UDP payload sent in one datagram
    #[arg(long, default_value_t = MAX_UDP_PAYLOAD)]
    max_fragment_payload: usize,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    let result = match args.transport {
        Transport::Ws => {
            let url = args.url.unwrap_or_else(|| {
                format!(
                    "ws://{}:{}/ws",
                    args.host,
                    args.port.unwrap_or(DEFAULT_WS_PORT)
                )
            });
            let mut config = WsBridgeConfig::new(url);
            config.token = args.token;
            run_websocket_bridge(config, input, output).await
        }
        Transport::Udp => {
            let server = format!("{}:{}", args.host, args.port.unwrap_or(DEFAULT_WS_PORT + 1));
            let mut config = UdpBridgeConfig::new(server);
            config.max_fragment_payload = args.max_fragment_payload;
            run_udp_bridge(config, input, output).await
        }
    };

    if let Err(e) = result {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
    // A blocked stdin read would otherwise hold runtime shutdown open
    std::process::exit(0);
}
