//! Hostwire remote-control server.
//!
//! Runs a simulated patch host on the main thread and serves its tools over
//! WebSocket, optionally UDP, and optionally line-delimited JSON-RPC on
//! stdin / stdout.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hostwire-server
//! cargo run --bin hostwire-server -- --port 18081 --udp-port 18082 --patch synth.maxpat
//! cargo run --bin hostwire-server -- --stdio --auth-token s3cret --dispatch queued
//! ```

use std::{sync::Arc, thread, time::Duration};

use clap::{Parser, ValueEnum};

use hostwire_server::{
    BridgeConfig, DispatchMode, Dispatcher, HostState, RpcRouter, ToolRegistry, UdpConfig,
    WebSocketConfig, config, deferred, signal::shutdown_signal,
    tools::HostBridge,
    transport::{udp::UdpServer, websocket::WebSocketServer},
};
use hostwire_shared::{console::ConsoleLog, logger::setup_logger};

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DispatchArg {
    Inline,
    Queued,
}

impl From<DispatchArg> for DispatchMode {
    fn from(arg: DispatchArg) -> Self {
        match arg {
            DispatchArg::Inline => DispatchMode::Inline,
            DispatchArg::Queued => DispatchMode::Queued,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hostwire-server")]
#[command(about = "Remote-control JSON-RPC server over WebSocket and UDP", long_about = None)]
struct Args {
    /// Host address to bind both transports to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// WebSocket port
    #[arg(short = 'p', long, default_value_t = config::DEFAULT_WS_PORT)]
    port: u16,

    /// UDP port; the UDP transport is disabled when omitted
    #[arg(long)]
    udp_port: Option<u16>,

    /// Shared secret required from WebSocket clients
    #[arg(long)]
    auth_token: Option<String>,

    /// Milliseconds a client without an Authorization header has to send its auth frame
    #[arg(long, default_value_t = 5000)]
    auth_timeout_ms: u64,

    /// How WebSocket requests are answered
    #[arg(long, value_enum, default_value = "inline")]
    dispatch: DispatchArg,

    /// Milliseconds a tool may wait for the host thread
    #[arg(long, default_value_t = 5000)]
    defer_timeout_ms: u64,

    /// Largest UDP payload sent in one datagram
    #[arg(long, default_value_t = config::MAX_UDP_PAYLOAD)]
    max_fragment_payload: usize,

    /// Seconds before an incomplete UDP message is discarded
    #[arg(long, default_value_t = 10)]
    fragment_timeout_secs: u64,

    /// Also serve JSON-RPC on stdin / stdout
    #[arg(long)]
    stdio: bool,

    /// Patch to open at startup (repeatable)
    #[arg(long = "patch")]
    patches: Vec<String>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    let patches = if args.patches.is_empty() {
        vec!["Untitled".to_string()]
    } else {
        args.patches.clone()
    };
    let host = HostState::with_patches(&patches);
    for patch in host.patches() {
        tracing::info!("Patch '{}' opened as {}", patch.display_name, patch.patch_id);
    }

    let (bridge, host_loop) = deferred::channel(host);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("hostwire-net")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to build async runtime: {}", e);
            std::process::exit(1);
        }
    };

    // Network side on its own thread; the main thread is the host thread
    let network = thread::spawn(move || {
        let result = runtime.block_on(serve(args, bridge));
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
        result
    });

    let host = host_loop.run();
    tracing::info!("Host loop exited with {} open patch(es)", host.patches().len());

    match network.join() {
        Ok(Ok(())) => tracing::info!("Server shutdown complete"),
        Ok(Err(e)) => {
            tracing::error!("Server error: {}", e);
            std::process::exit(1);
        }
        Err(_) => {
            tracing::error!("Network thread panicked");
            std::process::exit(1);
        }
    }
}

async fn serve(args: Args, bridge: HostBridge) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bridge_config = BridgeConfig {
        defer_timeout: Duration::from_millis(args.defer_timeout_ms),
    };
    let registry = ToolRegistry::with_builtin_tools(bridge, bridge_config, ConsoleLog::global())?;
    tracing::info!("Registered {} tools", registry.len());

    let dispatcher = Arc::new(Dispatcher::new(registry));
    let router = RpcRouter::new(dispatcher.clone())?;

    let websocket = WebSocketServer::new(
        WebSocketConfig {
            host: args.host.clone(),
            port: args.port,
            auth_token: args.auth_token.clone(),
            auth_timeout: Duration::from_millis(args.auth_timeout_ms),
            dispatch: args.dispatch.into(),
            ..WebSocketConfig::default()
        },
        router.dispatcher(),
    );
    // A transport that fails to bind is skipped; the others keep running
    let mut listening = 0;
    match websocket.start().await {
        Ok(_) => listening += 1,
        Err(e) => tracing::error!("WebSocket transport not started: {}", e),
    }

    let udp = args.udp_port.map(|port| {
        UdpServer::new(UdpConfig {
            host: args.host.clone(),
            port,
            max_fragment_payload: args.max_fragment_payload,
            fragment_timeout: Duration::from_secs(args.fragment_timeout_secs),
            ..UdpConfig::default()
        })
    });
    if let Some(udp) = &udp {
        udp.set_message_handler(router.dispatcher());
        match udp.start().await {
            Ok(_) => listening += 1,
            Err(e) => tracing::error!("UDP transport not started: {}", e),
        }
    }

    if args.stdio {
        router.start()?;
        listening += 1;
    }

    if listening == 0 {
        return Err("no transport could be started".into());
    }

    tracing::info!("Press Ctrl+C to shutdown gracefully");
    shutdown_signal().await;
    tracing::info!("Shutting down");

    router.stop().await;
    websocket.stop().await;
    if let Some(udp) = &udp {
        udp.stop().await;
    }
    Ok(())
}
