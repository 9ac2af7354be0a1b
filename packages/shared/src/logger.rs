//! Logging setup utilities for Hostwire binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::console::{ConsoleLog, ConsoleLogLayer};

/// Initialize the tracing subscriber with the specified default log level.
///
/// This function sets up logging for both the application crate and the binary.
/// The log level can be overridden using the `RUST_LOG` environment variable.
///
/// Formatted output goes to stderr because stdout carries JSON-RPC traffic
/// for the stdio control path and the client bridge. Every event is also
/// mirrored into the process-wide [`ConsoleLog`].
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "hostwire_server", "hostwire_client")
/// * `default_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use hostwire_shared::logger::setup_logger;
///
/// setup_logger("hostwire_server", "debug");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "hostwire_server={},hostwire_client={},{}={}",
                    default_log_level,
                    default_log_level,
                    binary_name.replace('-', "_"),
                    default_log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(ConsoleLogLayer::new(ConsoleLog::global()))
        .init();
}
