//! Shared utilities for Hostwire.
//!
//! Logging setup, the in-process console ring buffer that backs the
//! `get_console_log` tool, and time helpers used by both the server and the
//! client bridge.

pub mod console;
pub mod logger;
pub mod time;
