//! JSON-RPC 2.0 layer.
//!
//! - `envelope`: request parsing and response serialization
//! - `dispatcher`: routes methods to the tool registry; shared by every transport
//! - `router`: the process-wide router service owning the stdio control path

mod dispatcher;
pub mod envelope;
mod router;

pub use dispatcher::{Dispatcher, ServerInfo};
pub use router::{RouterError, RpcRouter};

/// Stable JSON-RPC error codes
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A deferred host call did not finish before its deadline
    pub const HOST_TIMEOUT: i64 = -32001;
}
