//! Method routing.
//!
//! The dispatcher is the one `MessageHandler` both transports and the stdio
//! control path share. It holds no lock across a request, so concurrent calls
//! only serialize where they meet on the host thread.

use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{Value, json};

use crate::{tools::ToolRegistry, transport::MessageHandler};

use super::{
    codes,
    envelope::{self, Request, Response},
};

const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "hostwire".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    server_info: ServerInfo,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            server_info: ServerInfo::default(),
        }
    }

    pub fn with_server_info(mut self, server_info: ServerInfo) -> Self {
        self.server_info = server_info;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Answer one JSON-RPC message.
    ///
    /// Returns `None` for notifications. Never panics: a panic while handling
    /// becomes an internal-error response carrying the request id.
    pub async fn handle_request_string(&self, text: &str) -> Option<String> {
        let request = match envelope::parse_request(text) {
            Ok(request) => request,
            Err(response) => return Some(response.to_json_string()),
        };

        if request.is_notification() {
            tracing::debug!("Received notification: {}", request.method);
            return None;
        }

        let id = request.id.clone();
        let response = match AssertUnwindSafe(self.respond(request)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("Request handler panicked");
                Response::error(id, codes::INTERNAL_ERROR, "Internal error")
            }
        };
        Some(response.to_json_string())
    }

    async fn respond(&self, request: Request) -> Response {
        tracing::debug!("Dispatching method: {}", request.method);
        let Request { id, method, params } = request;

        match method.as_str() {
            "initialize" => Response::success(id, self.initialize(params.as_ref())),
            "ping" => Response::success(id, json!({})),
            "tools/list" => Response::success(id, json!({ "tools": self.registry.schemas() })),
            "tools/call" => self.tools_call(id, params.as_ref()).await,
            other => Response::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        }
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {
                "name": self.server_info.name,
                "version": self.server_info.version,
            }
        })
    }

    async fn tools_call(&self, id: Value, params: Option<&Value>) -> Response {
        let Some(params) = params.filter(|p| p.is_object()) else {
            return Response::error(id, codes::INVALID_PARAMS, "Missing required parameter: name");
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Response::error(id, codes::INVALID_PARAMS, "Missing required parameter: name");
        };
        let Some(arguments) = envelope::call_arguments(params) else {
            return Response::error(
                id,
                codes::INVALID_PARAMS,
                "Parameter 'arguments' must be an object",
            );
        };

        match self.registry.call(name, &arguments).await {
            Ok(result) => Response::success(id, result),
            Err(e) => {
                tracing::warn!("Tool '{}' failed: {}", name, e);
                Response::error(id, e.code(), e.to_string())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, session_id: &str, message: &str) -> Option<String> {
        tracing::trace!("Handling message from {}", session_id);
        self.handle_request_string(message).await
    }
}
