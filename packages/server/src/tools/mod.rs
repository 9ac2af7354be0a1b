//! Domain tool modules and the registry that routes `tools/call` to them.
//!
//! Each module declares its own schemas and executes the tools it owns. The
//! registry is built once at startup and rejects duplicate tool names.
//! Aliases route extra names to a registered tool without listing them.

pub mod connection;
pub mod hierarchy;
pub mod object;
pub mod params;
pub mod patch;
pub mod state;
pub mod utility;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use hostwire_shared::console::ConsoleLog;

use crate::{
    config::BridgeConfig,
    deferred::{DeferredBridge, DeferredError},
    host::{HostError, HostState},
    rpc::codes,
};

/// Bridge type every host-touching tool submits work through
pub type HostBridge = DeferredBridge<HostState>;

/// Tool descriptor as listed by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("Missing required parameter: {0}")]
    MissingParam(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Timeout {0}")]
    HostTimeout(String),

    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    /// JSON-RPC error code for this failure
    pub fn code(&self) -> i64 {
        match self {
            ToolError::MissingParam(_)
            | ToolError::InvalidParams(_)
            | ToolError::NotFound(_)
            | ToolError::UnknownTool(_) => codes::INVALID_PARAMS,
            ToolError::HostTimeout(_) => codes::HOST_TIMEOUT,
            ToolError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl From<DeferredError> for ToolError {
    fn from(e: DeferredError) -> Self {
        match e {
            DeferredError::Timeout(after) => ToolError::HostTimeout(format!(
                "waiting for host thread after {} ms",
                after.as_millis()
            )),
            DeferredError::Panicked(_) | DeferredError::HostGone => {
                ToolError::Internal(e.to_string())
            }
        }
    }
}

impl From<HostError> for ToolError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::PatchNotFound(_)
            | HostError::ObjectNotFound(_)
            | HostError::ConnectionNotFound(_) => ToolError::NotFound(e.to_string()),
            HostError::NoActivePatches => ToolError::Internal(e.to_string()),
            _ => ToolError::InvalidParams(e.to_string()),
        }
    }
}

/// One group of named operations behind a uniform schema/execute contract
#[async_trait]
pub trait ToolModule: Send + Sync {
    fn schemas(&self) -> Vec<ToolSchema>;

    async fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool '{0}' is registered more than once")]
    DuplicateTool(String),

    #[error("Alias '{alias}' points at unknown tool '{target}'")]
    UnknownTarget { alias: String, target: String },
}

/// Short names accepted for the object and patchcord tools
pub const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("add_object", "add_max_object"),
    ("remove_object", "remove_max_object"),
    ("connect_objects", "connect_max_objects"),
    ("disconnect_objects", "disconnect_max_objects"),
];

/// Static name -> module routing table
#[derive(Default)]
pub struct ToolRegistry {
    modules: Vec<Arc<dyn ToolModule>>,
    schemas: Vec<ToolSchema>,
    routes: HashMap<String, usize>,
    aliases: HashMap<String, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in tool module
    pub fn with_builtin_tools(
        bridge: HostBridge,
        config: BridgeConfig,
        console: Arc<ConsoleLog>,
    ) -> Result<Self, RegistryError> {
        let timeout = config.defer_timeout;
        let mut registry = Self::new();
        registry.register(Arc::new(utility::UtilityTools::new(
            bridge.clone(),
            timeout,
            console,
        )))?;
        registry.register(Arc::new(patch::PatchTools::new(bridge.clone(), timeout)))?;
        registry.register(Arc::new(object::ObjectTools::new(bridge.clone(), timeout)))?;
        registry.register(Arc::new(connection::ConnectionTools::new(
            bridge.clone(),
            timeout,
        )))?;
        registry.register(Arc::new(state::StateTools::new(bridge.clone(), timeout)))?;
        registry.register(Arc::new(hierarchy::HierarchyTools::new(bridge, timeout)))?;
        for (alias, target) in BUILTIN_ALIASES {
            registry.register_alias(alias, target)?;
        }
        Ok(registry)
    }

    /// Add a module; all of its tool names must be new
    pub fn register(&mut self, module: Arc<dyn ToolModule>) -> Result<(), RegistryError> {
        let schemas = module.schemas();

        let mut seen = std::collections::HashSet::new();
        for schema in &schemas {
            if self.contains(&schema.name) || !seen.insert(schema.name.as_str()) {
                return Err(RegistryError::DuplicateTool(schema.name.clone()));
            }
        }

        let index = self.modules.len();
        for schema in &schemas {
            self.routes.insert(schema.name.clone(), index);
        }
        tracing::debug!("Registered tool module with {} tools", schemas.len());
        self.schemas.extend(schemas);
        self.modules.push(module);
        Ok(())
    }

    /// Route `alias` to the already registered tool `target`
    pub fn register_alias(&mut self, alias: &str, target: &str) -> Result<(), RegistryError> {
        if self.contains(alias) {
            return Err(RegistryError::DuplicateTool(alias.to_string()));
        }
        if !self.routes.contains_key(target) {
            return Err(RegistryError::UnknownTarget {
                alias: alias.to_string(),
                target: target.to_string(),
            });
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(())
    }

    /// Combined schema catalogue in registration order
    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    /// Whether `name` is a registered tool or alias
    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name) || self.aliases.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub async fn call(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        let name = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        let index = self
            .routes
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        self.modules[*index].execute(name, args).await
    }
}

/// Run `work` against one patch on the host thread
pub(crate) async fn with_patch<T, F>(
    bridge: &HostBridge,
    timeout: Duration,
    patch_id: &str,
    work: F,
) -> Result<T, ToolError>
where
    F: FnOnce(&mut crate::host::Patch) -> Result<T, HostError> + Send + 'static,
    T: Send + 'static,
{
    let patch_id = patch_id.to_string();
    let outcome = bridge
        .submit(timeout, move |state: &mut HostState| {
            let patch = state.patch_mut(&patch_id)?;
            work(patch)
        })
        .await?;
    Ok(outcome?)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedTools(Vec<&'static str>);

    #[async_trait]
    impl ToolModule for FixedTools {
        fn schemas(&self) -> Vec<ToolSchema> {
            self.0
                .iter()
                .map(|name| ToolSchema::new(name, "fixed", json!({"type": "object"})))
                .collect()
        }

        async fn execute(&self, name: &str, _args: &Value) -> Result<Value, ToolError> {
            Ok(json!({ "tool": name }))
        }
    }

    #[tokio::test]
    async fn test_registry_routes_by_name() {
        // テスト項目: ツール名で対応するモジュールに振り分けられる
        // given (前提条件):
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FixedTools(vec!["a", "b"]))).unwrap();
        registry.register(Arc::new(FixedTools(vec!["c"]))).unwrap();

        // when (操作):
        let result = registry.call("c", &json!({})).await;

        // then (期待する結果):
        assert_eq!(result, Ok(json!({"tool": "c"})));
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("a"));
    }

    #[tokio::test]
    async fn test_registry_unknown_tool() {
        // テスト項目: 未登録のツール名は UnknownTool (-32602) になる
        // given (前提条件):
        let registry = ToolRegistry::new();

        // when (操作):
        let err = registry.call("nope", &json!({})).await.unwrap_err();

        // then (期待する結果):
        assert_eq!(err.to_string(), "Unknown tool: nope");
        assert_eq!(err.code(), codes::INVALID_PARAMS);
    }

    #[test]
    fn test_registry_rejects_duplicate_names() {
        // テスト項目: 重複したツール名の登録は拒否され、既存の登録は変わらない
        // given (前提条件):
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FixedTools(vec!["a"]))).unwrap();

        // when (操作):
        let across = registry.register(Arc::new(FixedTools(vec!["b", "a"])));
        let within = registry.register(Arc::new(FixedTools(vec!["x", "x"])));

        // then (期待する結果):
        assert_eq!(across, Err(RegistryError::DuplicateTool("a".to_string())));
        assert_eq!(within, Err(RegistryError::DuplicateTool("x".to_string())));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("b"));
    }

    #[test]
    fn test_builtin_catalogue_is_complete() {
        // テスト項目: 組み込みツールがすべて登録され、名前と説明が空でない
        // given (前提条件):
        let (bridge, _host) = crate::deferred::channel(HostState::new());

        // when (操作):
        let registry = ToolRegistry::with_builtin_tools(
            bridge,
            BridgeConfig::default(),
            Arc::new(ConsoleLog::new(10)),
        )
        .unwrap();

        // then (期待する結果):
        assert_eq!(registry.len(), 21);
        for schema in registry.schemas() {
            assert!(!schema.name.is_empty());
            assert!(!schema.description.is_empty());
            assert_eq!(schema.input_schema["type"], "object");
        }
        for name in [
            "add_max_object",
            "remove_max_object",
            "connect_max_objects",
            "disconnect_max_objects",
            "get_object_io_info",
            "get_object_hidden",
            "redraw_object",
            "get_parent_patcher",
            "get_subpatchers",
        ] {
            assert!(registry.schemas().iter().any(|s| s.name == name), "{name}");
        }
        // 短い名前はルーティングされるが一覧には出ない
        assert!(registry.contains("add_object"));
        assert!(!registry.schemas().iter().any(|s| s.name == "add_object"));
    }

    #[tokio::test]
    async fn test_alias_routes_to_target() {
        // テスト項目: 別名での呼び出しは登録済みツール名でモジュールに渡される
        // given (前提条件):
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FixedTools(vec!["long_name"]))).unwrap();

        // when (操作):
        let added = registry.register_alias("short", "long_name");
        let clash = registry.register_alias("long_name", "long_name");
        let dangling = registry.register_alias("other", "missing");
        let result = registry.call("short", &json!({})).await;

        // then (期待する結果):
        assert!(added.is_ok());
        assert_eq!(result, Ok(json!({"tool": "long_name"})));
        assert_eq!(clash, Err(RegistryError::DuplicateTool("long_name".to_string())));
        assert!(matches!(dangling, Err(RegistryError::UnknownTarget { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ToolError::MissingParam("x".into()).code(), -32602);
        assert_eq!(ToolError::NotFound("x".into()).code(), -32602);
        assert_eq!(ToolError::Internal("x".into()).code(), -32603);
        assert_eq!(
            ToolError::from(DeferredError::Timeout(Duration::from_millis(5000))),
            ToolError::HostTimeout("waiting for host thread after 5000 ms".to_string())
        );
        assert_eq!(
            ToolError::from(HostError::PatchNotFound("p".into())).to_string(),
            "Patch not found: p"
        );
    }
}
