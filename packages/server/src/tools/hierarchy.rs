//! Patcher hierarchy tools.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::host::{HostError, HostState};

use super::{HostBridge, ToolError, ToolModule, ToolSchema, params};

pub struct HierarchyTools {
    bridge: HostBridge,
    timeout: Duration,
}

impl HierarchyTools {
    pub fn new(bridge: HostBridge, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    async fn get_parent_patcher(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?.to_string();

        let parent = self
            .bridge
            .submit(self.timeout, move |state: &mut HostState| {
                state.parent_of(&patch_id).map(|parent| {
                    json!({
                        "has_parent": true,
                        "parent_id": parent.patch_id,
                        "parent_name": parent.display_name,
                    })
                })
            })
            .await??;
        Ok(parent)
    }

    async fn get_subpatchers(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?.to_string();

        let subpatchers = self
            .bridge
            .submit(self.timeout, move |state: &mut HostState| {
                let state: &HostState = state;
                let patch = state.patch(&patch_id)?;
                let found: Vec<Value> = patch
                    .objects()
                    .iter()
                    .filter(|o| o.is_subpatcher())
                    .map(|o| {
                        let mut info = json!({"type": o.obj_type, "varname": o.varname});
                        let child = o.subpatch.as_deref().and_then(|id| state.patch(id).ok());
                        if let Some(child) = child {
                            info["patch_id"] = json!(child.patch_id);
                            info["name"] = json!(child.display_name);
                        }
                        info
                    })
                    .collect();
                Ok::<_, HostError>(found)
            })
            .await??;

        Ok(json!({
            "count": subpatchers.len(),
            "subpatchers": subpatchers,
        }))
    }
}

fn patch_id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "patch_id": {"type": "string", "description": description}
        },
        "required": ["patch_id"]
    })
}

#[async_trait]
impl ToolModule for HierarchyTools {
    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema::new(
                "get_parent_patcher",
                "Get the parent patcher of a subpatcher",
                patch_id_schema("Child patch ID to query"),
            ),
            ToolSchema::new(
                "get_subpatchers",
                "List all subpatchers in a patch",
                patch_id_schema("Parent patch ID to query"),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        match name {
            "get_parent_patcher" => self.get_parent_patcher(args).await,
            "get_subpatchers" => self.get_subpatchers(args).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::NewObject,
        rpc::codes,
        tools::test_support::{TIMEOUT, spawn_host},
    };

    fn nested_host() -> (HostState, String, String) {
        let mut state = HostState::new();
        let top = state.register_patch("main.maxpat", None);
        let voices = state
            .add_object(
                &top,
                NewObject {
                    obj_type: "p".to_string(),
                    varname: Some("voices".to_string()),
                    arguments: vec![json!("voices")],
                    ..Default::default()
                },
            )
            .unwrap();
        state
            .add_object(
                &top,
                NewObject {
                    obj_type: "poly~".to_string(),
                    varname: Some("poly".to_string()),
                    arguments: vec![json!("grain"), json!(8)],
                    ..Default::default()
                },
            )
            .unwrap();
        state
            .add_object(
                &top,
                NewObject {
                    obj_type: "cycle~".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        (state, top, voices.subpatch.unwrap_or_default())
    }

    #[tokio::test]
    async fn test_get_subpatchers() {
        // テスト項目: サブパッチャーのボックスだけが一覧に含まれ、埋め込みパッチの ID が付く
        // given (前提条件):
        let (state, top, child) = nested_host();
        let tools = HierarchyTools::new(spawn_host(state), TIMEOUT);

        // when (操作):
        let result = tools
            .execute("get_subpatchers", &json!({"patch_id": top}))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(result["count"], 2);
        assert_eq!(result["subpatchers"][0]["type"], "p");
        assert_eq!(result["subpatchers"][0]["varname"], "voices");
        assert_eq!(result["subpatchers"][0]["patch_id"], child);
        assert_eq!(result["subpatchers"][0]["name"], "voices");
        assert_eq!(result["subpatchers"][1], json!({"type": "poly~", "varname": "poly"}));
    }

    #[tokio::test]
    async fn test_get_parent_patcher() {
        // テスト項目: 子パッチは親を返し、トップレベルのパッチは -32602 になる
        // given (前提条件):
        let (state, top, child) = nested_host();
        let tools = HierarchyTools::new(spawn_host(state), TIMEOUT);

        // when (操作):
        let parent = tools
            .execute("get_parent_patcher", &json!({"patch_id": child}))
            .await
            .unwrap();
        let err = tools
            .execute("get_parent_patcher", &json!({"patch_id": top}))
            .await
            .unwrap_err();

        // then (期待する結果):
        assert_eq!(parent["has_parent"], true);
        assert_eq!(parent["parent_id"], top);
        assert_eq!(parent["parent_name"], "main");
        assert_eq!(err.to_string(), "No parent patcher (top-level patch)");
        assert_eq!(err.code(), codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_hierarchy_unknown_patch() {
        // テスト項目: 存在しないパッチは "Patch not found" になる
        // given (前提条件):
        let tools = HierarchyTools::new(spawn_host(HostState::new()), TIMEOUT);

        // when (操作):
        let err = tools
            .execute("get_subpatchers", &json!({"patch_id": "ghost_00000000"}))
            .await
            .unwrap_err();

        // then (期待する結果):
        assert_eq!(err, ToolError::NotFound("Patch not found: ghost_00000000".to_string()));
    }
}
