//! Patch lock / dirty state tools.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{HostBridge, ToolError, ToolModule, ToolSchema, params, with_patch};

pub struct StateTools {
    bridge: HostBridge,
    timeout: Duration,
}

impl StateTools {
    pub fn new(bridge: HostBridge, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    async fn get_patch_lock_state(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let locked = with_patch(&self.bridge, self.timeout, patch_id, |patch| Ok(patch.locked))
            .await?;
        Ok(json!({"patch_id": patch_id, "locked": locked}))
    }

    async fn set_patch_lock_state(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let locked = params::require_bool(args, "locked")?;
        with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
            patch.locked = locked;
            Ok(())
        })
        .await?;
        Ok(json!({"success": true, "patch_id": patch_id, "locked": locked}))
    }

    async fn get_patch_dirty(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let dirty =
            with_patch(&self.bridge, self.timeout, patch_id, |patch| Ok(patch.dirty)).await?;
        Ok(json!({"patch_id": patch_id, "dirty": dirty}))
    }
}

fn patch_only(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "patch_id": {"type": "string", "description": description}
        },
        "required": ["patch_id"]
    })
}

#[async_trait]
impl ToolModule for StateTools {
    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema::new(
                "get_patch_lock_state",
                "Get the lock (presentation/edit) state of a patch",
                patch_only("Patch ID to query"),
            ),
            ToolSchema::new(
                "set_patch_lock_state",
                "Lock or unlock a patch for editing",
                json!({
                    "type": "object",
                    "properties": {
                        "patch_id": {"type": "string", "description": "Patch ID to modify"},
                        "locked": {"type": "boolean", "description": "true=lock, false=unlock"}
                    },
                    "required": ["patch_id", "locked"]
                }),
            ),
            ToolSchema::new(
                "get_patch_dirty",
                "Check whether a patch has unsaved changes",
                patch_only("Patch ID to query"),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        match name {
            "get_patch_lock_state" => self.get_patch_lock_state(args).await,
            "set_patch_lock_state" => self.set_patch_lock_state(args).await,
            "get_patch_dirty" => self.get_patch_dirty(args).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::{HostState, NewObject},
        tools::test_support::{TIMEOUT, spawn_host},
    };

    #[tokio::test]
    async fn test_lock_state_round_trip() {
        // テスト項目: ロック状態を設定し、取得で反映を確認できる
        // given (前提条件):
        let mut state = HostState::new();
        let patch_id = state.register_patch("lock.maxpat", None);
        let tools = StateTools::new(spawn_host(state), TIMEOUT);

        // when (操作):
        let before = tools
            .execute("get_patch_lock_state", &json!({"patch_id": patch_id}))
            .await
            .unwrap();
        tools
            .execute(
                "set_patch_lock_state",
                &json!({"patch_id": patch_id, "locked": true}),
            )
            .await
            .unwrap();
        let after = tools
            .execute("get_patch_lock_state", &json!({"patch_id": patch_id}))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(before["locked"], false);
        assert_eq!(after["locked"], true);
    }

    #[tokio::test]
    async fn test_dirty_follows_edits() {
        // テスト項目: 編集後のパッチは dirty になる
        // given (前提条件):
        let mut state = HostState::new();
        let clean = state.register_patch("clean", None);
        let edited = state.register_patch("edited", None);
        state
            .patch_mut(&edited)
            .unwrap()
            .add_object(NewObject {
                obj_type: "button".to_string(),
                ..Default::default()
            })
            .unwrap();
        let tools = StateTools::new(spawn_host(state), TIMEOUT);

        // when (操作):
        let clean = tools
            .execute("get_patch_dirty", &json!({"patch_id": clean}))
            .await
            .unwrap();
        let edited = tools
            .execute("get_patch_dirty", &json!({"patch_id": edited}))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(clean["dirty"], false);
        assert_eq!(edited["dirty"], true);
    }

    #[tokio::test]
    async fn test_set_lock_state_requires_bool() {
        // テスト項目: locked が boolean でない場合は -32602 になる
        // given (前提条件):
        let mut state = HostState::new();
        let patch_id = state.register_patch("lock", None);
        let tools = StateTools::new(spawn_host(state), TIMEOUT);

        // when (操作):
        let err = tools
            .execute(
                "set_patch_lock_state",
                &json!({"patch_id": patch_id, "locked": "yes"}),
            )
            .await
            .unwrap_err();

        // then (期待する結果):
        assert_eq!(err.code(), -32602);
        assert!(err.to_string().contains("must be a boolean"));
    }
}
