//! Patch discovery tools.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::host::{HostState, Patch};

use super::{HostBridge, ToolError, ToolModule, ToolSchema, params};

fn summary(patch: &Patch) -> Value {
    json!({
        "patch_id": patch.patch_id,
        "display_name": patch.display_name,
        "patcher_name": patch.patcher_name,
    })
}

pub struct PatchTools {
    bridge: HostBridge,
    timeout: Duration,
}

impl PatchTools {
    pub fn new(bridge: HostBridge, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    async fn list_active_patches(&self, args: &Value) -> Result<Value, ToolError> {
        let group = params::optional_str(args, "group")?
            .filter(|g| !g.is_empty())
            .map(str::to_string);

        let filter = group.clone();
        let patches = self
            .bridge
            .submit(self.timeout, move |state: &mut HostState| {
                state
                    .patches()
                    .iter()
                    .filter(|p| match &filter {
                        Some(g) => p.group.as_deref() == Some(g.as_str()),
                        None => true,
                    })
                    .map(summary)
                    .collect::<Vec<_>>()
            })
            .await?;

        let mut result = json!({
            "count": patches.len(),
            "patches": patches,
        });
        if let Some(group) = group {
            result["filter"] = json!({ "group": group });
        }
        Ok(result)
    }

    async fn get_patch_info(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?.to_string();

        let info = self
            .bridge
            .submit(self.timeout, move |state: &mut HostState| {
                state.patch(&patch_id).map(|patch| {
                    let mut info = summary(patch);
                    info["group"] = json!(patch.group);
                    info["locked"] = json!(patch.locked);
                    info["dirty"] = json!(patch.dirty);
                    info["object_count"] = json!(patch.objects().len());
                    info["line_count"] = json!(patch.lines().len());
                    info
                })
            })
            .await??;
        Ok(info)
    }

    async fn get_frontmost_patch(&self) -> Result<Value, ToolError> {
        let info = self
            .bridge
            .submit(self.timeout, |state: &mut HostState| {
                state.frontmost().map(summary)
            })
            .await??;
        Ok(info)
    }
}

#[async_trait]
impl ToolModule for PatchTools {
    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema::new(
                "list_active_patches",
                "List all registered patches, optionally filtered by group",
                json!({
                    "type": "object",
                    "properties": {
                        "group": {"type": "string", "description": "Only list patches in this group"}
                    }
                }),
            ),
            ToolSchema::new(
                "get_patch_info",
                "Get detailed information about a patch",
                json!({
                    "type": "object",
                    "properties": {
                        "patch_id": {"type": "string", "description": "Patch ID to query"}
                    },
                    "required": ["patch_id"]
                }),
            ),
            ToolSchema::new(
                "get_frontmost_patch",
                "Get the currently focused patch",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        match name {
            "list_active_patches" => self.list_active_patches(args).await,
            "get_patch_info" => self.get_patch_info(args).await,
            "get_frontmost_patch" => self.get_frontmost_patch().await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}
