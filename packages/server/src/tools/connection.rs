//! Patchline tools.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::host::Patchline;

use super::{HostBridge, ToolError, ToolModule, ToolSchema, params, with_patch};

pub struct ConnectionTools {
    bridge: HostBridge,
    timeout: Duration,
}

fn read_patchline(args: &Value) -> Result<Patchline, ToolError> {
    Ok(Patchline {
        src_varname: params::require_str(args, "src_varname")?.to_string(),
        outlet: params::require_index(args, "outlet")?,
        dst_varname: params::require_str(args, "dst_varname")?.to_string(),
        inlet: params::require_index(args, "inlet")?,
    })
}

fn line_result(patch_id: &str, line: &Patchline) -> Value {
    json!({
        "status": "success",
        "patch_id": patch_id,
        "src_varname": line.src_varname,
        "outlet": line.outlet,
        "dst_varname": line.dst_varname,
        "inlet": line.inlet,
    })
}

impl ConnectionTools {
    pub fn new(bridge: HostBridge, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    async fn connect_objects(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let line = read_patchline(args)?;

        let line = with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
            patch.connect(line.clone())?;
            Ok(line)
        })
        .await?;

        tracing::info!("Connected: {}", line);
        Ok(line_result(patch_id, &line))
    }

    async fn disconnect_objects(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let line = read_patchline(args)?;

        let line = with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
            patch.disconnect(&line)?;
            Ok(line)
        })
        .await?;

        tracing::info!("Disconnected: {}", line);
        Ok(line_result(patch_id, &line))
    }

    async fn get_patchlines(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;

        let lines = with_patch(&self.bridge, self.timeout, patch_id, |patch| {
            Ok(patch.lines().to_vec())
        })
        .await?;

        Ok(json!({
            "patch_id": patch_id,
            "count": lines.len(),
            "patchlines": lines,
        }))
    }
}

fn patchline_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "patch_id": {"type": "string", "description": "Patch ID containing the objects"},
            "src_varname": {"type": "string", "description": "Source object variable name"},
            "outlet": {"type": "number", "description": "Source outlet index (0-based)"},
            "dst_varname": {"type": "string", "description": "Destination object variable name"},
            "inlet": {"type": "number", "description": "Destination inlet index (0-based)"}
        },
        "required": ["patch_id", "src_varname", "outlet", "dst_varname", "inlet"]
    })
}

#[async_trait]
impl ToolModule for ConnectionTools {
    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema::new(
                "connect_max_objects",
                "Create a patchcord connection between two objects",
                patchline_schema(),
            ),
            ToolSchema::new(
                "disconnect_max_objects",
                "Remove a patchcord connection between two objects",
                patchline_schema(),
            ),
            ToolSchema::new(
                "get_patchlines",
                "List all patchcord connections in a patch",
                json!({
                    "type": "object",
                    "properties": {
                        "patch_id": {"type": "string", "description": "Patch ID to query"}
                    },
                    "required": ["patch_id"]
                }),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        match name {
            "connect_max_objects" => self.connect_objects(args).await,
            "disconnect_max_objects" => self.disconnect_objects(args).await,
            "get_patchlines" => self.get_patchlines(args).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}
