//! Utility tools: console log access and object placement.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Value, json};

use hostwire_shared::console::{ConsoleLog, DEFAULT_CONSOLE_CAPACITY};

use super::{HostBridge, ToolError, ToolModule, ToolSchema, params, with_patch};

const DEFAULT_LOG_LINES: u64 = 50;

pub struct UtilityTools {
    bridge: HostBridge,
    timeout: Duration,
    console: Arc<ConsoleLog>,
}

impl UtilityTools {
    pub fn new(bridge: HostBridge, timeout: Duration, console: Arc<ConsoleLog>) -> Self {
        Self {
            bridge,
            timeout,
            console,
        }
    }

    // The console buffer is thread-safe, so this never crosses to the host thread
    fn get_console_log(&self, args: &Value) -> Result<Value, ToolError> {
        let lines = params::optional_u64(args, "lines", DEFAULT_LOG_LINES)?
            .min(DEFAULT_CONSOLE_CAPACITY as u64) as usize;
        let clear = params::optional_bool(args, "clear", false)?;

        let logs = self.console.tail(lines, clear);
        Ok(json!({
            "logs": logs,
            "count": logs.len(),
        }))
    }

    async fn get_avoid_rect_position(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let width = params::optional_f64(args, "width", 50.0)?;
        let height = params::optional_f64(args, "height", 20.0)?;

        if !(width > 0.0 && height > 0.0) {
            return Err(ToolError::InvalidParams(
                "width and height must be positive numbers".to_string(),
            ));
        }

        let position = with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
            Ok(patch.avoid_rect_position([width, height]))
        })
        .await?;

        Ok(json!({
            "position": position,
            "size": [width, height],
            "rationale": "Positioned to the right of objects in the same rows with 50px margin",
        }))
    }
}

#[async_trait]
impl ToolModule for UtilityTools {
    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema::new(
                "get_console_log",
                "Retrieve recent console messages",
                json!({
                    "type": "object",
                    "properties": {
                        "lines": {
                            "type": "number",
                            "description": "Number of recent lines (default: 50, max: 1000)"
                        },
                        "clear": {
                            "type": "boolean",
                            "description": "Clear log after reading (default: false)"
                        }
                    }
                }),
            ),
            ToolSchema::new(
                "get_avoid_rect_position",
                "Find an empty position for placing new objects",
                json!({
                    "type": "object",
                    "properties": {
                        "patch_id": {"type": "string", "description": "Patch ID to query"},
                        "width": {"type": "number", "description": "Object width (default: 50)"},
                        "height": {"type": "number", "description": "Object height (default: 20)"}
                    },
                    "required": ["patch_id"]
                }),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        match name {
            "get_console_log" => self.get_console_log(args),
            "get_avoid_rect_position" => self.get_avoid_rect_position(args).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}
