//! Object tools: create, remove, inspect and edit object boxes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::host::{HostState, NewObject};

use super::{HostBridge, ToolError, ToolModule, ToolSchema, params, with_patch};

pub struct ObjectTools {
    bridge: HostBridge,
    timeout: Duration,
}

impl ObjectTools {
    pub fn new(bridge: HostBridge, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    async fn add_object(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let new = NewObject {
            obj_type: params::require_str(args, "obj_type")?.to_string(),
            position: params::require_position(args, "position")?,
            varname: params::optional_str(args, "varname")?
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            arguments: params::optional_array(args, "arguments")?,
            attributes: params::optional_object(args, "attributes")?,
        };

        let target = patch_id.to_string();
        let created = self
            .bridge
            .submit(self.timeout, move |state: &mut HostState| {
                state.add_object(&target, new)
            })
            .await??;

        tracing::info!(
            "Created object: {} at [{}, {}] ({})",
            created.obj_type,
            created.position[0],
            created.position[1],
            created.varname
        );
        let mut result = json!({
            "status": "success",
            "obj_type": created.obj_type,
            "position": created.position,
            "varname": created.varname,
        });
        if let Some(subpatch) = created.subpatch {
            result["subpatch_id"] = json!(subpatch);
        }
        Ok(result)
    }

    async fn remove_object(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let varname = params::require_str(args, "varname")?.to_string();

        let target = patch_id.to_string();
        let removed = self
            .bridge
            .submit(self.timeout, move |state: &mut HostState| {
                state.remove_object(&target, &varname)
            })
            .await??;

        tracing::info!("Removed object: {}", removed.varname);
        Ok(json!({"status": "success", "varname": removed.varname}))
    }

    async fn get_objects_in_patch(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;

        let objects = with_patch(&self.bridge, self.timeout, patch_id, |patch| {
            Ok(patch.objects().to_vec())
        })
        .await?;

        Ok(json!({
            "patch_id": patch_id,
            "count": objects.len(),
            "objects": objects,
        }))
    }

    async fn set_object_attribute(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let varname = params::require_str(args, "varname")?.to_string();
        let attribute = params::require_str(args, "attribute")?.to_string();
        let value = params::require_value(args, "value")?;

        let (varname, attribute) = with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
            patch.set_attribute(&varname, &attribute, value)?;
            Ok((varname, attribute))
        })
        .await?;

        Ok(json!({
            "status": "success",
            "varname": varname,
            "attribute": attribute,
        }))
    }

    async fn set_object_hidden(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let varname = params::require_str(args, "varname")?.to_string();
        let hidden = params::require_bool(args, "hidden")?;

        let varname = with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
            patch.set_hidden(&varname, hidden)?;
            Ok(varname)
        })
        .await?;

        Ok(json!({"success": true, "varname": varname, "hidden": hidden}))
    }

    async fn get_object_io_info(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let varname = params::require_str(args, "varname")?.to_string();

        let (varname, inlets, outlets) =
            with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
                let object = patch.object(&varname)?;
                Ok((varname.clone(), object.inlets, object.outlets))
            })
            .await?;

        Ok(json!({
            "varname": varname,
            "inlet_count": inlets,
            "outlet_count": outlets,
        }))
    }

    async fn get_object_hidden(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let varname = params::require_str(args, "varname")?.to_string();

        let (varname, hidden) = with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
            let hidden = patch.object(&varname)?.hidden;
            Ok((varname, hidden))
        })
        .await?;

        Ok(json!({"varname": varname, "hidden": hidden}))
    }

    async fn redraw_object(&self, args: &Value) -> Result<Value, ToolError> {
        let patch_id = params::require_str(args, "patch_id")?;
        let varname = params::require_str(args, "varname")?.to_string();

        let varname = with_patch(&self.bridge, self.timeout, patch_id, move |patch| {
            patch.redraw(&varname)?;
            Ok(varname)
        })
        .await?;

        Ok(json!({"success": true, "varname": varname}))
    }
}

fn patch_and_varname(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "patch_id": {"type": "string", "description": "Patch ID containing the object"},
            "varname": {"type": "string", "description": description}
        },
        "required": ["patch_id", "varname"]
    })
}

#[async_trait]
impl ToolModule for ObjectTools {
    fn schemas(&self) -> Vec<ToolSchema> {
        let mut set_attribute = patch_and_varname("Variable name of the object");
        set_attribute["properties"]["attribute"] =
            json!({"type": "string", "description": "Attribute name to set"});
        set_attribute["properties"]["value"] =
            json!({"description": "Attribute value (number, string, or array)"});
        set_attribute["required"] = json!(["patch_id", "varname", "attribute", "value"]);

        let mut set_hidden = patch_and_varname("Variable name of the object");
        set_hidden["properties"]["hidden"] =
            json!({"type": "boolean", "description": "true=hide, false=show"});
        set_hidden["required"] = json!(["patch_id", "varname", "hidden"]);

        vec![
            ToolSchema::new(
                "add_max_object",
                "Add an object to a patch",
                json!({
                    "type": "object",
                    "properties": {
                        "patch_id": {"type": "string", "description": "Patch ID to add object to"},
                        "obj_type": {
                            "type": "string",
                            "description": "Object type (e.g., 'number', 'button', 'dac~')"
                        },
                        "position": {
                            "type": "array",
                            "items": {"type": "number"},
                            "description": "Position [x, y] in patch"
                        },
                        "varname": {
                            "type": "string",
                            "description": "Variable name for the object (optional)"
                        },
                        "arguments": {
                            "type": "array",
                            "description": "Object arguments (e.g., [440] for 'cycle~')"
                        },
                        "attributes": {
                            "type": "object",
                            "description": "Initial attribute values keyed by name"
                        }
                    },
                    "required": ["patch_id", "obj_type", "position"]
                }),
            ),
            ToolSchema::new(
                "remove_max_object",
                "Remove an object from a patch by varname",
                patch_and_varname("Variable name of the object to remove"),
            ),
            ToolSchema::new(
                "get_objects_in_patch",
                "List all objects in a patch with metadata",
                json!({
                    "type": "object",
                    "properties": {
                        "patch_id": {"type": "string", "description": "Patch ID to query"}
                    },
                    "required": ["patch_id"]
                }),
            ),
            ToolSchema::new(
                "set_object_attribute",
                "Set an attribute of an object",
                set_attribute,
            ),
            ToolSchema::new(
                "get_object_io_info",
                "Get inlet and outlet count for an object",
                patch_and_varname("Variable name of the object"),
            ),
            ToolSchema::new(
                "get_object_hidden",
                "Check if an object is hidden",
                patch_and_varname("Variable name of the object"),
            ),
            ToolSchema::new(
                "set_object_hidden",
                "Set the visibility of an object in a patch",
                set_hidden,
            ),
            ToolSchema::new(
                "redraw_object",
                "Force redraw of a specific object",
                patch_and_varname("Variable name of the object"),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        match name {
            "add_max_object" => self.add_object(args).await,
            "remove_max_object" => self.remove_object(args).await,
            "get_objects_in_patch" => self.get_objects_in_patch(args).await,
            "set_object_attribute" => self.set_object_attribute(args).await,
            "get_object_io_info" => self.get_object_io_info(args).await,
            "get_object_hidden" => self.get_object_hidden(args).await,
            "set_object_hidden" => self.set_object_hidden(args).await,
            "redraw_object" => self.redraw_object(args).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}
