//! Host-owned state.
//!
//! Everything in this module lives on the host thread and is only reached
//! through the deferred bridge. It models a patch-based host application:
//! open patches, their object boxes and the patchlines between them.

mod patch;

pub use patch::{NewObject, Patch, PatchObject, Patchline, SUBPATCHER_CLASSES, generate_patch_id};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Patch not found: {0}")]
    PatchNotFound(String),

    #[error("No active patches")]
    NoActivePatches,

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Varname already in use: {0}")]
    DuplicateVarname(String),

    #[error("Outlet {index} out of range for '{varname}' ({count} outlets)")]
    OutletOutOfRange {
        varname: String,
        index: usize,
        count: usize,
    },

    #[error("Inlet {index} out of range for '{varname}' ({count} inlets)")]
    InletOutOfRange {
        varname: String,
        index: usize,
        count: usize,
    },

    #[error("Connection already exists: {0}")]
    ConnectionExists(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("No parent patcher (top-level patch)")]
    NoParent(String),
}

/// Registry of open patches, in registration order
#[derive(Debug, Default)]
pub struct HostState {
    patches: Vec<Patch>,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host with one patch per patcher name
    pub fn with_patches<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let mut state = Self::new();
        for name in names {
            state.register_patch(name.as_ref(), None);
        }
        state
    }

    /// Open a new patch and return its generated id
    pub fn register_patch(&mut self, patcher_name: &str, group: Option<&str>) -> String {
        let mut patch = Patch::new(patcher_name, group);
        while self.patches.iter().any(|p| p.patch_id == patch.patch_id) {
            patch.patch_id = generate_patch_id(patcher_name);
        }
        let patch_id = patch.patch_id.clone();
        tracing::info!("Registered patch '{}' as {}", patcher_name, patch_id);
        self.patches.push(patch);
        patch_id
    }

    /// Close a patch together with every subpatcher nested inside it
    pub fn unregister_patch(&mut self, patch_id: &str) -> Result<Patch, HostError> {
        let index = self
            .patches
            .iter()
            .position(|p| p.patch_id == patch_id)
            .ok_or_else(|| HostError::PatchNotFound(patch_id.to_string()))?;
        let removed = self.patches.remove(index);

        let children: Vec<String> = removed
            .objects()
            .iter()
            .filter_map(|o| o.subpatch.clone())
            .collect();
        for child in children {
            // already gone if the child was closed on its own
            let _ = self.unregister_patch(&child);
        }

        tracing::info!("Unregistered patch {}", patch_id);
        Ok(removed)
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patch(&self, patch_id: &str) -> Result<&Patch, HostError> {
        self.patches
            .iter()
            .find(|p| p.patch_id == patch_id)
            .ok_or_else(|| HostError::PatchNotFound(patch_id.to_string()))
    }

    pub fn patch_mut(&mut self, patch_id: &str) -> Result<&mut Patch, HostError> {
        self.patches
            .iter_mut()
            .find(|p| p.patch_id == patch_id)
            .ok_or_else(|| HostError::PatchNotFound(patch_id.to_string()))
    }

    /// The first registered patch
    pub fn frontmost(&self) -> Result<&Patch, HostError> {
        self.patches.first().ok_or(HostError::NoActivePatches)
    }

    /// Create an object box; subpatcher boxes also open their embedded patch
    pub fn add_object(&mut self, patch_id: &str, new: NewObject) -> Result<PatchObject, HostError> {
        let subpatch_name = patch::embeds_patch(&new.obj_type).then(|| {
            new.arguments
                .first()
                .and_then(|a| a.as_str())
                .unwrap_or("untitled")
                .to_string()
        });

        let patch = self.patch_mut(patch_id)?;
        let group = patch.group.clone();
        let varname = patch.add_object(new)?.varname.clone();

        if let Some(name) = subpatch_name {
            let child_id = self.register_patch(&name, group.as_deref());
            self.patch_mut(&child_id)?.parent = Some(patch_id.to_string());
            self.patch_mut(patch_id)?.object_mut(&varname)?.subpatch = Some(child_id);
        }
        Ok(self.patch(patch_id)?.object(&varname)?.clone())
    }

    /// Delete an object box, closing its embedded patch if it has one
    pub fn remove_object(&mut self, patch_id: &str, varname: &str) -> Result<PatchObject, HostError> {
        let removed = self.patch_mut(patch_id)?.remove_object(varname)?;
        if let Some(child) = &removed.subpatch {
            let _ = self.unregister_patch(child);
        }
        Ok(removed)
    }

    /// The patch enclosing `patch_id`
    pub fn parent_of(&self, patch_id: &str) -> Result<&Patch, HostError> {
        let parent_id = self
            .patch(patch_id)?
            .parent
            .as_deref()
            .ok_or_else(|| HostError::NoParent(patch_id.to_string()))?;
        self.patch(parent_id)
    }
}
