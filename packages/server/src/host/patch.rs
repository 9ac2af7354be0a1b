//! Patch, object and patchline model.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use super::HostError;

/// Gap kept between a suggested position and the objects around it
const PLACEMENT_MARGIN: f64 = 50.0;
const PLACEMENT_ORIGIN: [f64; 2] = [50.0, 50.0];
/// Rows are filled left to right up to this x before moving down
const PLACEMENT_CANVAS_WIDTH: f64 = 1200.0;
const DEFAULT_OBJECT_SIZE: [f64; 2] = [50.0, 22.0];

/// Object classes that hold a patch of their own
pub const SUBPATCHER_CLASSES: &[&str] = &["patcher", "p", "jpatcher", "bpatcher", "poly~"];

/// Subpatcher classes whose inner patch is embedded and opened with the parent
pub(super) fn embeds_patch(obj_type: &str) -> bool {
    matches!(obj_type, "patcher" | "p" | "jpatcher" | "bpatcher")
}

/// Build a patch id from a patcher name: `<stem>_<8 random hex chars>`.
///
/// The file extension is dropped, and an empty or `Untitled` name maps to `patch`.
pub fn generate_patch_id(patcher_name: &str) -> String {
    let stem = patcher_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(patcher_name)
        .trim();
    let stem = if stem.is_empty() || stem.starts_with("Untitled") {
        "patch"
    } else {
        stem
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", stem, &suffix[..8])
}

/// Inlet / outlet counts for well-known object classes
fn port_counts(obj_type: &str) -> (usize, usize) {
    match obj_type {
        "comment" | "print" => (1, 0),
        "dac~" | "ezdac~" => (2, 0),
        "adc~" | "ezadc~" => (1, 2),
        "loadbang" => (1, 1),
        "button" | "toggle" | "bang" => (1, 1),
        "number" | "flonum" | "number~" => (1, 2),
        "message" | "metro" | "cycle~" | "phasor~" | "line~" => (2, 1),
        "+" | "-" | "*" | "/" | "+~" | "-~" | "*~" | "/~" => (2, 1),
        "gate" => (2, 1),
        "route" | "select" | "sel" => (2, 2),
        "pack" | "pak" => (2, 1),
        "unpack" => (1, 2),
        "trigger" | "t" => (1, 2),
        _ => (1, 1),
    }
}

/// One object box inside a patch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchObject {
    pub varname: String,
    pub obj_type: String,
    pub arguments: Vec<Value>,
    pub position: [f64; 2],
    pub size: [f64; 2],
    pub attributes: Map<String, Value>,
    pub hidden: bool,
    pub inlets: usize,
    pub outlets: usize,
    /// Patch id of the embedded patch, for subpatcher boxes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subpatch: Option<String>,
}

impl PatchObject {
    fn right_edge(&self) -> f64 {
        self.position[0] + self.size[0]
    }

    fn bottom_edge(&self) -> f64 {
        self.position[1] + self.size[1]
    }

    /// Whether this box spans any part of the rows `top..bottom`
    fn overlaps_rows(&self, top: f64, bottom: f64) -> bool {
        self.position[1] < bottom && self.bottom_edge() > top
    }

    pub fn is_subpatcher(&self) -> bool {
        SUBPATCHER_CLASSES.contains(&self.obj_type.as_str())
    }
}

/// Parameters for creating a new object box
#[derive(Debug, Clone, Default)]
pub struct NewObject {
    pub obj_type: String,
    pub position: [f64; 2],
    pub varname: Option<String>,
    pub arguments: Vec<Value>,
    pub attributes: Map<String, Value>,
}

/// A patchcord from one object's outlet to another object's inlet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patchline {
    pub src_varname: String,
    pub outlet: usize,
    pub dst_varname: String,
    pub inlet: usize,
}

impl fmt::Display for Patchline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] -> {}[{}]",
            self.src_varname, self.outlet, self.dst_varname, self.inlet
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Patch {
    pub patch_id: String,
    pub display_name: String,
    pub patcher_name: String,
    pub group: Option<String>,
    /// Patch id of the enclosing patch, for subpatchers
    pub parent: Option<String>,
    pub locked: bool,
    pub dirty: bool,
    objects: Vec<PatchObject>,
    lines: Vec<Patchline>,
    #[serde(skip)]
    next_object: u64,
}

impl Patch {
    pub fn new(patcher_name: &str, group: Option<&str>) -> Self {
        let display_name = patcher_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(patcher_name)
            .to_string();
        Self {
            patch_id: generate_patch_id(patcher_name),
            display_name,
            patcher_name: patcher_name.to_string(),
            group: group.map(str::to_string),
            parent: None,
            locked: false,
            dirty: false,
            objects: Vec::new(),
            lines: Vec::new(),
            next_object: 1,
        }
    }

    pub fn objects(&self) -> &[PatchObject] {
        &self.objects
    }

    pub fn lines(&self) -> &[Patchline] {
        &self.lines
    }

    pub fn object(&self, varname: &str) -> Result<&PatchObject, HostError> {
        self.objects
            .iter()
            .find(|o| o.varname == varname)
            .ok_or_else(|| HostError::ObjectNotFound(varname.to_string()))
    }

    pub fn object_mut(&mut self, varname: &str) -> Result<&mut PatchObject, HostError> {
        self.objects
            .iter_mut()
            .find(|o| o.varname == varname)
            .ok_or_else(|| HostError::ObjectNotFound(varname.to_string()))
    }

    /// Create an object box, assigning `obj_<n>` when no varname is given
    pub fn add_object(&mut self, new: NewObject) -> Result<&PatchObject, HostError> {
        let varname = match new.varname {
            Some(name) => {
                if self.objects.iter().any(|o| o.varname == name) {
                    return Err(HostError::DuplicateVarname(name));
                }
                name
            }
            None => self.next_varname(),
        };

        let (inlets, outlets) = port_counts(&new.obj_type);
        self.objects.push(PatchObject {
            varname,
            obj_type: new.obj_type,
            arguments: new.arguments,
            position: new.position,
            size: DEFAULT_OBJECT_SIZE,
            attributes: new.attributes,
            hidden: false,
            inlets,
            outlets,
            subpatch: None,
        });
        self.dirty = true;

        let last = self.objects.len() - 1;
        Ok(&self.objects[last])
    }

    /// Delete an object together with every patchline touching it
    pub fn remove_object(&mut self, varname: &str) -> Result<PatchObject, HostError> {
        let index = self
            .objects
            .iter()
            .position(|o| o.varname == varname)
            .ok_or_else(|| HostError::ObjectNotFound(varname.to_string()))?;
        self.lines
            .retain(|l| l.src_varname != varname && l.dst_varname != varname);
        self.dirty = true;
        Ok(self.objects.remove(index))
    }

    pub fn set_attribute(
        &mut self,
        varname: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), HostError> {
        let object = self.object_mut(varname)?;
        object.attributes.insert(attribute.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    pub fn set_hidden(&mut self, varname: &str, hidden: bool) -> Result<(), HostError> {
        self.object_mut(varname)?.hidden = hidden;
        self.dirty = true;
        Ok(())
    }

    /// Repaint one box; the patch contents do not change
    pub fn redraw(&self, varname: &str) -> Result<(), HostError> {
        let object = self.object(varname)?;
        tracing::info!("Object redrawn: {}", object.varname);
        Ok(())
    }

    pub fn connect(&mut self, line: Patchline) -> Result<(), HostError> {
        let src = self.object(&line.src_varname)?;
        if line.outlet >= src.outlets {
            return Err(HostError::OutletOutOfRange {
                varname: src.varname.clone(),
                index: line.outlet,
                count: src.outlets,
            });
        }
        let dst = self.object(&line.dst_varname)?;
        if line.inlet >= dst.inlets {
            return Err(HostError::InletOutOfRange {
                varname: dst.varname.clone(),
                index: line.inlet,
                count: dst.inlets,
            });
        }
        if self.lines.contains(&line) {
            return Err(HostError::ConnectionExists(line.to_string()));
        }
        self.lines.push(line);
        self.dirty = true;
        Ok(())
    }

    pub fn disconnect(&mut self, line: &Patchline) -> Result<(), HostError> {
        self.object(&line.src_varname)?;
        self.object(&line.dst_varname)?;
        let index = self
            .lines
            .iter()
            .position(|l| l == line)
            .ok_or_else(|| HostError::ConnectionNotFound(line.to_string()))?;
        self.lines.remove(index);
        self.dirty = true;
        Ok(())
    }

    /// Suggest a free spot for a box of `size`.
    ///
    /// Rows start at the top of the canvas. In each row the box goes to the
    /// right of every object it would share rows with; when that would run past
    /// the canvas width the search moves below those objects.
    pub fn avoid_rect_position(&self, size: [f64; 2]) -> [f64; 2] {
        let [width, height] = size;
        let mut top = PLACEMENT_ORIGIN[1];

        for _ in 0..=self.objects.len() {
            let bottom = top + height;
            let in_row: Vec<&PatchObject> = self
                .objects
                .iter()
                .filter(|o| o.overlaps_rows(top, bottom))
                .collect();

            let x = in_row
                .iter()
                .map(|o| o.right_edge())
                .fold(PLACEMENT_ORIGIN[0], f64::max)
                + PLACEMENT_MARGIN;
            if in_row.is_empty() || x + width <= PLACEMENT_CANVAS_WIDTH {
                return [x, top];
            }

            top = in_row
                .iter()
                .map(|o| o.bottom_edge())
                .fold(top, f64::max)
                + PLACEMENT_MARGIN;
        }

        let lowest = self
            .objects
            .iter()
            .map(PatchObject::bottom_edge)
            .fold(PLACEMENT_ORIGIN[1], f64::max);
        [PLACEMENT_ORIGIN[0] + PLACEMENT_MARGIN, lowest + PLACEMENT_MARGIN]
    }

    fn next_varname(&mut self) -> String {
        loop {
            let candidate = format!("obj_{}", self.next_object);
            self.next_object += 1;
            if !self.objects.iter().any(|o| o.varname == candidate) {
                return candidate;
            }
        }
    }
}
