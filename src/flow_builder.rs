//! Builds a runtime [`Flow`] (and its macro library) from the JSON the
//! management API returns for `getDIDNumberData`/`getWorkspaceMacros`
//! (spec §3 Data Model, §4.B). The Go original's `types.FlowVars`/`Cell`
//! deserialization target was not present in the retrieved source
//! (`types/flow.go`/`types/cell.go` were filtered out of
//! `original_source/`), so the wire shape below is this crate's own,
//! grounded on the field names spec.md §3 names explicitly (`model.data`,
//! `K`/`K_before_interpolations` twins, named ports) rather than on a
//! transcribed Go struct.
//!
//! Wire shape:
//! ```json
//! {
//!   "rootCell": "cellA",
//!   "cells": [
//!     {
//!       "name": "cellA",
//!       "type": "LaunchModel",
//!       "data": { "dest": {"type": "str", "value": "{{cellX.to}}"} },
//!       "links": [ {"port": "default", "target": "cellB"} ]
//!     }
//!   ]
//! }
//! ```
//! Macros share the same `cells`/`links`/`rootCell` shape, wrapped as
//! `{"name": "...", "rootCell": "...", "cells": [...]}`.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::model::{Cell, CellId, CellKind, Flow, Link, ModelData, User};

#[derive(Debug, Deserialize)]
struct WireModelData {
    #[serde(rename = "type")]
    kind: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireLink {
    port: String,
    target: String,
    #[serde(rename = "targetPort", default = "default_port")]
    target_port: String,
}

fn default_port() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
struct WireCell {
    name: String,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default)]
    data: HashMap<String, WireModelData>,
    #[serde(default)]
    links: Vec<WireLink>,
}

#[derive(Debug, Deserialize)]
struct WireFlow {
    #[serde(rename = "rootCell")]
    root_cell: String,
    cells: Vec<WireCell>,
}

#[derive(Debug, Deserialize)]
struct WireMacro {
    name: String,
    #[serde(rename = "rootCell")]
    root_cell: String,
    cells: Vec<WireCell>,
}

fn convert_model_data(wire: WireModelData) -> Result<ModelData> {
    match wire.kind.as_str() {
        "str" => Ok(ModelData::Str(
            wire.value.as_str().unwrap_or_default().to_string(),
        )),
        "bool" => Ok(ModelData::Bool(wire.value.as_bool().unwrap_or(false))),
        "num" => Ok(ModelData::Num(wire.value.as_f64().unwrap_or(0.0))),
        "obj" => {
            let map = wire
                .value
                .as_object()
                .map(|m| {
                    m.iter()
                        .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                        .collect()
                })
                .unwrap_or_default();
            Ok(ModelData::Obj(map))
        }
        "arr" => {
            let items = wire
                .value
                .as_array()
                .map(|a| {
                    a.iter()
                        .map(|v| v.as_str().unwrap_or_default().to_string())
                        .collect()
                })
                .unwrap_or_default();
            Ok(ModelData::Arr(items))
        }
        other => Err(EngineError::flow_semantic(format!(
            "unknown model data type tag: {other}"
        ))),
    }
}

/// Builds a `CellKind` from the cell's type tag and its (already
/// deserialized) `model.data` map. Unknown type tags are a flow semantic
/// error (spec §7 taxonomy item 4): the interpreter treats the cell as
/// terminal rather than panicking, so this returns `Result` instead of
/// defaulting silently.
fn cell_kind(type_tag: &str, data: &HashMap<String, ModelData>) -> Result<CellKind> {
    let str_field = |key: &str| -> Option<String> {
        data.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
    };
    let num_field = |key: &str, default: f64| -> f64 {
        data.get(key).and_then(|v| v.as_num()).unwrap_or(default)
    };

    match type_tag {
        "LaunchModel" => Ok(CellKind::Launch),
        "SwitchModel" => {
            let on = str_field("on").unwrap_or_else(|| "value".to_string());
            let cases = match data.get("cases") {
                Some(ModelData::Obj(map)) => {
                    map.iter().map(|(case, port)| (case.clone(), port.clone())).collect()
                }
                _ => Vec::new(),
            };
            Ok(CellKind::Switch { on, cases })
        }
        "BridgeModel" => Ok(CellKind::Bridge {
            dest: str_field("dest").unwrap_or_default(),
            caller_id: str_field("callerId"),
            call_type: str_field("callType").unwrap_or_else(|| "extension".to_string()),
        }),
        "PlaybackModel" => Ok(CellKind::Playback {
            url: str_field("url").unwrap_or_default(),
            loop_count: data.get("loop").cloned(),
        }),
        "ProcessInputModel" => Ok(CellKind::ProcessInput {
            max_len: num_field("maxLen", 1.0) as usize,
            terminator: str_field("terminator")
                .and_then(|s| s.chars().next())
                .unwrap_or('#'),
            timeout_ms: num_field("timeoutMs", 5000.0) as u64,
        }),
        "DialModel" => Ok(CellKind::Dial {
            dest: str_field("dest").unwrap_or_default(),
            caller_id: str_field("callerId"),
            timeout_ms: num_field("timeoutMs", 30_000.0) as u64,
        }),
        "SetVariablesModel" => Ok(CellKind::SetVariables { values: data.clone() }),
        "WaitModel" => Ok(CellKind::Wait {
            duration_ms: num_field("durationMs", 1000.0) as u64,
        }),
        "SendDigitsModel" => Ok(CellKind::SendDigits {
            digits: str_field("digits").unwrap_or_default(),
        }),
        "MacroModel" => Ok(CellKind::Macro {
            name: str_field("name").unwrap_or_default(),
        }),
        "ConferenceModel" => Ok(CellKind::Conference {
            name: str_field("name").unwrap_or_default(),
        }),
        "RecordVoicemailModel" => Ok(CellKind::RecordVoicemail {
            trim: data.get("trim").and_then(|v| v.as_bool()).unwrap_or(false),
        }),
        other => Err(EngineError::flow_semantic(format!("unknown cell type: {other}"))),
    }
}

/// Converts one wire cell into a runtime `Cell` plus its outbound links
/// (still referring to targets by name; resolved to `CellId` once every
/// cell in the flow has been assigned an id).
fn convert_cell(id: CellId, wire: WireCell) -> Result<(Cell, Vec<(String, String, String)>)> {
    let mut data = HashMap::with_capacity(wire.data.len());
    for (key, value) in wire.data {
        data.insert(key, convert_model_data(value)?);
    }
    let kind = cell_kind(&wire.type_tag, &data)?;
    let mut cell = Cell::new(id, wire.name, kind);
    for (key, value) in data {
        cell = cell.with_data(key, value);
    }
    let links = wire
        .links
        .into_iter()
        .map(|l| (l.port, l.target, l.target_port))
        .collect();
    Ok((cell, links))
}

/// Shared core: turns a list of wire cells into id-indexed `cells` plus
/// resolved `links`, given the name each cell was declared under.
fn build_cells_and_links(wire_cells: Vec<WireCell>) -> Result<(HashMap<CellId, Cell>, Vec<Link>)> {
    let mut name_to_id = HashMap::new();
    let mut pending_links = Vec::new();
    let mut cells = HashMap::new();

    for (idx, wire_cell) in wire_cells.into_iter().enumerate() {
        let id = CellId(idx as u64);
        name_to_id.insert(wire_cell.name.clone(), id);
        let (cell, links) = convert_cell(id, wire_cell)?;
        pending_links.push((id, links));
        cells.insert(id, cell);
    }

    let mut links = Vec::new();
    for (source, cell_links) in pending_links {
        for (source_port, target_name, target_port) in cell_links {
            let target = name_to_id.get(&target_name).copied().ok_or_else(|| {
                EngineError::flow_semantic(format!(
                    "link from {source} targets unknown cell {target_name}"
                ))
            })?;
            links.push(Link {
                source,
                source_port,
                target,
                target_port,
            });
        }
    }
    Ok((cells, links))
}

/// Builds the top-level `Flow` for an `INCOMING_CALL`/`INCOMING_SIP_TRUNK`
/// dispatch (spec §4.H) from the raw `flow` JSON value returned by
/// `getDIDNumberData`.
pub fn build_flow(
    flow_id: impl Into<String>,
    user: User,
    flow_json: &Value,
    gateway: std::sync::Arc<dyn crate::gateway::GatewayClient>,
) -> Result<Flow> {
    let wire: WireFlow = serde_json::from_value(flow_json.clone())?;
    let (cells, links) = build_cells_and_links(wire.cells)?;
    let root_id = cells
        .values()
        .find(|c| c.name == wire.root_cell)
        .map(|c| c.id)
        .ok_or_else(|| EngineError::flow_semantic("flow root cell not found among its cells"))?;
    Ok(Flow::new(flow_id, user, root_id, cells, links, gateway))
}

/// Builds the macro library from `getWorkspaceMacros`'s JSON array, keyed
/// by macro name (spec §3 Flow: "macro library"; spec §4.E MacroModel
/// looks macros up by name).
pub fn build_macros(macros_json: &Value) -> Result<HashMap<String, crate::model::Macro>> {
    let wire_macros: Vec<WireMacro> = serde_json::from_value(macros_json.clone())?;
    let mut out = HashMap::new();
    for wire_macro in wire_macros {
        let (cells, links) = build_cells_and_links(wire_macro.cells)?;
        let root_id = cells
            .values()
            .find(|c| c.name == wire_macro.root_cell)
            .map(|c| c.id)
            .ok_or_else(|| {
                EngineError::flow_semantic(format!(
                    "macro {} root cell not found among its cells",
                    wire_macro.name
                ))
            })?;
        out.insert(
            wire_macro.name.clone(),
            crate::model::Macro {
                name: wire_macro.name,
                root_cell: root_id,
                cells,
                links,
            },
        );
    }
    Ok(out)
}
