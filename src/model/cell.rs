use std::collections::HashMap;

use super::call::Call;
use super::line_channel::LineChannel;

/// Arena index into a `Flow`'s cell table. Per the redesign notes, cells
/// reference each other by id rather than by pointer, so a flow graph with
/// cycles (e.g. a loop back to an earlier cell) never needs `Rc<RefCell<_>>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u64);

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// A single entry in a cell's `model.data` map. Mirrors the source
/// language's tagged `ModelData` variants exactly (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub enum ModelData {
    Str(String),
    Bool(bool),
    Obj(HashMap<String, String>),
    Arr(Vec<String>),
    Num(f64),
}

impl ModelData {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ModelData::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ModelData::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            ModelData::Num(n) => Some(*n),
            ModelData::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Type-tagged payload for each cell kind. A sum type with exhaustiveness
/// checking in place of the source's free-form string tag (design note:
/// "Polymorphic cells").
#[derive(Debug, Clone, PartialEq)]
pub enum CellKind {
    Launch,
    Switch { on: String, cases: Vec<(String, String)> },
    Bridge { dest: String, caller_id: Option<String>, call_type: String },
    Playback { url: String, loop_count: Option<ModelData> },
    ProcessInput { max_len: usize, terminator: char, timeout_ms: u64 },
    Dial { dest: String, caller_id: Option<String>, timeout_ms: u64 },
    SetVariables { values: HashMap<String, ModelData> },
    Wait { duration_ms: u64 },
    SendDigits { digits: String },
    Macro { name: String },
    Conference { name: String },
    RecordVoicemail { trim: bool },
}

impl CellKind {
    pub fn name(&self) -> &'static str {
        match self {
            CellKind::Launch => "LaunchModel",
            CellKind::Switch { .. } => "SwitchModel",
            CellKind::Bridge { .. } => "BridgeModel",
            CellKind::Playback { .. } => "PlaybackModel",
            CellKind::ProcessInput { .. } => "ProcessInputModel",
            CellKind::Dial { .. } => "DialModel",
            CellKind::SetVariables { .. } => "SetVariablesModel",
            CellKind::Wait { .. } => "WaitModel",
            CellKind::SendDigits { .. } => "SendDigitsModel",
            CellKind::Macro { .. } => "MacroModel",
            CellKind::Conference { .. } => "ConferenceModel",
            CellKind::RecordVoicemail { .. } => "RecordVoicemailModel",
        }
    }
}

/// A flow node. Holds its own data map plus the `event_vars` it publishes
/// once its handler has run (spec §3 Cell / §4.D).
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: CellId,
    pub name: String,
    pub kind: CellKind,
    pub data: HashMap<String, ModelData>,
    pub data_before_interpolations: HashMap<String, ModelData>,
    pub event_vars: HashMap<String, String>,
    /// The channel instance this cell last operated on (spec §3 Cell).
    /// Handlers that place a channel in a bridge record that relationship
    /// here via `HandlerContext::attach_channel`.
    pub current_channel: Option<LineChannel>,
    /// The call this cell is currently operating on, when it has placed
    /// one (spec §3 Cell: "an optional attached `Call`"). `BridgeModel`
    /// populates this so its `started`/`ended` `event_vars` can be read
    /// back from the call's own timestamps.
    pub attached_call: Option<Call>,
}

impl Cell {
    pub fn new(id: CellId, name: impl Into<String>, kind: CellKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            data: HashMap::new(),
            data_before_interpolations: HashMap::new(),
            event_vars: HashMap::new(),
            current_channel: None,
            attached_call: None,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: ModelData) -> Self {
        let key = key.into();
        self.data_before_interpolations.insert(key.clone(), value.clone());
        self.data.insert(key, value);
        self
    }
}
